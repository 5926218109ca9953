//! Candidate-position allocation.
//!
//! Intake scores a new candidate against every active position and commits one allocation;
//! new or reactivated positions trigger a reallocation batch over existing candidates. A
//! candidate whose declared target position has been matched is locked and never moved
//! again. All assignment decisions are made by the pure [`engine::decide`].

pub mod collaborators;
pub mod domain;
pub mod engine;
pub mod intake;
pub mod ledger;
pub mod reallocation;
pub mod reevaluation;
pub mod repository;
pub mod router;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use collaborators::{
    CandidateEvaluator, CollaboratorError, Evaluation, EvaluationError, IntentResolutionError,
    IntentResolver, IntentVerdict, RawEvaluation, RawIntentVerdict,
};
pub use domain::{
    AllocationState, Candidate, CandidateId, CandidateProfile, CandidateSubmission,
    DeclaredIntent, Grade, Position, PositionDraft, PositionId, Score,
};
pub use engine::{
    decide, AllocationChange, AllocationDecision, ChangeReason, Evidence, InvariantViolation,
    UnchangedReason,
};
pub use intake::IntakeOutcome;
pub use ledger::{
    AllocationHistory, AuditAction, AuditEntry, EvaluationMethod, ScoreRecord, TriggerEvent,
};
pub use reallocation::{FailureKind, ReallocationChange, ReallocationFailure, ReallocationReport};
pub use reevaluation::ReevaluationOutcome;
pub use repository::{AllocationRepository, CandidateCommit, RepositoryError};
pub use router::allocation_router;
pub use service::{
    AllocationError, AllocationService, CandidatePage, CandidateView, GradeDistribution,
    PositionCandidate, PositionRegistration, PositionView,
};
pub use store::{InMemoryAllocationStore, LedgerCounts};
