use serde::Serialize;

use super::domain::{Candidate, CandidateId, Position, PositionDraft, PositionId};
use super::ledger::{AllocationHistory, AuditEntry, ScoreRecord};

/// Everything written for one candidate in a single transaction.
#[derive(Debug, Clone)]
pub struct CandidateCommit {
    pub candidate: Candidate,
    /// `None` creates the candidate; `Some(v)` succeeds only if the stored version is `v`.
    pub expected_version: Option<u64>,
    pub scores: Vec<ScoreRecord>,
    pub history: Option<AllocationHistory>,
    pub audit: Vec<AuditEntry>,
}

/// Storage boundary consumed by the allocation workflow.
///
/// Implementations must apply [`CandidateCommit`] atomically and refuse any commit that
/// changes a locked candidate's assignment.
pub trait AllocationRepository: Send + Sync {
    fn next_candidate_id(&self) -> Result<CandidateId, RepositoryError>;
    /// Upsert the candidate and append its ledger entries. Returns the stored candidate
    /// with its new version.
    fn commit(&self, commit: CandidateCommit) -> Result<Candidate, RepositoryError>;
    fn fetch_candidate(&self, id: CandidateId) -> Result<Option<Candidate>, RepositoryError>;
    fn list_all_candidates(&self) -> Result<Vec<Candidate>, RepositoryError>;

    fn insert_position(&self, draft: PositionDraft) -> Result<Position, RepositoryError>;
    fn set_position_active(
        &self,
        id: PositionId,
        active: bool,
    ) -> Result<Position, RepositoryError>;
    fn fetch_position(&self, id: PositionId) -> Result<Option<Position>, RepositoryError>;
    fn list_active_positions(&self) -> Result<Vec<Position>, RepositoryError>;

    fn append_score_record(&self, record: ScoreRecord) -> Result<(), RepositoryError>;
    fn append_audit(&self, entry: AuditEntry) -> Result<(), RepositoryError>;
    fn score_records(&self, id: CandidateId) -> Result<Vec<ScoreRecord>, RepositoryError>;
    fn score_records_for_position(
        &self,
        id: PositionId,
    ) -> Result<Vec<ScoreRecord>, RepositoryError>;
    fn allocation_history(&self, id: CandidateId)
        -> Result<Vec<AllocationHistory>, RepositoryError>;
    fn audit_for_candidate(&self, id: CandidateId) -> Result<Vec<AuditEntry>, RepositoryError>;
    fn audit_for_position(&self, id: PositionId) -> Result<Vec<AuditEntry>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum RepositoryError {
    #[error("persistence conflict on candidate {candidate_id}: expected version {expected}, found {found}")]
    Conflict {
        candidate_id: CandidateId,
        expected: u64,
        found: u64,
    },
    #[error("candidate {0} already exists")]
    DuplicateCandidate(CandidateId),
    #[error("position named '{0}' already exists")]
    DuplicatePosition(String),
    #[error("record not found")]
    NotFound,
    #[error("refused to change locked assignment of candidate {0}")]
    LockedAssignment(CandidateId),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
