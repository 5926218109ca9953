//! Pure allocation rules. Nothing in here performs I/O; callers gather evidence from the
//! evaluator and intent resolver and hand it to [`decide`].

mod policy;
mod rules;

use std::collections::BTreeMap;

pub use policy::{
    AllocationChange, AllocationDecision, ChangeReason, InvariantViolation, UnchangedReason,
};

use super::collaborators::Evaluation;
use super::domain::{AllocationState, Candidate, Position, PositionId};

/// Settled evaluations keyed by position. Iteration order is ascending position id.
pub type ScoreMap = BTreeMap<PositionId, Evaluation>;

/// What the caller learned before asking for a decision.
#[derive(Debug, Clone, Copy)]
pub enum Evidence<'a> {
    /// Every active position, and the evaluations that succeeded at intake.
    Intake {
        positions: &'a [Position],
        scores: &'a ScoreMap,
    },
    /// A freshly computed score for a newly introduced position.
    NewScore {
        position: &'a Position,
        evaluation: &'a Evaluation,
    },
    /// The intent resolver's verdict for a newly introduced position. `evaluation` is the
    /// position's score when one could be computed.
    IntentVerdict {
        position: &'a Position,
        matched: bool,
        evaluation: Option<&'a Evaluation>,
    },
    /// Latest known score for each active position, gathered by a manual re-evaluation.
    Reevaluation {
        positions: &'a [Position],
        scores: &'a ScoreMap,
    },
}

/// Compute the allocation for `candidate` given `evidence`.
pub fn decide(candidate: &Candidate, evidence: &Evidence<'_>) -> AllocationDecision {
    match candidate.state() {
        AllocationState::Locked => AllocationDecision::unchanged(UnchangedReason::Locked),
        AllocationState::Pending => decide_pending(candidate, evidence),
        AllocationState::Auto => decide_auto(candidate, evidence),
    }
}

fn decide_pending(candidate: &Candidate, evidence: &Evidence<'_>) -> AllocationDecision {
    let text = candidate.explicit_position_text().unwrap_or_default();

    match *evidence {
        Evidence::Intake { positions, scores } => {
            if let Some(position) = rules::identity_match(positions, text) {
                return lock_on(position.id, scores.get(&position.id), ChangeReason::IntentLocked);
            }
            let best = rules::best_of(positions, scores);
            AllocationDecision::Change(AllocationChange {
                position: best.map(|(position, _)| position.id),
                score: best.map(|(_, evaluation)| evaluation.score),
                grade: best.map(|(_, evaluation)| evaluation.grade),
                locked: false,
                no_match: true,
                reason: ChangeReason::NoMatchProvisional,
            })
        }
        Evidence::IntentVerdict {
            position,
            matched,
            evaluation,
        } => {
            if matched {
                lock_on(position.id, evaluation, ChangeReason::LockedIntentMatch)
            } else {
                AllocationDecision::unchanged(UnchangedReason::IntentNotMatched)
            }
        }
        Evidence::Reevaluation { positions, scores } => {
            if let Some(position) = rules::identity_match(positions, text) {
                return lock_on(
                    position.id,
                    scores.get(&position.id),
                    ChangeReason::LockedIntentMatch,
                );
            }
            improve_on(candidate, positions, scores, true)
        }
        Evidence::NewScore { .. } => AllocationDecision::unchanged(UnchangedReason::NotApplicable),
    }
}

fn decide_auto(candidate: &Candidate, evidence: &Evidence<'_>) -> AllocationDecision {
    match *evidence {
        Evidence::Intake { positions, scores } => match rules::best_of(positions, scores) {
            Some((position, evaluation)) => AllocationDecision::Change(AllocationChange {
                position: Some(position.id),
                score: Some(evaluation.score),
                grade: Some(evaluation.grade),
                locked: false,
                no_match: false,
                reason: ChangeReason::InitialAssignment,
            }),
            None => AllocationDecision::unchanged(UnchangedReason::NoScores),
        },
        Evidence::NewScore {
            position,
            evaluation,
        } => {
            if rules::improves(candidate.current_score, evaluation.score) {
                AllocationDecision::Change(AllocationChange {
                    position: Some(position.id),
                    score: Some(evaluation.score),
                    grade: Some(evaluation.grade),
                    locked: false,
                    no_match: false,
                    reason: ChangeReason::HigherScore,
                })
            } else {
                AllocationDecision::unchanged(UnchangedReason::NotHigherScore)
            }
        }
        Evidence::Reevaluation { positions, scores } => {
            improve_on(candidate, positions, scores, false)
        }
        Evidence::IntentVerdict { .. } => {
            AllocationDecision::unchanged(UnchangedReason::NotApplicable)
        }
    }
}

fn lock_on(
    position: PositionId,
    evaluation: Option<&Evaluation>,
    reason: ChangeReason,
) -> AllocationDecision {
    AllocationDecision::Change(AllocationChange {
        position: Some(position),
        score: evaluation.map(|evaluation| evaluation.score),
        grade: evaluation.map(|evaluation| evaluation.grade),
        locked: true,
        no_match: false,
        reason,
    })
}

fn improve_on(
    candidate: &Candidate,
    positions: &[Position],
    scores: &ScoreMap,
    no_match: bool,
) -> AllocationDecision {
    let Some((position, evaluation)) = rules::best_of(positions, scores) else {
        return AllocationDecision::unchanged(UnchangedReason::NoScores);
    };

    if !rules::outranks(
        (position, evaluation),
        candidate.current_position,
        candidate.current_score,
    ) {
        return AllocationDecision::unchanged(UnchangedReason::NotHigherScore);
    }

    AllocationDecision::Change(AllocationChange {
        position: Some(position.id),
        score: Some(evaluation.score),
        grade: Some(evaluation.grade),
        locked: false,
        no_match,
        reason: ChangeReason::ManualReevaluation,
    })
}
