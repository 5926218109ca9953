use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{Candidate, CandidateId, Grade, PositionId, Score};

/// Outcome of a single `decide` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AllocationDecision {
    Unchanged { reason: UnchangedReason },
    Change(AllocationChange),
}

impl AllocationDecision {
    pub(crate) fn unchanged(reason: UnchangedReason) -> Self {
        AllocationDecision::Unchanged { reason }
    }

    pub fn is_change(&self) -> bool {
        matches!(self, AllocationDecision::Change(_))
    }

    pub fn summary(&self) -> String {
        match self {
            AllocationDecision::Unchanged { reason } => {
                format!("unchanged ({})", reason.label())
            }
            AllocationDecision::Change(change) => match (change.position, change.score) {
                (Some(position), Some(score)) => format!(
                    "{} -> position {position} (score {score})",
                    change.reason.label()
                ),
                (Some(position), None) => {
                    format!("{} -> position {position} (unscored)", change.reason.label())
                }
                (None, _) => format!("{} -> unassigned", change.reason.label()),
            },
        }
    }
}

/// Why the engine left a candidate alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnchangedReason {
    Locked,
    IntentNotMatched,
    NotHigherScore,
    NoScores,
    /// Evidence of the wrong shape for the candidate's state, e.g. a raw score for a
    /// candidate still waiting on its declared intent.
    NotApplicable,
}

impl UnchangedReason {
    pub const fn label(self) -> &'static str {
        match self {
            UnchangedReason::Locked => "locked",
            UnchangedReason::IntentNotMatched => "intent-not-matched",
            UnchangedReason::NotHigherScore => "not-higher-score",
            UnchangedReason::NoScores => "no-scores",
            UnchangedReason::NotApplicable => "not-applicable",
        }
    }
}

/// Why an assignment changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeReason {
    InitialAssignment,
    IntentLocked,
    NoMatchProvisional,
    LockedIntentMatch,
    HigherScore,
    ManualReevaluation,
}

impl ChangeReason {
    pub const fn label(self) -> &'static str {
        match self {
            ChangeReason::InitialAssignment => "initial-assignment",
            ChangeReason::IntentLocked => "intent-locked",
            ChangeReason::NoMatchProvisional => "no-match-provisional",
            ChangeReason::LockedIntentMatch => "locked-intent-match",
            ChangeReason::HigherScore => "higher-score",
            ChangeReason::ManualReevaluation => "manual-reevaluation",
        }
    }

    pub const fn is_intake(self) -> bool {
        matches!(
            self,
            ChangeReason::InitialAssignment
                | ChangeReason::IntentLocked
                | ChangeReason::NoMatchProvisional
        )
    }
}

/// Target allocation for a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationChange {
    pub position: Option<PositionId>,
    pub score: Option<Score>,
    pub grade: Option<Grade>,
    pub locked: bool,
    pub no_match: bool,
    pub reason: ChangeReason,
}

impl AllocationChange {
    /// Produce the candidate's next state. The repository bumps `version` on commit.
    pub fn apply(
        &self,
        candidate: &Candidate,
        at: DateTime<Utc>,
    ) -> Result<Candidate, InvariantViolation> {
        if candidate.position_locked {
            return Err(InvariantViolation::new(
                candidate.id,
                format!(
                    "attempted {} on a locked assignment (position {:?})",
                    self.reason.label(),
                    candidate.current_position
                ),
            ));
        }
        if self.locked && !candidate.explicit_intent() {
            return Err(InvariantViolation::new(
                candidate.id,
                "lock requested for a candidate without declared intent",
            ));
        }
        if self.locked && self.position.is_none() {
            return Err(InvariantViolation::new(
                candidate.id,
                "lock requested without a resolved position",
            ));
        }

        let mut next = candidate.clone();
        next.current_position = self.position;
        next.current_score = self.score;
        next.current_grade = self.grade;
        next.position_locked = self.locked;
        next.no_match = self.no_match;
        if !self.reason.is_intake() {
            next.last_reallocated_at = Some(at);
            next.reallocation_count = next.reallocation_count.saturating_add(1);
        }
        Ok(next)
    }
}

/// A write that would break the lock or intent invariants. Always a programming defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("invariant violation on candidate {candidate_id}: {detail}")]
pub struct InvariantViolation {
    pub candidate_id: CandidateId,
    pub detail: String,
}

impl InvariantViolation {
    pub fn new(candidate_id: CandidateId, detail: impl Into<String>) -> Self {
        Self {
            candidate_id,
            detail: detail.into(),
        }
    }
}
