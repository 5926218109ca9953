//! Append-only ledgers. None of these types expose update or delete, so history survives any
//! number of reallocations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::collaborators::Evaluation;
use super::domain::{CandidateId, Grade, PositionId, Score};
use super::engine::ChangeReason;

/// Which flow produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMethod {
    Intake,
    Reallocation,
    Reevaluation,
}

/// Immutable result of one evaluator call for a (candidate, position) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub candidate_id: CandidateId,
    pub position_id: PositionId,
    pub score: Score,
    pub grade: Grade,
    pub rationale: String,
    /// `score >= baseline`. Informational only.
    pub qualified: bool,
    pub method: EvaluationMethod,
    pub computed_at: DateTime<Utc>,
}

impl ScoreRecord {
    pub fn from_evaluation(
        candidate_id: CandidateId,
        position_id: PositionId,
        evaluation: &Evaluation,
        method: EvaluationMethod,
        baseline: u8,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            candidate_id,
            position_id,
            score: evaluation.score,
            grade: evaluation.grade,
            rationale: evaluation.rationale.clone(),
            qualified: evaluation.score.value() >= baseline,
            method,
            computed_at,
        }
    }

    pub fn evaluation(&self) -> Evaluation {
        Evaluation {
            score: self.score,
            grade: self.grade,
            rationale: self.rationale.clone(),
        }
    }
}

/// What triggered an assignment mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerEvent {
    Intake,
    NewPosition,
    PositionReactivated,
    ManualReevaluation,
}

/// One entry per committed assignment mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationHistory {
    pub candidate_id: CandidateId,
    pub old_position: Option<PositionId>,
    pub new_position: PositionId,
    pub old_score: Option<Score>,
    pub new_score: Option<Score>,
    pub trigger: TriggerEvent,
    pub reason: ChangeReason,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CandidateCreated,
    AllocationChanged,
    PositionCreated,
    PositionReactivated,
    PositionDeactivated,
    ReallocationCompleted,
    ReevaluationCompleted,
    EvaluationDeferred,
}

/// System action record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub operator: String,
    pub action: AuditAction,
    pub candidate_id: Option<CandidateId>,
    pub position_id: Option<PositionId>,
    pub details: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub const SYSTEM_OPERATOR: &'static str = "system";

    pub fn system(action: AuditAction, details: Value, recorded_at: DateTime<Utc>) -> Self {
        Self {
            operator: Self::SYSTEM_OPERATOR.to_string(),
            action,
            candidate_id: None,
            position_id: None,
            details,
            recorded_at,
        }
    }

    pub fn for_candidate(mut self, candidate_id: CandidateId) -> Self {
        self.candidate_id = Some(candidate_id);
        self
    }

    pub fn for_position(mut self, position_id: PositionId) -> Self {
        self.position_id = Some(position_id);
        self
    }

    pub(crate) fn allocation_changed(
        history: &AllocationHistory,
        version: u64,
        locked: bool,
        no_match: bool,
    ) -> Self {
        Self::system(
            AuditAction::AllocationChanged,
            json!({
                "trigger": history.trigger,
                "reason": history.reason,
                "old_position": history.old_position,
                "new_position": history.new_position,
                "old_score": history.old_score,
                "new_score": history.new_score,
                "position_locked": locked,
                "no_match": no_match,
                "from_version": version,
            }),
            history.recorded_at,
        )
        .for_candidate(history.candidate_id)
        .for_position(history.new_position)
    }
}

/// Append-only store of score records.
#[derive(Debug, Default, Clone)]
pub struct ScoreStore {
    records: Vec<ScoreRecord>,
}

impl ScoreStore {
    pub fn append(&mut self, record: ScoreRecord) {
        self.records.push(record);
    }

    pub fn for_candidate(&self, candidate_id: CandidateId) -> Vec<ScoreRecord> {
        self.records
            .iter()
            .filter(|record| record.candidate_id == candidate_id)
            .cloned()
            .collect()
    }

    pub fn for_position(&self, position_id: PositionId) -> Vec<ScoreRecord> {
        self.records
            .iter()
            .filter(|record| record.position_id == position_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Collapse a record sequence to the last record seen per position.
pub fn latest_by_position<'a>(
    records: impl IntoIterator<Item = &'a ScoreRecord>,
) -> BTreeMap<PositionId, ScoreRecord> {
    let mut latest = BTreeMap::new();
    for record in records {
        latest.insert(record.position_id, record.clone());
    }
    latest
}

/// Collapse a record sequence to the last record seen per candidate.
pub fn latest_by_candidate<'a>(
    records: impl IntoIterator<Item = &'a ScoreRecord>,
) -> BTreeMap<CandidateId, ScoreRecord> {
    let mut latest = BTreeMap::new();
    for record in records {
        latest.insert(record.candidate_id, record.clone());
    }
    latest
}

/// Append-only log of assignment mutations.
#[derive(Debug, Default, Clone)]
pub struct AllocationHistoryLog {
    entries: Vec<AllocationHistory>,
}

impl AllocationHistoryLog {
    pub fn append(&mut self, entry: AllocationHistory) {
        self.entries.push(entry);
    }

    pub fn for_candidate(&self, candidate_id: CandidateId) -> Vec<AllocationHistory> {
        self.entries
            .iter()
            .filter(|entry| entry.candidate_id == candidate_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Append-only audit trail.
#[derive(Debug, Default, Clone)]
pub struct AuditLedger {
    entries: Vec<AuditEntry>,
}

impl AuditLedger {
    pub fn append(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    pub fn for_candidate(&self, candidate_id: CandidateId) -> Vec<AuditEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.candidate_id == Some(candidate_id))
            .cloned()
            .collect()
    }

    pub fn for_position(&self, position_id: PositionId) -> Vec<AuditEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.position_id == Some(position_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
