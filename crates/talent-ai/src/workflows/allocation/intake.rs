use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::collaborators::{CandidateEvaluator, Collaborators, EvaluationError, IntentResolver};
use super::domain::{
    AllocationState, Candidate, CandidateId, CandidateSubmission, Grade, PositionId, Score,
};
use super::engine::{self, AllocationDecision, Evidence, ScoreMap};
use super::ledger::{
    AllocationHistory, AuditAction, AuditEntry, EvaluationMethod, ScoreRecord, TriggerEvent,
};
use super::repository::{AllocationRepository, CandidateCommit};
use super::service::AllocationError;
use crate::config::AllocationConfig;

/// Result of a single intake, as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntakeOutcome {
    pub candidate_id: CandidateId,
    pub state: AllocationState,
    pub current_position: Option<PositionId>,
    pub current_score: Option<Score>,
    pub current_grade: Option<Grade>,
    pub position_locked: bool,
    pub no_match: bool,
    pub pending_evaluation: Vec<PositionId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evaluation_failures: Vec<EvaluationError>,
}

impl IntakeOutcome {
    pub(crate) fn from_candidate(candidate: &Candidate, evaluation_failures: Vec<EvaluationError>) -> Self {
        Self {
            candidate_id: candidate.id,
            state: candidate.state(),
            current_position: candidate.current_position,
            current_score: candidate.current_score,
            current_grade: candidate.current_grade,
            position_locked: candidate.position_locked,
            no_match: candidate.no_match,
            pending_evaluation: candidate.pending_evaluations.iter().copied().collect(),
            evaluation_failures,
        }
    }
}

/// Scores a new candidate against the whole active catalog and commits one allocation.
pub struct IntakeProcessor<R, E, I> {
    repository: Arc<R>,
    collaborators: Arc<Collaborators<E, I>>,
    config: AllocationConfig,
}

impl<R, E, I> IntakeProcessor<R, E, I>
where
    R: AllocationRepository,
    E: CandidateEvaluator,
    I: IntentResolver,
{
    pub fn new(
        repository: Arc<R>,
        collaborators: Arc<Collaborators<E, I>>,
        config: AllocationConfig,
    ) -> Self {
        Self {
            repository,
            collaborators,
            config,
        }
    }

    pub async fn process(
        &self,
        submission: CandidateSubmission,
    ) -> Result<IntakeOutcome, AllocationError> {
        let positions = self.repository.list_active_positions()?;
        if positions.is_empty() {
            warn!(candidate = %submission.profile.name, "intake rejected: no active positions");
            return Err(AllocationError::EmptyPositionCatalog);
        }

        let candidate_id = self.repository.next_candidate_id()?;
        let settled = self
            .collaborators
            .evaluate_all(&submission.profile, &positions, self.config.evaluation_fanout)
            .await;

        let mut scores = ScoreMap::new();
        let mut failures = Vec::new();
        for (position_id, result) in settled {
            match result {
                Ok(evaluation) => {
                    scores.insert(position_id, evaluation);
                }
                Err(err) => {
                    warn!(%candidate_id, %position_id, error = %err, "evaluation pending retry");
                    failures.push(err);
                }
            }
        }
        failures.sort_by_key(EvaluationError::position_id);

        let now = Utc::now();
        let mut shell = Candidate::new(candidate_id, submission.profile, submission.intent, now);
        shell.pending_evaluations = failures.iter().map(EvaluationError::position_id).collect();

        let decision = engine::decide(
            &shell,
            &Evidence::Intake {
                positions: &positions,
                scores: &scores,
            },
        );
        let (candidate, history) = match &decision {
            AllocationDecision::Change(change) => {
                let candidate = change.apply(&shell, now)?;
                let history = candidate.current_position.map(|new_position| AllocationHistory {
                    candidate_id,
                    old_position: None,
                    new_position,
                    old_score: None,
                    new_score: candidate.current_score,
                    trigger: TriggerEvent::Intake,
                    reason: change.reason,
                    recorded_at: now,
                });
                (candidate, history)
            }
            AllocationDecision::Unchanged { .. } => (shell, None),
        };

        let records: Vec<ScoreRecord> = scores
            .iter()
            .map(|(position_id, evaluation)| {
                ScoreRecord::from_evaluation(
                    candidate_id,
                    *position_id,
                    evaluation,
                    EvaluationMethod::Intake,
                    self.config.baseline_score,
                    now,
                )
            })
            .collect();

        let audit = AuditEntry::system(
            AuditAction::CandidateCreated,
            json!({
                "decision": decision.summary(),
                "explicit_intent": candidate.explicit_position_text(),
                "position_locked": candidate.position_locked,
                "no_match": candidate.no_match,
                "evaluated": records.len(),
                "pending_evaluation": candidate.pending_evaluations,
            }),
            now,
        )
        .for_candidate(candidate_id);
        let audit = match candidate.current_position {
            Some(position_id) => audit.for_position(position_id),
            None => audit,
        };

        let stored = self.repository.commit(CandidateCommit {
            candidate,
            expected_version: None,
            scores: records,
            history,
            audit: vec![audit],
        })?;

        info!(
            candidate_id = %stored.id,
            state = stored.state().label(),
            position = ?stored.current_position,
            score = ?stored.current_score,
            pending = stored.pending_evaluations.len(),
            "candidate intake allocated"
        );

        Ok(IntakeOutcome::from_candidate(&stored, failures))
    }
}
