use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::collaborators::{CandidateEvaluator, Collaborators, EvaluationError, IntentResolver};
use super::domain::{Candidate, CandidateId, Position, PositionId};
use super::engine::{
    self, AllocationDecision, Evidence, InvariantViolation, ScoreMap, UnchangedReason,
};
use super::ledger::{
    latest_by_position, AllocationHistory, AuditAction, AuditEntry, EvaluationMethod, ScoreRecord,
    TriggerEvent,
};
use super::repository::{AllocationRepository, CandidateCommit, RepositoryError};
use super::service::AllocationError;
use crate::config::AllocationConfig;

/// What a manual re-evaluation did for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReevaluationOutcome {
    pub candidate_id: CandidateId,
    pub decision: AllocationDecision,
    /// Positions scored during this call.
    pub evaluated: Vec<PositionId>,
    pub pending_evaluation: Vec<PositionId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evaluation_failures: Vec<EvaluationError>,
    pub version: u64,
}

/// Fills in missing scores for one candidate and re-runs the allocation rules over
/// everything known about it.
pub struct Reevaluator<R, E, I> {
    repository: Arc<R>,
    collaborators: Arc<Collaborators<E, I>>,
    config: AllocationConfig,
}

impl<R, E, I> Reevaluator<R, E, I>
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

    pub async fn reevaluate(
        &self,
        candidate_id: CandidateId,
    ) -> Result<ReevaluationOutcome, AllocationError> {
        let max_attempts = self.config.max_commit_attempts.max(1);

        for attempt in 1..=max_attempts {
            let candidate = self
                .repository
                .fetch_candidate(candidate_id)?
                .ok_or(AllocationError::CandidateNotFound(candidate_id))?;

            if candidate.position_locked {
                debug!(%candidate_id, "locked candidate, nothing to re-evaluate");
                return Ok(ReevaluationOutcome {
                    candidate_id,
                    decision: AllocationDecision::unchanged(UnchangedReason::Locked),
                    evaluated: Vec::new(),
                    pending_evaluation: candidate.pending_evaluations.iter().copied().collect(),
                    evaluation_failures: Vec::new(),
                    version: candidate.version,
                });
            }

            let positions = self.repository.list_active_positions()?;
            let known = latest_by_position(&self.repository.score_records(candidate_id)?);
            let targets: Vec<Position> = positions
                .iter()
                .filter(|position| {
                    candidate.pending_evaluations.contains(&position.id)
                        || !known.contains_key(&position.id)
                })
                .cloned()
                .collect();

            let settled = self
                .collaborators
                .evaluate_all(&candidate.profile, &targets, self.config.evaluation_fanout)
                .await;

            let now = Utc::now();
            let mut scores: ScoreMap = known
                .iter()
                .map(|(position_id, record)| (*position_id, record.evaluation()))
                .collect();
            let mut pending = candidate.pending_evaluations.clone();
            let mut records = Vec::new();
            let mut failures = Vec::new();
            for (position_id, result) in settled {
                match result {
                    Ok(evaluation) => {
                        pending.remove(&position_id);
                        records.push(ScoreRecord::from_evaluation(
                            candidate_id,
                            position_id,
                            &evaluation,
                            EvaluationMethod::Reevaluation,
                            self.config.baseline_score,
                            now,
                        ));
                        scores.insert(position_id, evaluation);
                    }
                    Err(err) => {
                        warn!(%candidate_id, %position_id, error = %err, "evaluation still pending");
                        pending.insert(position_id);
                        failures.push(err);
                    }
                }
            }
            records.sort_by_key(|record| record.position_id);
            failures.sort_by_key(EvaluationError::position_id);

            let decision = engine::decide(
                &candidate,
                &Evidence::Reevaluation {
                    positions: &positions,
                    scores: &scores,
                },
            );

            let evaluated: Vec<PositionId> = records.iter().map(|record| record.position_id).collect();
            let pending_evaluation: Vec<PositionId> = pending.iter().copied().collect();

            match self.commit(&candidate, &decision, pending, records, now) {
                Ok(version) => {
                    info!(
                        %candidate_id,
                        version,
                        decision = %decision.summary(),
                        "candidate re-evaluated"
                    );
                    return Ok(ReevaluationOutcome {
                        candidate_id,
                        decision,
                        evaluated,
                        pending_evaluation,
                        evaluation_failures: failures,
                        version,
                    });
                }
                Err(AllocationError::Repository(RepositoryError::Conflict {
                    expected, found, ..
                })) => {
                    debug!(%candidate_id, attempt, expected, found, "stale candidate version, recomputing");
                }
                Err(AllocationError::Repository(RepositoryError::LockedAssignment(id))) => {
                    let violation = InvariantViolation::new(
                        id,
                        "repository refused a locked-assignment write",
                    );
                    error!(candidate_id = %id, %violation, "invariant violation during re-evaluation");
                    return Err(violation.into());
                }
                Err(err) => return Err(err),
            }
        }

        warn!(%candidate_id, max_attempts, "re-evaluation gave up after repeated version conflicts");
        Err(AllocationError::PersistenceConflict {
            candidate_id,
            attempts: max_attempts,
        })
    }

    /// Persist the outcome and return the stored version.
    fn commit(
        &self,
        candidate: &Candidate,
        decision: &AllocationDecision,
        pending: BTreeSet<PositionId>,
        records: Vec<ScoreRecord>,
        now: DateTime<Utc>,
    ) -> Result<u64, AllocationError> {
        let (next, history) = match decision {
            AllocationDecision::Unchanged { .. } if pending == candidate.pending_evaluations => {
                for record in records {
                    self.repository.append_score_record(record)?;
                }
                return Ok(candidate.version);
            }
            AllocationDecision::Unchanged { .. } => (candidate.clone(), None),
            AllocationDecision::Change(change) => {
                let next = change.apply(candidate, now).map_err(|violation| {
                    error!(candidate_id = %candidate.id, %violation, "invariant violation during re-evaluation");
                    violation
                })?;
                let history = next.current_position.map(|new_position| AllocationHistory {
                    candidate_id: candidate.id,
                    old_position: candidate.current_position,
                    new_position,
                    old_score: candidate.current_score,
                    new_score: next.current_score,
                    trigger: TriggerEvent::ManualReevaluation,
                    reason: change.reason,
                    recorded_at: now,
                });
                (next, history)
            }
        };

        let mut next = next;
        next.pending_evaluations = pending;

        let mut audit = vec![AuditEntry::system(
            AuditAction::ReevaluationCompleted,
            json!({
                "decision": decision.summary(),
                "evaluated": records.len(),
                "pending_evaluation": next.pending_evaluations,
            }),
            now,
        )
        .for_candidate(candidate.id)];
        if let Some(history) = &history {
            audit.push(AuditEntry::allocation_changed(
                history,
                candidate.version,
                next.position_locked,
                next.no_match,
            ));
        }

        let stored = self.repository.commit(CandidateCommit {
            candidate: next,
            expected_version: Some(candidate.version),
            scores: records,
            history,
            audit,
        })?;
        Ok(stored.version)
    }
}
