use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::collaborators::{CandidateEvaluator, Collaborators, Evaluation, IntentResolver};
use super::domain::{AllocationState, Candidate, CandidateId, Position, PositionId, Score};
use super::engine::{self, AllocationDecision, ChangeReason, Evidence, InvariantViolation};
use super::ledger::{
    AllocationHistory, AuditAction, AuditEntry, EvaluationMethod, ScoreRecord, TriggerEvent,
};
use super::repository::{AllocationRepository, CandidateCommit, RepositoryError};
use super::service::AllocationError;
use crate::config::AllocationConfig;

/// One committed reassignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReallocationChange {
    pub candidate_id: CandidateId,
    pub old_position: Option<PositionId>,
    pub new_position: PositionId,
    pub old_score: Option<Score>,
    pub new_score: Option<Score>,
    pub reason: ChangeReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Evaluation,
    IntentResolution,
    PersistenceConflict,
    Repository,
    TaskAborted,
}

/// Per-candidate failure isolated from the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReallocationFailure {
    pub candidate_id: CandidateId,
    pub kind: FailureKind,
    pub message: String,
}

/// Summary of one reallocation run for a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReallocationReport {
    pub position_id: PositionId,
    pub trigger: TriggerEvent,
    pub scanned: usize,
    pub changes: Vec<ReallocationChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ReallocationFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<InvariantViolation>,
}

#[derive(Debug, Default)]
struct CandidateRun {
    change: Option<ReallocationChange>,
    failure: Option<ReallocationFailure>,
    violation: Option<InvariantViolation>,
}

impl CandidateRun {
    fn unchanged() -> Self {
        Self::default()
    }

    fn failed(candidate_id: CandidateId, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            failure: Some(ReallocationFailure {
                candidate_id,
                kind,
                message: message.into(),
            }),
            ..Self::default()
        }
    }

    fn violated(violation: InvariantViolation) -> Self {
        Self {
            violation: Some(violation),
            ..Self::default()
        }
    }
}

/// Re-applies the allocation rules to every candidate when a position appears.
pub struct ReallocationScheduler<R, E, I> {
    repository: Arc<R>,
    collaborators: Arc<Collaborators<E, I>>,
    config: AllocationConfig,
}

impl<R, E, I> Clone for ReallocationScheduler<R, E, I> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            collaborators: Arc::clone(&self.collaborators),
            config: self.config.clone(),
        }
    }
}

impl<R, E, I> ReallocationScheduler<R, E, I>
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
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

    /// Run the batch for `position_id`. Per-candidate failures land in the report; the
    /// call only fails when the position is unusable or an invariant was violated.
    pub async fn run(
        &self,
        position_id: PositionId,
        trigger: TriggerEvent,
    ) -> Result<ReallocationReport, AllocationError> {
        let position = self
            .repository
            .fetch_position(position_id)?
            .ok_or(AllocationError::PositionNotFound(position_id))?;
        if !position.active {
            return Err(AllocationError::InactivePosition(position_id));
        }

        let candidates = self.repository.list_all_candidates()?;
        let mut report = ReallocationReport {
            position_id,
            trigger,
            scanned: candidates.len(),
            changes: Vec::new(),
            failures: Vec::new(),
            violations: Vec::new(),
        };

        let position = Arc::new(position);
        let semaphore = Arc::new(Semaphore::new(self.config.reallocation_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut task_candidates = HashMap::new();

        for candidate in candidates {
            if candidate.position_locked {
                debug!(candidate_id = %candidate.id, "locked candidate skipped");
                continue;
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let scheduler = self.clone();
            let position = Arc::clone(&position);
            let candidate_id = candidate.id;
            let handle = tasks.spawn(async move {
                let _permit = permit;
                scheduler
                    .reallocate_candidate(candidate_id, &position, trigger)
                    .await
            });
            task_candidates.insert(handle.id(), candidate_id);
        }

        while let Some(joined) = tasks.join_next().await {
            let run = match joined {
                Ok(run) => run,
                Err(err) => {
                    let candidate_id = task_candidates.get(&err.id()).copied();
                    error!(?candidate_id, error = %err, "reallocation task aborted");
                    match candidate_id {
                        Some(candidate_id) => CandidateRun::failed(
                            candidate_id,
                            FailureKind::TaskAborted,
                            err.to_string(),
                        ),
                        None => continue,
                    }
                }
            };
            if let Some(change) = run.change {
                report.changes.push(change);
            }
            if let Some(failure) = run.failure {
                report.failures.push(failure);
            }
            if let Some(violation) = run.violation {
                report.violations.push(violation);
            }
        }

        report.changes.sort_by_key(|change| change.candidate_id);
        report.failures.sort_by_key(|failure| failure.candidate_id);
        report.violations.sort_by_key(|violation| violation.candidate_id);

        let audit = AuditEntry::system(
            AuditAction::ReallocationCompleted,
            json!({
                "trigger": trigger,
                "scanned": report.scanned,
                "changed": report.changes.len(),
                "failed": report.failures.len(),
                "violations": report.violations.len(),
            }),
            Utc::now(),
        )
        .for_position(position_id);
        if let Err(err) = self.repository.append_audit(audit) {
            warn!(%position_id, error = %err, "failed to record reallocation audit entry");
        }

        info!(
            %position_id,
            scanned = report.scanned,
            changed = report.changes.len(),
            failed = report.failures.len(),
            "reallocation finished"
        );

        if !report.violations.is_empty() {
            error!(
                %position_id,
                violations = report.violations.len(),
                "reallocation attempted to mutate locked candidates"
            );
            return Err(AllocationError::InvariantViolations(Box::new(report)));
        }

        Ok(report)
    }

    /// Offer `positions` to a single candidate, one after another. Covers positions whose
    /// batch listed candidates before this one was stored.
    pub(crate) async fn offer(
        &self,
        candidate_id: CandidateId,
        positions: &[Position],
        trigger: TriggerEvent,
    ) -> Result<Vec<ReallocationChange>, AllocationError> {
        let mut changes = Vec::new();
        for position in positions {
            let run = self.reallocate_candidate(candidate_id, position, trigger).await;
            if let Some(violation) = run.violation {
                return Err(AllocationError::InvariantViolation(violation));
            }
            if let Some(failure) = run.failure {
                warn!(
                    %candidate_id,
                    position_id = %position.id,
                    kind = ?failure.kind,
                    message = %failure.message,
                    "late position offer failed"
                );
            }
            changes.extend(run.change);
        }
        Ok(changes)
    }

    async fn reallocate_candidate(
        &self,
        candidate_id: CandidateId,
        position: &Position,
        trigger: TriggerEvent,
    ) -> CandidateRun {
        let max_attempts = self.config.max_commit_attempts.max(1);

        for attempt in 1..=max_attempts {
            let candidate = match self.repository.fetch_candidate(candidate_id) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => {
                    return CandidateRun::failed(
                        candidate_id,
                        FailureKind::Repository,
                        RepositoryError::NotFound.to_string(),
                    )
                }
                Err(err) => {
                    return CandidateRun::failed(candidate_id, FailureKind::Repository, err.to_string())
                }
            };

            let gathered = match self.gather(&candidate, position).await {
                Ok(gathered) => gathered,
                Err(run) => return run,
            };

            match self.apply(&candidate, position, trigger, gathered) {
                Err(RepositoryError::Conflict { expected, found, .. }) => {
                    debug!(
                        %candidate_id,
                        attempt,
                        expected,
                        found,
                        "stale candidate version, recomputing"
                    );
                    continue;
                }
                Err(RepositoryError::LockedAssignment(id)) => {
                    let violation =
                        InvariantViolation::new(id, "repository refused a locked-assignment write");
                    error!(candidate_id = %id, %violation, "invariant violation during reallocation");
                    return CandidateRun::violated(violation);
                }
                Err(err) => {
                    return CandidateRun::failed(candidate_id, FailureKind::Repository, err.to_string())
                }
                Ok(run) => return run,
            }
        }

        warn!(%candidate_id, max_attempts, "giving up after repeated version conflicts");
        CandidateRun::failed(
            candidate_id,
            FailureKind::PersistenceConflict,
            format!("version conflict persisted across {max_attempts} attempts"),
        )
    }

    /// External calls for one candidate. Only suspension point of the per-candidate flow.
    async fn gather(&self, candidate: &Candidate, position: &Position) -> Result<Gathered, CandidateRun> {
        match candidate.state() {
            AllocationState::Locked => Ok(Gathered::Skip),
            AllocationState::Pending => {
                let text = candidate.explicit_position_text().unwrap_or_default();
                let verdict = self
                    .collaborators
                    .resolve_intent(text, position)
                    .await
                    .map_err(|err| {
                        warn!(candidate_id = %candidate.id, error = %err, "intent resolution failed");
                        CandidateRun::failed(candidate.id, FailureKind::IntentResolution, err.to_string())
                    })?;
                if !verdict.matched {
                    return Ok(Gathered::Intent {
                        matched: false,
                        evaluation: None,
                        evaluation_failure: None,
                    });
                }
                match self.collaborators.evaluate(&candidate.profile, position).await {
                    Ok(evaluation) => Ok(Gathered::Intent {
                        matched: true,
                        evaluation: Some(evaluation),
                        evaluation_failure: None,
                    }),
                    Err(err) => {
                        warn!(candidate_id = %candidate.id, error = %err, "locking without a score");
                        Ok(Gathered::Intent {
                            matched: true,
                            evaluation: None,
                            evaluation_failure: Some(err.to_string()),
                        })
                    }
                }
            }
            AllocationState::Auto => {
                match self.collaborators.evaluate(&candidate.profile, position).await {
                    Ok(evaluation) => Ok(Gathered::Score(evaluation)),
                    Err(err) => {
                        warn!(candidate_id = %candidate.id, error = %err, "evaluation failed");
                        Ok(Gathered::Deferred(err.to_string()))
                    }
                }
            }
        }
    }

    /// Record a failed evaluation as pending so a later re-evaluation retries it.
    fn defer(
        &self,
        candidate: &Candidate,
        position: &Position,
        trigger: TriggerEvent,
        message: &str,
    ) -> Result<CandidateRun, RepositoryError> {
        let failed = || CandidateRun::failed(candidate.id, FailureKind::Evaluation, message);
        if candidate.pending_evaluations.contains(&position.id) {
            return Ok(failed());
        }

        let mut next = candidate.clone();
        next.pending_evaluations.insert(position.id);
        let audit = AuditEntry::system(
            AuditAction::EvaluationDeferred,
            json!({
                "trigger": trigger,
                "error": message,
                "pending_evaluation": next.pending_evaluations,
                "from_version": candidate.version,
            }),
            Utc::now(),
        )
        .for_candidate(candidate.id)
        .for_position(position.id);

        let stored = self.repository.commit(CandidateCommit {
            candidate: next,
            expected_version: Some(candidate.version),
            scores: Vec::new(),
            history: None,
            audit: vec![audit],
        })?;
        debug!(
            candidate_id = %stored.id,
            version = stored.version,
            position_id = %position.id,
            "evaluation deferred"
        );
        Ok(failed())
    }

    /// Decide and commit. Synchronous; a `Conflict` error asks the caller to start over.
    fn apply(
        &self,
        candidate: &Candidate,
        position: &Position,
        trigger: TriggerEvent,
        gathered: Gathered,
    ) -> Result<CandidateRun, RepositoryError> {
        let (decision, evaluation, evaluation_failure) = match &gathered {
            Gathered::Skip => return Ok(CandidateRun::unchanged()),
            Gathered::Deferred(message) => return self.defer(candidate, position, trigger, message),
            Gathered::Score(evaluation) => (
                engine::decide(
                    candidate,
                    &Evidence::NewScore {
                        position,
                        evaluation,
                    },
                ),
                Some(evaluation),
                None,
            ),
            Gathered::Intent {
                matched,
                evaluation,
                evaluation_failure,
            } => (
                engine::decide(
                    candidate,
                    &Evidence::IntentVerdict {
                        position,
                        matched: *matched,
                        evaluation: evaluation.as_ref(),
                    },
                ),
                evaluation.as_ref(),
                evaluation_failure.clone(),
            ),
        };

        let now = Utc::now();
        let record = evaluation.map(|evaluation| {
            ScoreRecord::from_evaluation(
                candidate.id,
                position.id,
                evaluation,
                EvaluationMethod::Reallocation,
                self.config.baseline_score,
                now,
            )
        });

        let change = match decision {
            AllocationDecision::Unchanged { reason } => {
                debug!(candidate_id = %candidate.id, reason = reason.label(), "candidate unchanged");
                if let Some(record) = record {
                    self.repository.append_score_record(record)?;
                }
                return Ok(CandidateRun::unchanged());
            }
            AllocationDecision::Change(change) => change,
        };

        let mut next = match change.apply(candidate, now) {
            Ok(next) => next,
            Err(violation) => {
                error!(candidate_id = %candidate.id, %violation, "invariant violation during reallocation");
                return Ok(CandidateRun::violated(violation));
            }
        };
        if evaluation_failure.is_some() {
            next.pending_evaluations.insert(position.id);
        }

        let history = AllocationHistory {
            candidate_id: candidate.id,
            old_position: candidate.current_position,
            new_position: position.id,
            old_score: candidate.current_score,
            new_score: next.current_score,
            trigger,
            reason: change.reason,
            recorded_at: now,
        };
        let audit = AuditEntry::allocation_changed(
            &history,
            candidate.version,
            next.position_locked,
            next.no_match,
        );

        let stored = self.repository.commit(CandidateCommit {
            candidate: next,
            expected_version: Some(candidate.version),
            scores: record.into_iter().collect(),
            history: Some(history.clone()),
            audit: vec![audit],
        })?;

        info!(
            candidate_id = %stored.id,
            version = stored.version,
            reason = change.reason.label(),
            old_position = ?history.old_position,
            new_position = %history.new_position,
            "candidate reallocated"
        );

        Ok(CandidateRun {
            change: Some(ReallocationChange {
                candidate_id: candidate.id,
                old_position: history.old_position,
                new_position: history.new_position,
                old_score: history.old_score,
                new_score: history.new_score,
                reason: change.reason,
            }),
            failure: evaluation_failure.map(|message| ReallocationFailure {
                candidate_id: candidate.id,
                kind: FailureKind::Evaluation,
                message,
            }),
            violation: None,
        })
    }
}

enum Gathered {
    Skip,
    Score(Evaluation),
    /// The new position could not be scored; it joins the candidate's pending set.
    Deferred(String),
    Intent {
        matched: bool,
        evaluation: Option<Evaluation>,
        evaluation_failure: Option<String>,
    },
}
