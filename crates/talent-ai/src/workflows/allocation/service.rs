use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::collaborators::{CandidateEvaluator, Collaborators, IntentResolver};
use super::domain::{
    AllocationState, Candidate, CandidateId, CandidateSubmission, Grade, Position, PositionDraft,
    PositionId, Score,
};
use super::engine::InvariantViolation;
use super::intake::{IntakeOutcome, IntakeProcessor};
use super::ledger::{
    latest_by_candidate, AllocationHistory, AuditAction, AuditEntry, ScoreRecord, TriggerEvent,
};
use super::reallocation::{ReallocationReport, ReallocationScheduler};
use super::reevaluation::{ReevaluationOutcome, Reevaluator};
use super::repository::{AllocationRepository, RepositoryError};
use crate::config::AllocationConfig;

/// Read model for a single candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateView {
    pub candidate_id: CandidateId,
    pub name: String,
    pub state: AllocationState,
    pub explicit_position: Option<String>,
    pub current_position: Option<PositionId>,
    pub current_score: Option<Score>,
    pub current_grade: Option<Grade>,
    pub position_locked: bool,
    pub no_match: bool,
    pub pending_evaluation: Vec<PositionId>,
    pub version: u64,
    pub reallocation_count: u32,
    pub last_reallocated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Candidate> for CandidateView {
    fn from(candidate: &Candidate) -> Self {
        Self {
            candidate_id: candidate.id,
            name: candidate.profile.name.clone(),
            state: candidate.state(),
            explicit_position: candidate.explicit_position_text().map(str::to_string),
            current_position: candidate.current_position,
            current_score: candidate.current_score,
            current_grade: candidate.current_grade,
            position_locked: candidate.position_locked,
            no_match: candidate.no_match,
            pending_evaluation: candidate.pending_evaluations.iter().copied().collect(),
            version: candidate.version,
            reallocation_count: candidate.reallocation_count,
            last_reallocated_at: candidate.last_reallocated_at,
            created_at: candidate.created_at,
        }
    }
}

/// Page size used when a listing does not ask for one.
pub const DEFAULT_PAGE_LIMIT: usize = 20;
/// Upper bound on a single page of candidates.
pub const MAX_PAGE_LIMIT: usize = 100;

/// One page of candidates ordered by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePage {
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
    pub candidates: Vec<CandidateView>,
}

/// Head count per grade over the latest score each candidate holds for a position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeDistribution {
    #[serde(rename = "A")]
    pub a: usize,
    #[serde(rename = "B")]
    pub b: usize,
    #[serde(rename = "C")]
    pub c: usize,
    #[serde(rename = "D")]
    pub d: usize,
}

impl GradeDistribution {
    fn record(&mut self, grade: Grade) {
        match grade {
            Grade::A => self.a += 1,
            Grade::B => self.b += 1,
            Grade::C => self.c += 1,
            Grade::D => self.d += 1,
        }
    }
}

/// Read model for a position with its allocation and scoring counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    /// Candidates currently assigned here.
    pub allocated: usize,
    /// Candidates holding at least one score for this position.
    pub evaluated: usize,
    /// Evaluated candidates whose latest score reached the baseline.
    pub qualified: usize,
    pub grades: GradeDistribution,
}

/// A qualified candidate as seen from one position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionCandidate {
    pub candidate_id: CandidateId,
    pub name: String,
    pub state: AllocationState,
    pub score: Score,
    pub grade: Grade,
    pub rationale: String,
    /// The candidate is assigned to this position right now.
    pub is_current: bool,
    pub position_locked: bool,
    pub scored_at: DateTime<Utc>,
}

/// A freshly stored position and the reallocation it triggered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRegistration {
    pub position: Position,
    pub reallocation: ReallocationReport,
}

/// Service facade over intake, reallocation, and re-evaluation.
pub struct AllocationService<R, E, I> {
    repository: Arc<R>,
    intake: IntakeProcessor<R, E, I>,
    scheduler: ReallocationScheduler<R, E, I>,
    reevaluator: Reevaluator<R, E, I>,
}

impl<R, E, I> AllocationService<R, E, I>
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    pub fn new(repository: Arc<R>, evaluator: Arc<E>, resolver: Arc<I>, config: AllocationConfig) -> Self {
        let collaborators = Arc::new(Collaborators::new(
            evaluator,
            resolver,
            config.evaluation_timeout,
            config.intent_timeout,
            config.intent_confidence_threshold,
        ));

        Self {
            intake: IntakeProcessor::new(repository.clone(), collaborators.clone(), config.clone()),
            scheduler: ReallocationScheduler::new(
                repository.clone(),
                collaborators.clone(),
                config.clone(),
            ),
            reevaluator: Reevaluator::new(repository.clone(), collaborators, config),
            repository,
        }
    }

    /// Score and allocate a new candidate.
    ///
    /// Intake lists the catalog before scoring and commits afterwards. A position created in
    /// between is missing from the candidate's scores, and its reallocation batch may have
    /// listed candidates before this one existed. Such positions are offered once the intake
    /// commit has landed.
    pub async fn process_intake(
        &self,
        submission: CandidateSubmission,
    ) -> Result<IntakeOutcome, AllocationError> {
        let outcome = self.intake.process(submission).await?;
        let candidate_id = outcome.candidate_id;

        let missed = self.positions_missed_at_intake(candidate_id)?;
        if missed.is_empty() {
            return Ok(outcome);
        }

        let changes = self
            .scheduler
            .offer(candidate_id, &missed, TriggerEvent::NewPosition)
            .await?;
        info!(
            %candidate_id,
            offered = missed.len(),
            changed = changes.len(),
            "positions created during intake offered"
        );

        let candidate = self
            .repository
            .fetch_candidate(candidate_id)?
            .ok_or(AllocationError::CandidateNotFound(candidate_id))?;
        Ok(IntakeOutcome::from_candidate(&candidate, outcome.evaluation_failures))
    }

    /// Active positions the candidate has neither a score nor a pending retry for.
    fn positions_missed_at_intake(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Vec<Position>, AllocationError> {
        let Some(candidate) = self.repository.fetch_candidate(candidate_id)? else {
            return Ok(Vec::new());
        };
        if candidate.position_locked {
            return Ok(Vec::new());
        }

        let scored: BTreeSet<PositionId> = self
            .repository
            .score_records(candidate_id)?
            .into_iter()
            .map(|record| record.position_id)
            .collect();
        Ok(self
            .repository
            .list_active_positions()?
            .into_iter()
            .filter(|position| {
                !scored.contains(&position.id)
                    && !candidate.pending_evaluations.contains(&position.id)
                    && candidate.current_position != Some(position.id)
            })
            .collect())
    }

    /// Register a position and immediately offer it to every unlocked candidate.
    pub async fn create_position(
        &self,
        draft: PositionDraft,
    ) -> Result<PositionRegistration, AllocationError> {
        let position = self.repository.insert_position(draft).map_err(|err| match err {
            RepositoryError::DuplicatePosition(name) => AllocationError::PositionConflict(name),
            other => AllocationError::Repository(other),
        })?;

        self.repository.append_audit(
            AuditEntry::system(
                AuditAction::PositionCreated,
                json!({ "name": position.name }),
                position.created_at,
            )
            .for_position(position.id),
        )?;
        info!(position_id = %position.id, name = %position.name, "position created");

        let reallocation = self.on_position_created(position.id).await?;
        Ok(PositionRegistration {
            position,
            reallocation,
        })
    }

    /// Run the reallocation batch for a position that just became available.
    pub async fn on_position_created(
        &self,
        position_id: PositionId,
    ) -> Result<ReallocationReport, AllocationError> {
        self.scheduler.run(position_id, TriggerEvent::NewPosition).await
    }

    pub async fn reactivate_position(
        &self,
        position_id: PositionId,
    ) -> Result<PositionRegistration, AllocationError> {
        let position = self.toggle_position(position_id, true)?;
        let reallocation = self
            .scheduler
            .run(position_id, TriggerEvent::PositionReactivated)
            .await?;
        Ok(PositionRegistration {
            position,
            reallocation,
        })
    }

    /// Take a position out of the catalog. Existing assignments are left alone.
    pub fn deactivate_position(&self, position_id: PositionId) -> Result<Position, AllocationError> {
        self.toggle_position(position_id, false)
    }

    fn toggle_position(
        &self,
        position_id: PositionId,
        active: bool,
    ) -> Result<Position, AllocationError> {
        let current = self
            .repository
            .fetch_position(position_id)?
            .ok_or(AllocationError::PositionNotFound(position_id))?;
        if current.active == active {
            warn!(%position_id, active, "position already in requested state");
        }

        let position = self.repository.set_position_active(position_id, active)?;
        let action = if active {
            AuditAction::PositionReactivated
        } else {
            AuditAction::PositionDeactivated
        };
        self.repository.append_audit(
            AuditEntry::system(
                action,
                json!({ "name": position.name, "was_active": current.active }),
                Utc::now(),
            )
            .for_position(position_id),
        )?;
        info!(%position_id, active, "position availability changed");
        Ok(position)
    }

    /// Fill in missing scores and re-run the allocation rules for one candidate.
    pub async fn reevaluate(
        &self,
        candidate_id: CandidateId,
    ) -> Result<ReevaluationOutcome, AllocationError> {
        self.reevaluator.reevaluate(candidate_id).await
    }

    pub fn candidate(&self, candidate_id: CandidateId) -> Result<CandidateView, AllocationError> {
        let candidate = self
            .repository
            .fetch_candidate(candidate_id)?
            .ok_or(AllocationError::CandidateNotFound(candidate_id))?;
        Ok(CandidateView::from(&candidate))
    }

    pub fn score_records(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Vec<ScoreRecord>, AllocationError> {
        self.ensure_candidate(candidate_id)?;
        Ok(self.repository.score_records(candidate_id)?)
    }

    pub fn allocation_history(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Vec<AllocationHistory>, AllocationError> {
        self.ensure_candidate(candidate_id)?;
        Ok(self.repository.allocation_history(candidate_id)?)
    }

    pub fn audit_trail(&self, candidate_id: CandidateId) -> Result<Vec<AuditEntry>, AllocationError> {
        self.ensure_candidate(candidate_id)?;
        Ok(self.repository.audit_for_candidate(candidate_id)?)
    }

    /// Page through every candidate in id order. `limit` is clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn list_candidates(
        &self,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<CandidatePage, AllocationError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let candidates = self.repository.list_all_candidates()?;
        Ok(CandidatePage {
            total: candidates.len(),
            skip,
            limit,
            candidates: candidates
                .iter()
                .skip(skip)
                .take(limit)
                .map(CandidateView::from)
                .collect(),
        })
    }

    /// Active positions with their counts.
    pub fn list_positions(&self) -> Result<Vec<PositionView>, AllocationError> {
        let candidates = self.repository.list_all_candidates()?;
        self.repository
            .list_active_positions()?
            .into_iter()
            .map(|position| self.position_view(position, &candidates))
            .collect()
    }

    /// Any position, active or not.
    pub fn position(&self, position_id: PositionId) -> Result<PositionView, AllocationError> {
        let position = self
            .repository
            .fetch_position(position_id)?
            .ok_or(AllocationError::PositionNotFound(position_id))?;
        let candidates = self.repository.list_all_candidates()?;
        self.position_view(position, &candidates)
    }

    /// Qualified candidates for a position graded `min_grade` or better, best score first.
    /// Only each candidate's latest score for the position counts.
    pub fn candidates_for_position(
        &self,
        position_id: PositionId,
        min_grade: Grade,
    ) -> Result<Vec<PositionCandidate>, AllocationError> {
        if self.repository.fetch_position(position_id)?.is_none() {
            return Err(AllocationError::PositionNotFound(position_id));
        }

        let latest = latest_by_candidate(&self.repository.score_records_for_position(position_id)?);
        let mut rows = Vec::new();
        for record in latest.into_values() {
            if !record.qualified || record.grade > min_grade {
                continue;
            }
            let Some(candidate) = self.repository.fetch_candidate(record.candidate_id)? else {
                continue;
            };
            rows.push(PositionCandidate {
                candidate_id: candidate.id,
                name: candidate.profile.name.clone(),
                state: candidate.state(),
                score: record.score,
                grade: record.grade,
                rationale: record.rationale,
                is_current: candidate.current_position == Some(position_id),
                position_locked: candidate.position_locked,
                scored_at: record.computed_at,
            });
        }
        rows.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        Ok(rows)
    }

    fn position_view(
        &self,
        position: Position,
        candidates: &[Candidate],
    ) -> Result<PositionView, AllocationError> {
        let latest = latest_by_candidate(&self.repository.score_records_for_position(position.id)?);
        let mut grades = GradeDistribution::default();
        for record in latest.values() {
            grades.record(record.grade);
        }
        Ok(PositionView {
            allocated: candidates
                .iter()
                .filter(|candidate| candidate.current_position == Some(position.id))
                .count(),
            evaluated: latest.len(),
            qualified: latest.values().filter(|record| record.qualified).count(),
            grades,
            position,
        })
    }

    fn ensure_candidate(&self, candidate_id: CandidateId) -> Result<(), AllocationError> {
        match self.repository.fetch_candidate(candidate_id)? {
            Some(_) => Ok(()),
            None => Err(AllocationError::CandidateNotFound(candidate_id)),
        }
    }
}

/// Error raised by the allocation service.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("no active positions are available for allocation")]
    EmptyPositionCatalog,
    #[error("candidate {0} not found")]
    CandidateNotFound(CandidateId),
    #[error("position {0} not found")]
    PositionNotFound(PositionId),
    #[error("position {0} is not active")]
    InactivePosition(PositionId),
    #[error("position named '{0}' already exists")]
    PositionConflict(String),
    #[error(transparent)]
    InvariantViolation(#[from] InvariantViolation),
    #[error("reallocation of position {} hit {} invariant violation(s)", .0.position_id, .0.violations.len())]
    InvariantViolations(Box<ReallocationReport>),
    #[error("candidate {candidate_id} still conflicted after {attempts} commit attempts")]
    PersistenceConflict {
        candidate_id: CandidateId,
        attempts: u32,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl AllocationError {
    /// Stable machine-readable code for API payloads.
    pub const fn code(&self) -> &'static str {
        match self {
            AllocationError::EmptyPositionCatalog => "POSITION_CATALOG_EMPTY",
            AllocationError::CandidateNotFound(_) => "CANDIDATE_NOT_FOUND",
            AllocationError::PositionNotFound(_) => "POSITION_NOT_FOUND",
            AllocationError::InactivePosition(_) => "POSITION_INACTIVE",
            AllocationError::PositionConflict(_) => "POSITION_CONFLICT",
            AllocationError::InvariantViolation(_) | AllocationError::InvariantViolations(_) => {
                "INVARIANT_VIOLATION"
            }
            AllocationError::PersistenceConflict { .. } => "PERSISTENCE_CONFLICT",
            AllocationError::Repository(_) => "REPOSITORY_ERROR",
        }
    }
}
