use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::config::AllocationConfig;
use crate::workflows::allocation::collaborators::{
    CandidateEvaluator, CollaboratorError, Evaluation, IntentResolver, RawEvaluation,
    RawIntentVerdict,
};
use crate::workflows::allocation::domain::{
    normalize_title, Candidate, CandidateId, CandidateProfile, CandidateSubmission,
    DeclaredIntent, Position, PositionDraft, PositionId, Score,
};
use crate::workflows::allocation::ledger::{AllocationHistory, AuditEntry, ScoreRecord};
use crate::workflows::allocation::repository::{
    AllocationRepository, CandidateCommit, RepositoryError,
};
use crate::workflows::allocation::store::InMemoryAllocationStore;
use crate::workflows::allocation::{allocation_router, AllocationService};

pub(super) fn config() -> AllocationConfig {
    AllocationConfig {
        evaluation_fanout: 4,
        reallocation_concurrency: 4,
        evaluation_timeout: Duration::from_millis(200),
        intent_timeout: Duration::from_millis(200),
        max_commit_attempts: 3,
        intent_confidence_threshold: 0.8,
        baseline_score: 60,
    }
}

pub(super) fn profile(name: &str) -> CandidateProfile {
    CandidateProfile {
        name: name.to_string(),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        phone: None,
        skills: vec!["rust".to_string(), "sql".to_string()],
        work_experience: vec!["4 years building payment services".to_string()],
        education: vec!["BSc Computer Science".to_string()],
        certifications: Vec::new(),
        self_evaluation: None,
    }
}

pub(super) fn submission(name: &str) -> CandidateSubmission {
    CandidateSubmission {
        profile: profile(name),
        intent: None,
    }
}

pub(super) fn submission_with_intent(name: &str, target: &str) -> CandidateSubmission {
    CandidateSubmission {
        profile: profile(name),
        intent: Some(DeclaredIntent {
            position_text: target.to_string(),
            source: Some(format!("Objective: {target}")),
        }),
    }
}

pub(super) fn draft(name: &str) -> PositionDraft {
    PositionDraft {
        name: name.to_string(),
        description: format!("{name} opening"),
        requirements: vec!["rust".to_string()],
        nice_to_have: Vec::new(),
    }
}

pub(super) fn position(id: u64, name: &str) -> Position {
    Position {
        id: PositionId(id),
        name: name.to_string(),
        description: String::new(),
        requirements: Vec::new(),
        nice_to_have: Vec::new(),
        active: true,
        created_at: Utc::now(),
    }
}

pub(super) fn evaluation(score: i64) -> Evaluation {
    Evaluation::validate(RawEvaluation {
        score,
        grade: None,
        rationale: format!("scored {score}"),
    })
    .expect("valid evaluation")
}

pub(super) fn score(value: i64) -> Score {
    Score::new(value).expect("valid score")
}

pub(super) fn candidate(id: u64, intent: Option<&str>) -> Candidate {
    let mut candidate = Candidate::new(
        CandidateId(id),
        profile(&format!("candidate-{id}")),
        intent.map(|text| DeclaredIntent {
            position_text: text.to_string(),
            source: None,
        }),
        Utc::now(),
    );
    candidate.version = 1;
    candidate
}

/// How the scripted evaluator answers for one (candidate, position) pair.
#[derive(Debug, Clone)]
pub(super) enum Script {
    Score(i64),
    Fail,
    Slow(Duration, i64),
    Malformed(i64),
}

/// Deterministic evaluator keyed by candidate name and position name.
#[derive(Default)]
pub(super) struct ScriptedEvaluator {
    scripts: Mutex<HashMap<(String, String), Script>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedEvaluator {
    pub(super) fn script(&self, candidate: &str, position: &str, script: Script) {
        self.scripts
            .lock()
            .expect("script mutex poisoned")
            .insert((candidate.to_string(), normalize_title(position)), script);
    }

    pub(super) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("call mutex poisoned").clone()
    }

    pub(super) fn calls_for(&self, candidate: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(name, _)| name == candidate)
            .count()
    }
}

#[async_trait]
impl CandidateEvaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        profile: &CandidateProfile,
        position: &Position,
    ) -> Result<RawEvaluation, CollaboratorError> {
        let key = (profile.name.clone(), normalize_title(&position.name));
        self.calls
            .lock()
            .expect("call mutex poisoned")
            .push((profile.name.clone(), position.name.clone()));
        let script = self
            .scripts
            .lock()
            .expect("script mutex poisoned")
            .get(&key)
            .cloned();

        let raw = |score: i64| RawEvaluation {
            score,
            grade: None,
            rationale: format!("{} vs {}", profile.name, position.name),
        };
        match script {
            Some(Script::Score(score)) | Some(Script::Malformed(score)) => Ok(raw(score)),
            Some(Script::Slow(delay, score)) => {
                tokio::time::sleep(delay).await;
                Ok(raw(score))
            }
            Some(Script::Fail) | None => Err(CollaboratorError::Unavailable(
                "scoring backend unreachable".to_string(),
            )),
        }
    }
}

/// Evaluator that holds every call open for `hold` and records the peak number of calls in
/// flight at once. Always answers `score`.
pub(super) struct GaugeEvaluator {
    hold: Duration,
    score: i64,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl GaugeEvaluator {
    pub(super) fn new(hold: Duration, score: i64) -> Self {
        Self {
            hold,
            score,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub(super) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(super) fn reset(&self) {
        self.peak.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl CandidateEvaluator for GaugeEvaluator {
    async fn evaluate(
        &self,
        profile: &CandidateProfile,
        position: &Position,
    ) -> Result<RawEvaluation, CollaboratorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(RawEvaluation {
            score: self.score,
            grade: None,
            rationale: format!("{} vs {}", profile.name, position.name),
        })
    }
}

/// Intent resolver that matches on configured (text, position) pairs.
#[derive(Default)]
pub(super) struct ScriptedResolver {
    verdicts: Mutex<HashMap<(String, String), RawIntentVerdict>>,
    failing: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedResolver {
    pub(super) fn matches(&self, text: &str, position: &str, confidence: Option<f32>) {
        self.verdicts.lock().expect("verdict mutex poisoned").insert(
            (normalize_title(text), normalize_title(position)),
            RawIntentVerdict {
                matches: true,
                confidence,
                rationale: format!("{position} satisfies {text}"),
            },
        );
    }

    pub(super) fn fail_for(&self, position: &str) {
        self.failing
            .lock()
            .expect("failing mutex poisoned")
            .insert(normalize_title(position));
    }

    pub(super) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("call mutex poisoned").clone()
    }
}

#[async_trait]
impl IntentResolver for ScriptedResolver {
    async fn matches_intent(
        &self,
        explicit_position_text: &str,
        position: &Position,
    ) -> Result<RawIntentVerdict, CollaboratorError> {
        self.calls
            .lock()
            .expect("call mutex poisoned")
            .push((explicit_position_text.to_string(), position.name.clone()));
        if self
            .failing
            .lock()
            .expect("failing mutex poisoned")
            .contains(&normalize_title(&position.name))
        {
            return Err(CollaboratorError::Unavailable("matcher offline".to_string()));
        }

        let key = (
            normalize_title(explicit_position_text),
            normalize_title(&position.name),
        );
        Ok(self
            .verdicts
            .lock()
            .expect("verdict mutex poisoned")
            .get(&key)
            .cloned()
            .unwrap_or(RawIntentVerdict {
                matches: false,
                confidence: Some(0.95),
                rationale: "different role".to_string(),
            }))
    }
}

pub(super) type TestService =
    AllocationService<InMemoryAllocationStore, ScriptedEvaluator, ScriptedResolver>;

pub(super) struct Harness {
    pub(super) service: Arc<TestService>,
    pub(super) store: Arc<InMemoryAllocationStore>,
    pub(super) evaluator: Arc<ScriptedEvaluator>,
    pub(super) resolver: Arc<ScriptedResolver>,
}

pub(super) fn harness() -> Harness {
    let store = Arc::new(InMemoryAllocationStore::default());
    let evaluator = Arc::new(ScriptedEvaluator::default());
    let resolver = Arc::new(ScriptedResolver::default());
    let service = Arc::new(AllocationService::new(
        store.clone(),
        evaluator.clone(),
        resolver.clone(),
        config(),
    ));
    Harness {
        service,
        store,
        evaluator,
        resolver,
    }
}

impl Harness {
    pub(super) fn router(&self) -> axum::Router {
        allocation_router(self.service.clone())
    }

    /// Register a position without running reallocation.
    pub(super) fn seed_position(&self, name: &str) -> Position {
        self.store
            .insert_position(draft(name))
            .expect("seed position")
    }

    pub(super) fn stored(&self, id: CandidateId) -> Candidate {
        self.store
            .fetch_candidate(id)
            .expect("store readable")
            .expect("candidate stored")
    }
}

/// Commits a competing write before the first versioned commit for `target`, forcing the
/// caller through one conflict. Optionally registers a position just before the next intake
/// commit, as a concurrent position creation would.
pub(super) struct InterferingRepository {
    pub(super) inner: InMemoryAllocationStore,
    target: CandidateId,
    remaining: Mutex<u32>,
    late_position: Mutex<Option<PositionDraft>>,
}

impl InterferingRepository {
    pub(super) fn new(target: CandidateId, interference: u32) -> Self {
        Self {
            inner: InMemoryAllocationStore::default(),
            target,
            remaining: Mutex::new(interference),
            late_position: Mutex::new(None),
        }
    }

    pub(super) fn with_late_position(self, draft: PositionDraft) -> Self {
        *self.late_position.lock().expect("late position mutex poisoned") = Some(draft);
        self
    }

    fn interfere(&self, candidate_id: CandidateId) -> Result<(), RepositoryError> {
        let mut remaining = self.remaining.lock().expect("interference mutex poisoned");
        if candidate_id != self.target || *remaining == 0 {
            return Ok(());
        }
        *remaining -= 1;
        let stored = self
            .inner
            .fetch_candidate(candidate_id)?
            .ok_or(RepositoryError::NotFound)?;
        let version = stored.version;
        self.inner.commit(CandidateCommit {
            candidate: stored,
            expected_version: Some(version),
            scores: Vec::new(),
            history: None,
            audit: Vec::new(),
        })?;
        Ok(())
    }
}

impl AllocationRepository for InterferingRepository {
    fn next_candidate_id(&self) -> Result<CandidateId, RepositoryError> {
        self.inner.next_candidate_id()
    }

    fn commit(&self, commit: CandidateCommit) -> Result<Candidate, RepositoryError> {
        if commit.expected_version.is_some() {
            self.interfere(commit.candidate.id)?;
        } else if let Some(draft) = self
            .late_position
            .lock()
            .expect("late position mutex poisoned")
            .take()
        {
            self.inner.insert_position(draft)?;
        }
        self.inner.commit(commit)
    }

    fn fetch_candidate(&self, id: CandidateId) -> Result<Option<Candidate>, RepositoryError> {
        self.inner.fetch_candidate(id)
    }

    fn list_all_candidates(&self) -> Result<Vec<Candidate>, RepositoryError> {
        self.inner.list_all_candidates()
    }

    fn insert_position(&self, draft: PositionDraft) -> Result<Position, RepositoryError> {
        self.inner.insert_position(draft)
    }

    fn set_position_active(
        &self,
        id: PositionId,
        active: bool,
    ) -> Result<Position, RepositoryError> {
        self.inner.set_position_active(id, active)
    }

    fn fetch_position(&self, id: PositionId) -> Result<Option<Position>, RepositoryError> {
        self.inner.fetch_position(id)
    }

    fn list_active_positions(&self) -> Result<Vec<Position>, RepositoryError> {
        self.inner.list_active_positions()
    }

    fn append_score_record(&self, record: ScoreRecord) -> Result<(), RepositoryError> {
        self.inner.append_score_record(record)
    }

    fn append_audit(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        self.inner.append_audit(entry)
    }

    fn score_records(&self, id: CandidateId) -> Result<Vec<ScoreRecord>, RepositoryError> {
        self.inner.score_records(id)
    }

    fn score_records_for_position(
        &self,
        id: PositionId,
    ) -> Result<Vec<ScoreRecord>, RepositoryError> {
        self.inner.score_records_for_position(id)
    }

    fn allocation_history(
        &self,
        id: CandidateId,
    ) -> Result<Vec<AllocationHistory>, RepositoryError> {
        self.inner.allocation_history(id)
    }

    fn audit_for_candidate(&self, id: CandidateId) -> Result<Vec<AuditEntry>, RepositoryError> {
        self.inner.audit_for_candidate(id)
    }

    fn audit_for_position(&self, id: PositionId) -> Result<Vec<AuditEntry>, RepositoryError> {
        self.inner.audit_for_position(id)
    }
}

pub(super) struct UnavailableRepository;

impl AllocationRepository for UnavailableRepository {
    fn next_candidate_id(&self) -> Result<CandidateId, RepositoryError> {
        Err(offline())
    }

    fn commit(&self, _commit: CandidateCommit) -> Result<Candidate, RepositoryError> {
        Err(offline())
    }

    fn fetch_candidate(&self, _id: CandidateId) -> Result<Option<Candidate>, RepositoryError> {
        Err(offline())
    }

    fn list_all_candidates(&self) -> Result<Vec<Candidate>, RepositoryError> {
        Err(offline())
    }

    fn insert_position(&self, _draft: PositionDraft) -> Result<Position, RepositoryError> {
        Err(offline())
    }

    fn set_position_active(
        &self,
        _id: PositionId,
        _active: bool,
    ) -> Result<Position, RepositoryError> {
        Err(offline())
    }

    fn fetch_position(&self, _id: PositionId) -> Result<Option<Position>, RepositoryError> {
        Err(offline())
    }

    fn list_active_positions(&self) -> Result<Vec<Position>, RepositoryError> {
        Err(offline())
    }

    fn append_score_record(&self, _record: ScoreRecord) -> Result<(), RepositoryError> {
        Err(offline())
    }

    fn append_audit(&self, _entry: AuditEntry) -> Result<(), RepositoryError> {
        Err(offline())
    }

    fn score_records(&self, _id: CandidateId) -> Result<Vec<ScoreRecord>, RepositoryError> {
        Err(offline())
    }

    fn score_records_for_position(
        &self,
        _id: PositionId,
    ) -> Result<Vec<ScoreRecord>, RepositoryError> {
        Err(offline())
    }

    fn allocation_history(
        &self,
        _id: CandidateId,
    ) -> Result<Vec<AllocationHistory>, RepositoryError> {
        Err(offline())
    }

    fn audit_for_candidate(&self, _id: CandidateId) -> Result<Vec<AuditEntry>, RepositoryError> {
        Err(offline())
    }

    fn audit_for_position(&self, _id: PositionId) -> Result<Vec<AuditEntry>, RepositoryError> {
        Err(offline())
    }
}

fn offline() -> RepositoryError {
    RepositoryError::Unavailable("database offline".to_string())
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
