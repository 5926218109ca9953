use std::sync::Arc;
use std::time::Duration;

use super::common::{
    config, draft, harness, submission, submission_with_intent, score, GaugeEvaluator,
    InterferingRepository, Script, ScriptedEvaluator, ScriptedResolver, UnavailableRepository,
};
use crate::workflows::allocation::domain::{AllocationState, CandidateId, Grade};
use crate::workflows::allocation::ledger::{AuditAction, EvaluationMethod, TriggerEvent};
use crate::workflows::allocation::repository::AllocationRepository;
use crate::workflows::allocation::{
    AllocationError, AllocationService, ChangeReason, EvaluationError, InMemoryAllocationStore,
    RepositoryError,
};

#[tokio::test]
async fn intake_rejects_empty_catalog() {
    let h = harness();

    let err = h
        .service
        .process_intake(submission("Ada"))
        .await
        .expect_err("no positions");
    assert!(matches!(err, AllocationError::EmptyPositionCatalog));
    assert!(h.evaluator.calls().is_empty());
    assert!(h.store.list_all_candidates().expect("readable").is_empty());
}

#[tokio::test]
async fn intake_persists_candidate_scores_history_and_audit_in_one_commit() {
    let h = harness();
    let analyst = h.seed_position("Data Analyst");
    let designer = h.seed_position("Product Designer");
    h.evaluator.script("Ada", "Data Analyst", Script::Score(70));
    h.evaluator.script("Ada", "Product Designer", Script::Score(55));

    let outcome = h
        .service
        .process_intake(submission("Ada"))
        .await
        .expect("intake");

    assert_eq!(outcome.state, AllocationState::Auto);
    assert_eq!(outcome.current_position, Some(analyst.id));
    assert_eq!(outcome.current_score, Some(score(70)));
    assert_eq!(outcome.current_grade, Some(Grade::C));
    assert!(outcome.pending_evaluation.is_empty());

    let stored = h.stored(outcome.candidate_id);
    assert_eq!(stored.version, 1);
    assert_eq!(stored.reallocation_count, 0);

    let records = h.store.score_records(outcome.candidate_id).expect("scores");
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|record| record.method == EvaluationMethod::Intake));
    let designer_record = records
        .iter()
        .find(|record| record.position_id == designer.id)
        .expect("designer scored");
    assert!(!designer_record.qualified);

    let history = h
        .store
        .allocation_history(outcome.candidate_id)
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_position, None);
    assert_eq!(history[0].new_position, analyst.id);
    assert_eq!(history[0].trigger, TriggerEvent::Intake);
    assert_eq!(history[0].reason, ChangeReason::InitialAssignment);

    let audit = h
        .store
        .audit_for_candidate(outcome.candidate_id)
        .expect("audit");
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::CandidateCreated);
    assert_eq!(audit[0].operator, "system");
}

#[tokio::test]
async fn failed_evaluations_are_excluded_and_left_pending() {
    let h = harness();
    let analyst = h.seed_position("Data Analyst");
    let designer = h.seed_position("Product Designer");
    let tester = h.seed_position("QA Engineer");
    h.evaluator.script("Ada", "Data Analyst", Script::Score(48));
    h.evaluator.script("Ada", "Product Designer", Script::Fail);
    h.evaluator.script("Ada", "QA Engineer", Script::Malformed(140));

    let outcome = h
        .service
        .process_intake(submission("Ada"))
        .await
        .expect("intake");

    assert_eq!(outcome.current_position, Some(analyst.id));
    assert_eq!(outcome.pending_evaluation, vec![designer.id, tester.id]);
    assert_eq!(outcome.evaluation_failures.len(), 2);
    assert!(matches!(
        outcome.evaluation_failures[0],
        EvaluationError::Failed { position_id, .. } if position_id == designer.id
    ));
    assert!(matches!(
        outcome.evaluation_failures[1],
        EvaluationError::Malformed { position_id, .. } if position_id == tester.id
    ));
    assert_eq!(
        h.store
            .score_records(outcome.candidate_id)
            .expect("scores")
            .len(),
        1
    );
}

#[tokio::test]
async fn slow_evaluation_times_out_without_blocking_the_rest() {
    let h = harness();
    let analyst = h.seed_position("Data Analyst");
    let designer = h.seed_position("Product Designer");
    h.evaluator.script(
        "Ada",
        "Data Analyst",
        Script::Slow(Duration::from_secs(5), 99),
    );
    h.evaluator.script("Ada", "Product Designer", Script::Score(61));

    let outcome = h
        .service
        .process_intake(submission("Ada"))
        .await
        .expect("intake");

    assert_eq!(outcome.current_position, Some(designer.id));
    assert_eq!(outcome.pending_evaluation, vec![analyst.id]);
    assert!(matches!(
        outcome.evaluation_failures[0],
        EvaluationError::Timeout { timeout_ms: 200, .. }
    ));
}

#[tokio::test]
async fn every_evaluation_failing_leaves_candidate_unassigned_but_stored() {
    let h = harness();
    h.seed_position("Data Analyst");
    h.seed_position("Product Designer");

    let outcome = h
        .service
        .process_intake(submission("Ada"))
        .await
        .expect("intake");

    assert_eq!(outcome.current_position, None);
    assert_eq!(outcome.pending_evaluation.len(), 2);
    assert!(h
        .store
        .allocation_history(outcome.candidate_id)
        .expect("history")
        .is_empty());
    assert_eq!(h.stored(outcome.candidate_id).version, 1);
}

#[tokio::test]
async fn declared_intent_matching_catalog_locks_at_intake() {
    let h = harness();
    h.seed_position("Data Analyst");
    let backend = h.seed_position("Backend Engineer");
    h.evaluator.script("Grace", "Data Analyst", Script::Score(95));
    h.evaluator.script("Grace", "Backend Engineer", Script::Score(64));

    let outcome = h
        .service
        .process_intake(submission_with_intent("Grace", "backend engineer"))
        .await
        .expect("intake");

    assert_eq!(outcome.state, AllocationState::Locked);
    assert!(outcome.position_locked);
    assert!(!outcome.no_match);
    assert_eq!(outcome.current_position, Some(backend.id));
    assert_eq!(outcome.current_score, Some(score(64)));
    assert!(h.resolver.calls().is_empty());
}

#[tokio::test]
async fn declared_intent_with_failed_evaluation_locks_unscored() {
    let h = harness();
    h.seed_position("Data Analyst");
    let backend = h.seed_position("Backend Engineer");
    h.evaluator.script("Grace", "Data Analyst", Script::Score(95));

    let outcome = h
        .service
        .process_intake(submission_with_intent("Grace", "Backend Engineer"))
        .await
        .expect("intake");

    assert!(outcome.position_locked);
    assert_eq!(outcome.current_position, Some(backend.id));
    assert_eq!(outcome.current_score, None);
    assert_eq!(outcome.pending_evaluation, vec![backend.id]);
}

#[tokio::test]
async fn intake_surfaces_repository_outage() {
    let service = AllocationService::new(
        Arc::new(UnavailableRepository),
        Arc::new(ScriptedEvaluator::default()),
        Arc::new(ScriptedResolver::default()),
        config(),
    );

    let err = service
        .process_intake(submission("Ada"))
        .await
        .expect_err("repository offline");
    assert!(matches!(
        err,
        AllocationError::Repository(RepositoryError::Unavailable(_))
    ));
}

#[tokio::test]
async fn inactive_positions_are_not_scored_at_intake() {
    let h = harness();
    let analyst = h.seed_position("Data Analyst");
    let designer = h.seed_position("Product Designer");
    h.service
        .deactivate_position(designer.id)
        .expect("deactivate");
    h.evaluator.script("Ada", "Data Analyst", Script::Score(40));
    h.evaluator.script("Ada", "Product Designer", Script::Score(90));

    let outcome = h
        .service
        .process_intake(submission("Ada"))
        .await
        .expect("intake");

    assert_eq!(outcome.current_position, Some(analyst.id));
    assert_eq!(h.evaluator.calls_for("Ada"), 1);
}

#[tokio::test]
async fn intake_fanout_never_exceeds_configured_bound() {
    let store = Arc::new(InMemoryAllocationStore::default());
    let evaluator = Arc::new(GaugeEvaluator::new(Duration::from_millis(25), 72));
    let limit = config().evaluation_fanout;
    let service = AllocationService::new(
        store.clone(),
        evaluator.clone(),
        Arc::new(ScriptedResolver::default()),
        config(),
    );
    for index in 0..limit * 2 {
        store
            .insert_position(draft(&format!("Role {index}")))
            .expect("seed position");
    }

    let outcome = service
        .process_intake(submission("Ada"))
        .await
        .expect("intake");

    assert!(outcome.evaluation_failures.is_empty());
    assert_eq!(store.score_records(outcome.candidate_id).expect("scores").len(), limit * 2);
    let peak = evaluator.peak();
    assert!(peak <= limit, "peak {peak} exceeded fanout {limit}");
    assert!(peak > 1, "evaluations ran serially");
}

type RacingService = AllocationService<InterferingRepository, ScriptedEvaluator, ScriptedResolver>;

/// A service whose first intake commit races with the creation of "Platform Engineer".
fn racing_catalog() -> (
    RacingService,
    Arc<InterferingRepository>,
    Arc<ScriptedEvaluator>,
    Arc<ScriptedResolver>,
) {
    let repository = Arc::new(
        InterferingRepository::new(CandidateId(0), 0)
            .with_late_position(draft("Platform Engineer")),
    );
    let evaluator = Arc::new(ScriptedEvaluator::default());
    let resolver = Arc::new(ScriptedResolver::default());
    repository
        .inner
        .insert_position(draft("Data Analyst"))
        .expect("seed position");
    let service = AllocationService::new(
        repository.clone(),
        evaluator.clone(),
        resolver.clone(),
        config(),
    );
    (service, repository, evaluator, resolver)
}

#[tokio::test]
async fn position_created_during_intake_is_offered_to_open_candidate() {
    let (service, repository, evaluator, _) = racing_catalog();
    evaluator.script("Ada", "Data Analyst", Script::Score(62));
    evaluator.script("Ada", "Platform Engineer", Script::Score(84));

    let outcome = service
        .process_intake(submission("Ada"))
        .await
        .expect("intake");

    let platform = repository
        .inner
        .list_active_positions()
        .expect("positions")
        .into_iter()
        .find(|position| position.name == "Platform Engineer")
        .expect("late position stored");
    assert_eq!(outcome.current_position, Some(platform.id));
    assert_eq!(outcome.current_score, Some(score(84)));
    assert_eq!(evaluator.calls_for("Ada"), 2);

    let history = repository
        .inner
        .allocation_history(outcome.candidate_id)
        .expect("history");
    let triggers: Vec<TriggerEvent> = history.iter().map(|entry| entry.trigger).collect();
    assert_eq!(triggers, vec![TriggerEvent::Intake, TriggerEvent::NewPosition]);
}

#[tokio::test]
async fn position_created_during_intake_can_satisfy_declared_intent() {
    let (service, _, evaluator, resolver) = racing_catalog();
    evaluator.script("Linus", "Data Analyst", Script::Score(71));
    evaluator.script("Linus", "Platform Engineer", Script::Score(58));
    resolver.matches("platform engineering", "Platform Engineer", Some(0.93));

    let outcome = service
        .process_intake(submission_with_intent("Linus", "platform engineering"))
        .await
        .expect("intake");

    assert_eq!(outcome.state, AllocationState::Locked);
    assert!(outcome.position_locked);
    assert_eq!(outcome.current_score, Some(score(58)));
}

#[tokio::test]
async fn settled_intake_does_not_reoffer_known_positions() {
    let h = harness();
    h.seed_position("Data Analyst");
    h.seed_position("Platform Engineer");
    h.evaluator.script("Ada", "Data Analyst", Script::Score(62));

    let outcome = h
        .service
        .process_intake(submission("Ada"))
        .await
        .expect("intake");

    // Platform Engineer failed and is pending; neither position is evaluated twice.
    assert_eq!(outcome.pending_evaluation.len(), 1);
    assert_eq!(h.evaluator.calls_for("Ada"), 2);
    assert_eq!(h.stored(outcome.candidate_id).version, 1);
}
