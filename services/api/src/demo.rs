use crate::infra::{KeywordEvaluator, TitleIntentResolver};
use clap::Args;
use std::sync::Arc;
use talent_ai::config::AllocationConfig;
use talent_ai::error::AppError;
use talent_ai::workflows::allocation::{
    AllocationService, CandidateProfile, CandidateSubmission, DeclaredIntent,
    InMemoryAllocationStore, IntakeOutcome, PositionDraft, PositionRegistration,
};

type DemoService = AllocationService<InMemoryAllocationStore, KeywordEvaluator, TitleIntentResolver>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print reallocation reports as JSON instead of a summary.
    #[arg(long)]
    pub(crate) json: bool,
    /// Candidates reallocated concurrently per new position.
    #[arg(long)]
    pub(crate) concurrency: Option<usize>,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { json, concurrency } = args;

    let mut config = AllocationConfig::default();
    if let Some(concurrency) = concurrency {
        config.reallocation_concurrency = concurrency.max(1);
    }
    let service = AllocationService::new(
        Arc::new(InMemoryAllocationStore::default()),
        Arc::new(KeywordEvaluator),
        Arc::new(TitleIntentResolver::default()),
        config,
    );

    println!("Candidate allocation demo");
    println!("\nOpening catalog");
    register(
        &service,
        position(
            "Support Specialist",
            &["customer support", "ticketing"],
            &["sql"],
        ),
        json,
    )
    .await?;
    register(
        &service,
        position("Solutions Engineer", &["python", "sql"], &["customer support"]),
        json,
    )
    .await?;
    register(
        &service,
        position("Data Scientist", &["python", "statistics"], &["sql"]),
        json,
    )
    .await?;

    println!("\nIntake");
    let c1 = intake(
        &service,
        applicant(
            "Mina Okafor",
            &["python", "sql", "rust", "customer support"],
            Some("Backend Engineer"),
        ),
    )
    .await?;
    let c2 = intake(
        &service,
        applicant("Theo Marsh", &["customer support", "ticketing", "sql"], None),
    )
    .await?;
    let c3 = intake(
        &service,
        applicant(
            "Ines Duarte",
            &["python", "statistics", "sql", "rust", "postgresql"],
            Some("data scientist"),
        ),
    )
    .await?;

    println!("\nNew requisitions");
    register(
        &service,
        position(
            "Senior Backend Engineer",
            &["rust", "postgresql"],
            &["python"],
        ),
        json,
    )
    .await?;
    register(
        &service,
        position(
            "Customer Success Lead",
            &["customer support"],
            &["ticketing", "sql"],
        ),
        json,
    )
    .await?;

    println!("\nFinal state");
    for outcome in [&c1, &c2, &c3] {
        let view = service.candidate(outcome.candidate_id)?;
        println!(
            "- {} [{}] position={} score={} locked={} reallocations={}",
            view.name,
            view.state.label(),
            display(view.current_position),
            display(view.current_score),
            view.position_locked,
            view.reallocation_count
        );
        for entry in service.allocation_history(outcome.candidate_id)? {
            println!(
                "    {} -> {} ({} via {:?})",
                display(entry.old_position),
                entry.new_position,
                entry.reason.label(),
                entry.trigger
            );
        }
    }

    Ok(())
}

async fn register(
    service: &DemoService,
    draft: PositionDraft,
    json: bool,
) -> Result<PositionRegistration, AppError> {
    let registration = service.create_position(draft).await?;
    let report = &registration.reallocation;
    println!(
        "- Position {} '{}' | scanned {} | moved {} | failed {}",
        registration.position.id,
        registration.position.name,
        report.scanned,
        report.changes.len(),
        report.failures.len()
    );
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(payload) => println!("{payload}"),
            Err(err) => println!("  Report unavailable: {err}"),
        }
    } else {
        for change in &report.changes {
            println!(
                "    candidate {}: {} -> {} ({})",
                change.candidate_id,
                display(change.old_position),
                change.new_position,
                change.reason.label()
            );
        }
    }
    Ok(registration)
}

async fn intake(
    service: &DemoService,
    submission: CandidateSubmission,
) -> Result<IntakeOutcome, AppError> {
    let name = submission.profile.name.clone();
    let declared = submission
        .intent
        .as_ref()
        .map(|intent| intent.position_text.clone());
    let outcome = service.process_intake(submission).await?;
    println!(
        "- {name} (wants {}) -> position={} score={} grade={} locked={} no_match={}",
        declared.as_deref().unwrap_or("anything"),
        display(outcome.current_position),
        display(outcome.current_score),
        outcome
            .current_grade
            .map(|grade| grade.label())
            .unwrap_or("-"),
        outcome.position_locked,
        outcome.no_match
    );
    Ok(outcome)
}

fn display<T: std::fmt::Display>(value: Option<T>) -> String {
    value
        .map(|value| value.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn position(name: &str, requirements: &[&str], nice_to_have: &[&str]) -> PositionDraft {
    PositionDraft {
        name: name.to_string(),
        description: format!("{name} requisition"),
        requirements: requirements.iter().map(|item| item.to_string()).collect(),
        nice_to_have: nice_to_have.iter().map(|item| item.to_string()).collect(),
    }
}

fn applicant(name: &str, skills: &[&str], intent: Option<&str>) -> CandidateSubmission {
    CandidateSubmission {
        profile: CandidateProfile {
            name: name.to_string(),
            email: None,
            phone: None,
            skills: skills.iter().map(|item| item.to_string()).collect(),
            work_experience: Vec::new(),
            education: Vec::new(),
            certifications: Vec::new(),
            self_evaluation: None,
        },
        intent: intent.map(|text| DeclaredIntent {
            position_text: text.to_string(),
            source: Some(format!("Objective: {text}")),
        }),
    }
}
