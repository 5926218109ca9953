use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use talent_ai::workflows::allocation::{
    CandidateEvaluator, CandidateProfile, CollaboratorError, IntentResolver, Position,
    RawEvaluation, RawIntentVerdict,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn profile_tokens(profile: &CandidateProfile) -> BTreeSet<String> {
    profile
        .skills
        .iter()
        .chain(&profile.work_experience)
        .chain(&profile.education)
        .chain(&profile.certifications)
        .chain(profile.self_evaluation.iter())
        .flat_map(|text| tokens(text))
        .collect()
}

/// Deterministic stand-in for the scoring service: requirement coverage against the
/// resume's skills and experience, with nice-to-haves worth half.
#[derive(Debug, Default, Clone)]
pub(crate) struct KeywordEvaluator;

impl KeywordEvaluator {
    pub(crate) fn score(profile: &CandidateProfile, position: &Position) -> i64 {
        let known = profile_tokens(profile);
        let covered = |items: &[String]| {
            items
                .iter()
                .filter(|item| {
                    let wanted = tokens(item);
                    !wanted.is_empty() && wanted.is_subset(&known)
                })
                .count()
        };

        let required = position.requirements.len();
        let optional = position.nice_to_have.len();
        if required + optional == 0 {
            let title = tokens(&position.name);
            if title.is_empty() {
                return 0;
            }
            let overlap = title.intersection(&known).count();
            return (overlap * 100 / title.len()) as i64;
        }

        // Weights doubled to stay in integer arithmetic.
        let earned = covered(&position.requirements) * 2 + covered(&position.nice_to_have);
        let possible = required * 2 + optional;
        (earned * 100 / possible) as i64
    }
}

#[async_trait]
impl CandidateEvaluator for KeywordEvaluator {
    async fn evaluate(
        &self,
        profile: &CandidateProfile,
        position: &Position,
    ) -> Result<RawEvaluation, CollaboratorError> {
        if profile.name.trim().is_empty() {
            return Err(CollaboratorError::Rejected(
                "profile has no candidate name".to_string(),
            ));
        }

        let score = Self::score(profile, position);
        Ok(RawEvaluation {
            score,
            grade: None,
            rationale: format!(
                "keyword coverage for '{}' is {score}/100",
                position.name
            ),
        })
    }
}

/// Matches when enough of the declared target's words appear in the position title.
/// Reported confidence is that share, so "Backend Engineer" fully matches
/// "Senior Backend Engineer" but only half matches "Backend Developer".
#[derive(Debug, Clone)]
pub(crate) struct TitleIntentResolver {
    pub(crate) minimum_coverage: f32,
}

impl Default for TitleIntentResolver {
    fn default() -> Self {
        Self {
            minimum_coverage: 1.0,
        }
    }
}

impl TitleIntentResolver {
    pub(crate) fn coverage(text: &str, title: &str) -> f32 {
        let wanted = tokens(text);
        if wanted.is_empty() {
            return 0.0;
        }
        let offered = tokens(title);
        wanted.intersection(&offered).count() as f32 / wanted.len() as f32
    }
}

#[async_trait]
impl IntentResolver for TitleIntentResolver {
    async fn matches_intent(
        &self,
        explicit_position_text: &str,
        position: &Position,
    ) -> Result<RawIntentVerdict, CollaboratorError> {
        let coverage = Self::coverage(explicit_position_text, &position.name);
        Ok(RawIntentVerdict {
            matches: coverage >= self.minimum_coverage,
            confidence: Some(coverage),
            rationale: format!(
                "{:.0}% of '{explicit_position_text}' appears in '{}'",
                coverage * 100.0,
                position.name
            ),
        })
    }
}
