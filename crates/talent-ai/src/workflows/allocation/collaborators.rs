use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::domain::{CandidateProfile, Grade, Position, PositionId, Score};

/// Payload returned by the external scoring service before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvaluation {
    pub score: i64,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

/// Payload returned by the external intent matcher before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIntentVerdict {
    pub matches: bool,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub rationale: String,
}

/// Transport-level failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator rejected the request: {0}")]
    Rejected(String),
}

/// Scores a candidate profile against a single position.
#[async_trait]
pub trait CandidateEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        profile: &CandidateProfile,
        position: &Position,
    ) -> Result<RawEvaluation, CollaboratorError>;
}

/// Decides whether a position satisfies a candidate's declared intent.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn matches_intent(
        &self,
        explicit_position_text: &str,
        position: &Position,
    ) -> Result<RawIntentVerdict, CollaboratorError>;
}

/// Validated score the engine is allowed to consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: Score,
    pub grade: Grade,
    pub rationale: String,
}

impl Evaluation {
    /// Out-of-range scores are rejected. A missing or unknown grade is derived from the score.
    pub fn validate(raw: RawEvaluation) -> Result<Self, String> {
        let score = Score::new(raw.score)
            .ok_or_else(|| format!("score {} outside 0..=100", raw.score))?;
        let grade = raw
            .grade
            .as_deref()
            .and_then(Grade::parse)
            .unwrap_or_else(|| Grade::from_score(score));
        Ok(Self {
            score,
            grade,
            rationale: raw.rationale,
        })
    }
}

/// Validated intent verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentVerdict {
    pub matched: bool,
    pub confidence: Option<f32>,
    pub rationale: String,
}

/// Failure scoped to one evaluator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationError {
    #[error("evaluation of position {position_id} timed out after {timeout_ms}ms")]
    Timeout {
        position_id: PositionId,
        timeout_ms: u64,
    },
    #[error("evaluation of position {position_id} failed: {message}")]
    Failed {
        position_id: PositionId,
        message: String,
    },
    #[error("evaluation of position {position_id} returned a malformed payload: {message}")]
    Malformed {
        position_id: PositionId,
        message: String,
    },
}

impl EvaluationError {
    pub fn position_id(&self) -> PositionId {
        match self {
            EvaluationError::Timeout { position_id, .. }
            | EvaluationError::Failed { position_id, .. }
            | EvaluationError::Malformed { position_id, .. } => *position_id,
        }
    }
}

/// Failure scoped to one intent-resolver call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentResolutionError {
    #[error("intent resolution against position {position_id} timed out after {timeout_ms}ms")]
    Timeout {
        position_id: PositionId,
        timeout_ms: u64,
    },
    #[error("intent resolution against position {position_id} failed: {message}")]
    Failed {
        position_id: PositionId,
        message: String,
    },
}

/// Wraps both collaborators with per-call timeouts and boundary validation.
pub struct Collaborators<E, I> {
    evaluator: Arc<E>,
    resolver: Arc<I>,
    evaluation_timeout: Duration,
    intent_timeout: Duration,
    intent_confidence_threshold: f32,
}

impl<E, I> Collaborators<E, I>
where
    E: CandidateEvaluator,
    I: IntentResolver,
{
    pub fn new(
        evaluator: Arc<E>,
        resolver: Arc<I>,
        evaluation_timeout: Duration,
        intent_timeout: Duration,
        intent_confidence_threshold: f32,
    ) -> Self {
        Self {
            evaluator,
            resolver,
            evaluation_timeout,
            intent_timeout,
            intent_confidence_threshold,
        }
    }

    pub async fn evaluate(
        &self,
        profile: &CandidateProfile,
        position: &Position,
    ) -> Result<Evaluation, EvaluationError> {
        let call = self.evaluator.evaluate(profile, position);
        match tokio::time::timeout(self.evaluation_timeout, call).await {
            Err(_) => Err(EvaluationError::Timeout {
                position_id: position.id,
                timeout_ms: self.evaluation_timeout.as_millis() as u64,
            }),
            Ok(Err(err)) => Err(EvaluationError::Failed {
                position_id: position.id,
                message: err.to_string(),
            }),
            Ok(Ok(raw)) => {
                Evaluation::validate(raw).map_err(|message| EvaluationError::Malformed {
                    position_id: position.id,
                    message,
                })
            }
        }
    }

    /// Score every position with at most `fanout` calls in flight. Returns once every call
    /// has settled; ordering of the result follows completion, not input.
    pub async fn evaluate_all(
        &self,
        profile: &CandidateProfile,
        positions: &[Position],
        fanout: usize,
    ) -> Vec<(PositionId, Result<Evaluation, EvaluationError>)> {
        let pending: Vec<_> = positions
            .iter()
            .map(|position| self.evaluate_pair(profile, position))
            .collect();
        let settled: Vec<_> = stream::iter(pending)
            .buffer_unordered(fanout.max(1))
            .collect()
            .await;

        let failed = settled.iter().filter(|(_, result)| result.is_err()).count();
        if failed > 0 {
            warn!(
                candidate = %profile.name,
                failed,
                total = settled.len(),
                "some position evaluations did not settle successfully"
            );
        }
        settled
    }

    fn evaluate_pair<'a>(
        &'a self,
        profile: &'a CandidateProfile,
        position: &'a Position,
    ) -> BoxFuture<'a, (PositionId, Result<Evaluation, EvaluationError>)> {
        async move { (position.id, self.evaluate(profile, position).await) }.boxed()
    }

    pub async fn resolve_intent(
        &self,
        explicit_position_text: &str,
        position: &Position,
    ) -> Result<IntentVerdict, IntentResolutionError> {
        let call = self.resolver.matches_intent(explicit_position_text, position);
        let raw = match tokio::time::timeout(self.intent_timeout, call).await {
            Err(_) => {
                return Err(IntentResolutionError::Timeout {
                    position_id: position.id,
                    timeout_ms: self.intent_timeout.as_millis() as u64,
                })
            }
            Ok(Err(err)) => {
                return Err(IntentResolutionError::Failed {
                    position_id: position.id,
                    message: err.to_string(),
                })
            }
            Ok(Ok(raw)) => raw,
        };

        let confident = raw
            .confidence
            .map(|confidence| confidence >= self.intent_confidence_threshold)
            .unwrap_or(true);
        if raw.matches && !confident {
            debug!(
                position_id = %position.id,
                confidence = ?raw.confidence,
                threshold = self.intent_confidence_threshold,
                "intent match below confidence threshold"
            );
        }

        Ok(IntentVerdict {
            matched: raw.matches && confident,
            confidence: raw.confidence,
            rationale: raw.rationale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_derives_missing_grade() {
        let evaluation = Evaluation::validate(RawEvaluation {
            score: 78,
            grade: None,
            rationale: "solid backend experience".to_string(),
        })
        .expect("valid payload");
        assert_eq!(evaluation.score.value(), 78);
        assert_eq!(evaluation.grade, Grade::B);
    }

    #[test]
    fn validate_keeps_reported_grade_and_replaces_garbage() {
        let reported = Evaluation::validate(RawEvaluation {
            score: 55,
            grade: Some("c".to_string()),
            rationale: String::new(),
        })
        .expect("valid payload");
        assert_eq!(reported.grade, Grade::C);

        let garbled = Evaluation::validate(RawEvaluation {
            score: 90,
            grade: Some("excellent".to_string()),
            rationale: String::new(),
        })
        .expect("valid payload");
        assert_eq!(garbled.grade, Grade::A);
    }

    #[test]
    fn validate_rejects_out_of_range_scores() {
        let err = Evaluation::validate(RawEvaluation {
            score: 130,
            grade: Some("A".to_string()),
            rationale: String::new(),
        })
        .expect_err("score above 100 rejected");
        assert!(err.contains("130"));
    }
}
