use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for candidates. One resume submission maps to one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier wrapper for positions. Assigned monotonically, so lower ids are older
/// requisitions and win score ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Absolute fit score in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Score(u8);

impl Score {
    pub const MAX: u8 = 100;

    pub fn new(value: i64) -> Option<Self> {
        if (0..=i64::from(Self::MAX)).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Score {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Score::new(value).ok_or_else(|| format!("score {value} outside 0..=100"))
    }
}

impl From<Score> for u8 {
    fn from(value: Score) -> Self {
        value.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordinal bucket attached to a score by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    /// Rubric thresholds used when the evaluator omits or garbles the grade.
    pub fn from_score(score: Score) -> Self {
        match score.value() {
            86..=100 => Grade::A,
            76..=85 => Grade::B,
            60..=75 => Grade::C,
            _ => Grade::D,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        }
    }
}

/// Structured resume content produced by the upstream extraction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub work_experience: Vec<String>,
    #[serde(default)]
    pub education: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
    #[serde(default)]
    pub self_evaluation: Option<String>,
}

/// Target position a candidate declared in their resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredIntent {
    pub position_text: String,
    /// Resume excerpt the intent was read from, kept for audit trails.
    #[serde(default)]
    pub source: Option<String>,
}

/// Intake payload: an extracted profile plus the optional declared intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSubmission {
    pub profile: CandidateProfile,
    #[serde(default)]
    pub intent: Option<DeclaredIntent>,
}

/// Per-candidate allocation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationState {
    /// No declared intent; assignment follows the best score.
    Auto,
    /// Declared intent with no satisfying position yet; assignment is provisional.
    Pending,
    /// Terminal. The declared intent was matched.
    Locked,
}

impl AllocationState {
    pub const fn label(self) -> &'static str {
        match self {
            AllocationState::Auto => "auto",
            AllocationState::Pending => "pending",
            AllocationState::Locked => "locked",
        }
    }
}

/// Persisted candidate record. `version` is bumped by the repository on every commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub profile: CandidateProfile,
    pub intent: Option<DeclaredIntent>,
    pub position_locked: bool,
    pub no_match: bool,
    pub current_position: Option<PositionId>,
    pub current_score: Option<Score>,
    pub current_grade: Option<Grade>,
    pub pending_evaluations: BTreeSet<PositionId>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_reallocated_at: Option<DateTime<Utc>>,
    pub reallocation_count: u32,
}

impl Candidate {
    /// Unallocated shell used by intake before the first decision is applied.
    pub fn new(
        id: CandidateId,
        profile: CandidateProfile,
        intent: Option<DeclaredIntent>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            profile,
            intent,
            position_locked: false,
            no_match: false,
            current_position: None,
            current_score: None,
            current_grade: None,
            pending_evaluations: BTreeSet::new(),
            version: 0,
            created_at,
            last_reallocated_at: None,
            reallocation_count: 0,
        }
    }

    pub fn explicit_intent(&self) -> bool {
        self.intent.is_some()
    }

    pub fn explicit_position_text(&self) -> Option<&str> {
        self.intent
            .as_ref()
            .map(|intent| intent.position_text.as_str())
    }

    pub fn state(&self) -> AllocationState {
        if self.position_locked {
            AllocationState::Locked
        } else if self.explicit_intent() {
            AllocationState::Pending
        } else {
            AllocationState::Auto
        }
    }
}

/// A hiring requisition. Lifecycle is owned outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub name: String,
    pub description: String,
    pub requirements: Vec<String>,
    pub nice_to_have: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Position {
    /// Identity match used at intake: names compared case-insensitively with whitespace
    /// collapsed. Fuzzy matching is the intent resolver's job.
    pub fn matches_title(&self, text: &str) -> bool {
        let normalized = normalize_title(text);
        !normalized.is_empty() && normalize_title(&self.name) == normalized
    }
}

pub(crate) fn normalize_title(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Requisition details supplied when a position is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub nice_to_have: Vec<String>,
}
