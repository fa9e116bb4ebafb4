//! Fatal engine errors and recovered diagnostics.
//!
//! [`EngineError`] aborts an analysis call: nothing partial is returned.
//! [`Diagnostic`] records a condition the engine recovered from locally; every
//! diagnostic ends up in [`crate::ScoreReport::diagnostics`].

use thiserror::Error;

/// Convenient result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Pipeline stage boundary, used to report where an analysis stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Locate,
    Estimate,
    Classify,
    Resolve,
    Score,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Normalize => "normalization",
            Stage::Locate => "bubble location",
            Stage::Estimate => "fill estimation",
            Stage::Classify => "classification",
            Stage::Resolve => "ambiguity resolution",
            Stage::Score => "scoring",
        };
        f.write_str(name)
    }
}

/// Structurally unrecoverable conditions. The caller must fix the input
/// before retrying.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The image could not be decoded or has implausible dimensions.
    #[error("malformed image: {reason}")]
    MalformedImage { reason: String },

    /// Missing, non-numeric or non-finite scoring weights.
    #[error("invalid scoring policy: {reason}")]
    InvalidScoringPolicy { reason: String },

    /// The sheet layout violates a structural invariant (or none is available).
    #[error("invalid sheet layout: {reason}")]
    InvalidLayout { reason: String },

    /// Inconsistent engine configuration (thresholds, window sizes, ...).
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The analysis was cancelled at a stage boundary.
    #[error("analysis cancelled before {stage}")]
    Cancelled { stage: Stage },
}

impl EngineError {
    pub(crate) fn malformed_image(reason: impl Into<String>) -> Self {
        Self::MalformedImage {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_policy(reason: impl Into<String>) -> Self {
        Self::InvalidScoringPolicy {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_layout(reason: impl Into<String>) -> Self {
        Self::InvalidLayout {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// A recovered error, surfaced in the score report instead of aborting.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// An option region falls outside the image; the question was graded BLANK.
    #[error("question {question}: region of option {option} lies outside the image")]
    RegionOutOfBounds { question: u32, option: String },

    /// The secondary decision source failed for a batch; deterministic
    /// fallback was applied to the listed questions.
    #[error("secondary decision source '{resolver}' unavailable ({reason}); fallback applied to {} question(s)", .questions.len())]
    SecondaryDecisionUnavailable {
        resolver: String,
        reason: String,
        questions: Vec<u32>,
    },

    /// The secondary source answered, but the verdict could not be used.
    #[error("question {question}: unusable secondary decision ({reason})")]
    UnusableSecondaryDecision { question: u32, reason: String },

    /// Answer key length differs from the number of detected questions.
    #[error("answer key has {key_len} entries but {detected} questions were detected; scored {scored}")]
    AnswerKeyMismatch {
        key_len: usize,
        detected: usize,
        scored: usize,
    },

    /// Alignment markers were declared but the sheet was not deskewed.
    #[error("deskew skipped: {reason}")]
    DeskewSkipped { reason: String },
}
