//! Ambiguity resolution by decision fusion.
//!
//! AMBIGUOUS and MULTIPLE questions are submitted, in batches, to an
//! injected [`AmbiguityResolver`]. Its verdicts are fused with the
//! pixel-based classification under fixed rules:
//!
//! - CONFIDENT and BLANK questions are never submitted and never amended.
//! - An unusable or missing verdict falls back to [`fallback_choice`].
//! - A MULTIPLE question with several dark marks only takes a single-letter
//!   verdict when the source is sufficiently confident.
//!
//! Every amended question records whether its final answer is deterministic
//! or fused.

mod dispatch;
mod dominance;
mod fusion;

use std::time::Duration;

use thiserror::Error;

use crate::classify::QuestionStatus;
use crate::error::{EngineError, EngineResult};

pub use dominance::DominanceResolver;
pub(crate) use fusion::fuse;

/// Fill ratio of one option, as sent to the secondary source.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptionFill {
    pub letter: String,
    pub ratio: f32,
}

/// One question submitted to the secondary source.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AmbiguousQuestion {
    pub question: u32,
    /// Provisional tier (AMBIGUOUS or MULTIPLE).
    pub status: QuestionStatus,
    /// Options in positional order.
    pub options: Vec<OptionFill>,
}

/// A secondary-source verdict for one question.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "verdict", content = "letter", rename_all = "snake_case")]
pub enum Verdict {
    Option(String),
    Blank,
    Invalid,
}

/// A secondary-source decision with its reported confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SecondaryDecision {
    pub question: u32,
    pub verdict: Verdict,
    pub confidence: f32,
}

/// Failure of a secondary-source request.
#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    Failed(String),
}

/// Secondary decision source for ambiguous questions.
///
/// Implementations may block; the engine bounds each call by the fusion
/// timeout and abandons a call that does not return in time. Requests may
/// be retried, so implementations must tolerate seeing a batch twice.
pub trait AmbiguityResolver: Send + Sync {
    /// Name recorded in provenance tags and diagnostics.
    fn name(&self) -> &str;

    /// Decide a batch. Decisions may come back in any order; questions
    /// without a decision fall back deterministically.
    fn resolve_ambiguous(
        &self,
        batch: &[AmbiguousQuestion],
    ) -> Result<Vec<SecondaryDecision>, ResolverError>;
}

/// Decision-fusion controls.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Minimum ratio for the fallback to accept an AMBIGUOUS question's top option.
    pub acceptance_floor: f32,
    /// The fallback requires the top option to lead every other option by more than this.
    pub margin: f32,
    /// Ratio at or above which a mark counts towards a strict MULTIPLE.
    pub override_threshold: f32,
    /// Confidence needed to collapse a strict MULTIPLE to one letter.
    pub min_override_confidence: f32,
    /// Verdicts below this confidence are unusable.
    pub min_secondary_confidence: f32,
    /// Overall budget for all secondary-source requests of one sheet.
    pub timeout_ms: u64,
    /// Maximum questions per request.
    pub max_batch_size: usize,
    /// Extra attempts per batch after a failed (not timed-out) request.
    pub max_retries: u32,
    /// Resolve MULTIPLE questions whose key entry lists several letters to
    /// their set of marked options.
    pub accept_multi_select: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            acceptance_floor: 0.30,
            margin: 0.10,
            override_threshold: 0.60,
            min_override_confidence: 0.80,
            min_secondary_confidence: 0.0,
            timeout_ms: 5000,
            max_batch_size: 32,
            max_retries: 1,
            accept_multi_select: true,
        }
    }
}

impl FusionConfig {
    pub(crate) fn validate(&self) -> EngineResult<()> {
        let fractions = [
            ("acceptance_floor", self.acceptance_floor),
            ("margin", self.margin),
            ("override_threshold", self.override_threshold),
            ("min_override_confidence", self.min_override_confidence),
            ("min_secondary_confidence", self.min_secondary_confidence),
        ];
        for (name, v) in fractions {
            if !(0.0..=1.0).contains(&v) {
                return Err(EngineError::invalid_config(format!(
                    "fusion.{name} must lie in [0, 1] (got {v})"
                )));
            }
        }
        if self.max_batch_size == 0 {
            return Err(EngineError::invalid_config("fusion.max_batch_size must be >= 1"));
        }
        if self.timeout_ms == 0 {
            return Err(EngineError::invalid_config("fusion.timeout_ms must be >= 1"));
        }
        Ok(())
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Deterministic answer for a question the secondary source could not decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// The option at this position.
    Pick(usize),
    Blank,
    Invalid,
}

// Float slack so a gap printed as exactly the margin counts as within it.
const MARGIN_EPS: f64 = 1e-6;

/// Deterministic fallback for a question of tier `status`.
///
/// MULTIPLE falls back to INVALID. AMBIGUOUS takes the top option when it
/// exceeds `acceptance_floor` and leads every other option by more than
/// `margin`; otherwise BLANK. Anything else is BLANK.
pub fn fallback_choice(status: QuestionStatus, ratios: &[f32], cfg: &FusionConfig) -> Fallback {
    match status {
        QuestionStatus::Multiple => Fallback::Invalid,
        QuestionStatus::Ambiguous => {
            let mut top: Option<usize> = None;
            for (i, &r) in ratios.iter().enumerate() {
                if top.map_or(true, |t| r > ratios[t]) {
                    top = Some(i);
                }
            }
            let Some(t) = top else {
                return Fallback::Blank;
            };
            let best = ratios[t] as f64;
            if best <= cfg.acceptance_floor as f64 {
                return Fallback::Blank;
            }
            let clear = ratios
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != t)
                .all(|(_, &r)| best - r as f64 > cfg.margin as f64 + MARGIN_EPS);
            if clear {
                Fallback::Pick(t)
            } else {
                Fallback::Blank
            }
        }
        _ => Fallback::Blank,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_with_gap_equal_to_margin_falls_back_blank() {
        let cfg = FusionConfig::default();
        assert_eq!(
            fallback_choice(QuestionStatus::Ambiguous, &[0.45, 0.55, 0.05, 0.05], &cfg),
            Fallback::Blank
        );
    }

    #[test]
    fn ambiguous_with_clear_leader_picks_it() {
        let cfg = FusionConfig::default();
        assert_eq!(
            fallback_choice(QuestionStatus::Ambiguous, &[0.05, 0.50, 0.30, 0.05], &cfg),
            Fallback::Pick(1)
        );
    }

    #[test]
    fn ambiguous_below_floor_is_blank() {
        let cfg = FusionConfig::default();
        assert_eq!(
            fallback_choice(QuestionStatus::Ambiguous, &[0.25, 0.0, 0.0], &cfg),
            Fallback::Blank
        );
    }

    #[test]
    fn top_option_must_exceed_floor() {
        let cfg = FusionConfig::default();
        assert_eq!(
            fallback_choice(QuestionStatus::Ambiguous, &[0.30, 0.05, 0.0], &cfg),
            Fallback::Blank
        );
        assert_eq!(
            fallback_choice(QuestionStatus::Ambiguous, &[0.31, 0.05, 0.0], &cfg),
            Fallback::Pick(0)
        );
    }

    #[test]
    fn multiple_falls_back_invalid() {
        let cfg = FusionConfig::default();
        assert_eq!(
            fallback_choice(QuestionStatus::Multiple, &[0.75, 0.68, 0.05, 0.05], &cfg),
            Fallback::Invalid
        );
    }

    #[test]
    fn verdict_json_shape() {
        let v = Verdict::Option("C".into());
        assert_eq!(
            serde_json::to_string(&v).expect("json"),
            r#"{"verdict":"option","letter":"C"}"#
        );
        let b: Verdict = serde_json::from_str(r#"{"verdict":"blank"}"#).expect("blank");
        assert_eq!(b, Verdict::Blank);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let cfg = FusionConfig {
            max_batch_size: 0,
            ..FusionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
