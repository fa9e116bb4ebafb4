//! omrgrade: pure-Rust optical mark recognition and scoring for answer sheets.
//!
//! Given a scanned or photographed answer sheet, a sheet layout, an answer
//! key and a scoring policy, the engine decides which option each examinee
//! marked, flags ambiguous or invalid markings, and computes a score with a
//! full audit trail. The pipeline stages are:
//!
//! 1. **Normalize** – luminance, adaptive threshold, speckle removal and
//!    optional deskew against alignment markers.
//! 2. **Locate** – map layout option regions to image pixels.
//! 3. **Estimate** – dark-pixel fill ratio per option region.
//! 4. **Classify** – CONFIDENT / AMBIGUOUS / MULTIPLE / BLANK per question.
//! 5. **Resolve** – batched secondary decisions for ambiguous questions,
//!    fused under strict non-override rules with a deterministic fallback.
//! 6. **Score** – set comparison against the key, weighted by the policy.
//!
//! # Public API
//! - [`Grader`] as the primary entry point
//! - [`GradeConfig`] for tuning
//! - [`SheetLayout`], [`AnswerKey`], [`ScoringPolicy`] as inputs
//! - [`ScoreReport`] as the result
//! - [`AmbiguityResolver`] for plugging in a secondary decision source
//!
//! The engine holds no state between calls; analyses of different sheets
//! may run concurrently on one [`Grader`].

mod affine;
mod api;
mod classify;
mod config;
mod error;
mod fill;
mod locator;
mod normalize;
mod pipeline;
mod resolve;
mod scoring;
mod sheet_layout;

#[cfg(test)]
pub(crate) mod test_utils;

pub use api::{AnalyzeOptions, CancellationToken, Grader, SheetJob};
pub use classify::{
    classify_ratios, AmendRejected, Answer, ClassifierThresholds, Provenance,
    QuestionClassification, QuestionStatus, Resolution,
};
pub use config::GradeConfig;
pub use error::{Diagnostic, EngineError, EngineResult, Stage};
pub use fill::{
    estimator_for, CoreRatioEstimator, DarkRatioEstimator, FillConfig, FillEstimator,
    FillMeasurement, FillMethod,
};
pub use locator::PixelRegion;
pub use normalize::{DeskewConfig, DeskewOutcome, NormalizeConfig, SheetImage};
pub use pipeline::SheetAnalysis;
pub use resolve::{
    fallback_choice, AmbiguityResolver, AmbiguousQuestion, DominanceResolver, Fallback,
    FusionConfig, OptionFill, ResolverError, SecondaryDecision, Verdict,
};
pub use scoring::{
    score_answers, AnswerKey, GradedAnswer, KeyError, Outcome, QuestionScore, ScoreCounts,
    ScoreReport, ScoringPolicy,
};
pub use sheet_layout::{
    option_letter, AlignmentMarker, BubbleShape, LayoutInference, OptionRegion, QuestionSlot,
    SheetLayout,
};
