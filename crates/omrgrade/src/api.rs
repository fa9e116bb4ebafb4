//! High-level grading API.
//!
//! [`Grader`] is the primary entry point. It holds a [`GradeConfig`] and an
//! optional secondary decision source; it keeps no per-sheet state, so one
//! grader can be shared across threads and sheets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::GradeConfig;
use crate::error::EngineResult;
use crate::normalize::SheetImage;
use crate::pipeline::{self, SheetAnalysis};
use crate::resolve::AmbiguityResolver;
use crate::scoring::{AnswerKey, ScoreReport, ScoringPolicy};
use crate::sheet_layout::SheetLayout;

/// Cooperative cancellation flag, checked at every stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Clones share the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub cancel: Option<CancellationToken>,
}

/// One sheet of a batch for [`Grader::analyze_many`].
#[derive(Debug, Clone, Copy)]
pub struct SheetJob<'a> {
    pub image: &'a SheetImage,
    pub layout: Option<&'a SheetLayout>,
    pub key: &'a AnswerKey,
    pub policy: &'a ScoringPolicy,
}

/// Primary grading interface.
///
/// # Examples
///
/// ```no_run
/// use omrgrade::{AnswerKey, Grader, ScoringPolicy, SheetImage, SheetLayout};
/// use std::path::Path;
///
/// let layout = SheetLayout::from_json_file(Path::new("layout.json")).unwrap();
/// let image = SheetImage::from_bytes(&std::fs::read("sheet.png").unwrap()).unwrap();
/// let key = AnswerKey::parse(&["B", "A,C", "D"]).unwrap();
/// let report = Grader::new()
///     .analyze(&image, Some(&layout), &key, &ScoringPolicy::default())
///     .unwrap();
/// println!("score {} / {}", report.total, report.max_score);
/// ```
pub struct Grader {
    config: GradeConfig,
    resolver: Option<Arc<dyn AmbiguityResolver>>,
}

impl Default for Grader {
    fn default() -> Self {
        Self::new()
    }
}

impl Grader {
    /// Grader with default configuration and no secondary decision source.
    pub fn new() -> Self {
        Self::with_config(GradeConfig::default())
    }

    /// Create with full config control.
    pub fn with_config(config: GradeConfig) -> Self {
        Self {
            config,
            resolver: None,
        }
    }

    /// Attach a secondary decision source for AMBIGUOUS/MULTIPLE questions.
    pub fn with_resolver(mut self, resolver: Arc<dyn AmbiguityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn resolver(&self) -> Option<&Arc<dyn AmbiguityResolver>> {
        self.resolver.as_ref()
    }

    /// Access the current configuration.
    pub fn config(&self) -> &GradeConfig {
        &self.config
    }

    /// Mutable access to configuration for post-construction tuning.
    pub fn config_mut(&mut self) -> &mut GradeConfig {
        &mut self.config
    }

    /// Grade one sheet. Without `layout`, the configured layout inference
    /// grid is used.
    pub fn analyze(
        &self,
        image: &SheetImage,
        layout: Option<&SheetLayout>,
        key: &AnswerKey,
        policy: &ScoringPolicy,
    ) -> EngineResult<ScoreReport> {
        self.analyze_with_options(image, layout, key, policy, &AnalyzeOptions::default())
    }

    /// Grade one sheet with per-call options.
    pub fn analyze_with_options(
        &self,
        image: &SheetImage,
        layout: Option<&SheetLayout>,
        key: &AnswerKey,
        policy: &ScoringPolicy,
        options: &AnalyzeOptions,
    ) -> EngineResult<ScoreReport> {
        pipeline::grade_sheet(
            image,
            layout,
            key,
            policy,
            &self.config,
            self.resolver.as_ref(),
            options.cancel.as_ref(),
        )
    }

    /// Decode an encoded image and grade it.
    pub fn analyze_bytes(
        &self,
        bytes: &[u8],
        layout: Option<&SheetLayout>,
        key: &AnswerKey,
        policy: &ScoringPolicy,
    ) -> EngineResult<ScoreReport> {
        let image = SheetImage::from_bytes(bytes)?;
        self.analyze(&image, layout, key, policy)
    }

    /// Classify a sheet without resolving or scoring it.
    pub fn classify_sheet(
        &self,
        image: &SheetImage,
        layout: Option<&SheetLayout>,
    ) -> EngineResult<SheetAnalysis> {
        pipeline::analyze_sheet(image, layout, &self.config, None)
    }

    /// Grade independent sheets in parallel. Results follow `jobs` order.
    pub fn analyze_many(&self, jobs: &[SheetJob<'_>]) -> Vec<EngineResult<ScoreReport>> {
        jobs.par_iter()
            .map(|job| self.analyze(job.image, job.layout, job.key, job.policy))
            .collect()
    }
}
