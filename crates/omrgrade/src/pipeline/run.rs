//! Top-level pipeline orchestrator.

use std::borrow::Cow;
use std::sync::Arc;

use crate::api::CancellationToken;
use crate::classify::{QuestionClassification, QuestionStatus};
use crate::config::GradeConfig;
use crate::error::{Diagnostic, EngineError, EngineResult, Stage};
use crate::fill::{self, estimator_for};
use crate::locator::locate;
use crate::normalize::{normalize, DeskewOutcome, SheetImage};
use crate::resolve::{self, AmbiguityResolver};
use crate::scoring::{score_answers, AnswerKey, GradedAnswer, ScoreReport, ScoringPolicy};
use crate::sheet_layout::SheetLayout;

/// Classified sheet, before ambiguity resolution and scoring.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SheetAnalysis {
    /// Image dimensions [width, height].
    pub image_size: [u32; 2],
    /// Name of the layout the sheet was read with.
    pub layout: String,
    pub deskew: DeskewOutcome,
    /// Questions in layout order.
    pub questions: Vec<QuestionClassification>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SheetAnalysis {
    /// Number of questions currently in `status`.
    pub fn count_status(&self, status: QuestionStatus) -> usize {
        self.questions.iter().filter(|q| q.status == status).count()
    }
}

fn checkpoint(cancel: Option<&CancellationToken>, stage: Stage) -> EngineResult<()> {
    if cancel.is_some_and(CancellationToken::is_cancelled) {
        tracing::info!(%stage, "analysis cancelled");
        return Err(EngineError::Cancelled { stage });
    }
    Ok(())
}

fn select_layout<'a>(
    layout: Option<&'a SheetLayout>,
    config: &GradeConfig,
    image_size: (u32, u32),
) -> EngineResult<Cow<'a, SheetLayout>> {
    if let Some(layout) = layout {
        layout.validate()?;
        return Ok(Cow::Borrowed(layout));
    }
    let Some(inference) = &config.layout_inference else {
        return Err(EngineError::invalid_layout(
            "no sheet layout supplied and no layout inference configured",
        ));
    };
    let page = [image_size.0 as f32, image_size.1 as f32];
    let inferred = inference.generate(page)?;
    tracing::debug!(
        questions = inferred.n_questions(),
        options = inferred.n_options(),
        "inferred grid layout"
    );
    Ok(Cow::Owned(inferred))
}

/// Normalize, locate, estimate and classify one sheet.
pub(crate) fn analyze_sheet(
    image: &SheetImage,
    layout: Option<&SheetLayout>,
    config: &GradeConfig,
    cancel: Option<&CancellationToken>,
) -> EngineResult<SheetAnalysis> {
    config.validate()?;

    checkpoint(cancel, Stage::Normalize)?;
    let gray = image.luminance();
    let dims = gray.dimensions();
    let layout = select_layout(layout, config, dims)?;
    let normalized = normalize(&gray, &layout, &config.normalize)?;

    let mut diagnostics = Vec::new();
    if let DeskewOutcome::Skipped { reason } = &normalized.deskew {
        tracing::warn!("deskew skipped: {reason}");
        diagnostics.push(Diagnostic::DeskewSkipped {
            reason: reason.clone(),
        });
    }

    checkpoint(cancel, Stage::Locate)?;
    let (located, located_diags) = locate(&layout, dims);
    diagnostics.extend(located_diags);
    tracing::info!(
        layout = %layout.name,
        questions = located.len(),
        options = layout.n_options(),
        "bubbles located"
    );

    checkpoint(cancel, Stage::Estimate)?;
    let estimator = estimator_for(&config.fill);
    let fills = fill::measure(&normalized.binary, &located, estimator.as_ref());

    checkpoint(cancel, Stage::Classify)?;
    let questions: Vec<QuestionClassification> = located
        .iter()
        .zip(fills)
        .map(|(q, f)| {
            QuestionClassification::from_fills(q.number, f, q.out_of_bounds, &config.classify)
        })
        .collect();
    for q in &questions {
        tracing::trace!(
            question = q.number,
            status = %q.status,
            best = ?q.best_option,
            "classified"
        );
    }

    let analysis = SheetAnalysis {
        image_size: [dims.0, dims.1],
        layout: layout.name.clone(),
        deskew: normalized.deskew,
        questions,
        diagnostics,
    };
    tracing::info!(
        estimator = estimator.name(),
        confident = analysis.count_status(QuestionStatus::Confident),
        ambiguous = analysis.count_status(QuestionStatus::Ambiguous),
        multiple = analysis.count_status(QuestionStatus::Multiple),
        blank = analysis.count_status(QuestionStatus::Blank),
        "sheet classified"
    );
    Ok(analysis)
}

/// Full run: analyze, resolve ambiguity, score.
pub(crate) fn grade_sheet(
    image: &SheetImage,
    layout: Option<&SheetLayout>,
    key: &AnswerKey,
    policy: &ScoringPolicy,
    config: &GradeConfig,
    resolver: Option<&Arc<dyn AmbiguityResolver>>,
    cancel: Option<&CancellationToken>,
) -> EngineResult<ScoreReport> {
    policy.validate()?;

    let mut analysis = analyze_sheet(image, layout, config, cancel)?;

    checkpoint(cancel, Stage::Resolve)?;
    let fusion_diags = resolve::fuse(
        &mut analysis.questions,
        key,
        resolver,
        &config.fusion,
        config.classify.rival,
        cancel,
    )?;

    checkpoint(cancel, Stage::Score)?;
    let answers: Vec<GradedAnswer> = analysis.questions.iter().map(GradedAnswer::from).collect();
    let mut diagnostics = analysis.diagnostics;
    diagnostics.extend(fusion_diags);
    let report = score_answers(&answers, key, policy, diagnostics);

    tracing::info!(
        total = report.total,
        max = report.max_score,
        correct = report.counts.correct,
        wrong = report.counts.wrong,
        blank = report.counts.blank,
        invalid = report.counts.invalid,
        partial = report.partial,
        diagnostics = report.diagnostics.len(),
        "sheet scored"
    );
    Ok(report)
}
