//! Fusion of classifier tiers with secondary-source verdicts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::dispatch::dispatch;
use super::{
    fallback_choice, AmbiguityResolver, AmbiguousQuestion, Fallback, FusionConfig, OptionFill,
    SecondaryDecision, Verdict,
};
use crate::api::CancellationToken;
use crate::classify::{Answer, Provenance, QuestionClassification, QuestionStatus, Resolution};
use crate::error::{Diagnostic, EngineResult};
use crate::scoring::AnswerKey;

fn candidate(c: &QuestionClassification) -> AmbiguousQuestion {
    AmbiguousQuestion {
        question: c.number,
        status: c.tier,
        options: c
            .fills
            .iter()
            .map(|f| OptionFill {
                letter: f.option.clone(),
                ratio: f.ratio,
            })
            .collect(),
    }
}

fn apply(c: &mut QuestionClassification, resolution: Resolution) {
    if let Err(e) = c.amend(resolution) {
        tracing::debug!(question = c.number, "amendment skipped: {e}");
    }
}

fn apply_fallback(c: &mut QuestionClassification, cfg: &FusionConfig) {
    let ratios: Vec<f32> = c.fills.iter().map(|f| f.ratio).collect();
    let answer = match fallback_choice(c.tier, &ratios, cfg) {
        Fallback::Pick(i) => Answer::marked([c.fills[i].option.as_str()]),
        Fallback::Blank => Answer::Blank,
        Fallback::Invalid => Answer::Invalid,
    };
    apply(
        c,
        Resolution {
            answer,
            provenance: Provenance::Deterministic,
        },
    );
}

/// Turn a verdict into a resolution, or explain why it is unusable.
fn fuse_verdict(
    c: &QuestionClassification,
    d: &SecondaryDecision,
    resolver: &str,
    cfg: &FusionConfig,
) -> Result<Resolution, String> {
    if !(d.confidence.is_finite() && (0.0..=1.0).contains(&d.confidence)) {
        return Err(format!("confidence {} outside [0, 1]", d.confidence));
    }
    if d.confidence < cfg.min_secondary_confidence {
        return Err(format!(
            "confidence {:.2} below minimum {:.2}",
            d.confidence, cfg.min_secondary_confidence
        ));
    }

    let answer = match &d.verdict {
        Verdict::Option(letter) => {
            let letter = letter.trim().to_ascii_uppercase();
            if !c.fills.iter().any(|f| f.option == letter) {
                return Err(format!("unknown option '{letter}'"));
            }
            let strict_multiple = c.tier == QuestionStatus::Multiple
                && c.options_at_or_above(cfg.override_threshold).len() >= 2;
            if strict_multiple && d.confidence < cfg.min_override_confidence {
                return Err(format!(
                    "confidence {:.2} too low to pick one of several marks (need {:.2})",
                    d.confidence, cfg.min_override_confidence
                ));
            }
            Answer::marked([letter])
        }
        Verdict::Blank => Answer::Blank,
        Verdict::Invalid => Answer::Invalid,
    };

    Ok(Resolution {
        answer,
        provenance: Provenance::Fused {
            resolver: resolver.to_string(),
            confidence: d.confidence,
        },
    })
}

/// Resolve every AMBIGUOUS and MULTIPLE question in place.
///
/// `multi_mark` is the ratio at which a mark counts towards a multi-select
/// answer. CONFIDENT and BLANK questions are left untouched. Returns the
/// diagnostics for every recovered failure.
pub(crate) fn fuse(
    classifications: &mut [QuestionClassification],
    key: &AnswerKey,
    resolver: Option<&Arc<dyn AmbiguityResolver>>,
    cfg: &FusionConfig,
    multi_mark: f32,
    cancel: Option<&CancellationToken>,
) -> EngineResult<Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();
    let mut pending: Vec<usize> = Vec::new();

    for (idx, c) in classifications.iter_mut().enumerate() {
        if c.resolution.is_some() {
            continue;
        }
        match c.tier {
            QuestionStatus::Multiple
                if cfg.accept_multi_select && key.entry(idx).is_some_and(|e| e.len() >= 2) =>
            {
                let marked = c.options_at_or_above(multi_mark);
                tracing::debug!(question = c.number, ?marked, "multi-select answer");
                apply(
                    c,
                    Resolution {
                        answer: Answer::marked(marked),
                        provenance: Provenance::Deterministic,
                    },
                );
            }
            QuestionStatus::Ambiguous | QuestionStatus::Multiple => pending.push(idx),
            _ => {}
        }
    }

    if pending.is_empty() {
        return Ok(diagnostics);
    }

    let Some(resolver) = resolver else {
        tracing::debug!(
            questions = pending.len(),
            "no secondary decision source, applying fallback"
        );
        diagnostics.push(Diagnostic::SecondaryDecisionUnavailable {
            resolver: "none".to_string(),
            reason: "no secondary decision source configured".to_string(),
            questions: pending.iter().map(|&i| classifications[i].number).collect(),
        });
        for &i in &pending {
            apply_fallback(&mut classifications[i], cfg);
        }
        return Ok(diagnostics);
    };

    let batch: Vec<AmbiguousQuestion> = pending.iter().map(|&i| candidate(&classifications[i])).collect();
    tracing::info!(
        resolver = resolver.name(),
        questions = batch.len(),
        "submitting ambiguous questions"
    );
    let outcome = dispatch(resolver, &batch, cfg, cancel)?;
    tracing::debug!(
        requests = outcome.requests,
        decisions = outcome.decisions.len(),
        failed_batches = outcome.failures.len(),
        "secondary decision dispatch finished"
    );

    let mut failed: HashSet<u32> = HashSet::new();
    for failure in outcome.failures {
        tracing::warn!(
            resolver = resolver.name(),
            questions = failure.questions.len(),
            "secondary decision source unavailable, applying fallback: {}",
            failure.error
        );
        failed.extend(failure.questions.iter().copied());
        diagnostics.push(Diagnostic::SecondaryDecisionUnavailable {
            resolver: resolver.name().to_string(),
            reason: failure.error.to_string(),
            questions: failure.questions,
        });
    }

    // First decision per question wins; decisions for questions that were
    // not submitted are ignored.
    let mut decisions: HashMap<u32, SecondaryDecision> = HashMap::new();
    for d in outcome.decisions {
        decisions.entry(d.question).or_insert(d);
    }

    for &i in &pending {
        let c = &mut classifications[i];
        if failed.contains(&c.number) {
            apply_fallback(c, cfg);
            continue;
        }
        let fused = match decisions.get(&c.number) {
            Some(d) => fuse_verdict(c, d, resolver.name(), cfg),
            None => Err("no decision returned".to_string()),
        };
        match fused {
            Ok(resolution) => apply(c, resolution),
            Err(reason) => {
                tracing::warn!(question = c.number, "unusable secondary decision: {reason}");
                diagnostics.push(Diagnostic::UnusableSecondaryDecision {
                    question: c.number,
                    reason,
                });
                apply_fallback(c, cfg);
            }
        }
    }

    Ok(diagnostics)
}
