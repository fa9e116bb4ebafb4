//! Ratio-dominance second opinion.

use super::{AmbiguityResolver, AmbiguousQuestion, ResolverError, SecondaryDecision, Verdict};
use crate::classify::QuestionStatus;

/// Built-in secondary source that accepts the darkest option when it
/// clearly dominates the runner-up.
///
/// Confidence is `1 - runner_up / top`. A question whose darkest option is
/// below `min_ratio` is judged BLANK; one without a dominant option is
/// judged BLANK (AMBIGUOUS) or INVALID (MULTIPLE).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DominanceResolver {
    /// Required `top / runner_up` ratio.
    pub dominance: f32,
    /// Darkest option must reach this ratio to be picked.
    pub min_ratio: f32,
}

impl Default for DominanceResolver {
    fn default() -> Self {
        Self {
            dominance: 1.5,
            min_ratio: 0.25,
        }
    }
}

impl DominanceResolver {
    fn decide(&self, q: &AmbiguousQuestion) -> SecondaryDecision {
        let mut top: Option<usize> = None;
        for (i, o) in q.options.iter().enumerate() {
            if top.map_or(true, |t| o.ratio > q.options[t].ratio) {
                top = Some(i);
            }
        }
        let r1 = top.map_or(0.0, |t| q.options[t].ratio);
        let r2 = q
            .options
            .iter()
            .enumerate()
            .filter(|&(i, _)| Some(i) != top)
            .map(|(_, o)| o.ratio)
            .fold(0.0f32, f32::max);

        let (verdict, confidence) = match top {
            Some(_) if r1 < self.min_ratio => {
                (Verdict::Blank, 1.0 - r1 / self.min_ratio.max(f32::EPSILON))
            }
            Some(t) if r2 <= 0.0 || r1 >= self.dominance * r2 => {
                (Verdict::Option(q.options[t].letter.clone()), 1.0 - r2 / r1)
            }
            Some(_) => {
                let verdict = if q.status == QuestionStatus::Multiple {
                    Verdict::Invalid
                } else {
                    Verdict::Blank
                };
                (verdict, r2 / r1)
            }
            None => (Verdict::Blank, 1.0),
        };

        SecondaryDecision {
            question: q.question,
            verdict,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

impl AmbiguityResolver for DominanceResolver {
    fn name(&self) -> &str {
        "dominance"
    }

    fn resolve_ambiguous(
        &self,
        batch: &[AmbiguousQuestion],
    ) -> Result<Vec<SecondaryDecision>, ResolverError> {
        Ok(batch.iter().map(|q| self.decide(q)).collect())
    }
}
