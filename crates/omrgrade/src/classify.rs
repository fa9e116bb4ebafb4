//! Per-question confidence tiers.
//!
//! ```text
//! BLANK ──► CONFIDENT            (terminal)
//!       ├─► AMBIGUOUS ─► RESOLVED
//!       └─► MULTIPLE  ─► RESOLVED
//! ```
//!
//! The classifier assigns the initial tier from fill ratios. The resolver
//! may amend an AMBIGUOUS or MULTIPLE question exactly once.

use thiserror::Error;

use crate::error::{EngineError, EngineResult};
use crate::fill::FillMeasurement;

/// Fill-ratio thresholds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// Ratio at or above which an option counts as filled.
    pub high: f32,
    /// Ratio at or above which an option counts as partially filled.
    pub low: f32,
    /// A second option at or above this ratio next to a filled one makes
    /// the question MULTIPLE.
    pub rival: f32,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            high: 0.70,
            low: 0.20,
            rival: 0.60,
        }
    }
}

impl ClassifierThresholds {
    pub(crate) fn validate(&self) -> EngineResult<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(self.high) && in_unit(self.low) && in_unit(self.rival)) {
            return Err(EngineError::invalid_config(
                "classifier thresholds must lie in [0, 1]",
            ));
        }
        if !(self.low < self.rival && self.rival <= self.high) {
            return Err(EngineError::invalid_config(format!(
                "classifier thresholds must satisfy low < rival <= high (got {} / {} / {})",
                self.low, self.rival, self.high
            )));
        }
        Ok(())
    }
}

/// Confidence tier of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    Confident,
    Ambiguous,
    Multiple,
    Blank,
    Resolved,
}

impl std::fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QuestionStatus::Confident => "CONFIDENT",
            QuestionStatus::Ambiguous => "AMBIGUOUS",
            QuestionStatus::Multiple => "MULTIPLE",
            QuestionStatus::Blank => "BLANK",
            QuestionStatus::Resolved => "RESOLVED",
        })
    }
}

/// A final per-question answer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Answer {
    /// Marked option letters, uppercase and sorted.
    Marked(Vec<String>),
    Blank,
    /// Several marks with no resolvable intent.
    Invalid,
}

impl Answer {
    /// A marked answer from any letters; normalizes case and order.
    pub fn marked<I, S>(letters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut v: Vec<String> = letters
            .into_iter()
            .map(|s| s.as_ref().trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        v.sort();
        v.dedup();
        if v.is_empty() {
            Answer::Blank
        } else {
            Answer::Marked(v)
        }
    }

    /// Comma-joined letters; empty for BLANK/INVALID.
    pub fn letters(&self) -> String {
        match self {
            Answer::Marked(v) => v.join(","),
            Answer::Blank | Answer::Invalid => String::new(),
        }
    }
}

/// Origin of a final answer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum Provenance {
    /// Derived from pixel measurements and fixed rules only.
    Deterministic,
    /// Taken from the secondary decision source.
    Fused { resolver: String, confidence: f32 },
}

/// The amendment applied by the resolver.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    pub answer: Answer,
    pub provenance: Provenance,
}

/// Rejected amendment of a classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmendRejected {
    #[error("question {question} is already resolved")]
    AlreadyResolved { question: u32 },
    #[error("question {question} is {status} and cannot be amended")]
    NotAmendable { question: u32, status: QuestionStatus },
}

/// Classifier output for one question.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuestionClassification {
    pub number: u32,
    /// Tier assigned by the classifier; never changes.
    pub tier: QuestionStatus,
    /// Current status: `tier`, or `Resolved` after amendment.
    pub status: QuestionStatus,
    /// Highest-ratio option for CONFIDENT, AMBIGUOUS and MULTIPLE.
    pub best_option: Option<String>,
    pub fills: Vec<FillMeasurement>,
    pub resolution: Option<Resolution>,
    /// An option region fell outside the image.
    pub out_of_bounds: bool,
}

impl QuestionClassification {
    /// Classify one question from its fill vector.
    pub(crate) fn from_fills(
        number: u32,
        fills: Vec<FillMeasurement>,
        out_of_bounds: bool,
        t: &ClassifierThresholds,
    ) -> Self {
        let (tier, best) = if out_of_bounds {
            (QuestionStatus::Blank, None)
        } else {
            let ratios: Vec<f32> = fills.iter().map(|f| f.ratio).collect();
            classify_ratios(&ratios, t)
        };
        Self {
            number,
            tier,
            status: tier,
            best_option: best.map(|i| fills[i].option.clone()),
            fills,
            resolution: None,
            out_of_bounds,
        }
    }

    /// Record the resolver's decision. Allowed once, and only for
    /// AMBIGUOUS or MULTIPLE questions.
    pub fn amend(&mut self, resolution: Resolution) -> Result<(), AmendRejected> {
        if self.resolution.is_some() {
            return Err(AmendRejected::AlreadyResolved {
                question: self.number,
            });
        }
        if !matches!(self.tier, QuestionStatus::Ambiguous | QuestionStatus::Multiple) {
            return Err(AmendRejected::NotAmendable {
                question: self.number,
                status: self.tier,
            });
        }
        self.resolution = Some(resolution);
        self.status = QuestionStatus::Resolved;
        Ok(())
    }

    /// The answer as it stands. Unresolved AMBIGUOUS reads as BLANK and
    /// unresolved MULTIPLE as INVALID.
    pub fn final_answer(&self) -> Answer {
        if let Some(r) = &self.resolution {
            return r.answer.clone();
        }
        match (self.tier, &self.best_option) {
            (QuestionStatus::Confident, Some(letter)) => Answer::Marked(vec![letter.clone()]),
            (QuestionStatus::Multiple, _) => Answer::Invalid,
            _ => Answer::Blank,
        }
    }

    /// Provenance of [`Self::final_answer`].
    pub fn provenance(&self) -> Provenance {
        self.resolution
            .as_ref()
            .map(|r| r.provenance.clone())
            .unwrap_or(Provenance::Deterministic)
    }

    /// Option letters whose ratio is at or above `threshold`, in positional order.
    pub fn options_at_or_above(&self, threshold: f32) -> Vec<String> {
        self.fills
            .iter()
            .filter(|f| f.ratio >= threshold)
            .map(|f| f.option.clone())
            .collect()
    }
}

/// Index of the highest ratio; ties go to the earliest position.
fn argmax(ratios: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &r) in ratios.iter().enumerate() {
        match best {
            Some(b) if ratios[b] >= r => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Assign a tier to a fill-ratio vector, with the best option index.
pub fn classify_ratios(ratios: &[f32], t: &ClassifierThresholds) -> (QuestionStatus, Option<usize>) {
    let filled: Vec<usize> = (0..ratios.len()).filter(|&i| ratios[i] >= t.high).collect();
    let partial = ratios.iter().filter(|&&r| r >= t.low && r < t.high).count();

    match filled.as_slice() {
        [only] => {
            let rivals = ratios
                .iter()
                .enumerate()
                .any(|(i, &r)| i != *only && r >= t.rival);
            if rivals {
                (QuestionStatus::Multiple, Some(*only))
            } else {
                (QuestionStatus::Confident, Some(*only))
            }
        }
        [] if partial > 0 => (QuestionStatus::Ambiguous, argmax(ratios)),
        [] => (QuestionStatus::Blank, None),
        _ => (QuestionStatus::Multiple, argmax(ratios)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fills;

    fn classify(r: &[f32]) -> (QuestionStatus, Option<usize>) {
        classify_ratios(r, &ClassifierThresholds::default())
    }

    #[test]
    fn single_dark_option_is_confident() {
        assert_eq!(
            classify(&[0.05, 0.82, 0.10, 0.08]),
            (QuestionStatus::Confident, Some(1))
        );
    }

    #[test]
    fn partial_marks_are_ambiguous() {
        assert_eq!(
            classify(&[0.45, 0.55, 0.05, 0.05]),
            (QuestionStatus::Ambiguous, Some(1))
        );
    }

    #[test]
    fn near_equal_dark_marks_are_multiple() {
        assert_eq!(
            classify(&[0.75, 0.68, 0.05, 0.05]),
            (QuestionStatus::Multiple, Some(0))
        );
        assert_eq!(
            classify(&[0.90, 0.05, 0.80, 0.05]).0,
            QuestionStatus::Multiple
        );
    }

    #[test]
    fn rival_equal_to_high_restores_plain_rule() {
        let t = ClassifierThresholds {
            rival: 0.70,
            ..ClassifierThresholds::default()
        };
        assert_eq!(
            classify_ratios(&[0.75, 0.68, 0.05, 0.05], &t).0,
            QuestionStatus::Confident
        );
    }

    #[test]
    fn all_light_is_blank() {
        assert_eq!(classify(&[0.0, 0.1, 0.19, 0.05]), (QuestionStatus::Blank, None));
    }

    #[test]
    fn ties_go_to_first_position() {
        assert_eq!(classify(&[0.4, 0.4, 0.0]), (QuestionStatus::Ambiguous, Some(0)));
    }

    #[test]
    fn raising_one_option_never_lowers_confidence() {
        let rank = |s: QuestionStatus| match s {
            QuestionStatus::Blank => 0,
            QuestionStatus::Ambiguous => 1,
            QuestionStatus::Confident => 2,
            other => panic!("unexpected {other}"),
        };
        let mut prev = 0;
        for step in 0..=20 {
            let r = step as f32 / 20.0;
            let (s, _) = classify(&[0.1, r, 0.05, 0.15]);
            let k = rank(s);
            assert!(k >= prev, "ratio {r} dropped to {s}");
            prev = k;
        }
        assert_eq!(prev, 2);
    }

    #[test]
    fn amendment_happens_exactly_once() {
        let mut q = QuestionClassification::from_fills(
            3,
            fills(&[0.45, 0.55, 0.05, 0.05]),
            false,
            &ClassifierThresholds::default(),
        );
        let res = Resolution {
            answer: Answer::marked(["B"]),
            provenance: Provenance::Deterministic,
        };
        q.amend(res.clone()).expect("first amendment");
        assert_eq!(q.status, QuestionStatus::Resolved);
        assert_eq!(q.tier, QuestionStatus::Ambiguous);
        assert_eq!(
            q.amend(res),
            Err(AmendRejected::AlreadyResolved { question: 3 })
        );
    }

    #[test]
    fn confident_question_rejects_amendment() {
        let mut q = QuestionClassification::from_fills(
            1,
            fills(&[0.05, 0.82, 0.10, 0.08]),
            false,
            &ClassifierThresholds::default(),
        );
        let err = q
            .amend(Resolution {
                answer: Answer::marked(["A"]),
                provenance: Provenance::Deterministic,
            })
            .expect_err("confident");
        assert!(matches!(err, AmendRejected::NotAmendable { .. }));
        assert_eq!(q.final_answer(), Answer::Marked(vec!["B".into()]));
    }

    #[test]
    fn out_of_bounds_question_is_blank() {
        let q = QuestionClassification::from_fills(
            9,
            Vec::new(),
            true,
            &ClassifierThresholds::default(),
        );
        assert_eq!(q.tier, QuestionStatus::Blank);
        assert_eq!(q.final_answer(), Answer::Blank);
    }

    #[test]
    fn marked_answer_normalizes_letters() {
        assert_eq!(
            Answer::marked(["c", "B", "c"]),
            Answer::Marked(vec!["B".into(), "C".into()])
        );
        assert_eq!(Answer::marked(Vec::<String>::new()), Answer::Blank);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let t = ClassifierThresholds {
            high: 0.3,
            low: 0.5,
            rival: 0.4,
        };
        assert!(t.validate().is_err());
        assert!(ClassifierThresholds::default().validate().is_ok());
    }
}
