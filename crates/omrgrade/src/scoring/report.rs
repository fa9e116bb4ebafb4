//! Score computation and the score report.

use super::{AnswerKey, ScoringPolicy};
use crate::classify::{Answer, Provenance, QuestionClassification, QuestionStatus};
use crate::error::Diagnostic;

/// Scoring outcome of one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Wrong,
    Blank,
    Invalid,
    /// The key has no answer for this question.
    Unscored,
}

/// Flat per-question record of the score report.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuestionScore {
    pub question: u32,
    /// Detected letters, comma-joined; empty for BLANK/INVALID.
    pub detected: String,
    /// Accepted letters, comma-joined.
    pub expected: String,
    pub outcome: Outcome,
    pub points: f64,
    /// Classifier tier.
    pub tier: QuestionStatus,
    /// Final status (`RESOLVED` when amended).
    pub status: QuestionStatus,
    /// `deterministic` or `fused`.
    pub provenance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_confidence: Option<f32>,
}

/// Outcome tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScoreCounts {
    pub correct: usize,
    pub wrong: usize,
    pub blank: usize,
    pub invalid: usize,
    pub unscored: usize,
}

impl ScoreCounts {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Correct => self.correct += 1,
            Outcome::Wrong => self.wrong += 1,
            Outcome::Blank => self.blank += 1,
            Outcome::Invalid => self.invalid += 1,
            Outcome::Unscored => self.unscored += 1,
        }
    }
}

/// Result of grading one sheet. Owned by the caller.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScoreReport {
    pub total: f64,
    /// Total if every scorable question were correct.
    pub max_score: f64,
    pub counts: ScoreCounts,
    pub questions: Vec<QuestionScore>,
    /// Key and sheet disagree on question count; only the overlap is scored.
    pub partial: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// A final answer ready for scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedAnswer {
    pub question: u32,
    pub answer: Answer,
    pub tier: QuestionStatus,
    pub status: QuestionStatus,
    pub provenance: Provenance,
}

impl From<&QuestionClassification> for GradedAnswer {
    fn from(c: &QuestionClassification) -> Self {
        Self {
            question: c.number,
            answer: c.final_answer(),
            tier: c.tier,
            status: c.status,
            provenance: c.provenance(),
        }
    }
}

fn outcome_for(answer: &Answer, expected: &[String]) -> Outcome {
    if expected.is_empty() {
        return Outcome::Unscored;
    }
    match answer {
        Answer::Blank => Outcome::Blank,
        Answer::Invalid => Outcome::Invalid,
        // Both sides are sorted and deduplicated.
        Answer::Marked(letters) if letters.as_slice() == expected => Outcome::Correct,
        Answer::Marked(_) => Outcome::Wrong,
    }
}

/// Score `answers` against `key` in positional order.
///
/// When the key and the answers differ in length only the overlapping
/// prefix is scored, the report is flagged `partial` and an
/// [`Diagnostic::AnswerKeyMismatch`] is appended to `diagnostics`.
pub fn score_answers(
    answers: &[GradedAnswer],
    key: &AnswerKey,
    policy: &ScoringPolicy,
    mut diagnostics: Vec<Diagnostic>,
) -> ScoreReport {
    let scored = answers.len().min(key.len());
    let partial = answers.len() != key.len();
    if partial {
        tracing::warn!(
            key_len = key.len(),
            detected = answers.len(),
            scored,
            "answer key length differs from detected questions"
        );
        diagnostics.push(Diagnostic::AnswerKeyMismatch {
            key_len: key.len(),
            detected: answers.len(),
            scored,
        });
    }

    let mut counts = ScoreCounts::default();
    let mut total = 0.0f64;
    let mut max_score = 0.0f64;
    let mut questions = Vec::with_capacity(scored);

    for (idx, a) in answers.iter().take(scored).enumerate() {
        let expected = key.entry(idx).unwrap_or(&[]);
        let outcome = outcome_for(&a.answer, expected);
        let points = match outcome {
            Outcome::Correct => policy.correct,
            Outcome::Wrong => policy.wrong,
            Outcome::Blank => policy.blank,
            Outcome::Invalid => policy.invalid_weight(),
            Outcome::Unscored => 0.0,
        };
        if outcome != Outcome::Unscored {
            max_score += policy.correct;
        }
        counts.add(outcome);
        total += points;

        let (provenance, resolver, secondary_confidence) = match &a.provenance {
            Provenance::Deterministic => ("deterministic".to_string(), None, None),
            Provenance::Fused {
                resolver,
                confidence,
            } => ("fused".to_string(), Some(resolver.clone()), Some(*confidence)),
        };
        questions.push(QuestionScore {
            question: a.question,
            detected: a.answer.letters(),
            expected: expected.join(","),
            outcome,
            points,
            tier: a.tier,
            status: a.status,
            provenance,
            resolver,
            secondary_confidence,
        });
    }

    if total < 0.0 && !policy.allow_negative_total {
        total = 0.0;
    }

    ScoreReport {
        total,
        max_score,
        counts,
        questions,
        partial,
        diagnostics,
    }
}
