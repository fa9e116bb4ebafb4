//! Scoring engine: answer keys, policies and score reports.

mod answer_key;
mod policy;
mod report;

pub use answer_key::{AnswerKey, KeyError};
pub use policy::ScoringPolicy;
pub use report::{score_answers, GradedAnswer, Outcome, QuestionScore, ScoreCounts, ScoreReport};
