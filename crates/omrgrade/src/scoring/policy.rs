//! Scoring weights.

use std::path::Path;

use crate::error::{EngineError, EngineResult};

/// Points per outcome.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringPolicy {
    pub correct: f64,
    pub wrong: f64,
    pub blank: f64,
    /// Points for INVALID answers; the blank weight when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid: Option<f64>,
    /// Keep negative totals instead of flooring at zero.
    #[serde(default)]
    pub allow_negative_total: bool,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            correct: 1.0,
            wrong: 0.0,
            blank: 0.0,
            invalid: None,
            allow_negative_total: false,
        }
    }
}

impl ScoringPolicy {
    /// Weight applied to INVALID answers.
    pub fn invalid_weight(&self) -> f64 {
        self.invalid.unwrap_or(self.blank)
    }

    /// Reject non-finite weights.
    pub fn validate(&self) -> EngineResult<()> {
        let weights = [
            ("correct", Some(self.correct)),
            ("wrong", Some(self.wrong)),
            ("blank", Some(self.blank)),
            ("invalid", self.invalid),
        ];
        for (name, w) in weights {
            if let Some(w) = w {
                if !w.is_finite() {
                    return Err(EngineError::invalid_policy(format!(
                        "weight '{name}' must be finite (got {w})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse a policy document. `correct`, `wrong` and `blank` are required
    /// numbers; `invalid` is an optional number and `allow_negative_total`
    /// an optional boolean.
    pub fn from_json_str(data: &str) -> EngineResult<Self> {
        let policy: Self = serde_json::from_str(data)
            .map_err(|e| EngineError::invalid_policy(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a policy from a JSON file.
    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            EngineError::invalid_policy(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_policy() {
        let p = ScoringPolicy::from_json_str(
            r#"{"correct":4,"wrong":-1,"blank":0,"invalid":-0.5,"allow_negative_total":true}"#,
        )
        .expect("policy");
        assert_eq!(p.correct, 4.0);
        assert_eq!(p.wrong, -1.0);
        assert_eq!(p.invalid_weight(), -0.5);
        assert!(p.allow_negative_total);
    }

    #[test]
    fn invalid_weight_defaults_to_blank() {
        let p = ScoringPolicy::from_json_str(r#"{"correct":1,"wrong":0,"blank":0.25}"#)
            .expect("policy");
        assert_eq!(p.invalid_weight(), 0.25);
        assert!(!p.allow_negative_total);
    }

    #[test]
    fn missing_or_non_numeric_weights_are_fatal() {
        for doc in [
            r#"{"correct":1,"wrong":0}"#,
            r#"{"correct":"1","wrong":0,"blank":0}"#,
            r#"{"correct":1,"wrong":0,"blank":0,"invalid":"x"}"#,
            "not json",
        ] {
            let err = ScoringPolicy::from_json_str(doc).expect_err(doc);
            assert!(matches!(err, EngineError::InvalidScoringPolicy { .. }), "{doc}");
        }
    }

    #[test]
    fn policy_errors_name_the_field() {
        let err = ScoringPolicy::from_json_str(r#"{"correct":1,"wrong":0}"#).expect_err("missing");
        assert!(err.to_string().contains("blank"), "{err}");
        let err = ScoringPolicy::from_json_str(r#"{"correct":1,"wrong":0,"blank":0,"invalid_pts":1}"#)
            .expect_err("unknown");
        assert!(err.to_string().contains("invalid_pts"), "{err}");
    }

    #[test]
    fn non_finite_weight_is_rejected() {
        let p = ScoringPolicy {
            wrong: f64::NAN,
            ..ScoringPolicy::default()
        };
        assert!(p.validate().is_err());
    }
}
