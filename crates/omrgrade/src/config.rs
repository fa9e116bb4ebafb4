//! Engine configuration.

use std::path::Path;

use crate::classify::ClassifierThresholds;
use crate::error::{EngineError, EngineResult};
use crate::fill::FillConfig;
use crate::normalize::NormalizeConfig;
use crate::resolve::FusionConfig;
use crate::sheet_layout::LayoutInference;

/// Top-level grading configuration.
///
/// Every section defaults independently, so a JSON document only needs the
/// fields it overrides:
///
/// ```
/// let cfg = omrgrade::GradeConfig::from_json_str(r#"{"classify":{"high":0.8}}"#).unwrap();
/// assert_eq!(cfg.classify.high, 0.8);
/// assert_eq!(cfg.classify.low, 0.2);
/// ```
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GradeConfig {
    pub normalize: NormalizeConfig,
    pub fill: FillConfig,
    pub classify: ClassifierThresholds,
    pub fusion: FusionConfig,
    /// Grid used when no explicit layout is supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_inference: Option<LayoutInference>,
}

impl GradeConfig {
    /// Check every section for inconsistent values.
    pub fn validate(&self) -> EngineResult<()> {
        self.normalize.validate()?;
        self.fill.validate()?;
        self.classify.validate()?;
        self.fusion.validate()?;
        if let Some(inference) = &self.layout_inference {
            inference.validate()?;
        }
        Ok(())
    }

    /// Parse and validate a configuration document.
    pub fn from_json_str(data: &str) -> EngineResult<Self> {
        let cfg: Self = serde_json::from_str(data)
            .map_err(|e| EngineError::invalid_config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a configuration file.
    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            EngineError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&data)
    }
}
