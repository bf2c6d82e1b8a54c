use crate::error::{Result, ScribeError};
use crate::generation::GenerationSettings;
use crate::tokenization::TokenizationConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings for both sides of the pipeline. Every section has defaults, so
/// a partial JSON document is enough.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tokenization: TokenizationConfig,
    pub generation: GenerationSettings,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json).map_err(|e| match e {
            ScribeError::InvalidConfig(reason) => {
                ScribeError::InvalidConfig(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.tokenization.validate()?;
        self.generation.validate()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"tokenization": {"max_length": 2048}, "generation": {"temperature": 0.3}}"#,
        )
        .unwrap();

        assert_eq!(config.tokenization.max_length, 2048);
        assert_eq!(config.tokenization.max_prompt_length, 1024);
        assert_eq!(config.tokenization.pad_to_multiple_of, Some(8));
        assert_eq!(config.generation.temperature, 0.3);
        assert_eq!(config.generation.max_new_tokens, 512);
    }

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(
            PipelineConfig::from_json_str("{}").unwrap(),
            PipelineConfig::default()
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let result = PipelineConfig::from_json_str(r#"{"tokenization": {"max_length": 0}}"#);
        assert!(matches!(result, Err(ScribeError::InvalidConfig(_))));

        let result = PipelineConfig::from_json_str("not json");
        assert!(matches!(result, Err(ScribeError::Serialization(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelineConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(PipelineConfig::from_json_str(&json).unwrap(), config);
    }
}
