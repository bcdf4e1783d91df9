use std::path::Path;

use crate::config::schema::PipelineSettings;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/settings-v1.json");

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<PipelineSettings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<PipelineSettings, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let settings: PipelineSettings = serde_json::from_value(json_value)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_settings(settings: &PipelineSettings) -> Result<(), ConfigError> {
    if settings.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported settings version: {}", settings.version),
        });
    }

    for (name, value) in [
        (
            "classification.low_confidence_threshold",
            settings.classification.low_confidence_threshold,
        ),
        (
            "reconciliation.auto_apply_threshold",
            settings.reconciliation.auto_apply_threshold,
        ),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Validation {
                message: format!("{} must be within 0..=1, got {}", name, value),
            });
        }
    }

    let extraction = &settings.extraction;
    if extraction.chunk_size == 0 || extraction.chunk_overlap >= extraction.chunk_size {
        return Err(ConfigError::Validation {
            message: format!(
                "extraction.chunk_overlap ({}) must be smaller than chunk_size ({})",
                extraction.chunk_overlap, extraction.chunk_size
            ),
        });
    }

    if settings.dlq.capacity == 0 {
        return Err(ConfigError::Validation {
            message: "dlq.capacity must be at least 1".to_string(),
        });
    }

    for (name, stage_override) in &settings.stages {
        if stage_override
            .concurrency
            .is_some_and(|c| !(1..=50).contains(&c))
        {
            return Err(ConfigError::InvalidStage {
                stage: name.clone(),
                reason: "concurrency must be within 1..=50".to_string(),
            });
        }
        if stage_override.attempts.is_some_and(|a| !(1..=10).contains(&a)) {
            return Err(ConfigError::InvalidStage {
                stage: name.clone(),
                reason: "attempts must be within 1..=10".to_string(),
            });
        }
    }
    settings.stage_table()?;

    Ok(())
}
