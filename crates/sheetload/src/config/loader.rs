use std::path::Path;

use crate::config::schema::{ImportConfig, SUPPORTED_VERSION};
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ImportConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ImportConfig, ConfigError> {
    let config: ImportConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &ImportConfig) -> Result<(), ConfigError> {
    if config.version != SUPPORTED_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.chunk_size == 0 {
        return Err(ConfigError::Validation {
            message: "chunk_size must be at least 1".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.max_rows == Some(0) {
        return Err(ConfigError::Validation {
            message: "max_rows must be at least 1 when set".to_string(),
        });
    }

    if config.default_queue.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "default_queue must not be empty".to_string(),
        });
    }

    let delimiter = config.csv_delimiter.as_bytes();
    if delimiter.len() != 1 || !delimiter[0].is_ascii() || delimiter[0] == b'"' {
        return Err(ConfigError::Validation {
            message: format!(
                "csv_delimiter must be a single ASCII character, got '{}'",
                config.csv_delimiter
            ),
        });
    }

    Ok(())
}
