//! Configuration loader for YAML files
//!
//! This module handles loading and validating configuration from YAML files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::AppError;

use super::types::AppConfig;

/// Load configuration from a YAML file
///
/// Checks the file exists, parses the YAML and validates the strategy and
/// feed rules.
///
/// # Arguments
/// * `path` - Path to the configuration YAML file
///
/// # Returns
/// * `Ok(AppConfig)` - Successfully loaded and validated configuration
/// * `Err(AppError)` - File not found, parse error, or validation failure
///
/// # Example
/// ```ignore
/// use std::path::Path;
/// use rebalance_bot::config::load_config;
///
/// let config = load_config(Path::new("config.yaml"))?;
/// ```
pub fn load_config(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Err(AppError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let config: AppConfig = serde_yaml::from_reader(reader).map_err(|e| {
        AppError::Config(format!(
            "YAML parse error in '{}': {}",
            path.display(),
            e
        ))
    })?;

    config.validate()?;

    Ok(config)
}

/// Load configuration from a YAML string
///
/// # Arguments
/// * `yaml_content` - YAML content as a string
///
/// # Returns
/// * `Ok(AppConfig)` - Successfully parsed and validated configuration
/// * `Err(AppError)` - Parse error or validation failure
pub fn load_config_from_str(yaml_content: &str) -> Result<AppConfig, AppError> {
    let config: AppConfig = serde_yaml::from_str(yaml_content).map_err(|e| {
        AppError::Config(format!("YAML parse error: {}", e))
    })?;

    config.validate()?;

    Ok(config)
}

// ============================================================================
// Tests
// ============================================================================
