use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use thiserror::Error;
use tracing::info;
use validator::Validate;

use crate::entities::quality_inspection::InspectionType;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_BOM_MAX_DEPTH: u32 = 16;
const DEFAULT_SEQUENCE_WIDTH: usize = 4;
const DEFAULT_INCOMING_PREFIX: &str = "IQC";
const DEFAULT_PROCESS_PREFIX: &str = "PQC";
const DEFAULT_FINAL_PREFIX: &str = "FQC";

/// Database pool configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of pooled connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Acquire timeout in seconds
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

/// BOM expansion configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BomConfig {
    /// Maximum recursion depth for multi-level BOM expansion. Exceeding it
    /// is reported as a suspected cycle, never resolved silently.
    #[serde(default = "default_bom_max_depth")]
    #[validate(range(min = 1, max = 64))]
    pub max_depth: u32,
}

impl Default for BomConfig {
    fn default() -> Self {
        Self {
            max_depth: default_bom_max_depth(),
        }
    }
}

/// Inspection number generation settings.
///
/// Numbers compose `<prefix><YYYYMMDD><zero-padded sequence>`, with the
/// sequence counted per type per day.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct InspectionConfig {
    #[serde(default = "default_incoming_prefix")]
    #[validate(length(min = 1, max = 8))]
    pub incoming_prefix: String,

    #[serde(default = "default_process_prefix")]
    #[validate(length(min = 1, max = 8))]
    pub process_prefix: String,

    #[serde(default = "default_final_prefix")]
    #[validate(length(min = 1, max = 8))]
    pub final_prefix: String,

    /// Zero-padded width of the daily sequence component
    #[serde(default = "default_sequence_width")]
    pub sequence_width: usize,
}

impl InspectionConfig {
    pub fn prefix(&self, inspection_type: InspectionType) -> &str {
        match inspection_type {
            InspectionType::Incoming => &self.incoming_prefix,
            InspectionType::Process => &self.process_prefix,
            InspectionType::Final => &self.final_prefix,
        }
    }
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            incoming_prefix: default_incoming_prefix(),
            process_prefix: default_process_prefix(),
            final_prefix: default_final_prefix(),
            sequence_width: default_sequence_width(),
        }
    }
}

/// Material requirement calculation settings
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RequirementsConfig {
    /// When true, a shortage report still allows issuance to proceed unless
    /// the caller overrides per call.
    #[serde(default)]
    pub allow_partial_default: bool,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Environment (development, production, test)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level configuration
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON logs instead of the human-readable format
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    #[validate]
    pub db: DatabaseConfig,

    #[serde(default)]
    #[validate]
    pub bom: BomConfig,

    #[serde(default)]
    #[validate]
    pub inspection: InspectionConfig,

    #[serde(default)]
    pub requirements: RequirementsConfig,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Errors produced while loading or validating configuration
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads configuration from layered sources: `config/default`, then
/// `config/<environment>`, then `MES_`-prefixed environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let environment = env::var("MES_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let config = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("MES").separator("__"))
        .set_default("environment", environment.clone())?
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    info!(environment = %app_config.environment, "configuration loaded");

    Ok(app_config)
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_acquire_timeout_secs() -> u64 {
    8
}

fn default_bom_max_depth() -> u32 {
    DEFAULT_BOM_MAX_DEPTH
}

fn default_sequence_width() -> usize {
    DEFAULT_SEQUENCE_WIDTH
}

fn default_incoming_prefix() -> String {
    DEFAULT_INCOMING_PREFIX.to_string()
}

fn default_process_prefix() -> String {
    DEFAULT_PROCESS_PREFIX.to_string()
}

fn default_final_prefix() -> String {
    DEFAULT_FINAL_PREFIX.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            db: DatabaseConfig::default(),
            bom: BomConfig::default(),
            inspection: InspectionConfig::default(),
            requirements: RequirementsConfig::default(),
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.bom.max_depth, DEFAULT_BOM_MAX_DEPTH);
    }

    #[test]
    fn prefix_resolution_follows_inspection_type() {
        let inspection = InspectionConfig::default();
        assert_eq!(inspection.prefix(InspectionType::Incoming), "IQC");
        assert_eq!(inspection.prefix(InspectionType::Process), "PQC");
        assert_eq!(inspection.prefix(InspectionType::Final), "FQC");
    }
}
