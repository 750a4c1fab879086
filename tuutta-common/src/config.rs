//! Configuration file loading
//!
//! The TOML file is the third tier of configuration: command-line arguments
//! and environment variables (resolved by the binary) override it, and
//! compiled defaults fill whatever it leaves unset. A missing file is not an
//! error; every field is optional.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory name used under the platform config and data directories
pub const APP_DIR: &str = "tuutta";

/// Configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Path to the SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP listen address, e.g. `127.0.0.1:5740`
    #[serde(default)]
    pub bind_address: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub webhooks: WebhookConfig,

    #[serde(default)]
    pub certificates: CertificateConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter directive (trace, debug, info, warn, error, or a full EnvFilter directive)
    #[serde(default)]
    pub level: Option<String>,
}

/// SendGrid credentials
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub sendgrid_api_key: Option<String>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
}

/// HTTP push gateway
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PushConfig {
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CertificateConfig {
    /// Base of the public verification URL; `/verify/{code}` is appended
    #[serde(default)]
    pub verification_base_url: Option<String>,
}

/// Job cadences, in seconds
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub outbox_interval_secs: Option<u64>,
    #[serde(default)]
    pub notification_interval_secs: Option<u64>,
    #[serde(default)]
    pub notification_batch_size: Option<usize>,
    #[serde(default)]
    pub risk_interval_secs: Option<u64>,
    #[serde(default)]
    pub daily_interval_secs: Option<u64>,
    #[serde(default)]
    pub digest_interval_secs: Option<u64>,
}

/// Parse a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load the configuration file, degrading to defaults
///
/// `explicit` is a path given on the command line or in the environment; when
/// absent the platform default location is tried. Unreadable or invalid files
/// are logged and ignored.
pub fn load_or_default(explicit: Option<&Path>) -> TomlConfig {
    let path = match explicit.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => path,
        None => {
            warn!("Could not determine config directory, using defaults");
            return TomlConfig::default();
        }
    };

    if !path.exists() {
        if explicit.is_some() {
            warn!("Config file not found: {}, using defaults", path.display());
        }
        return TomlConfig::default();
    }

    match load_toml_config(&path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Ignoring config file: {}", e);
            TomlConfig::default()
        }
    }
}

/// `~/.config/tuutta/config.toml` (platform equivalent elsewhere)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Default database location under the platform data directory
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./tuutta_data"))
        .join("tuutta.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
    }

    #[test]
    fn test_sections_parse() {
        let config: TomlConfig = toml::from_str(
            r#"
            database_path = "/var/lib/tuutta/tuutta.db"

            [email]
            sendgrid_api_key = "SG.key"
            from_address = "noreply@example.com"

            [scheduler]
            notification_batch_size = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, Some(PathBuf::from("/var/lib/tuutta/tuutta.db")));
        assert_eq!(config.email.sendgrid_api_key.as_deref(), Some("SG.key"));
        assert_eq!(config.scheduler.notification_batch_size, Some(25));
        assert!(config.push.gateway_url.is_none());
    }

    #[test]
    fn test_default_database_path_is_named() {
        assert!(default_database_path().ends_with("tuutta.db"));
    }
}
