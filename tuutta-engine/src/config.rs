//! Configuration resolution for tuutta-engine
//!
//! Priority: command line / environment (via clap) > TOML file > defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tuutta_common::config::{default_database_path, TomlConfig};

use crate::certificates::DEFAULT_VERIFICATION_BASE_URL;
use crate::notifications::dispatcher::DEFAULT_BATCH_SIZE;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5740";
pub const DEFAULT_FROM_ADDRESS: &str = "noreply@tuutta.com";
pub const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 5000;

/// Command-line arguments for tuutta-engine
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "tuutta-engine")]
#[command(about = "Compliance risk and automation engine for Tuutta")]
#[command(version)]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(long, env = "TUUTTA_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "TUUTTA_DATABASE")]
    pub database: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long, env = "TUUTTA_BIND")]
    pub bind: Option<String>,

    #[arg(long, env = "SENDGRID_API_KEY", hide_env_values = true)]
    pub sendgrid_api_key: Option<String>,

    /// Sender address for notification email
    #[arg(long, env = "TUUTTA_EMAIL_FROM")]
    pub email_from: Option<String>,

    #[arg(long, env = "TUUTTA_PUSH_GATEWAY_URL")]
    pub push_gateway_url: Option<String>,

    #[arg(long, env = "TUUTTA_PUSH_API_KEY", hide_env_values = true)]
    pub push_api_key: Option<String>,

    /// Base URL of the public certificate verification page
    #[arg(long, env = "TUUTTA_VERIFICATION_BASE_URL")]
    pub verification_base_url: Option<String>,

    /// Serve the API only; do not run scheduled jobs
    #[arg(long)]
    pub no_scheduler: bool,
}

/// Job cadences
#[derive(Debug, Clone, PartialEq)]
pub struct Cadences {
    pub outbox: Duration,
    pub notifications: Duration,
    pub risk: Duration,
    /// Reminders, overdue sweep, certificate reconciliation
    pub daily: Duration,
    pub digest: Duration,
}

impl Default for Cadences {
    fn default() -> Self {
        Self {
            outbox: Duration::from_secs(10),
            notifications: Duration::from_secs(5 * 60),
            risk: Duration::from_secs(7 * 24 * 60 * 60),
            daily: Duration::from_secs(24 * 60 * 60),
            digest: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Fully resolved engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub bind_address: String,
    pub log_level: Option<String>,
    pub sendgrid_api_key: Option<String>,
    pub email_from: String,
    pub email_from_name: Option<String>,
    pub push_gateway_url: Option<String>,
    pub push_api_key: Option<String>,
    pub webhook_timeout: Duration,
    pub verification_base_url: String,
    pub notification_batch_size: usize,
    pub cadences: Cadences,
    pub run_scheduler: bool,
}

impl EngineConfig {
    pub fn resolve(args: &Args, toml: &TomlConfig) -> Self {
        let defaults = Cadences::default();
        let secs = |value: Option<u64>, default: Duration| value.map(Duration::from_secs).unwrap_or(default);
        let scheduler = &toml.scheduler;

        let config = Self {
            database_path: args
                .database
                .clone()
                .or_else(|| toml.database_path.clone())
                .unwrap_or_else(default_database_path),
            bind_address: args
                .bind
                .clone()
                .or_else(|| toml.bind_address.clone())
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            log_level: toml.logging.level.clone(),
            sendgrid_api_key: args
                .sendgrid_api_key
                .clone()
                .or_else(|| toml.email.sendgrid_api_key.clone()),
            email_from: args
                .email_from
                .clone()
                .or_else(|| toml.email.from_address.clone())
                .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            email_from_name: toml.email.from_name.clone(),
            push_gateway_url: args
                .push_gateway_url
                .clone()
                .or_else(|| toml.push.gateway_url.clone()),
            push_api_key: args.push_api_key.clone().or_else(|| toml.push.api_key.clone()),
            webhook_timeout: Duration::from_millis(
                toml.webhooks.timeout_ms.unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_MS),
            ),
            verification_base_url: args
                .verification_base_url
                .clone()
                .or_else(|| toml.certificates.verification_base_url.clone())
                .unwrap_or_else(|| DEFAULT_VERIFICATION_BASE_URL.to_string()),
            notification_batch_size: scheduler.notification_batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            cadences: Cadences {
                outbox: secs(scheduler.outbox_interval_secs, defaults.outbox),
                notifications: secs(scheduler.notification_interval_secs, defaults.notifications),
                risk: secs(scheduler.risk_interval_secs, defaults.risk),
                daily: secs(scheduler.daily_interval_secs, defaults.daily),
                digest: secs(scheduler.digest_interval_secs, defaults.digest),
            },
            run_scheduler: !args.no_scheduler,
        };

        info!(
            database = %config.database_path.display(),
            bind = %config.bind_address,
            email_configured = config.sendgrid_api_key.is_some(),
            push_configured = config.push_gateway_url.is_some(),
            "Configuration resolved"
        );
        config
    }
}
