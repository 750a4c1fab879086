//! Configuration Resolution Tests
//! Test File: config_tests.rs
//!
//! Environment variables are process-global, so these run serially.

use std::io::Write;
use std::time::Duration;

use clap::Parser;
use serial_test::serial;
use tuutta_common::config::load_toml_config;
use tuutta_engine::config::{Args, EngineConfig};

const ENV_VARS: [&str; 4] = ["TUUTTA_BIND", "TUUTTA_EMAIL_FROM", "SENDGRID_API_KEY", "TUUTTA_VERIFICATION_BASE_URL"];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn toml_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const SAMPLE: &str = r#"
database_path = "/var/lib/tuutta/engine.db"
bind_address = "0.0.0.0:8080"

[email]
from_address = "training@acme.test"
from_name = "Acme Training"

[webhooks]
timeout_ms = 2500

[certificates]
verification_base_url = "https://certs.acme.test"

[scheduler]
outbox_interval_secs = 2
notification_batch_size = 10
"#;

/// TC-CFG-001: TOML values fill in what the command line leaves unset
/// **Type:** Integration Test | **Priority:** P1
#[test]
#[serial]
fn tc_cfg_001_toml_values_apply() {
    clear_env();
    let file = toml_file(SAMPLE);
    let toml = load_toml_config(file.path()).unwrap();
    let args = Args::try_parse_from(["tuutta-engine"]).unwrap();

    let config = EngineConfig::resolve(&args, &toml);

    assert_eq!(config.database_path.to_str(), Some("/var/lib/tuutta/engine.db"));
    assert_eq!(config.bind_address, "0.0.0.0:8080");
    assert_eq!(config.email_from, "training@acme.test");
    assert_eq!(config.email_from_name.as_deref(), Some("Acme Training"));
    assert_eq!(config.webhook_timeout, Duration::from_millis(2500));
    assert_eq!(config.verification_base_url, "https://certs.acme.test");
    assert_eq!(config.notification_batch_size, 10);
    assert_eq!(config.cadences.outbox, Duration::from_secs(2));
    assert_eq!(config.cadences.risk, Duration::from_secs(7 * 24 * 60 * 60));
    assert!(config.sendgrid_api_key.is_none());
}

/// TC-CFG-002: Environment beats the TOML file
/// **Type:** Integration Test | **Priority:** P1
#[test]
#[serial]
fn tc_cfg_002_environment_overrides_toml() {
    clear_env();
    std::env::set_var("TUUTTA_BIND", "127.0.0.1:6000");
    std::env::set_var("SENDGRID_API_KEY", "SG.test-key");
    let file = toml_file(SAMPLE);
    let toml = load_toml_config(file.path()).unwrap();

    let args = Args::try_parse_from(["tuutta-engine"]).unwrap();
    let config = EngineConfig::resolve(&args, &toml);
    clear_env();

    assert_eq!(config.bind_address, "127.0.0.1:6000");
    assert_eq!(config.sendgrid_api_key.as_deref(), Some("SG.test-key"));
    assert_eq!(config.email_from, "training@acme.test");
}

/// TC-CFG-003: Command line beats the environment
/// **Type:** Integration Test | **Priority:** P2
#[test]
#[serial]
fn tc_cfg_003_flag_overrides_environment() {
    clear_env();
    std::env::set_var("TUUTTA_BIND", "127.0.0.1:6000");

    let args = Args::try_parse_from(["tuutta-engine", "--bind", "127.0.0.1:7000", "--no-scheduler"]).unwrap();
    let config = EngineConfig::resolve(&args, &Default::default());
    clear_env();

    assert_eq!(config.bind_address, "127.0.0.1:7000");
    assert!(!config.run_scheduler);
}
