use std::io::Write;

use homespun_orchestrator::models::session::SessionMode;
use homespun_orchestrator::{config::OrchestratorConfig, AppError};

#[test]
fn minimal_config_fills_defaults() {
    let config = OrchestratorConfig::from_toml_str(r#"db_path = "data/homespun.db""#)
        .expect("valid config");
    assert_eq!(config.db_path.to_string_lossy(), "data/homespun.db");
    assert_eq!(config.default_model, "sonnet");
    assert_eq!(config.build_permission_mode, "bypassPermissions");
    assert_eq!(config.plan_permission_mode, "plan");
    assert_eq!(config.broadcast_capacity, 256);
    assert_eq!(
        config.rejection_message,
        "I don't approve this plan. Please revise it."
    );
}

#[test]
fn explicit_values_override_defaults() {
    let config = OrchestratorConfig::from_toml_str(
        r#"
db_path = "x.db"
default_model = "opus"
build_permission_mode = "acceptEdits"
broadcast_capacity = 8
rejection_message = "Try again."
"#,
    )
    .expect("valid config");
    assert_eq!(config.default_model, "opus");
    assert_eq!(config.permission_mode_for(SessionMode::Build), "acceptEdits");
    assert_eq!(config.permission_mode_for(SessionMode::Plan), "plan");
    assert_eq!(config.broadcast_capacity, 8);
    assert_eq!(config.rejection_message, "Try again.");
}

#[test]
fn missing_db_path_is_rejected() {
    let err = OrchestratorConfig::from_toml_str(r#"default_model = "opus""#)
        .expect_err("db_path is required");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_broadcast_capacity_is_rejected() {
    let err = OrchestratorConfig::from_toml_str("db_path = \"x.db\"\nbroadcast_capacity = 0")
        .expect_err("capacity must be positive");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("broadcast_capacity")));
}

#[test]
fn blank_model_is_rejected() {
    let err = OrchestratorConfig::from_toml_str("db_path = \"x.db\"\ndefault_model = \"  \"")
        .expect_err("model must be named");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("default_model")));
}

#[test]
fn invalid_toml_is_a_config_error() {
    let err = OrchestratorConfig::from_toml_str("db_path = ").expect_err("invalid toml");
    assert!(matches!(err, AppError::Config(msg) if msg.starts_with("invalid config")));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "db_path = \"on-disk.db\"").expect("write config");

    let config = OrchestratorConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(config.db_path.to_string_lossy(), "on-disk.db");
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = OrchestratorConfig::load_from_path(dir.path().join("absent.toml"))
        .expect_err("missing file");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("failed to read config")));
}

#[test]
fn default_config_is_valid() {
    let config = OrchestratorConfig::default();
    assert_eq!(config.default_model, "sonnet");
    assert_eq!(config.broadcast_capacity, 256);
}
