//! screlay.toml 통합 설정 테스트
//!
//! - screlay.toml.example 파싱 테스트
//! - 부분 설정 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 잘못된 파일 에러 테스트

use std::io::Write;

use screlay_core::config::{ScRelayConfig, default_patterns};
use screlay_core::error::{ConfigError, ScRelayError};
use serial_test::serial;

const EXAMPLE: &str = include_str!("../../../screlay.toml.example");

// =============================================================================
// screlay.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = ScRelayConfig::parse(EXAMPLE).expect("example config should parse");
    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "pretty");
    assert_eq!(config.watcher.start_mode, "live_tail");
}

#[test]
fn example_config_passes_validation() {
    let config = ScRelayConfig::parse(EXAMPLE).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_keeps_default_patterns() {
    let config = ScRelayConfig::parse(EXAMPLE).expect("should parse");
    assert_eq!(config.patterns, default_patterns());
}

#[test]
fn example_config_has_template_for_every_default_pattern() {
    let config = ScRelayConfig::parse(EXAMPLE).expect("should parse");
    for pattern in &config.patterns {
        assert!(
            config.delivery.templates.contains_key(&pattern.name),
            "missing template for '{}'",
            pattern.name
        );
    }
}

#[test]
fn example_config_store_table_map() {
    let config = ScRelayConfig::parse(EXAMPLE).expect("should parse");
    let table = config.delivery.store.table_map.get("player_death");
    assert_eq!(table.map(String::as_str), Some("kill_events"));
}

// =============================================================================
// 파일 로딩 테스트
// =============================================================================

#[tokio::test]
#[serial]
async fn load_applies_env_overrides_after_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[watcher]\nlog_path = \"/from/file/Game.log\"").unwrap();

    // SAFETY: serial 테스트로 환경변수 동시 접근이 없습니다.
    unsafe { std::env::set_var("SCRELAY_WATCHER_LOG_PATH", "/from/env/Game.log") };
    let config = ScRelayConfig::load(file.path()).await;
    unsafe { std::env::remove_var("SCRELAY_WATCHER_LOG_PATH") };

    let config = config.expect("should load");
    assert_eq!(config.watcher.log_path, "/from/env/Game.log");
}

#[tokio::test]
#[serial]
async fn load_rejects_invalid_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[rate_limit]\ndedup_window_secs = 0").unwrap();

    let err = ScRelayConfig::load(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        ScRelayError::Config(ConfigError::InvalidValue { .. })
    ));
}

#[tokio::test]
async fn from_file_reports_parse_failure() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "this is not toml = = =").unwrap();

    let err = ScRelayConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        ScRelayError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[tokio::test]
async fn from_file_missing_path() {
    let err = ScRelayConfig::from_file("/definitely/not/here/screlay.toml")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScRelayError::Config(ConfigError::FileNotFound { .. })
    ));
}
