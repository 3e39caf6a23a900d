//! flowpost.toml 통합 설정 테스트
//!
//! - flowpost.toml.example 파싱 테스트
//! - 파일 로딩 (tempfile) 테스트
//! - 환경변수 우선순위 테스트
//! - 잘못된 값 에러 테스트

use std::io::Write;

use flowpost_core::config::FlowpostConfig;
use flowpost_core::error::{ConfigError, FlowpostError};

// =============================================================================
// flowpost.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let content = include_str!("../../../flowpost.toml.example");
    let config = FlowpostConfig::parse(content).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.aggregator.min_buffer_time_secs, 5);
    assert_eq!(config.aggregator.max_buffer_time_secs, 30);
    assert_eq!(config.aggregator.hashtable_bits, 17);
    assert_eq!(config.aggregator.rules_path, "/etc/flowpost/rules.toml");
}

#[test]
fn example_config_passes_validation() {
    let content = include_str!("../../../flowpost.toml.example");
    let config = FlowpostConfig::parse(content).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

// =============================================================================
// 파일 로딩 테스트
// =============================================================================

#[tokio::test]
async fn load_reads_file_from_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        "[aggregator]\nmin_buffer_time_secs = 2\nmax_buffer_time_secs = 4"
    )
    .expect("write");

    let config = FlowpostConfig::from_file(file.path())
        .await
        .expect("should load");
    assert_eq!(config.aggregator.min_buffer_time_secs, 2);
    assert_eq!(config.aggregator.max_buffer_time_secs, 4);
}

#[tokio::test]
async fn load_rejects_invalid_values_in_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        "[aggregator]\nmin_buffer_time_secs = 10\nmax_buffer_time_secs = 4"
    )
    .expect("write");

    let err = FlowpostConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        FlowpostError::Config(ConfigError::InvalidValue { .. })
    ));
}

#[tokio::test]
async fn load_malformed_file_returns_parse_error() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[aggregator\nmin_buffer_time_secs = ").expect("write");

    let err = FlowpostConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        FlowpostError::Config(ConfigError::ParseFailed { .. })
    ));
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

fn with_env<T>(key: &str, value: &str, f: impl FnOnce() -> T) -> T {
    let original = std::env::var(key).ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var(key, value);
    }

    let result = f();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var(key, val),
            None => std::env::remove_var(key),
        }
    }
    result
}

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[aggregator]
hashtable_bits = 20
"#;
    let bits = with_env("FLOWPOST_AGGREGATOR_HASHTABLE_BITS", "12", || {
        let mut config = FlowpostConfig::parse(toml).expect("should parse");
        config.apply_env_overrides();
        config.aggregator.hashtable_bits
    });
    assert_eq!(bits, 12);
}

#[test]
#[serial_test::serial]
fn env_override_string_field() {
    let level = with_env("FLOWPOST_GENERAL_LOG_LEVEL", "debug", || {
        let mut config = FlowpostConfig::default();
        config.apply_env_overrides();
        config.general.log_level
    });
    assert_eq!(level, "debug");
}

#[test]
#[serial_test::serial]
fn env_override_unparsable_number_keeps_original() {
    let secs = with_env("FLOWPOST_AGGREGATOR_MIN_BUFFER_TIME_SECS", "soon", || {
        let mut config = FlowpostConfig::default();
        config.apply_env_overrides();
        config.aggregator.min_buffer_time_secs
    });
    assert_eq!(secs, FlowpostConfig::default().aggregator.min_buffer_time_secs);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_then_validates() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[aggregator]\nmax_buffer_time_secs = 30").expect("write");
    let path = file.path().to_path_buf();

    let original = std::env::var("FLOWPOST_AGGREGATOR_MIN_BUFFER_TIME_SECS").ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("FLOWPOST_AGGREGATOR_MIN_BUFFER_TIME_SECS", "60");
    }
    let result = FlowpostConfig::load(&path).await;
    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("FLOWPOST_AGGREGATOR_MIN_BUFFER_TIME_SECS", val),
            None => std::env::remove_var("FLOWPOST_AGGREGATOR_MIN_BUFFER_TIME_SECS"),
        }
    }

    // min(60) > max(30) 이므로 검증 실패
    assert!(result.is_err());
}
