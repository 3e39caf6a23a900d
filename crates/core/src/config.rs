//! 설정 관리: flowpost.toml 파싱 및 런타임 설정
//!
//! [`FlowpostConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. 환경변수 (`FLOWPOST_AGGREGATOR_HASHTABLE_BITS=16` 형식)
//! 2. 설정 파일 (`flowpost.toml`)
//! 3. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), flowpost_core::error::FlowpostError> {
//! use flowpost_core::config::FlowpostConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = FlowpostConfig::load("flowpost.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = FlowpostConfig::parse("[aggregator]\nmin_buffer_time_secs = 1")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FlowpostError};

/// 해시 테이블 기본 비트 수 (2^17 슬롯)
pub const DEFAULT_HASHTABLE_BITS: u8 = 17;

/// 외부 폴러의 기본 만료 주기 (밀리초)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

/// 해시 테이블 비트 수 상한
pub const MAX_HASHTABLE_BITS: u8 = 28;

/// Flowpost 통합 설정
///
/// `flowpost.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowpostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 플로우 집계 설정
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

impl FlowpostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowpostError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowpostError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FlowpostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FlowpostError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FlowpostError> {
        toml::from_str(toml_str).map_err(|e| {
            FlowpostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `FLOWPOST_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "FLOWPOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FLOWPOST_GENERAL_LOG_FORMAT");

        // Aggregator
        override_u32(
            &mut self.aggregator.min_buffer_time_secs,
            "FLOWPOST_AGGREGATOR_MIN_BUFFER_TIME_SECS",
        );
        override_u32(
            &mut self.aggregator.max_buffer_time_secs,
            "FLOWPOST_AGGREGATOR_MAX_BUFFER_TIME_SECS",
        );
        override_u8(
            &mut self.aggregator.hashtable_bits,
            "FLOWPOST_AGGREGATOR_HASHTABLE_BITS",
        );
        override_u64(
            &mut self.aggregator.poll_interval_ms,
            "FLOWPOST_AGGREGATOR_POLL_INTERVAL_MS",
        );
        override_u64(
            &mut self.aggregator.guard_retry_interval_ms,
            "FLOWPOST_AGGREGATOR_GUARD_RETRY_INTERVAL_MS",
        );
        override_usize(
            &mut self.aggregator.channel_capacity,
            "FLOWPOST_AGGREGATOR_CHANNEL_CAPACITY",
        );
        override_string(
            &mut self.aggregator.rules_path,
            "FLOWPOST_AGGREGATOR_RULES_PATH",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FlowpostError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.aggregator.validate()
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 플로우 집계 설정
///
/// `inactive` 타임아웃이 `min_buffer_time_secs`, `active` 타임아웃이
/// `max_buffer_time_secs`에 해당합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// 마지막 패킷 이후 버킷을 유지하는 시간 (초)
    pub min_buffer_time_secs: u32,
    /// 버킷 생성 이후 최대 유지 시간 (초)
    pub max_buffer_time_secs: u32,
    /// 해시 테이블 슬롯 수 (2^bits)
    pub hashtable_bits: u8,
    /// 외부 폴러의 만료 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 스핀 가드 재시도 간격 (밀리초)
    pub guard_retry_interval_ms: u64,
    /// 출력 레코드 채널 용량
    pub channel_capacity: usize,
    /// 집계 규칙 파일 경로 (비어 있으면 코드에서 규칙 전달)
    pub rules_path: String,
}

impl AggregatorConfig {
    /// 최소 버퍼 시간
    pub fn min_buffer_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.min_buffer_time_secs))
    }

    /// 최대 버퍼 시간
    pub fn max_buffer_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_buffer_time_secs))
    }

    /// 폴링 주기
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 스핀 가드 재시도 간격
    pub fn guard_retry_interval(&self) -> Duration {
        Duration::from_millis(self.guard_retry_interval_ms)
    }

    /// 집계 설정의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FlowpostError> {
        if self.min_buffer_time_secs == 0 {
            return Err(invalid(
                "aggregator.min_buffer_time_secs",
                "inactive timeout must be greater than 0".to_owned(),
            ));
        }

        if self.max_buffer_time_secs == 0 {
            return Err(invalid(
                "aggregator.max_buffer_time_secs",
                "active timeout must be greater than 0".to_owned(),
            ));
        }

        if self.max_buffer_time_secs < self.min_buffer_time_secs {
            return Err(invalid(
                "aggregator.max_buffer_time_secs",
                format!(
                    "must be >= min_buffer_time_secs ({})",
                    self.min_buffer_time_secs
                ),
            ));
        }

        if self.hashtable_bits == 0 || self.hashtable_bits > MAX_HASHTABLE_BITS {
            return Err(invalid(
                "aggregator.hashtable_bits",
                format!("must be between 1 and {MAX_HASHTABLE_BITS}"),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(invalid(
                "aggregator.poll_interval_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        if !(1..=1000).contains(&self.guard_retry_interval_ms) {
            return Err(invalid(
                "aggregator.guard_retry_interval_ms",
                "must be between 1 and 1000".to_owned(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(invalid(
                "aggregator.channel_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_buffer_time_secs: 5,
            max_buffer_time_secs: 30,
            hashtable_bits: DEFAULT_HASHTABLE_BITS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            guard_retry_interval_ms: 50,
            channel_capacity: 1024,
            rules_path: String::new(),
        }
    }
}

fn invalid(field: &str, reason: String) -> FlowpostError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_u8(target: &mut u8, env_key: &str) {
    override_parsed(target, env_key, "u8");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = FlowpostConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.aggregator.hashtable_bits, 17);
        assert_eq!(config.aggregator.poll_interval_ms, 10_000);
        assert!(config.aggregator.max_buffer_time_secs >= config.aggregator.min_buffer_time_secs);
    }

    #[test]
    fn default_config_passes_validation() {
        FlowpostConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = FlowpostConfig::parse("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.aggregator.min_buffer_time_secs, 5);
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[aggregator]
min_buffer_time_secs = 1
max_buffer_time_secs = 60
"#;
        let config = FlowpostConfig::parse(toml).unwrap();
        assert_eq!(config.aggregator.min_buffer_time(), Duration::from_secs(1));
        assert_eq!(config.aggregator.max_buffer_time(), Duration::from_secs(60));
        // 나머지는 기본값 유지
        assert_eq!(config.aggregator.hashtable_bits, DEFAULT_HASHTABLE_BITS);
        assert_eq!(config.general.log_format, "json");
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = FlowpostConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            FlowpostError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = FlowpostConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_zero_inactive_timeout() {
        let mut config = FlowpostConfig::default();
        config.aggregator.min_buffer_time_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_buffer_time_secs"));
    }

    #[test]
    fn validate_rejects_active_shorter_than_inactive() {
        let mut config = FlowpostConfig::default();
        config.aggregator.min_buffer_time_secs = 60;
        config.aggregator.max_buffer_time_secs = 30;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_buffer_time_secs"));
    }

    #[test]
    fn validate_rejects_hashtable_bits_out_of_range() {
        let mut config = FlowpostConfig::default();
        config.aggregator.hashtable_bits = 0;
        assert!(config.validate().is_err());
        config.aggregator.hashtable_bits = MAX_HASHTABLE_BITS + 1;
        assert!(config.validate().is_err());
        config.aggregator.hashtable_bits = MAX_HASHTABLE_BITS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_guard_interval() {
        let mut config = FlowpostConfig::default();
        config.aggregator.guard_retry_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = FlowpostConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = FlowpostConfig::parse(&toml_str).unwrap();
        assert_eq!(
            parsed.aggregator.max_buffer_time_secs,
            config.aggregator.max_buffer_time_secs
        );
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = FlowpostConfig::from_file("/nonexistent/flowpost.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowpostError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
