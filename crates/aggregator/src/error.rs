//! 집계 엔진 에러 타입
//!
//! 레이아웃/biflow 구성 에러는 core의 [`AggregationError`]를 그대로 사용하고,
//! 여기서는 규칙 파일 로딩과 검증 에러만 정의합니다.
//! `From<AggregatorError> for FlowpostError` 변환으로 `?` 전파가 가능합니다.

use flowpost_core::error::{AggregationError, ConfigError, FlowpostError};

/// 규칙 로딩 에러
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    /// 규칙 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 규칙 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 규칙 유효성 검증 실패
    #[error("rule validation error: rule {rule_id}: {reason}")]
    RuleValidation {
        /// 문제가 된 규칙 ID
        rule_id: u16,
        /// 실패 사유
        reason: String,
    },

    /// 레이아웃 구성 실패
    #[error(transparent)]
    Layout(#[from] AggregationError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AggregatorError> for FlowpostError {
    fn from(err: AggregatorError) -> Self {
        match err {
            AggregatorError::RuleLoad { path, reason } => {
                FlowpostError::Config(ConfigError::ParseFailed {
                    reason: format!("{path}: {reason}"),
                })
            }
            AggregatorError::RuleValidation { rule_id, reason } => {
                FlowpostError::Config(ConfigError::InvalidValue {
                    field: format!("rule.{rule_id}"),
                    reason,
                })
            }
            AggregatorError::Layout(e) => FlowpostError::Aggregation(e),
            AggregatorError::Io(e) => FlowpostError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_load_error_display() {
        let err = AggregatorError::RuleLoad {
            path: "/etc/flowpost/rules.toml".to_owned(),
            reason: "invalid TOML".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/flowpost/rules.toml"));
        assert!(msg.contains("invalid TOML"));
    }

    #[test]
    fn validation_error_converts_to_config_error() {
        let err: FlowpostError = AggregatorError::RuleValidation {
            rule_id: 7,
            reason: "no fields".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            FlowpostError::Config(ConfigError::InvalidValue { .. })
        ));
        assert!(err.to_string().contains("rule.7"));
    }

    #[test]
    fn layout_error_keeps_its_kind() {
        let err: FlowpostError = AggregatorError::Layout(AggregationError::BiflowKeyMissing {
            field: "destinationTransportPort".to_owned(),
        })
        .into();
        assert!(matches!(err, FlowpostError::Aggregation(_)));
    }
}
