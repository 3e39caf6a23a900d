//! 에러 타입: 도메인별 에러 정의

/// Flowpost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum FlowpostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 집계 엔진 구성 에러
    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("not running")]
    NotRunning,
}

/// 집계 엔진 구성 에러
///
/// 모두 생성 시점에 발생하며, 발생하면 엔진은 시작을 거부합니다.
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    /// 다른 필드의 private 슬롯을 공유해야 하는 필드에 기준 필드가 없음
    #[error("field {field} requires {requires} in the same rule")]
    MissingDependency { field: String, requires: String },

    /// biflow 키를 구성할 필드가 없음
    #[error("biflow aggregation requires {field} as an exported field")]
    BiflowKeyMissing { field: String },

    /// 역방향 필드가 템플릿에 없음
    #[error("reverse counterpart {reverse} of {field} is not part of the template")]
    ReverseFieldMissing { field: String, reverse: String },

    /// 필드와 역방향 필드의 길이가 다름
    #[error("field {field} ({length} bytes) and its reverse {reverse} ({reverse_length} bytes) differ in size")]
    ReverseLengthMismatch {
        field: String,
        length: u16,
        reverse: String,
        reverse_length: u16,
    },

    /// 패턴 길이가 정보 요소 길이와 다름
    #[error("pattern for {field} has {actual} bytes, expected {expected}")]
    PatternLength {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// 레코드 경계를 벗어난 접근
    #[error("access of {length} bytes at offset {offset} exceeds record of {capacity} bytes")]
    FieldOutOfBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    /// 입력 레코드 길이가 템플릿과 맞지 않음
    #[error("record has {actual} bytes, template expects {expected}")]
    RecordLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_into_top_level() {
        let err: FlowpostError = ConfigError::InvalidValue {
            field: "aggregator.hashtable_bits".to_owned(),
            reason: "out of range".to_owned(),
        }
        .into();
        assert!(matches!(err, FlowpostError::Config(_)));
        assert!(err.to_string().contains("hashtable_bits"));
    }

    #[test]
    fn aggregation_error_display_names_both_fields() {
        let err = AggregationError::MissingDependency {
            field: "frontPayloadLen".to_owned(),
            requires: "frontPayload".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("frontPayloadLen"));
        assert!(msg.contains("frontPayload"));
    }

    #[test]
    fn pipeline_error_display() {
        assert_eq!(PipelineError::AlreadyRunning.to_string(), "already running");
        let err = PipelineError::ChannelSend("full".to_owned());
        assert_eq!(err.to_string(), "channel send failed: full");
    }
}
