#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod ie;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod record;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{AggregationError, ConfigError, FlowpostError, PipelineError};

// 설정
pub use config::{AggregatorConfig, FlowpostConfig, GeneralConfig};

// 정보 요소
pub use ie::{InformationElement, PEN_FLOWPOST, PEN_REVERSE};

// 파이프라인 trait
pub use pipeline::{HealthStatus, Lifecycle, RecordSink};

// 레코드
pub use record::{FieldInfo, FlowRecord, SetKind, TemplateInfo};
