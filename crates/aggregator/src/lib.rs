#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`rule`]: 집계 규칙 모델과 TOML 로딩
//! - [`template`]: 규칙에서 레코드 레이아웃 합성
//! - [`layout`]: 경계 검사를 거치는 필드 접근자
//! - [`bucket`]: 버킷 아레나와 내보내기 리스트
//! - [`guard`]: try-lock 기반 스핀 가드
//! - [`hashtable`]: 버퍼링, 만료, 내보내기, 라이프사이클 훅
//! - [`biflow`]: 역방향 필드 대응표와 레코드 뒤집기
//! - [`aggregate`]: 키 해시와 필드 병합
//! - [`dispatch`]: 규칙 일치 검사와 테이블별 분배
//! - [`stats`]: 해시 테이블 통계

pub mod aggregate;
pub mod biflow;
pub mod bucket;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod hashtable;
pub mod layout;
pub mod rule;
pub mod stats;
pub mod template;

// --- 주요 타입 re-export ---

// 해시 테이블
pub use hashtable::{FlowHashtable, FlowHashtableBuilder, TableGuard, now_ms};

// 병합
pub use aggregate::{BufferOutcome, FlowAggregator};
pub use dispatch::RuleDispatcher;

// 규칙
pub use rule::{FieldModifier, Rule, RuleField, Rules};

// 레이아웃
pub use template::{TemplateLayout, synthesize};

// 버킷
pub use bucket::{Bucket, BucketId, BucketState};

// biflow
pub use biflow::ReverseMap;

// 통계
pub use stats::HashtableStatistics;

// 에러
pub use error::AggregatorError;
