//! 템플릿과 출력 레코드
//!
//! [`TemplateInfo`]는 규칙(rule) 하나에서 한 번 만들어져 모든 버킷이 공유하는
//! 레코드 레이아웃입니다. 버킷 버퍼는 다음과 같이 배치됩니다:
//!
//! ```text
//! 0                         data_length            data_length + private_length
//! ├── 가변 필드 (전송됨) ──────┼── private 데이터 (전송 안 됨) ──┤
//! ```
//!
//! 고정 패턴 필드는 버킷 버퍼가 아니라 [`TemplateInfo::fixed_data`]에 한 번만 저장됩니다.
//! 싱크(sink)는 [`FlowRecord`]를 받아 와이어 인코딩과 전송을 담당합니다.

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::ie::InformationElement;

/// 템플릿 세트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SetKind {
    /// 일반 템플릿
    Template,
    /// 고정 데이터나 선행 템플릿을 가진 데이터 템플릿
    DataTemplate,
}

/// 레코드 안의 필드 하나
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    /// 필드 타입
    pub ie: InformationElement,
    /// 레코드 시작으로부터의 바이트 오프셋
    pub offset: usize,
    /// private 작업 영역 오프셋 (필요한 필드만)
    pub private_offset: Option<usize>,
}

impl FieldInfo {
    /// 필드가 차지하는 바이트 범위
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }

    /// 필드 길이
    pub fn len(&self) -> usize {
        usize::from(self.ie.length)
    }

    /// 길이 0 필드 여부
    pub fn is_empty(&self) -> bool {
        self.ie.length == 0
    }
}

/// 규칙에서 합성된 레코드 레이아웃
///
/// 생성 이후 읽기 전용이며 `Arc`로 공유됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateInfo {
    /// 템플릿 ID
    pub template_id: u16,
    /// 선행 템플릿 ID (0이면 없음)
    pub preceding: u16,
    /// 세트 종류
    pub set_kind: SetKind,
    /// 버킷마다 저장되는 가변 필드
    pub fields: Vec<FieldInfo>,
    /// 상수 버퍼에 저장되는 고정 데이터 필드
    pub fixed_fields: Vec<FieldInfo>,
    /// 고정 데이터 버퍼
    #[serde(skip)]
    pub fixed_data: Bytes,
    /// 가변 영역 길이
    pub data_length: usize,
    /// private 영역 길이
    pub private_length: usize,
}

impl TemplateInfo {
    /// 버킷 버퍼 전체 길이 (가변 영역 + private 영역)
    pub fn record_length(&self) -> usize {
        self.data_length + self.private_length
    }

    /// 타입이 같은 첫 번째 가변 필드의 인덱스
    pub fn field_index(&self, id: u16, enterprise: u32) -> Option<usize> {
        self.fields.iter().position(|f| f.ie.is(id, enterprise))
    }

    /// 타입이 같은 첫 번째 가변 필드
    pub fn field(&self, id: u16, enterprise: u32) -> Option<&FieldInfo> {
        self.field_index(id, enterprise).map(|i| &self.fields[i])
    }

    /// 가장 긴 가변 필드의 길이
    pub fn max_field_length(&self) -> usize {
        self.fields.iter().map(FieldInfo::len).max().unwrap_or(0)
    }

    /// 레코드에서 전송 대상 영역만 잘라냅니다.
    pub fn exported_slice<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[..self.data_length.min(record.len())]
    }
}

/// 싱크로 전달되는 논리 레코드
#[derive(Debug, Clone)]
pub enum FlowRecord {
    /// 템플릿 알림
    Template(Arc<TemplateInfo>),
    /// 만료된 플로우 레코드. `data`는 버킷에서 분리된 소유 버퍼입니다.
    Data {
        template: Arc<TemplateInfo>,
        data: Bytes,
        observation_domain_id: u32,
    },
    /// 템플릿 철회
    TemplateWithdrawal(Arc<TemplateInfo>),
}

impl FlowRecord {
    /// 레코드가 참조하는 템플릿
    pub fn template(&self) -> &Arc<TemplateInfo> {
        match self {
            Self::Template(t) | Self::TemplateWithdrawal(t) => t,
            Self::Data { template, .. } => template,
        }
    }

    /// 데이터 레코드인지 확인합니다.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }
}
