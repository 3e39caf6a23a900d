//! 레코드 레이아웃 접근자
//!
//! 버킷 버퍼를 [`TemplateInfo`]의 필드 단위로 읽고 씁니다.
//! 모든 접근은 경계 검사를 거치며, 범위를 벗어나면
//! [`AggregationError::FieldOutOfBounds`]를 반환합니다.
//! 정수 필드는 네트워크 바이트 순서(big-endian)입니다.

use flowpost_core::error::AggregationError;
use flowpost_core::ie::InformationElement;
use flowpost_core::record::{FieldInfo, SetKind, TemplateInfo};

fn checked(
    buf_len: usize,
    offset: usize,
    length: usize,
) -> Result<std::ops::Range<usize>, AggregationError> {
    match offset.checked_add(length) {
        Some(end) if end <= buf_len => Ok(offset..end),
        _ => Err(AggregationError::FieldOutOfBounds {
            offset,
            length,
            capacity: buf_len,
        }),
    }
}

/// big-endian 부호 없는 정수 읽기 (최대 8바이트)
pub fn read_be(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// big-endian 부호 없는 정수 쓰기. 필드보다 큰 상위 비트는 버립니다.
pub fn write_be(bytes: &mut [u8], value: u64) {
    let mut v = value;
    for b in bytes.iter_mut().rev() {
        *b = (v & 0xff) as u8;
        v >>= 8;
    }
}

/// 입력 레코드에서 타입이 같은 필드 값을 찾습니다 (길이 무시).
///
/// 가변 필드를 먼저 찾고, 데이터 템플릿이면 고정 데이터 필드를 찾습니다.
/// 레코드가 필드 범위보다 짧으면 `None`입니다.
pub fn input_field<'a>(
    input: &'a TemplateInfo,
    record: &'a [u8],
    ie: &InformationElement,
) -> Option<&'a [u8]> {
    if let Some(fi) = input.fields.iter().find(|f| f.ie.same_type(ie)) {
        return record.get(fi.range());
    }
    if input.set_kind == SetKind::DataTemplate {
        return input
            .fixed_fields
            .iter()
            .find(|f| f.ie.same_type(ie))
            .and_then(|fi| input.fixed_data.get(fi.range()));
    }
    None
}

/// 읽기 전용 레코드 뷰
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    template: &'a TemplateInfo,
    buf: &'a [u8],
}

impl<'a> RecordView<'a> {
    /// 버퍼가 최소한 가변 영역을 담고 있는지 확인하고 뷰를 만듭니다.
    pub fn new(template: &'a TemplateInfo, buf: &'a [u8]) -> Result<Self, AggregationError> {
        if buf.len() < template.data_length {
            return Err(AggregationError::RecordLength {
                expected: template.data_length,
                actual: buf.len(),
            });
        }
        Ok(Self { template, buf })
    }

    /// i번째 필드의 바이트
    pub fn field(&self, index: usize) -> Result<&'a [u8], AggregationError> {
        let fi = &self.template.fields[index];
        let range = checked(self.buf.len(), fi.offset, fi.len())?;
        Ok(&self.buf[range])
    }

    /// i번째 필드를 정수로 읽습니다.
    pub fn read_uint(&self, index: usize) -> Result<u64, AggregationError> {
        self.field(index).map(read_be)
    }

    /// i번째 필드의 private 영역
    pub fn private(&self, index: usize, length: usize) -> Result<&'a [u8], AggregationError> {
        let range = private_range(&self.template.fields[index], self.buf.len(), length)?;
        Ok(&self.buf[range])
    }

    /// 원본 버퍼
    pub fn bytes(&self) -> &'a [u8] {
        self.buf
    }
}

/// 쓰기 가능한 레코드 뷰
#[derive(Debug)]
pub struct RecordViewMut<'a> {
    template: &'a TemplateInfo,
    buf: &'a mut [u8],
}

impl<'a> RecordViewMut<'a> {
    /// 버퍼 길이를 확인하고 뷰를 만듭니다.
    pub fn new(template: &'a TemplateInfo, buf: &'a mut [u8]) -> Result<Self, AggregationError> {
        if buf.len() < template.data_length {
            return Err(AggregationError::RecordLength {
                expected: template.data_length,
                actual: buf.len(),
            });
        }
        Ok(Self { template, buf })
    }

    /// i번째 필드의 바이트
    pub fn field(&self, index: usize) -> Result<&[u8], AggregationError> {
        let fi = &self.template.fields[index];
        let range = checked(self.buf.len(), fi.offset, fi.len())?;
        Ok(&self.buf[range])
    }

    /// i번째 필드의 가변 바이트
    pub fn field_mut(&mut self, index: usize) -> Result<&mut [u8], AggregationError> {
        let fi = &self.template.fields[index];
        let range = checked(self.buf.len(), fi.offset, fi.len())?;
        Ok(&mut self.buf[range])
    }

    /// i번째 필드를 정수로 읽습니다.
    pub fn read_uint(&self, index: usize) -> Result<u64, AggregationError> {
        self.field(index).map(read_be)
    }

    /// i번째 필드에 정수를 씁니다.
    pub fn write_uint(&mut self, index: usize, value: u64) -> Result<(), AggregationError> {
        self.field_mut(index).map(|bytes| write_be(bytes, value))
    }

    /// i번째 필드의 private 영역
    pub fn private_mut(
        &mut self,
        index: usize,
        length: usize,
    ) -> Result<&mut [u8], AggregationError> {
        let range = private_range(&self.template.fields[index], self.buf.len(), length)?;
        Ok(&mut self.buf[range])
    }

    /// 읽기 전용 뷰로 바꿉니다.
    pub fn as_view(&self) -> RecordView<'_> {
        RecordView {
            template: self.template,
            buf: &*self.buf,
        }
    }
}

fn private_range(
    fi: &FieldInfo,
    buf_len: usize,
    length: usize,
) -> Result<std::ops::Range<usize>, AggregationError> {
    match fi.private_offset {
        Some(offset) => checked(buf_len, offset, length),
        None => Err(AggregationError::FieldOutOfBounds {
            offset: fi.offset,
            length,
            capacity: 0,
        }),
    }
}
