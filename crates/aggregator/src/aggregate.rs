//! 플로우 병합: 레코드를 키로 찾아 버킷에 누적
//!
//! [`FlowAggregator`]는 [`FlowHashtable`] 위에서 삽입 경로를 구현합니다.
//! 집계 대상이 아닌 필드가 플로우 키이며, 키 바이트의 xxHash64 하위 32비트가
//! 버킷 해시입니다.
//!
//! ```text
//! record ──▶ mask ──▶ hash(key) ──┬── 정방향 일치 ──▶ merge(i → i)
//!                                 ├── 역방향 일치 ──▶ merge(i → mirror(i)) ──▶ (필요 시 뒤집기)
//!                                 └── 없음 ────────▶ 새 버킷
//! ```
//!
//! 병합 규칙:
//! - 카운터: 합
//! - 시작 시각: 0이 아닌 값 중 최소
//! - 종료 시각, maxPacketGap: 최대
//! - tcpControlBits: OR
//! - frontPayload, frontPayloadLen: 처음 한 번만 기록

use std::hash::Hasher;
use std::sync::Arc;

use bytes::BytesMut;
use metrics::counter;
use tracing::trace;
use twox_hash::XxHash64;

use flowpost_core::error::AggregationError;
use flowpost_core::ie::{InformationElement, PEN_FLOWPOST, iana, private};
use flowpost_core::metrics as m;
use flowpost_core::record::TemplateInfo;

use crate::bucket::BucketId;
use crate::hashtable::{FlowHashtable, TableGuard, now_ms};
use crate::layout::{RecordView, RecordViewMut, input_field, read_be, write_be};
use crate::rule::FieldModifier;
use crate::template::{PACKET_GAP_PRIVATE_LENGTH, PAYLOAD_PRIVATE_LENGTH};

/// 해시 시드. 같은 키는 항상 같은 슬롯에 놓입니다.
const HASH_SEED: u64 = 0;

/// 필드별 병합 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeOp {
    /// 플로우 키
    Key,
    /// 집계 대상이지만 병합하지 않음
    Ignore,
    Sum,
    MinNonZero,
    Max,
    BitOr,
    FrontPayload,
    WriteOnce,
    PacketGap,
}

fn merge_op(ie: &InformationElement) -> MergeOp {
    if !ie.is_aggregatable() {
        return MergeOp::Key;
    }
    match ie.base_enterprise() {
        0 => match ie.id {
            iana::FLOW_START_SYS_UP_TIME
            | iana::FLOW_START_SECONDS
            | iana::FLOW_START_MILLISECONDS
            | iana::FLOW_START_MICROSECONDS
            | iana::FLOW_START_NANOSECONDS => MergeOp::MinNonZero,
            iana::FLOW_END_SYS_UP_TIME
            | iana::FLOW_END_SECONDS
            | iana::FLOW_END_MILLISECONDS
            | iana::FLOW_END_MICROSECONDS
            | iana::FLOW_END_NANOSECONDS => MergeOp::Max,
            iana::TCP_CONTROL_BITS => MergeOp::BitOr,
            iana::OCTET_DELTA_COUNT
            | iana::PACKET_DELTA_COUNT
            | iana::OCTET_TOTAL_COUNT
            | iana::PACKET_TOTAL_COUNT
            | iana::POST_OCTET_DELTA_COUNT
            | iana::POST_PACKET_DELTA_COUNT
            | iana::DROPPED_OCTET_DELTA_COUNT
            | iana::DROPPED_PACKET_DELTA_COUNT => MergeOp::Sum,
            _ => MergeOp::Ignore,
        },
        PEN_FLOWPOST => match ie.id {
            private::FRONT_PAYLOAD => MergeOp::FrontPayload,
            private::FRONT_PAYLOAD_LEN => MergeOp::WriteOnce,
            private::MAX_PACKET_GAP => MergeOp::PacketGap,
            private::FRONT_PAYLOAD_PKT_COUNT
            | private::DPA_FLOW_COUNT
            | private::TRANSPORT_OCTET_DELTA_COUNT => MergeOp::Sum,
            _ => MergeOp::Ignore,
        },
        _ => MergeOp::Ignore,
    }
}

/// 정방향 시작 시각 필드 (역방향 병합 후 뒤집기 판단용)
fn start_time_field(template: &TemplateInfo) -> Option<usize> {
    [
        iana::FLOW_START_NANOSECONDS,
        iana::FLOW_START_MICROSECONDS,
        iana::FLOW_START_MILLISECONDS,
        iana::FLOW_START_SECONDS,
        iana::FLOW_START_SYS_UP_TIME,
    ]
    .into_iter()
    .find_map(|id| template.field_index(id, 0))
}

/// 입력 시각 필드의 단위
#[derive(Debug, Clone, Copy)]
enum TimeUnit {
    Seconds,
    Millis,
    /// NTP 64비트 타임스탬프 (dateTimeMicroseconds, dateTimeNanoseconds)
    Ntp,
}

/// 1900-01-01부터 1970-01-01까지의 초
const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

impl TimeUnit {
    fn to_millis(self, value: u64) -> u64 {
        match self {
            Self::Seconds => value.saturating_mul(1000),
            Self::Millis => value,
            Self::Ntp => {
                let secs = (value >> 32).saturating_sub(NTP_UNIX_OFFSET_SECS);
                let frac_ms = ((value & 0xffff_ffff) * 1000) >> 32;
                secs * 1000 + frac_ms
            }
        }
    }
}

const START_TIME_FIELDS: [(u16, TimeUnit); 4] = [
    (iana::FLOW_START_MILLISECONDS, TimeUnit::Millis),
    (iana::FLOW_START_SECONDS, TimeUnit::Seconds),
    (iana::FLOW_START_NANOSECONDS, TimeUnit::Ntp),
    (iana::FLOW_START_MICROSECONDS, TimeUnit::Ntp),
];

const END_TIME_FIELDS: [(u16, TimeUnit); 4] = [
    (iana::FLOW_END_MILLISECONDS, TimeUnit::Millis),
    (iana::FLOW_END_SECONDS, TimeUnit::Seconds),
    (iana::FLOW_END_NANOSECONDS, TimeUnit::Ntp),
    (iana::FLOW_END_MICROSECONDS, TimeUnit::Ntp),
];

/// 입력 레코드의 첫 번째 0이 아닌 시각 필드를 밀리초로 읽습니다.
fn input_time(input: &TemplateInfo, record: &[u8], fields: &[(u16, TimeUnit)]) -> Option<u64> {
    fields.iter().find_map(|&(id, unit)| {
        let value = input_field(input, record, &InformationElement::iana(id, 0))?;
        if value.len() > 8 {
            return None;
        }
        Some(read_be(value))
            .filter(|v| *v != 0)
            .map(|v| unit.to_millis(v))
    })
}

/// 입력 필드를 길이가 다를 수 있는 출력 필드로 복사합니다.
///
/// - 같은 길이: 그대로
/// - 출력이 더 김: 주소와 frontPayload는 왼쪽 정렬, 정수는 오른쪽 정렬
/// - 출력이 더 짧음: frontPayload만 잘라서 복사, 그 외는 0으로 남김
fn copy_field(ie: &InformationElement, dst: &mut [u8], src: &[u8]) {
    let payload = ie.base_enterprise() == PEN_FLOWPOST && ie.id == private::FRONT_PAYLOAD;
    let address = ie.base_enterprise() == 0
        && matches!(
            ie.id,
            iana::SOURCE_IPV4_ADDRESS | iana::DESTINATION_IPV4_ADDRESS
        );

    if dst.len() == src.len() {
        dst.copy_from_slice(src);
    } else if dst.len() > src.len() {
        if payload || address {
            dst[..src.len()].copy_from_slice(src);
        } else {
            let pad = dst.len() - src.len();
            dst[pad..].copy_from_slice(src);
        }
    } else if payload {
        let n = dst.len();
        dst.copy_from_slice(&src[..n]);
    } else {
        trace!(%ie, input_len = src.len(), "input field longer than layout, left as zero");
    }
}

/// 병합 한 번에 필요한 시각 정보 (ms)
#[derive(Debug, Clone, Copy)]
struct FlowTimes {
    start: u64,
    end: u64,
}

/// 한 레코드의 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    /// 새 버킷 생성
    Created(BucketId),
    /// 같은 방향 버킷에 병합
    Aggregated(BucketId),
    /// 역방향 버킷에 병합
    Folded {
        /// 대상 버킷
        bucket: BucketId,
        /// 병합 후 방향을 뒤집었는지
        reversed: bool,
    },
}

impl BufferOutcome {
    /// 대상 버킷 핸들
    pub fn bucket(&self) -> BucketId {
        match *self {
            Self::Created(id) | Self::Aggregated(id) => id,
            Self::Folded { bucket, .. } => bucket,
        }
    }
}

/// 레코드 병합기
#[derive(Debug)]
pub struct FlowAggregator {
    table: Arc<FlowHashtable>,
    ops: Vec<MergeOp>,
    key_fields: Vec<usize>,
    masks: Vec<(usize, u8)>,
    start_field: Option<usize>,
}

impl FlowAggregator {
    /// 테이블의 레이아웃으로 병합기를 만듭니다.
    pub fn new(table: Arc<FlowHashtable>) -> Self {
        let layout = table.layout();
        let info = &layout.info;
        let ops: Vec<MergeOp> = info.fields.iter().map(|f| merge_op(&f.ie)).collect();
        let key_fields = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| **op == MergeOp::Key)
            .map(|(i, _)| i)
            .collect();
        let masks = layout
            .modifiers
            .iter()
            .enumerate()
            .filter_map(|(i, modifier)| match modifier {
                FieldModifier::Mask(bits) if ops[i] == MergeOp::Key => Some((i, *bits)),
                _ => None,
            })
            .collect();
        let start_field = start_time_field(info);

        Self {
            table,
            ops,
            key_fields,
            masks,
            start_field,
        }
    }

    /// 공유 테이블
    pub fn table(&self) -> &Arc<FlowHashtable> {
        &self.table
    }

    /// 레코드 하나를 버퍼링합니다.
    ///
    /// `record`는 템플릿의 가변 영역(`data_length`) 또는 private 영역까지 포함한
    /// 전체 레코드(`record_length`)입니다. 시각은 밀리초입니다.
    ///
    /// # 에러
    /// - `RecordLength`: 레코드가 가변 영역보다 짧음
    pub fn buffer_record(
        &self,
        record: &[u8],
        observation_domain_id: u32,
        flow_start_ms: u64,
        flow_end_ms: u64,
    ) -> Result<BufferOutcome, AggregationError> {
        let info = self.table.template();
        RecordView::new(info, record)?;
        self.table.note_record_received();

        let times = FlowTimes {
            start: flow_start_ms,
            end: flow_end_ms.max(flow_start_ms),
        };
        let incoming = self.prepare(record, times)?;
        let hash = self.hash_key(&incoming, false);

        let mut guard = self.table.lock();

        if let Some(id) = guard.lookup(hash, |b| {
            b.observation_domain_id() == observation_domain_id
                && self.key_matches(b.data(), &incoming, false)
        }) {
            if !self.overrun(&guard, id, times) {
                self.merge(&mut guard, id, &incoming, times, false)?;
                guard.refresh(id, times.end.saturating_add(self.table.min_buffer_ms()));
                self.count_aggregated();
                return Ok(BufferOutcome::Aggregated(id));
            }
            trace!(?id, "flow outlived its bucket, starting a new one");
            guard.force_expire(id);
        } else if self.table.reverse_map().is_some() {
            let rhash = self.hash_key(&incoming, true);
            if let Some(id) = guard.lookup(rhash, |b| {
                b.observation_domain_id() == observation_domain_id
                    && self.key_matches(b.data(), &incoming, true)
            }) {
                if !self.overrun(&guard, id, times) {
                    let reversed = self.fold(&mut guard, id, &incoming, hash, times)?;
                    self.count_aggregated();
                    return Ok(BufferOutcome::Folded {
                        bucket: id,
                        reversed,
                    });
                }
                guard.force_expire(id);
            }
        }

        let bucket = self
            .table
            .create_bucket(incoming, observation_domain_id, hash, times.start);
        Ok(BufferOutcome::Created(guard.insert(bucket)))
    }

    /// 다른 템플릿의 데이터 레코드를 이 테이블의 레이아웃으로 옮겨 버퍼링합니다.
    ///
    /// 레이아웃의 각 필드는 입력에서 같은 타입의 필드(데이터 템플릿이면 고정
    /// 데이터 포함)를 찾아 [`copy_field`] 규칙으로 채우고, 없으면 0입니다.
    /// 시각은 입력의 flowStart*/flowEnd* 필드에서 읽습니다. 시작 시각이 없으면
    /// 현재 시각, 종료 시각이 없으면 시작 시각을 씁니다.
    ///
    /// 규칙 일치 여부는 호출자가 [`Rule::matches`](crate::rule::Rule::matches)로
    /// 먼저 확인합니다.
    pub fn buffer_data_record(
        &self,
        input: &TemplateInfo,
        record: &[u8],
        observation_domain_id: u32,
    ) -> Result<BufferOutcome, AggregationError> {
        let info = self.table.template();
        let mut data = vec![0u8; info.data_length];
        for fi in &info.fields {
            if let (Some(dst), Some(src)) =
                (data.get_mut(fi.range()), input_field(input, record, &fi.ie))
            {
                copy_field(&fi.ie, dst, src);
            }
        }

        let start = input_time(input, record, &START_TIME_FIELDS).unwrap_or_else(now_ms);
        let end = input_time(input, record, &END_TIME_FIELDS).unwrap_or(start);
        self.buffer_record(&data, observation_domain_id, start, end)
    }

    /// 입력을 버킷 크기의 버퍼로 복사하고 마스크와 private 초기값을 적용합니다.
    fn prepare(&self, record: &[u8], times: FlowTimes) -> Result<BytesMut, AggregationError> {
        let info = self.table.template();
        let mut data = BytesMut::zeroed(info.record_length());
        let n = record.len().min(info.record_length());
        data[..n].copy_from_slice(&record[..n]);

        let mut view = RecordViewMut::new(info, &mut data)?;
        for &(i, bits) in &self.masks {
            apply_mask(view.field_mut(i)?, bits);
        }
        for (i, op) in self.ops.iter().enumerate() {
            match op {
                MergeOp::FrontPayload => {
                    let filled = payload_filled(&view.as_view(), i)?;
                    write_be(&mut view.private_mut(i, PAYLOAD_PRIVATE_LENGTH)?[4..8], filled);
                }
                MergeOp::PacketGap => {
                    write_be(view.private_mut(i, PACKET_GAP_PRIVATE_LENGTH)?, times.end);
                }
                _ => {}
            }
        }
        Ok(data)
    }

    fn hash_key(&self, data: &[u8], reverse: bool) -> u32 {
        let info = self.table.template();
        let mut hasher = XxHash64::with_seed(HASH_SEED);
        for &i in &self.key_fields {
            let j = self.key_source(i, reverse);
            hasher.write(&data[info.fields[j].range()]);
        }
        hasher.finish() as u32
    }

    /// 역방향 조회 시 i번째 키 값을 읽어 올 입력 필드
    fn key_source(&self, index: usize, reverse: bool) -> usize {
        match (reverse, self.table.reverse_map()) {
            (true, Some(map)) => map.key_mirror(index),
            _ => index,
        }
    }

    fn key_matches(&self, bucket: &[u8], incoming: &[u8], reverse: bool) -> bool {
        let info = self.table.template();
        self.key_fields.iter().all(|&i| {
            let j = self.key_source(i, reverse);
            bucket[info.fields[i].range()] == incoming[info.fields[j].range()]
        })
    }

    /// 새 레코드가 기존 버킷의 마감 이후에 시작했는지 확인합니다.
    fn overrun(&self, guard: &TableGuard<'_>, id: BucketId, times: FlowTimes) -> bool {
        let bucket = guard.bucket(id);
        times.start > bucket.expire_time() || times.start > bucket.force_expire_time()
    }

    fn fold(
        &self,
        guard: &mut TableGuard<'_>,
        id: BucketId,
        incoming: &[u8],
        forward_hash: u32,
        times: FlowTimes,
    ) -> Result<bool, AggregationError> {
        let info = self.table.template();
        let must_reverse = match self.start_field {
            Some(i) => {
                let base = RecordView::new(info, guard.bucket(id).data())?.read_uint(i)?;
                let delta = RecordView::new(info, incoming)?.read_uint(i)?;
                delta != 0 && base > delta
            }
            None => false,
        };

        self.merge(guard, id, incoming, times, true)?;
        guard.refresh(id, times.end.saturating_add(self.table.min_buffer_ms()));

        if must_reverse {
            guard.reverse_bucket(id);
            guard.rehash(id, forward_hash);
        }
        Ok(must_reverse)
    }

    fn merge(
        &self,
        guard: &mut TableGuard<'_>,
        id: BucketId,
        incoming: &[u8],
        times: FlowTimes,
        reverse: bool,
    ) -> Result<(), AggregationError> {
        let info = self.table.template();
        let reverse_map = self.table.reverse_map();
        let delta = RecordView::new(info, incoming)?;
        let mut base = RecordViewMut::new(info, guard.data_mut(id))?;

        for (src, op) in self.ops.iter().enumerate() {
            if matches!(op, MergeOp::Key | MergeOp::Ignore) {
                continue;
            }
            let dst = match (reverse, reverse_map) {
                (true, Some(map)) => map.mirror(src),
                _ => src,
            };
            merge_field(*op, &mut base, &delta, src, dst, times)?;
        }
        Ok(())
    }

    fn count_aggregated(&self) {
        counter!(
            m::AGGREGATOR_RECORDS_AGGREGATED_TOTAL,
            m::LABEL_TEMPLATE => self.table.template().template_id.to_string()
        )
        .increment(1);
    }
}

fn merge_field(
    op: MergeOp,
    base: &mut RecordViewMut<'_>,
    delta: &RecordView<'_>,
    src: usize,
    dst: usize,
    times: FlowTimes,
) -> Result<(), AggregationError> {
    match op {
        MergeOp::Key | MergeOp::Ignore => {}
        MergeOp::Sum => {
            let sum = base.read_uint(dst)?.wrapping_add(delta.read_uint(src)?);
            base.write_uint(dst, sum)?;
        }
        MergeOp::MinNonZero => {
            let (a, b) = (base.read_uint(dst)?, delta.read_uint(src)?);
            let v = match (a, b) {
                (0, b) => b,
                (a, 0) => a,
                (a, b) => a.min(b),
            };
            base.write_uint(dst, v)?;
        }
        MergeOp::Max => {
            let v = base.read_uint(dst)?.max(delta.read_uint(src)?);
            base.write_uint(dst, v)?;
        }
        MergeOp::BitOr => {
            let v = base.read_uint(dst)? | delta.read_uint(src)?;
            base.write_uint(dst, v)?;
        }
        MergeOp::WriteOnce => {
            if base.read_uint(dst)? == 0 {
                base.write_uint(dst, delta.read_uint(src)?)?;
            }
        }
        MergeOp::FrontPayload => {
            let base_filled = read_be(&base.private_mut(dst, PAYLOAD_PRIVATE_LENGTH)?[4..8]);
            let delta_filled = read_be(&delta.private(src, PAYLOAD_PRIVATE_LENGTH)?[4..8]);
            if base_filled == 0 && delta_filled > 0 {
                base.field_mut(dst)?.copy_from_slice(delta.field(src)?);
                base.private_mut(dst, PAYLOAD_PRIVATE_LENGTH)?
                    .copy_from_slice(delta.private(src, PAYLOAD_PRIVATE_LENGTH)?);
            }
        }
        MergeOp::PacketGap => {
            let last_end = read_be(base.private_mut(dst, PACKET_GAP_PRIVATE_LENGTH)?);
            let gap = times.start.saturating_sub(last_end);
            let v = base
                .read_uint(dst)?
                .max(delta.read_uint(src)?)
                .max(gap);
            base.write_uint(dst, v)?;
            write_be(
                base.private_mut(dst, PACKET_GAP_PRIVATE_LENGTH)?,
                last_end.max(times.end),
            );
        }
    }
    Ok(())
}

/// 프론트 페이로드 바이트 카운터 초기값: 비어 있지 않으면 필드 길이
fn payload_filled(view: &RecordView<'_>, index: usize) -> Result<u64, AggregationError> {
    let counter = read_be(&view.private(index, PAYLOAD_PRIVATE_LENGTH)?[4..8]);
    if counter > 0 {
        return Ok(counter);
    }
    let field = view.field(index)?;
    Ok(if field.iter().any(|b| *b != 0) {
        field.len() as u64
    } else {
        0
    })
}

/// IPv4 주소 같은 키 필드의 하위 비트를 지웁니다. 접두어 길이는 필드 비트 수로 잘립니다.
fn apply_mask(field: &mut [u8], prefix: u8) {
    let total_bits = field.len() * 8;
    let keep = usize::from(prefix).min(total_bits);
    for (n, byte) in field.iter_mut().enumerate() {
        let start = n * 8;
        if start >= keep {
            *byte = 0;
        } else if start + 8 > keep {
            let bits = keep - start;
            *byte &= 0xffu8 << (8 - bits);
        }
    }
}
