//! 플로우 해시 테이블: 버킷 버퍼링, soft/hard 만료, 내보내기
//!
//! [`FlowHashtable`]은 하나의 [`Rule`]에 대한 집계 상태를 소유합니다.
//! 삽입 경로와 만료 스레드가 동시에 접근하며, 모든 버킷/리스트 조작은
//! [`SpinGuard`] 아래에서만 일어납니다.
//!
//! # 구조
//! ```text
//!                      SpinGuard<TableState>
//!   ┌────────────────────────────────────────────────────────┐
//!   │ slots[2^bits] ──▶ 해시 체인 (Bucket::chain)            │
//!   │ export_list   ──▶ 생성 순서 (강제 만료 순회)            │
//!   │ deadlines     ──▶ (min(expire, force), id) 정렬 인덱스 │
//!   │ pool          ──▶ BucketPool 아레나                    │
//!   └────────────────────────────────────────────────────────┘
//!                              │ expire_flows()
//!                              ▼
//!                  FlowRecord::Data ──▶ RecordSink
//! ```
//!
//! # 사용 예시
//! ```ignore
//! let (table, record_rx) = FlowHashtable::from_config(&config.aggregator, rule)?;
//! let table = Arc::new(table);
//! table.on_start()?;
//!
//! // 외부 폴러
//! table.expire_flows(false);
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use metrics::counter;
use tokio::sync::{MutexGuard, mpsc};
use tracing::{debug, info, warn};

use flowpost_core::config::{AggregatorConfig, DEFAULT_HASHTABLE_BITS, MAX_HASHTABLE_BITS};
use flowpost_core::error::{ConfigError, FlowpostError, PipelineError};
use flowpost_core::metrics as m;
use flowpost_core::pipeline::{HealthStatus, Lifecycle, RecordSink};
use flowpost_core::record::{FlowRecord, TemplateInfo};

use crate::biflow::ReverseMap;
use crate::bucket::{Bucket, BucketId, BucketPool, BucketState, ExportList, Link};
use crate::guard::{DEFAULT_RETRY_INTERVAL, SpinGuard};
use crate::rule::Rule;
use crate::stats::HashtableStatistics;
use crate::template::{TemplateLayout, synthesize};

/// 현재 시각 (UNIX epoch 기준 밀리초)
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// 가드 없이 갱신되는 카운터
#[derive(Debug, Default)]
struct Counters {
    live_entries: AtomicUsize,
    empty_buckets: AtomicUsize,
    multi_entry_buckets: AtomicUsize,
    exported_total: AtomicU64,
    last_exported: AtomicU64,
    records_received: AtomicU64,
    export_failures: AtomicU64,
}

/// 가드가 보호하는 테이블 상태
#[derive(Debug)]
struct TableState {
    mask: u32,
    slots: Vec<Option<BucketId>>,
    pool: BucketPool,
    export_list: ExportList,
    deadlines: BTreeSet<(u64, BucketId)>,
}

impl TableState {
    fn new(hash_bits: u8) -> Self {
        let size = 1usize << hash_bits;
        Self {
            mask: u32::try_from(size - 1).unwrap_or(u32::MAX),
            slots: vec![None; size],
            pool: BucketPool::new(),
            export_list: ExportList::new(),
            deadlines: BTreeSet::new(),
        }
    }

    fn slot_of(&self, hash: u32) -> usize {
        (hash & self.mask) as usize
    }

    fn link_chain(&mut self, id: BucketId, counters: &Counters) {
        let slot = self.slot_of(self.pool[id].hash);
        let head = self.slots[slot];
        match head {
            None => {
                counters.empty_buckets.fetch_sub(1, Ordering::Relaxed);
            }
            Some(h) if self.pool[h].chain.next.is_none() => {
                counters.multi_entry_buckets.fetch_add(1, Ordering::Relaxed);
            }
            Some(_) => {}
        }
        if let Some(h) = head {
            self.pool[h].chain.prev = Some(id);
        }
        let bucket = &mut self.pool[id];
        bucket.chain = Link {
            prev: None,
            next: head,
        };
        bucket.in_table = true;
        self.slots[slot] = Some(id);
    }

    fn unlink_chain(&mut self, id: BucketId, counters: &Counters) {
        let bucket = &self.pool[id];
        assert!(
            bucket.in_table,
            "removal of bucket {id:?} that is not in the hash table"
        );
        let slot = self.slot_of(bucket.hash);
        let Link { prev, next } = bucket.chain;

        match prev {
            Some(p) => self.pool[p].chain.next = next,
            None => {
                assert_eq!(
                    self.slots[slot],
                    Some(id),
                    "bucket {id:?} is not the head of its hash chain"
                );
                self.slots[slot] = next;
            }
        }
        if let Some(n) = next {
            self.pool[n].chain.prev = prev;
        }

        let bucket = &mut self.pool[id];
        bucket.chain = Link::default();
        bucket.in_table = false;

        match self.slots[slot] {
            None => {
                counters.empty_buckets.fetch_add(1, Ordering::Relaxed);
            }
            Some(h) if self.pool[h].chain.next.is_none() => {
                counters.multi_entry_buckets.fetch_sub(1, Ordering::Relaxed);
            }
            Some(_) => {}
        }
    }

    /// 마감 시각을 바꾸는 갱신. 인덱스 키를 함께 옮깁니다.
    fn update_deadline(&mut self, id: BucketId, update: impl FnOnce(&mut Bucket)) {
        let old = self.pool[id].deadline();
        update(&mut self.pool[id]);
        let new = self.pool[id].deadline();
        if old != new {
            let removed = self.deadlines.remove(&(old, id));
            debug_assert!(removed, "bucket {id:?} missing from deadline index");
            self.deadlines.insert((new, id));
        }
    }

    /// 두 리스트와 인덱스에서 모두 떼어내고 버킷을 꺼냅니다.
    fn evict(&mut self, id: BucketId, counters: &Counters) -> Bucket {
        if self.pool[id].in_table {
            self.unlink_chain(id, counters);
        }
        self.export_list.unlink(&mut self.pool, id);
        let deadline = self.pool[id].deadline();
        self.deadlines.remove(&(deadline, id));
        self.pool.release(id)
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.export_list.clear();
        self.deadlines.clear();
        self.pool.clear();
    }
}

/// 하나의 규칙에 대한 플로우 해시 테이블
pub struct FlowHashtable {
    guard: SpinGuard<TableState>,
    layout: TemplateLayout,
    reverse: Option<ReverseMap>,
    hash_bits: u8,
    min_buffer_ms: u64,
    max_buffer_ms: u64,
    sink: Arc<dyn RecordSink>,
    counters: Counters,
    template_label: String,
}

impl std::fmt::Debug for FlowHashtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowHashtable")
            .field("template_id", &self.layout.info.template_id)
            .field("hash_bits", &self.hash_bits)
            .field("min_buffer_ms", &self.min_buffer_ms)
            .field("max_buffer_ms", &self.max_buffer_ms)
            .field("biflow", &self.reverse.is_some())
            .field("live_entries", &self.live_entries())
            .finish()
    }
}

/// [`FlowHashtable`] 빌더
///
/// `rule`과 `sink`는 필수입니다. 규칙에 `hash_bits`가 있으면 빌더 값보다 우선합니다.
pub struct FlowHashtableBuilder {
    rule: Option<Rule>,
    min_buffer_time: Duration,
    max_buffer_time: Duration,
    hash_bits: u8,
    guard_retry_interval: Duration,
    sink: Option<Arc<dyn RecordSink>>,
}

impl FlowHashtableBuilder {
    fn new() -> Self {
        Self {
            rule: None,
            min_buffer_time: Duration::from_secs(5),
            max_buffer_time: Duration::from_secs(30),
            hash_bits: DEFAULT_HASHTABLE_BITS,
            guard_retry_interval: DEFAULT_RETRY_INTERVAL,
            sink: None,
        }
    }

    /// 집계 규칙을 지정합니다.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    /// inactive 타임아웃 (기본: 5초)
    pub fn min_buffer_time(mut self, d: Duration) -> Self {
        self.min_buffer_time = d;
        self
    }

    /// active 타임아웃 (기본: 30초)
    pub fn max_buffer_time(mut self, d: Duration) -> Self {
        self.max_buffer_time = d;
        self
    }

    /// 해시 테이블 크기 (2^bits, 기본: 17)
    pub fn hash_bits(mut self, bits: u8) -> Self {
        self.hash_bits = bits;
        self
    }

    /// 스핀 가드 재시도 간격 (기본: 50ms)
    pub fn guard_retry_interval(mut self, d: Duration) -> Self {
        self.guard_retry_interval = d;
        self
    }

    /// 설정의 타임아웃, 테이블 크기, 재시도 간격을 적용합니다.
    pub fn with_config(self, config: &AggregatorConfig) -> Self {
        self.min_buffer_time(config.min_buffer_time())
            .max_buffer_time(config.max_buffer_time())
            .hash_bits(config.hashtable_bits)
            .guard_retry_interval(config.guard_retry_interval())
    }

    /// 레코드를 받을 싱크를 지정합니다.
    pub fn sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 레이아웃을 합성하고 테이블을 생성합니다.
    ///
    /// # 에러
    /// - `PipelineError::InitFailed`: 규칙 또는 싱크 누락
    /// - `ConfigError::InvalidValue`: 타임아웃/테이블 크기 범위 위반
    /// - `FlowpostError::Aggregation`: 레이아웃 합성 또는 biflow 대응표 실패
    pub fn build(self) -> Result<FlowHashtable, FlowpostError> {
        let rule = self
            .rule
            .ok_or_else(|| PipelineError::InitFailed("rule is required".to_owned()))?;
        let sink = self
            .sink
            .ok_or_else(|| PipelineError::InitFailed("record sink is required".to_owned()))?;
        rule.validate()?;

        if self.min_buffer_time > self.max_buffer_time {
            return Err(ConfigError::InvalidValue {
                field: "max_buffer_time".to_owned(),
                reason: format!(
                    "must be >= min_buffer_time ({:?} < {:?})",
                    self.max_buffer_time, self.min_buffer_time
                ),
            }
            .into());
        }

        let hash_bits = rule.hash_bits.unwrap_or(self.hash_bits);
        if !(1..=MAX_HASHTABLE_BITS).contains(&hash_bits) {
            return Err(ConfigError::InvalidValue {
                field: "hash_bits".to_owned(),
                reason: format!("must be between 1 and {MAX_HASHTABLE_BITS}"),
            }
            .into());
        }

        let layout = synthesize(&rule)?;
        let reverse = if rule.biflow_aggregation {
            Some(ReverseMap::build(&layout.info)?)
        } else {
            None
        };

        let state = TableState::new(hash_bits);
        let counters = Counters::default();
        counters
            .empty_buckets
            .store(state.slots.len(), Ordering::Relaxed);

        info!(
            template_id = rule.id,
            hash_bits,
            fields = layout.info.fields.len(),
            data_length = layout.info.data_length,
            private_length = layout.info.private_length,
            biflow = reverse.is_some(),
            "flow hashtable created"
        );

        Ok(FlowHashtable {
            guard: SpinGuard::new(state, self.guard_retry_interval),
            template_label: rule.id.to_string(),
            layout,
            reverse,
            hash_bits,
            min_buffer_ms: duration_ms(self.min_buffer_time),
            max_buffer_ms: duration_ms(self.max_buffer_time),
            sink,
            counters,
        })
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl FlowHashtable {
    /// 빌더를 반환합니다.
    pub fn builder() -> FlowHashtableBuilder {
        FlowHashtableBuilder::new()
    }

    /// 설정과 규칙으로 테이블과 레코드 수신 채널을 만듭니다.
    pub fn from_config(
        config: &AggregatorConfig,
        rule: Rule,
    ) -> Result<(Self, mpsc::Receiver<FlowRecord>), FlowpostError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let table = Self::builder()
            .rule(rule)
            .with_config(config)
            .sink(Arc::new(tx))
            .build()?;
        Ok((table, rx))
    }

    /// 공유 레이아웃
    pub fn template(&self) -> &Arc<TemplateInfo> {
        &self.layout.info
    }

    /// 합성된 레이아웃과 필드별 수정자
    pub fn layout(&self) -> &TemplateLayout {
        &self.layout
    }

    /// biflow 대응표 (biflow 집계가 꺼져 있으면 `None`)
    pub fn reverse_map(&self) -> Option<&ReverseMap> {
        self.reverse.as_ref()
    }

    /// 해시 테이블 크기 (비트)
    pub fn hash_bits(&self) -> u8 {
        self.hash_bits
    }

    /// inactive 타임아웃 (ms)
    pub fn min_buffer_ms(&self) -> u64 {
        self.min_buffer_ms
    }

    /// active 타임아웃 (ms)
    pub fn max_buffer_ms(&self) -> u64 {
        self.max_buffer_ms
    }

    /// 버퍼링 중인 버킷 수
    pub fn live_entries(&self) -> usize {
        self.counters.live_entries.load(Ordering::Relaxed)
    }

    /// 지금까지 내보낸 버킷 수
    pub fn exported_total(&self) -> u64 {
        self.counters.exported_total.load(Ordering::Relaxed)
    }

    /// 연결되지 않은 새 버킷을 만듭니다.
    ///
    /// soft 마감은 `flow_start + min`, hard 마감은 `flow_start + max`입니다.
    /// 호출자는 [`TableGuard::insert`]로 두 리스트에 함께 연결해야 합니다.
    pub fn create_bucket(
        &self,
        data: BytesMut,
        observation_domain_id: u32,
        hash: u32,
        flow_start_ms: u64,
    ) -> Bucket {
        assert_eq!(
            data.len(),
            self.layout.info.record_length(),
            "bucket buffer does not match template {}",
            self.layout.info.template_id
        );
        Bucket::new(
            data,
            observation_domain_id,
            hash,
            flow_start_ms.saturating_add(self.min_buffer_ms),
            flow_start_ms.saturating_add(self.max_buffer_ms),
        )
    }

    /// 가드를 획득합니다. 반환된 핸들이 살아 있는 동안 만료 스캔은 대기합니다.
    pub fn lock(&self) -> TableGuard<'_> {
        TableGuard {
            table: self,
            state: self.guard.acquire(),
        }
    }

    pub(crate) fn note_record_received(&self) {
        self.counters
            .records_received
            .fetch_add(1, Ordering::Relaxed);
        counter!(m::AGGREGATOR_RECORDS_RECEIVED_TOTAL, m::LABEL_TEMPLATE => self.template_label.clone())
            .increment(1);
    }

    /// 현재 시각으로 만료 스캔을 실행합니다.
    pub fn expire_flows(&self, force_all: bool) -> usize {
        self.expire_flows_at(now_ms(), force_all)
    }

    /// 주어진 시각(ms)으로 만료 스캔을 실행하고 내보낸 버킷 수를 반환합니다.
    ///
    /// `force_all`이면 생성 순서대로 모든 버킷을 내보내고, 아니면 마감 순서로
    /// 꺼내다가 처음으로 만료되지 않은 버킷에서 멈춥니다. 만료된 레코드는 가드 안에서
    /// 모으고, 가드를 놓은 뒤 싱크에 넘깁니다. 싱크가 블로킹해도 삽입 경로는 멈추지 않습니다.
    pub fn expire_flows_at(&self, now: u64, force_all: bool) -> usize {
        let (records, remaining) = {
            let mut state = self.guard.acquire();
            let records = self.expire_locked(&mut state, now, force_all);
            (records, state.pool.len())
        };
        let exported = records.len();
        if exported > 0 {
            debug!(
                template_id = self.layout.info.template_id,
                exported,
                remaining,
                force_all,
                "expired flows"
            );
        }
        self.deliver(records);
        exported
    }

    fn expire_locked(&self, state: &mut TableState, now: u64, force_all: bool) -> Vec<FlowRecord> {
        let mut records = Vec::new();
        if force_all {
            while let Some(id) = state.export_list.head() {
                let bucket = state.evict(id, &self.counters);
                records.push(self.detach(bucket));
            }
            debug_assert!(state.deadlines.is_empty());
        } else {
            while let Some(&(_, id)) = state.deadlines.first() {
                if !state.pool[id].is_due(now) {
                    break;
                }
                let bucket = state.evict(id, &self.counters);
                records.push(self.detach(bucket));
            }
        }
        records
    }

    /// 버킷 버퍼를 출력 레코드로 옮깁니다. 이 시점부터 버킷은 내보내진 것으로 셉니다.
    fn detach(&self, bucket: Bucket) -> FlowRecord {
        let Bucket {
            mut data,
            observation_domain_id,
            ..
        } = bucket;
        data.truncate(self.layout.info.data_length);

        self.counters.live_entries.fetch_sub(1, Ordering::Relaxed);
        self.counters.exported_total.fetch_add(1, Ordering::Relaxed);
        counter!(m::AGGREGATOR_BUCKETS_EXPORTED_TOTAL, m::LABEL_TEMPLATE => self.template_label.clone())
            .increment(1);

        FlowRecord::Data {
            template: Arc::clone(&self.layout.info),
            data: data.freeze(),
            observation_domain_id,
        }
    }

    /// 모은 레코드를 순서대로 싱크에 넘깁니다. 가드 밖에서만 호출합니다.
    fn deliver(&self, records: Vec<FlowRecord>) {
        for record in records {
            if let Err(e) = self.sink.send(record) {
                self.counters.export_failures.fetch_add(1, Ordering::Relaxed);
                counter!(m::AGGREGATOR_EXPORT_FAILURES_TOTAL, m::LABEL_TEMPLATE => self.template_label.clone())
                    .increment(1);
                warn!(
                    template_id = self.layout.info.template_id,
                    error = %e,
                    "failed to hand off expired flow record"
                );
            }
        }
    }

    /// 템플릿을 하류로 알립니다.
    pub fn announce_template(&self) -> Result<(), FlowpostError> {
        self.sink
            .send(FlowRecord::Template(Arc::clone(&self.layout.info)))?;
        counter!(m::AGGREGATOR_TEMPLATES_ANNOUNCED_TOTAL, m::LABEL_TEMPLATE => self.template_label.clone())
            .increment(1);
        info!(
            template_id = self.layout.info.template_id,
            set_kind = ?self.layout.info.set_kind,
            "template announced"
        );
        Ok(())
    }

    /// 템플릿 철회를 하류로 알립니다.
    ///
    /// 종료 훅은 이를 호출하지 않습니다. 하류가 자체 재구성 절차로 템플릿을 무효화합니다.
    pub fn send_template_withdrawal(&self) -> Result<(), FlowpostError> {
        self.sink
            .send(FlowRecord::TemplateWithdrawal(Arc::clone(&self.layout.info)))?;
        info!(
            template_id = self.layout.info.template_id,
            "template withdrawn"
        );
        Ok(())
    }

    /// 통계 스냅샷. 가드를 잡지 않습니다.
    ///
    /// `interval`은 직전 호출 이후 경과 시간이며 초당 내보내기 비율 계산에 쓰입니다.
    pub fn statistics(&self, interval: Duration) -> HashtableStatistics {
        let exported = self.counters.exported_total.load(Ordering::Relaxed);
        let previous = self.counters.last_exported.swap(exported, Ordering::Relaxed);
        let stats = HashtableStatistics {
            live_entries: self.counters.live_entries.load(Ordering::Relaxed) as u64,
            empty_buckets: self.counters.empty_buckets.load(Ordering::Relaxed) as u64,
            multi_entry_buckets: self.counters.multi_entry_buckets.load(Ordering::Relaxed) as u64,
            exported_per_second: HashtableStatistics::rate(
                exported.saturating_sub(previous),
                interval,
            ),
            records_received: self.counters.records_received.load(Ordering::Relaxed),
        };
        stats.publish(self.layout.info.template_id);
        stats
    }
}

impl Lifecycle for FlowHashtable {
    fn on_start(&self) -> Result<(), FlowpostError> {
        self.announce_template()
    }

    fn on_pre_reconfiguration(&self) -> Result<(), FlowpostError> {
        info!(
            template_id = self.layout.info.template_id,
            live_entries = self.live_entries(),
            "forcing export before reconfiguration"
        );
        self.expire_flows(true);
        Ok(())
    }

    fn on_post_reconfiguration(&self) -> Result<(), FlowpostError> {
        self.announce_template()
    }

    fn on_shutdown(&self) -> Result<(), FlowpostError> {
        let exported = self.expire_flows(true);
        info!(
            template_id = self.layout.info.template_id,
            exported, "flow hashtable shut down"
        );
        Ok(())
    }

    fn health_check(&self) -> HealthStatus {
        let failures = self.counters.export_failures.load(Ordering::Relaxed);
        if failures > 0 {
            HealthStatus::Degraded(format!("{failures} flow records could not be handed off"))
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Drop for FlowHashtable {
    fn drop(&mut self) {
        let template_id = self.layout.info.template_id;
        let state = self.guard.get_mut();
        let remaining = state.pool.len();
        state.clear();
        if remaining > 0 {
            debug!(template_id, remaining, "dropping buffered flows without export");
        }
    }
}

/// 가드를 잡은 상태의 테이블 핸들
///
/// 삽입 경로는 조회, 생성, 병합, 재해시를 모두 이 핸들 하나로 수행합니다.
/// 버킷과 두 리스트를 함께 바꾸는 것은 이 타입의 메서드뿐입니다.
pub struct TableGuard<'a> {
    table: &'a FlowHashtable,
    state: MutexGuard<'a, TableState>,
}

impl TableGuard<'_> {
    /// 해시 체인에서 `matches`를 만족하는 버킷을 찾습니다.
    pub fn lookup(&self, hash: u32, mut matches: impl FnMut(&Bucket) -> bool) -> Option<BucketId> {
        let mut cursor = self.state.slots[self.state.slot_of(hash)];
        while let Some(id) = cursor {
            let bucket = &self.state.pool[id];
            if bucket.hash == hash && matches(bucket) {
                return Some(id);
            }
            cursor = bucket.chain.next;
        }
        None
    }

    /// 버킷을 해시 체인과 내보내기 리스트에 함께 연결합니다.
    pub fn insert(&mut self, bucket: Bucket) -> BucketId {
        let deadline = bucket.deadline();
        let state = &mut *self.state;
        let id = state.pool.acquire(bucket);
        state.link_chain(id, &self.table.counters);
        state.export_list.push_back(&mut state.pool, id);
        state.deadlines.insert((deadline, id));

        self.table
            .counters
            .live_entries
            .fetch_add(1, Ordering::Relaxed);
        counter!(m::AGGREGATOR_BUCKETS_CREATED_TOTAL, m::LABEL_TEMPLATE => self.table.template_label.clone())
            .increment(1);
        id
    }

    /// 해시 체인에서만 떼어냅니다. 내보내기 리스트에는 남아 다음 스캔에서 내보내집니다.
    ///
    /// # Panics
    /// 버킷이 테이블에 없으면 패닉합니다.
    pub fn remove_bucket(&mut self, id: BucketId) {
        let state = &mut *self.state;
        state.unlink_chain(id, &self.table.counters);
    }

    /// 강제 만료를 표시하고 해시 체인에서 떼어냅니다.
    pub fn force_expire(&mut self, id: BucketId) {
        self.state.update_deadline(id, |b| b.force_expiry = true);
        if self.state.pool[id].in_table {
            self.remove_bucket(id);
        }
        counter!(m::AGGREGATOR_FORCED_EXPIRIES_TOTAL, m::LABEL_TEMPLATE => self.table.template_label.clone())
            .increment(1);
    }

    /// soft 마감을 갱신합니다. hard 마감은 바뀌지 않습니다.
    pub fn refresh(&mut self, id: BucketId, expire_time: u64) {
        self.state.update_deadline(id, |b| b.expire_time = expire_time);
    }

    /// 버킷 조회
    pub fn bucket(&self, id: BucketId) -> &Bucket {
        &self.state.pool[id]
    }

    /// 병합용 버퍼. 버킷을 `Active` 상태로 바꿉니다.
    pub fn data_mut(&mut self, id: BucketId) -> &mut [u8] {
        let bucket = &mut self.state.pool[id];
        bucket.state = BucketState::Active;
        &mut bucket.data
    }

    /// 키가 바뀐 버킷을 새 해시 슬롯으로 옮깁니다.
    pub fn rehash(&mut self, id: BucketId, hash: u32) {
        let state = &mut *self.state;
        state.unlink_chain(id, &self.table.counters);
        state.pool[id].hash = hash;
        state.link_chain(id, &self.table.counters);
    }

    /// 버킷 레코드의 방향을 뒤집습니다.
    ///
    /// # Panics
    /// biflow 집계가 꺼진 테이블에서 호출하면 패닉합니다.
    pub fn reverse_bucket(&mut self, id: BucketId) {
        let map = self
            .table
            .reverse
            .as_ref()
            .unwrap_or_else(|| panic!("reverse_bucket on a table without biflow aggregation"));
        let template = &self.table.layout.info;
        map.reverse_record(template, &mut self.state.pool[id].data);
    }

    /// 버퍼링 중인 버킷 수
    pub fn len(&self) -> usize {
        self.state.pool.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.state.pool.is_empty()
    }

    /// 내보내기 리스트 길이
    pub fn export_list_len(&self) -> usize {
        self.state.export_list.len()
    }

    /// 해시 체인에 연결된 버킷 수 (전체 슬롯 순회)
    pub fn chained_len(&self) -> usize {
        let mut count = 0;
        for head in &self.state.slots {
            let mut cursor = *head;
            while let Some(id) = cursor {
                count += 1;
                cursor = self.state.pool[id].chain.next;
            }
        }
        count
    }

    /// 가장 이른 마감 시각
    pub fn next_deadline(&self) -> Option<u64> {
        self.state.deadlines.first().map(|(d, _)| *d)
    }
}
