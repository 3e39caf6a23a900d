//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 집계 엔진은 이 상수로 `metrics::counter!()`, `metrics::gauge!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `flowpost_`
//! - 모듈명: `aggregator_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(flowpost_core::metrics::AGGREGATOR_BUCKETS_EXPORTED_TOTAL).increment(1);
//! ```

use metrics::{describe_counter, describe_gauge};

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 템플릿 ID 레이블 키
pub const LABEL_TEMPLATE: &str = "template";

/// 만료 사유 레이블 키 (inactive, active, forced)
pub const LABEL_REASON: &str = "reason";

// ─── Aggregator 메트릭 ─────────────────────────────────────────────

/// Aggregator: 현재 버퍼링된 버킷 수 (gauge)
pub const AGGREGATOR_LIVE_ENTRIES: &str = "flowpost_aggregator_live_entries";

/// Aggregator: 비어 있는 해시 슬롯 수 (gauge)
pub const AGGREGATOR_EMPTY_BUCKETS: &str = "flowpost_aggregator_empty_buckets";

/// Aggregator: 2개 이상 체인된 해시 슬롯 수 (gauge)
pub const AGGREGATOR_MULTI_ENTRY_BUCKETS: &str = "flowpost_aggregator_multi_entry_buckets";

/// Aggregator: 초당 내보낸 버킷 수 (gauge)
pub const AGGREGATOR_EXPORTED_PER_SECOND: &str = "flowpost_aggregator_exported_per_second";

/// Aggregator: 내보낸 버킷 수 (counter, label: reason)
pub const AGGREGATOR_BUCKETS_EXPORTED_TOTAL: &str = "flowpost_aggregator_buckets_exported_total";

/// Aggregator: 생성된 버킷 수 (counter)
pub const AGGREGATOR_BUCKETS_CREATED_TOTAL: &str = "flowpost_aggregator_buckets_created_total";

/// Aggregator: 수신한 레코드 수 (counter)
pub const AGGREGATOR_RECORDS_RECEIVED_TOTAL: &str = "flowpost_aggregator_records_received_total";

/// Aggregator: 기존 버킷에 병합된 레코드 수 (counter)
pub const AGGREGATOR_RECORDS_AGGREGATED_TOTAL: &str =
    "flowpost_aggregator_records_aggregated_total";

/// Aggregator: 마감 초과로 강제 만료된 버킷 수 (counter)
pub const AGGREGATOR_FORCED_EXPIRIES_TOTAL: &str = "flowpost_aggregator_forced_expiries_total";

/// Aggregator: 스핀 가드 경합 횟수 (counter)
pub const AGGREGATOR_GUARD_CONTENTION_TOTAL: &str = "flowpost_aggregator_guard_contention_total";

/// Aggregator: 싱크 전달 실패 수 (counter)
pub const AGGREGATOR_EXPORT_FAILURES_TOTAL: &str = "flowpost_aggregator_export_failures_total";

/// Aggregator: 템플릿 알림 횟수 (counter, label: template)
pub const AGGREGATOR_TEMPLATES_ANNOUNCED_TOTAL: &str =
    "flowpost_aggregator_templates_announced_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// recorder 설치 직후 한 번 호출합니다. recorder가 없어도 패닉하지 않습니다.
pub fn describe_all() {
    describe_gauge!(
        AGGREGATOR_LIVE_ENTRIES,
        "Number of flow buckets currently buffered in the hash table"
    );
    describe_gauge!(
        AGGREGATOR_EMPTY_BUCKETS,
        "Number of hash table slots without any bucket"
    );
    describe_gauge!(
        AGGREGATOR_MULTI_ENTRY_BUCKETS,
        "Number of hash table slots holding more than one chained bucket"
    );
    describe_gauge!(
        AGGREGATOR_EXPORTED_PER_SECOND,
        "Buckets exported per second over the last statistics interval"
    );
    describe_counter!(
        AGGREGATOR_BUCKETS_EXPORTED_TOTAL,
        "Total number of buckets handed to the record sink"
    );
    describe_counter!(
        AGGREGATOR_BUCKETS_CREATED_TOTAL,
        "Total number of buckets created for new flow keys"
    );
    describe_counter!(
        AGGREGATOR_RECORDS_RECEIVED_TOTAL,
        "Total number of flow records offered to the aggregator"
    );
    describe_counter!(
        AGGREGATOR_RECORDS_AGGREGATED_TOTAL,
        "Total number of flow records merged into an existing bucket"
    );
    describe_counter!(
        AGGREGATOR_FORCED_EXPIRIES_TOTAL,
        "Total number of buckets expired early because a newer record overran their deadline"
    );
    describe_counter!(
        AGGREGATOR_GUARD_CONTENTION_TOTAL,
        "Total number of times the aggregation guard was busy on first attempt"
    );
    describe_counter!(
        AGGREGATOR_EXPORT_FAILURES_TOTAL,
        "Total number of records the sink refused"
    );
    describe_counter!(
        AGGREGATOR_TEMPLATES_ANNOUNCED_TOTAL,
        "Total number of template announcements sent downstream"
    );
}
