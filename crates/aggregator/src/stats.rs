//! 해시 테이블 통계

use std::time::Duration;

use metrics::gauge;
use serde::Serialize;

use flowpost_core::metrics as m;

/// `FlowHashtable::statistics()`의 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HashtableStatistics {
    /// 버퍼링 중인 버킷 수
    pub live_entries: u64,
    /// 비어 있는 해시 슬롯 수
    pub empty_buckets: u64,
    /// 버킷이 두 개 이상 연결된 해시 슬롯 수
    pub multi_entry_buckets: u64,
    /// 직전 조회 이후 초당 내보낸 버킷 수
    pub exported_per_second: f64,
    /// 지금까지 받은 레코드 수
    pub records_received: u64,
}

impl HashtableStatistics {
    /// 내보낸 버킷 증가분을 간격으로 나눈 비율
    ///
    /// 간격이 0이면 증가분을 그대로 돌려줍니다.
    pub fn rate(delta: u64, interval: Duration) -> f64 {
        let secs = interval.as_secs_f64();
        if secs > 0.0 {
            delta as f64 / secs
        } else {
            delta as f64
        }
    }

    /// 게이지에 반영합니다.
    pub fn publish(&self, template_id: u16) {
        let label = template_id.to_string();
        gauge!(m::AGGREGATOR_LIVE_ENTRIES, m::LABEL_TEMPLATE => label.clone())
            .set(self.live_entries as f64);
        gauge!(m::AGGREGATOR_EMPTY_BUCKETS, m::LABEL_TEMPLATE => label.clone())
            .set(self.empty_buckets as f64);
        gauge!(m::AGGREGATOR_MULTI_ENTRY_BUCKETS, m::LABEL_TEMPLATE => label.clone())
            .set(self.multi_entry_buckets as f64);
        gauge!(m::AGGREGATOR_EXPORTED_PER_SECOND, m::LABEL_TEMPLATE => label)
            .set(self.exported_per_second);
    }
}
