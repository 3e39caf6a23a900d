//! 통합 테스트 -- 규칙 → 레이아웃 → 버퍼링 → 만료 → 싱크 전체 흐름

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use proptest::prelude::*;

use flowpost_aggregator::{
    BufferOutcome, FlowAggregator, FlowHashtable, ReverseMap, Rule, RuleField, Rules, synthesize,
};
use flowpost_core::config::AggregatorConfig;
use flowpost_core::error::{AggregationError, FlowpostError};
use flowpost_core::ie::{InformationElement, iana, private};
use flowpost_core::pipeline::{Lifecycle, RecordSink};
use flowpost_core::record::FlowRecord;

/// 데이터 레코드 수만 세는 싱크
#[derive(Default)]
struct CountingSink {
    data: AtomicUsize,
    templates: AtomicUsize,
}

impl RecordSink for CountingSink {
    fn send(&self, record: FlowRecord) -> Result<(), FlowpostError> {
        match record {
            FlowRecord::Data { .. } => self.data.fetch_add(1, Ordering::SeqCst),
            _ => self.templates.fetch_add(1, Ordering::SeqCst),
        };
        Ok(())
    }
}

fn ie(id: u16, len: u16) -> InformationElement {
    InformationElement::iana(id, len)
}

/// srcIP, dstIP, srcPort, dstPort, octetDeltaCount
fn scenario_rule() -> Rule {
    Rule::new(888)
        .field(RuleField::keep(ie(iana::SOURCE_IPV4_ADDRESS, 4)))
        .field(RuleField::keep(ie(iana::DESTINATION_IPV4_ADDRESS, 4)))
        .field(RuleField::keep(ie(iana::SOURCE_TRANSPORT_PORT, 2)))
        .field(RuleField::keep(ie(iana::DESTINATION_TRANSPORT_PORT, 2)))
        .field(RuleField::keep(ie(iana::OCTET_DELTA_COUNT, 8)))
}

fn encode(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, octets: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.extend_from_slice(&src);
    buf.extend_from_slice(&dst);
    buf.extend_from_slice(&sport.to_be_bytes());
    buf.extend_from_slice(&dport.to_be_bytes());
    buf.extend_from_slice(&octets.to_be_bytes());
    buf
}

fn table(rule: Rule, sink: Arc<dyn RecordSink>) -> Arc<FlowHashtable> {
    Arc::new(
        FlowHashtable::builder()
            .rule(rule)
            .min_buffer_time(Duration::from_secs(1))
            .max_buffer_time(Duration::from_secs(30))
            .hash_bits(10)
            .guard_retry_interval(Duration::from_millis(1))
            .sink(sink)
            .build()
            .expect("failed to build hashtable"),
    )
}

/// 갱신된 soft 마감 전에는 남고, 지나면 내보내짐
#[test]
fn test_refreshed_bucket_expires_after_soft_deadline() {
    let sink = Arc::new(CountingSink::default());
    let agg = FlowAggregator::new(table(scenario_rule(), sink.clone()));
    let rec = encode([1, 2, 3, 4], [5, 6, 7, 8], 1111, 80, 100);

    let first = agg.buffer_record(&rec, 0, 0, 0).unwrap();
    let second = agg.buffer_record(&rec, 0, 500, 500).unwrap();
    assert!(matches!(first, BufferOutcome::Created(_)));
    assert_eq!(second, BufferOutcome::Aggregated(first.bucket()));

    {
        let guard = agg.table().lock();
        let bucket = guard.bucket(first.bucket());
        assert_eq!(bucket.expire_time(), 1_500);
        assert_eq!(bucket.force_expire_time(), 30_000);
    }

    assert_eq!(agg.table().expire_flows_at(1_200, false), 0);
    assert_eq!(agg.table().live_entries(), 1);
    assert_eq!(agg.table().expire_flows_at(1_600, false), 1);
    assert_eq!(agg.table().live_entries(), 0);
    assert_eq!(sink.data.load(Ordering::SeqCst), 1);
}

/// biflow 대응표는 주소와 포트를 서로 맞바꿈
#[test]
fn test_biflow_map_pairs_endpoints() {
    let rule = scenario_rule()
        .biflow(true)
        .field(RuleField::keep(ie(iana::OCTET_DELTA_COUNT, 8).reversed()));
    let layout = synthesize(&rule).unwrap();
    let map = ReverseMap::build(&layout.info).unwrap();

    let idx = |id| layout.info.field_index(id, 0).unwrap();
    let (src_ip, dst_ip) = (
        idx(iana::SOURCE_IPV4_ADDRESS),
        idx(iana::DESTINATION_IPV4_ADDRESS),
    );
    let (src_port, dst_port) = (
        idx(iana::SOURCE_TRANSPORT_PORT),
        idx(iana::DESTINATION_TRANSPORT_PORT),
    );
    assert_eq!(map.mirror(src_ip), dst_ip);
    assert_eq!(map.mirror(dst_ip), src_ip);
    assert_eq!(map.mirror(src_port), dst_port);
    assert_eq!(map.mirror(dst_port), src_port);
}

/// 목적지 포트가 없으면 biflow 테이블을 만들 수 없음
#[test]
fn test_biflow_without_destination_port_fails() {
    let rule = Rule::new(889)
        .biflow(true)
        .field(RuleField::keep(ie(iana::SOURCE_IPV4_ADDRESS, 4)))
        .field(RuleField::keep(ie(iana::DESTINATION_IPV4_ADDRESS, 4)))
        .field(RuleField::keep(ie(iana::SOURCE_TRANSPORT_PORT, 2)))
        .field(RuleField::keep(ie(iana::OCTET_DELTA_COUNT, 8)))
        .field(RuleField::keep(ie(iana::OCTET_DELTA_COUNT, 8).reversed()));

    let layout = synthesize(&rule).unwrap();
    assert!(matches!(
        ReverseMap::build(&layout.info),
        Err(AggregationError::BiflowKeyMissing { .. })
    ));

    let result = FlowHashtable::builder()
        .rule(rule)
        .sink(Arc::new(CountingSink::default()))
        .build();
    assert!(matches!(
        result,
        Err(FlowpostError::Aggregation(
            AggregationError::BiflowKeyMissing { .. }
        ))
    ));
}

/// frontPayloadLen만 있고 frontPayload가 없으면 합성 실패
#[test]
fn test_payload_length_without_payload_is_config_error() {
    let rule = scenario_rule().field(RuleField::keep(InformationElement::private(
        private::FRONT_PAYLOAD_LEN,
        4,
    )));
    assert!(matches!(
        synthesize(&rule),
        Err(AggregationError::MissingDependency { .. })
    ));
    let result = FlowHashtable::builder()
        .rule(rule)
        .sink(Arc::new(CountingSink::default()))
        .build();
    assert!(matches!(result, Err(FlowpostError::Aggregation(_))));
}

/// 재구성 전 강제 만료 후 테이블과 리스트가 모두 비어 있음
#[tokio::test]
async fn test_pre_reconfiguration_flushes_through_channel() {
    let config = AggregatorConfig {
        hashtable_bits: 6,
        ..AggregatorConfig::default()
    };
    let (table, mut rx) = FlowHashtable::from_config(&config, scenario_rule()).unwrap();
    let table = Arc::new(table);
    let agg = FlowAggregator::new(Arc::clone(&table));

    table.on_start().unwrap();
    for port in 0..20u16 {
        let rec = encode([10, 0, 0, 1], [10, 0, 0, 2], 1000 + port, 443, 64);
        agg.buffer_record(&rec, 0, 0, 0).unwrap();
    }
    assert_eq!(table.live_entries(), 20);

    table.on_pre_reconfiguration().unwrap();
    {
        let guard = table.lock();
        assert!(guard.is_empty());
        assert_eq!(guard.export_list_len(), 0);
        assert_eq!(guard.chained_len(), 0);
    }

    assert!(matches!(rx.recv().await, Some(FlowRecord::Template(_))));
    let mut data = 0;
    while let Ok(record) = rx.try_recv() {
        assert!(record.is_data());
        data += 1;
    }
    assert_eq!(data, 20);

    let stats = table.statistics(Duration::from_secs(1));
    assert_eq!(stats.live_entries, 0);
    assert_eq!(stats.empty_buckets, 64);
    assert_eq!(stats.records_received, 20);
}

/// 채널 용량보다 많은 버킷도 재구성 전 강제 만료에서 하나도 잃지 않음
#[test]
fn test_pre_reconfiguration_waits_for_slow_consumer() {
    let config = AggregatorConfig {
        hashtable_bits: 6,
        channel_capacity: 4,
        ..AggregatorConfig::default()
    };
    let (table, mut rx) = FlowHashtable::from_config(&config, scenario_rule()).unwrap();
    let table = Arc::new(table);
    let agg = FlowAggregator::new(Arc::clone(&table));

    let consumer = std::thread::spawn(move || {
        let mut octets = 0u64;
        let mut data = 0usize;
        while let Some(record) = rx.blocking_recv() {
            if let FlowRecord::Data { data: bytes, .. } = record {
                octets += u64::from_be_bytes(bytes[12..20].try_into().unwrap());
                data += 1;
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        (data, octets)
    });

    for port in 0..20u16 {
        let rec = encode([10, 0, 0, 1], [10, 0, 0, 2], 2000 + port, 443, 100);
        agg.buffer_record(&rec, 0, 0, 0).unwrap();
    }
    assert_eq!(table.live_entries(), 20);

    table.on_pre_reconfiguration().unwrap();
    assert_eq!(table.live_entries(), 0);
    assert!(table.health_check().is_healthy());

    drop(agg);
    drop(table);
    assert_eq!(consumer.join().unwrap(), (20, 2000));
}

/// 삽입 스레드와 만료 스레드가 동시에 돌아도 모든 버킷이 정확히 한 번 내보내짐
#[test]
fn test_concurrent_insert_and_expire() {
    let sink = Arc::new(CountingSink::default());
    let agg = Arc::new(FlowAggregator::new(table(scenario_rule(), sink.clone())));
    let clock = Arc::new(AtomicU64::new(0));
    let created = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let inserter = {
        let agg = Arc::clone(&agg);
        let clock = Arc::clone(&clock);
        let created = Arc::clone(&created);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            for i in 0..5_000u64 {
                let now = i * 2;
                clock.store(now, Ordering::SeqCst);
                // 키마다 1000번(2초) 동안만 패킷이 오고 이후에는 soft 마감으로 만료
                let port = ((i / 1000) * 10 + i % 7) as u16;
                let rec = encode([192, 168, 0, 1], [192, 168, 0, 2], port, 53, 1);
                let outcome = agg.buffer_record(&rec, 0, now, now).unwrap();
                if matches!(outcome, BufferOutcome::Created(_)) {
                    created.fetch_add(1, Ordering::SeqCst);
                }
            }
            done.store(1, Ordering::SeqCst);
        })
    };

    let evictor = {
        let agg = Arc::clone(&agg);
        let clock = Arc::clone(&clock);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut exported = 0;
            while done.load(Ordering::SeqCst) == 0 {
                exported += agg
                    .table()
                    .expire_flows_at(clock.load(Ordering::SeqCst), false);
                std::thread::yield_now();
            }
            exported
        })
    };

    inserter.join().unwrap();
    let scanned = evictor.join().unwrap();
    let flushed = agg.table().expire_flows_at(0, true);

    let created = created.load(Ordering::SeqCst);
    assert_eq!(scanned + flushed, created);
    assert_eq!(sink.data.load(Ordering::SeqCst), created);
    assert_eq!(agg.table().exported_total(), created as u64);
    assert!(agg.table().lock().is_empty());
}

/// 규칙 파일을 로드해 테이블을 만듦
#[tokio::test]
async fn test_rules_file_builds_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.toml");
    tokio::fs::write(
        &path,
        r#"
[[rule]]
id = 900
biflow_aggregation = true
hash_bits = 8

[[rule.field]]
id = 8
length = 4

[[rule.field]]
id = 12
length = 4

[[rule.field]]
id = 7
length = 2

[[rule.field]]
id = 11
length = 2

[[rule.field]]
id = 4
length = 1

[[rule.field]]
id = 2
length = 8
modifier = "aggregate"

[[rule.field]]
id = 2
enterprise = 29305
length = 8
modifier = "aggregate"
"#,
    )
    .await
    .unwrap();

    let rules = Rules::load(&path).await.unwrap();
    let rule = rules.get(900).cloned().expect("rule 900 must be present");
    let table = FlowHashtable::builder()
        .rule(rule)
        .sink(Arc::new(CountingSink::default()))
        .build()
        .unwrap();

    assert_eq!(table.hash_bits(), 8);
    assert!(table.reverse_map().is_some());
    assert_eq!(table.template().data_length, 4 + 4 + 2 + 2 + 1 + 8 + 8);
    assert!(table.health_check().is_healthy());
}

const CANDIDATES: [(u16, u16); 8] = [
    (iana::SOURCE_IPV4_ADDRESS, 4),
    (iana::DESTINATION_IPV4_ADDRESS, 4),
    (iana::SOURCE_TRANSPORT_PORT, 2),
    (iana::DESTINATION_TRANSPORT_PORT, 2),
    (iana::PROTOCOL_IDENTIFIER, 1),
    (iana::OCTET_DELTA_COUNT, 8),
    (iana::PACKET_DELTA_COUNT, 8),
    (iana::FLOW_END_REASON, 1),
];

proptest! {
    /// 같은 규칙은 항상 같은 레이아웃을 만들고, 오프셋은 가변 영역 안에서 겹치지 않음
    #[test]
    fn prop_template_is_deterministic(picks in prop::collection::vec((0usize..8, 0u8..3), 1..12)) {
        let mut rule = Rule::new(1000);
        for (i, kind) in picks {
            let (id, len) = CANDIDATES[i];
            let field = match kind {
                0 => RuleField::keep(ie(id, len)),
                1 => RuleField::discard(ie(id, len)),
                _ => RuleField::pattern(ie(id, len), vec![0xAB; usize::from(len)]),
            };
            rule = rule.field(field);
        }

        let a = synthesize(&rule).unwrap();
        let b = synthesize(&rule.clone()).unwrap();
        prop_assert_eq!(&a, &b);

        let info = &a.info;
        let mut end = 0;
        for f in &info.fields {
            prop_assert_eq!(f.offset, end);
            end += f.len();
        }
        prop_assert_eq!(end, info.data_length);
    }
}
