#![no_main]

use std::sync::Arc;
use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use flowpost_aggregator::{FlowAggregator, FlowHashtable, Rule, RuleField};
use flowpost_core::error::FlowpostError;
use flowpost_core::ie::{InformationElement, iana};
use flowpost_core::pipeline::RecordSink;
use flowpost_core::record::{FieldInfo, FlowRecord, SetKind, TemplateInfo};

struct NullSink;

impl RecordSink for NullSink {
    fn send(&self, _record: FlowRecord) -> Result<(), FlowpostError> {
        Ok(())
    }
}

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    biflow: bool,
    ops: Vec<FuzzOp>,
}

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Record {
        bytes: Vec<u8>,
        domain: u8,
        start: u16,
        duration: u8,
    },
    DataRecord {
        lengths: [u8; 4],
        bytes: Vec<u8>,
    },
    Expire {
        now: u16,
    },
    Flush,
}

fn rule(biflow: bool) -> Rule {
    let ie = InformationElement::iana;
    let mut rule = Rule::new(256)
        .biflow(biflow)
        .hash_bits(4)
        .field(RuleField::keep(ie(iana::SOURCE_IPV4_ADDRESS, 4)))
        .field(RuleField::keep(ie(iana::DESTINATION_IPV4_ADDRESS, 4)))
        .field(RuleField::keep(ie(iana::SOURCE_TRANSPORT_PORT, 2)))
        .field(RuleField::keep(ie(iana::DESTINATION_TRANSPORT_PORT, 2)))
        .field(RuleField::aggregate(ie(iana::FLOW_START_MILLISECONDS, 8)))
        .field(RuleField::aggregate(ie(iana::FLOW_END_MILLISECONDS, 8)))
        .field(RuleField::aggregate(ie(iana::TCP_CONTROL_BITS, 1)))
        .field(RuleField::aggregate(ie(iana::OCTET_DELTA_COUNT, 8)));
    if biflow {
        rule = rule
            .field(RuleField::aggregate(ie(iana::FLOW_START_MILLISECONDS, 8).reversed()))
            .field(RuleField::aggregate(ie(iana::FLOW_END_MILLISECONDS, 8).reversed()))
            .field(RuleField::aggregate(ie(iana::TCP_CONTROL_BITS, 1).reversed()))
            .field(RuleField::aggregate(ie(iana::OCTET_DELTA_COUNT, 8).reversed()));
    }
    rule
}

/// 길이가 제각각인 입력 템플릿 (dport, sport, octets, src 순서)
fn input_template(lengths: [u8; 4]) -> TemplateInfo {
    let ids = [
        iana::DESTINATION_TRANSPORT_PORT,
        iana::SOURCE_TRANSPORT_PORT,
        iana::OCTET_DELTA_COUNT,
        iana::SOURCE_IPV4_ADDRESS,
    ];
    let mut offset = 0;
    let fields = ids
        .iter()
        .zip(lengths)
        .map(|(id, len)| {
            let len = u16::from(len % 9).max(1);
            let info = FieldInfo {
                ie: InformationElement::iana(*id, len),
                offset,
                private_offset: None,
            };
            offset += usize::from(len);
            info
        })
        .collect();
    TemplateInfo {
        template_id: 300,
        preceding: 0,
        set_kind: SetKind::Template,
        fields,
        fixed_fields: Vec::new(),
        fixed_data: Default::default(),
        data_length: offset,
        private_length: 0,
    }
}

fuzz_target!(|input: FuzzInput| {
    let rule = rule(input.biflow);
    let Ok(table) = FlowHashtable::builder()
        .rule(rule.clone())
        .min_buffer_time(Duration::from_millis(100))
        .max_buffer_time(Duration::from_millis(1_000))
        .guard_retry_interval(Duration::from_millis(1))
        .sink(Arc::new(NullSink))
        .build()
    else {
        return;
    };
    let agg = FlowAggregator::new(Arc::new(table));

    // 연산 수 제한 (성능)
    for op in input.ops.iter().take(256) {
        match op {
            FuzzOp::Record {
                bytes,
                domain,
                start,
                duration,
            } => {
                let start = u64::from(*start);
                let _ = agg.buffer_record(
                    bytes,
                    u32::from(*domain % 2),
                    start,
                    start + u64::from(*duration),
                );
            }
            FuzzOp::DataRecord { lengths, bytes } => {
                let input = input_template(*lengths);
                if rule.matches(&input, bytes) {
                    let _ = agg.buffer_data_record(&input, bytes, 0);
                }
            }
            FuzzOp::Expire { now } => {
                agg.table().expire_flows_at(u64::from(*now), false);
            }
            FuzzOp::Flush => {
                agg.table().expire_flows_at(0, true);
            }
        }
    }

    // 강제 만료 후에는 아무것도 남지 않아야 함
    agg.table().expire_flows_at(u64::MAX, true);
    assert_eq!(agg.table().live_entries(), 0);
});
