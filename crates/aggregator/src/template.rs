//! 템플릿 합성: [`Rule`]에서 [`TemplateInfo`] 레이아웃 생성
//!
//! # 합성 순서
//! ```text
//! Rule.fields ──┬── pattern 있음 ──▶ fixed_fields + fixed_data (버킷 저장 공간 없음)
//!               ├── Discard ───────▶ 건너뜀
//!               └── 그 외 ─────────▶ fields (다음 빈 오프셋)
//!
//! fields ──▶ private 오프셋 부여 (data_length 이후에 누적)
//!        ──▶ 의존 필드 연결 (frontPayloadLen → frontPayload 슬롯)
//! ```
//!
//! 같은 규칙에서는 항상 같은 레이아웃이 나옵니다.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::warn;

use flowpost_core::error::AggregationError;
use flowpost_core::ie::{InformationElement, PEN_FLOWPOST, PEN_REVERSE, private};
use flowpost_core::record::{FieldInfo, SetKind, TemplateInfo};

use crate::rule::{FieldModifier, Rule};

/// 프론트 페이로드 private 데이터: 시퀀스(u32), 바이트 카운터(u32), 상태 플래그(u32)
pub const PAYLOAD_PRIVATE_LENGTH: usize = 12;

/// DPA private 데이터: 역방향 시작 플래그, 데이터 수신 플래그
pub const DPA_PRIVATE_LENGTH: usize = 2;

/// 패킷 간격 private 데이터: 직전 플로우 종료 시각
pub const PACKET_GAP_PRIVATE_LENGTH: usize = 8;

/// 합성된 템플릿과 필드별 수정자
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLayout {
    /// 공유 레이아웃
    pub info: Arc<TemplateInfo>,
    /// `info.fields`와 같은 순서의 수정자
    pub modifiers: Vec<FieldModifier>,
}

/// 정보 요소에 필요한 private 데이터 길이
pub fn private_data_length(ie: &InformationElement) -> usize {
    if ie.base_enterprise() != PEN_FLOWPOST {
        return 0;
    }
    match ie.id {
        private::FRONT_PAYLOAD => PAYLOAD_PRIVATE_LENGTH,
        private::DPA_FORCED_EXPORT if !ie.is_reverse() => DPA_PRIVATE_LENGTH,
        private::MAX_PACKET_GAP => PACKET_GAP_PRIVATE_LENGTH,
        _ => 0,
    }
}

/// 규칙에서 레이아웃을 합성합니다.
///
/// # 에러
/// - `PatternLength`: 패턴 길이가 요소 길이와 다름
/// - `MissingDependency`: 다른 필드의 private 슬롯이 필요한데 기준 필드가 없음
///
/// 레지스트리에 없는 요소는 경고 후 제외합니다.
pub fn synthesize(rule: &Rule) -> Result<TemplateLayout, AggregationError> {
    let mut set_kind = if rule.preceding != 0 {
        SetKind::DataTemplate
    } else {
        SetKind::Template
    };

    let mut fields = Vec::new();
    let mut modifiers = Vec::new();
    let mut fixed_fields = Vec::new();
    let mut fixed_data = BytesMut::new();
    let mut data_length = 0usize;

    for rf in &rule.fields {
        if !rf.ie.is_known() {
            warn!(
                rule_id = rule.id,
                field = %rf.ie,
                "unknown information element in rule, dropping field"
            );
            continue;
        }

        if let Some(pattern) = &rf.pattern {
            if pattern.len() != usize::from(rf.ie.length) {
                return Err(AggregationError::PatternLength {
                    field: rf.ie.to_string(),
                    expected: usize::from(rf.ie.length),
                    actual: pattern.len(),
                });
            }
            set_kind = SetKind::DataTemplate;
            fixed_fields.push(FieldInfo {
                ie: rf.ie,
                offset: fixed_data.len(),
                private_offset: None,
            });
            fixed_data.extend_from_slice(pattern);
        } else if rf.modifier != FieldModifier::Discard {
            fields.push(FieldInfo {
                ie: rf.ie,
                offset: data_length,
                private_offset: None,
            });
            modifiers.push(rf.modifier);
            data_length += usize::from(rf.ie.length);
        }
    }

    let private_length = assign_private_offsets(&mut fields, data_length)?;

    let info = TemplateInfo {
        template_id: rule.id,
        preceding: rule.preceding,
        set_kind,
        fields,
        fixed_fields,
        fixed_data: fixed_data.freeze(),
        data_length,
        private_length,
    };

    Ok(TemplateLayout {
        info: Arc::new(info),
        modifiers,
    })
}

/// private 오프셋을 부여하고 private 영역 길이를 반환합니다.
fn assign_private_offsets(
    fields: &mut [FieldInfo],
    data_length: usize,
) -> Result<usize, AggregationError> {
    let mut private_length = 0usize;
    let mut payload_slot = None;
    let mut reverse_payload_slot = None;

    for fi in fields.iter_mut() {
        let len = private_data_length(&fi.ie);
        if len > 0 {
            fi.private_offset = Some(data_length + private_length);
            private_length += len;
        }
        if fi.ie.is(private::FRONT_PAYLOAD, PEN_FLOWPOST) {
            payload_slot = fi.private_offset;
        }
        if fi.ie.is(private::FRONT_PAYLOAD, PEN_FLOWPOST | PEN_REVERSE) {
            reverse_payload_slot = fi.private_offset;
        }
    }

    for fi in fields.iter_mut() {
        if fi.ie.base_enterprise() != PEN_FLOWPOST {
            continue;
        }
        let anchor = if fi.ie.is_reverse() {
            reverse_payload_slot
        } else {
            payload_slot
        };
        match fi.ie.id {
            private::FRONT_PAYLOAD_LEN => {
                fi.private_offset = Some(anchor.ok_or_else(|| missing_payload(&fi.ie))?);
            }
            private::FRONT_PAYLOAD_PKT_COUNT => {
                anchor.ok_or_else(|| missing_payload(&fi.ie))?;
            }
            _ => {}
        }
    }

    Ok(private_length)
}

fn missing_payload(ie: &InformationElement) -> AggregationError {
    let anchor = InformationElement::new(private::FRONT_PAYLOAD, ie.enterprise, 0);
    AggregationError::MissingDependency {
        field: ie.name().unwrap_or_else(|| ie.to_string()),
        requires: anchor.name().unwrap_or_else(|| anchor.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use flowpost_core::ie::iana;

    use super::*;
    use crate::rule::RuleField;

    fn five_tuple_rule() -> Rule {
        Rule::new(888)
            .field(RuleField::keep(InformationElement::iana(
                iana::SOURCE_IPV4_ADDRESS,
                4,
            )))
            .field(RuleField::keep(InformationElement::iana(
                iana::DESTINATION_IPV4_ADDRESS,
                4,
            )))
            .field(RuleField::keep(InformationElement::iana(
                iana::SOURCE_TRANSPORT_PORT,
                2,
            )))
            .field(RuleField::keep(InformationElement::iana(
                iana::DESTINATION_TRANSPORT_PORT,
                2,
            )))
            .field(RuleField::aggregate(InformationElement::iana(
                iana::OCTET_DELTA_COUNT,
                8,
            )))
    }

    #[test]
    fn variable_fields_are_packed_in_rule_order() {
        let layout = synthesize(&five_tuple_rule()).unwrap();
        let offsets: Vec<usize> = layout.info.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 10, 12]);
        assert_eq!(layout.info.data_length, 20);
        assert_eq!(layout.info.private_length, 0);
        assert_eq!(layout.info.set_kind, SetKind::Template);
        assert_eq!(layout.modifiers.len(), 5);
    }

    #[test]
    fn discard_and_unknown_fields_are_skipped() {
        let rule = five_tuple_rule()
            .field(RuleField::discard(InformationElement::iana(
                iana::PACKET_DELTA_COUNT,
                8,
            )))
            .field(RuleField::keep(InformationElement::new(4000, 0, 4)));
        let layout = synthesize(&rule).unwrap();
        assert_eq!(layout.info.fields.len(), 5);
        assert_eq!(layout.info.data_length, 20);
    }

    #[test]
    fn pattern_field_goes_to_fixed_data() {
        let rule = five_tuple_rule().field(RuleField::pattern(
            InformationElement::iana(iana::FLOW_END_REASON, 1),
            vec![3],
        ));
        let layout = synthesize(&rule).unwrap();
        assert_eq!(layout.info.set_kind, SetKind::DataTemplate);
        assert_eq!(layout.info.fixed_fields.len(), 1);
        assert_eq!(&layout.info.fixed_data[..], &[3]);
        // 고정 필드는 버킷 저장 공간을 쓰지 않음
        assert_eq!(layout.info.data_length, 20);
    }

    #[test]
    fn preceding_marks_data_template() {
        let layout = synthesize(&five_tuple_rule().preceding(42)).unwrap();
        assert_eq!(layout.info.set_kind, SetKind::DataTemplate);
        assert_eq!(layout.info.preceding, 42);
    }

    #[test]
    fn pattern_length_mismatch_is_rejected() {
        let rule = five_tuple_rule().field(RuleField::pattern(
            InformationElement::iana(iana::FLOW_END_REASON, 1),
            vec![3, 4],
        ));
        assert!(matches!(
            synthesize(&rule),
            Err(AggregationError::PatternLength { .. })
        ));
    }

    #[test]
    fn private_offsets_follow_variable_region() {
        let rule = five_tuple_rule()
            .field(RuleField::keep(InformationElement::private(
                private::FRONT_PAYLOAD,
                32,
            )))
            .field(RuleField::keep(InformationElement::private(
                private::FRONT_PAYLOAD_LEN,
                4,
            )))
            .field(RuleField::keep(InformationElement::private(
                private::MAX_PACKET_GAP,
                4,
            )));
        let layout = synthesize(&rule).unwrap();
        let info = &layout.info;
        assert_eq!(info.data_length, 20 + 32 + 4 + 4);
        assert_eq!(info.private_length, PAYLOAD_PRIVATE_LENGTH + PACKET_GAP_PRIVATE_LENGTH);

        let payload = info.field(private::FRONT_PAYLOAD, PEN_FLOWPOST).unwrap();
        let payload_len = info.field(private::FRONT_PAYLOAD_LEN, PEN_FLOWPOST).unwrap();
        let gap = info.field(private::MAX_PACKET_GAP, PEN_FLOWPOST).unwrap();
        assert_eq!(payload.private_offset, Some(60));
        assert_eq!(payload_len.private_offset, payload.private_offset);
        assert_eq!(gap.private_offset, Some(72));

        for fi in &info.fields {
            if let Some(off) = fi.private_offset {
                assert!(off >= info.data_length && off < info.record_length());
            }
        }
    }

    #[test]
    fn payload_length_without_payload_fails() {
        let rule = five_tuple_rule().field(RuleField::keep(InformationElement::private(
            private::FRONT_PAYLOAD_LEN,
            4,
        )));
        let err = synthesize(&rule).unwrap_err();
        assert!(matches!(err, AggregationError::MissingDependency { .. }));
        assert!(err.to_string().contains("frontPayloadLen"));
    }

    #[test]
    fn reverse_payload_length_needs_reverse_payload() {
        let rule = five_tuple_rule()
            .field(RuleField::keep(InformationElement::private(
                private::FRONT_PAYLOAD,
                16,
            )))
            .field(RuleField::keep(
                InformationElement::private(private::FRONT_PAYLOAD_LEN, 4).reversed(),
            ));
        assert!(matches!(
            synthesize(&rule),
            Err(AggregationError::MissingDependency { .. })
        ));
    }

    #[test]
    fn packet_count_requires_payload() {
        let rule = five_tuple_rule().field(RuleField::aggregate(InformationElement::private(
            private::FRONT_PAYLOAD_PKT_COUNT,
            4,
        )));
        assert!(synthesize(&rule).is_err());
    }
}
