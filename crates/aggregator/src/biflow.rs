//! Biflow 폴딩: 양방향 플로우를 한 레코드로 병합하기 위한 필드 대응표
//!
//! [`ReverseMap`]은 템플릿에서 한 번 만들어지며 두 가지 대응을 가집니다:
//!
//! - `mirror`: 레코드 방향을 뒤집을 때 값을 맞바꿀 필드 (대칭, 두 번 적용하면 원래대로)
//!   - 방향이 없는 필드 (protocolIdentifier, icmpTypeCode, DPA 필드) → 자기 자신
//!   - source ↔ destination (IPv4 주소, 포트, AS 번호)
//!   - 그 외 → enterprise 역방향 비트를 뒤집은 필드
//! - `key_mirror`: 역방향 키 조회용. source ↔ destination만 바꾸고 나머지는 그대로
//!
//! ```text
//! 필드:   srcIP  dstIP  srcPort  dstPort  octets  revOctets
//! mirror:   1      0       3        2        5        4
//! key:      1      0       3        2        4        5
//! ```

use flowpost_core::error::AggregationError;
use flowpost_core::ie::{InformationElement, PEN_FLOWPOST, iana, private};
use flowpost_core::record::TemplateInfo;

/// source/destination 쌍
const DIRECTIONAL_PAIRS: [(u16, u16); 3] = [
    (iana::SOURCE_IPV4_ADDRESS, iana::DESTINATION_IPV4_ADDRESS),
    (iana::SOURCE_TRANSPORT_PORT, iana::DESTINATION_TRANSPORT_PORT),
    (iana::BGP_SOURCE_AS_NUMBER, iana::BGP_DESTINATION_AS_NUMBER),
];

/// biflow 키를 구성하는 필수 필드
const REQUIRED_KEY_FIELDS: [u16; 4] = [
    iana::SOURCE_IPV4_ADDRESS,
    iana::DESTINATION_IPV4_ADDRESS,
    iana::SOURCE_TRANSPORT_PORT,
    iana::DESTINATION_TRANSPORT_PORT,
];

fn is_direction_free(ie: &InformationElement) -> bool {
    match ie.enterprise {
        0 => matches!(
            ie.id,
            iana::PROTOCOL_IDENTIFIER | iana::ICMP_TYPE_CODE_IPV4
        ),
        PEN_FLOWPOST => matches!(
            ie.id,
            private::DPA_FORCED_EXPORT | private::DPA_FLOW_COUNT | private::DPA_REVERSE_START
        ),
        _ => false,
    }
}

fn counterpart(ie: &InformationElement) -> Option<u16> {
    if ie.enterprise != 0 {
        return None;
    }
    DIRECTIONAL_PAIRS.iter().find_map(|&(src, dst)| {
        if ie.id == src {
            Some(dst)
        } else if ie.id == dst {
            Some(src)
        } else {
            None
        }
    })
}

fn display_name(ie: &InformationElement) -> String {
    ie.name().unwrap_or_else(|| ie.to_string())
}

/// 역방향 필드 대응표
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseMap {
    mirror: Vec<usize>,
    key_mirror: Vec<usize>,
}

impl ReverseMap {
    /// 템플릿에서 대응표를 만듭니다.
    ///
    /// # 에러
    /// - `BiflowKeyMissing`: IPv4 주소/포트 중 하나라도 없음
    /// - `ReverseFieldMissing`: 방향이 있는 필드의 짝이 템플릿에 없음
    /// - `ReverseLengthMismatch`: 짝의 길이가 다름
    pub fn build(template: &TemplateInfo) -> Result<Self, AggregationError> {
        for id in REQUIRED_KEY_FIELDS {
            if template.field_index(id, 0).is_none() {
                let ie = InformationElement::iana(id, 0);
                return Err(AggregationError::BiflowKeyMissing {
                    field: display_name(&ie),
                });
            }
        }

        let fields = &template.fields;
        let mut mirror = Vec::with_capacity(fields.len());
        let mut key_mirror = Vec::with_capacity(fields.len());

        for (i, fi) in fields.iter().enumerate() {
            let partner = if is_direction_free(&fi.ie) {
                i
            } else if let Some(other) = counterpart(&fi.ie) {
                let j = template.field_index(other, 0).ok_or_else(|| {
                    AggregationError::ReverseFieldMissing {
                        field: display_name(&fi.ie),
                        reverse: display_name(&InformationElement::iana(other, fi.ie.length)),
                    }
                })?;
                key_mirror.push(j);
                mirror.push(j);
                check_length(template, i, j)?;
                continue;
            } else {
                let reversed = fi.ie.reversed();
                match template.field_index(reversed.id, reversed.enterprise) {
                    Some(j) => j,
                    // 정방향 짝이 없는 역방향 필드는 그대로 둠
                    None if fi.ie.is_reverse() => i,
                    None => {
                        return Err(AggregationError::ReverseFieldMissing {
                            field: display_name(&fi.ie),
                            reverse: display_name(&reversed),
                        });
                    }
                }
            };
            check_length(template, i, partner)?;
            mirror.push(partner);
            key_mirror.push(i);
        }

        Ok(Self { mirror, key_mirror })
    }

    /// 방향을 뒤집을 때 i번째 필드와 값을 맞바꾸는 필드
    ///
    /// 역방향 레코드를 병합할 때도 같은 대응을 씁니다. 입력의 정방향 값은 버킷의
    /// 역방향 필드로, 역방향 값은 정방향 필드로 갑니다.
    pub fn mirror(&self, index: usize) -> usize {
        self.mirror[index]
    }

    /// 역방향 키 조회 시 i번째 키 필드에 대응하는 필드
    pub fn key_mirror(&self, index: usize) -> usize {
        self.key_mirror[index]
    }

    /// 필드 수
    pub fn len(&self) -> usize {
        self.mirror.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.mirror.is_empty()
    }

    /// 레코드의 방향을 제자리에서 뒤집습니다.
    ///
    /// 각 쌍은 `i < j`일 때 한 번만 교환되므로 두 번 적용하면 원래 바이트로 돌아옵니다.
    pub fn reverse_record(&self, template: &TemplateInfo, data: &mut [u8]) {
        for (i, &j) in self.mirror.iter().enumerate() {
            if i >= j || self.mirror[j] != i {
                continue;
            }
            let a = template.fields[i].range();
            let b = template.fields[j].range();
            swap_regions(data, a, b);
        }
    }
}

fn check_length(template: &TemplateInfo, i: usize, j: usize) -> Result<(), AggregationError> {
    let a = &template.fields[i].ie;
    let b = &template.fields[j].ie;
    if a.length != b.length {
        return Err(AggregationError::ReverseLengthMismatch {
            field: display_name(a),
            length: a.length,
            reverse: display_name(b),
            reverse_length: b.length,
        });
    }
    Ok(())
}

/// 겹치지 않는 같은 길이의 두 구간을 맞바꿉니다.
fn swap_regions(data: &mut [u8], a: std::ops::Range<usize>, b: std::ops::Range<usize>) {
    let (first, second) = if a.start < b.start { (a, b) } else { (b, a) };
    assert!(
        first.end <= second.start && second.end <= data.len(),
        "overlapping or out-of-bounds swap {first:?} / {second:?}"
    );
    let (head, tail) = data.split_at_mut(second.start);
    head[first].swap_with_slice(&mut tail[..second.end - second.start]);
}
