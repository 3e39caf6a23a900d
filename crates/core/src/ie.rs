//! 정보 요소(Information Element): 필드 식별자와 레지스트리
//!
//! [`InformationElement`]는 `(id, enterprise, length)` 세 값으로 필드 타입을 식별합니다.
//! IANA 요소는 enterprise 0, 역방향(reverse) 요소는 enterprise 비트 [`PEN_REVERSE`]로 표시합니다.
//!
//! # 역방향 매핑
//! ```text
//! octetDeltaCount        (id 1, enterprise 0)
//!        │ reversed()
//!        ▼
//! reverseOctetDeltaCount (id 1, enterprise 29305)
//!
//! frontPayload           (id 1, enterprise 0x77700000)
//!        │ reversed()
//!        ▼
//! reverseFrontPayload    (id 1, enterprise 0x77707279)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// 역방향 요소 enterprise 번호 (RFC 5103)
pub const PEN_REVERSE: u32 = 29305;

/// 집계 엔진 전용 요소의 enterprise 번호
pub const PEN_FLOWPOST: u32 = 0x7770_0000;

/// IANA 정보 요소 ID
pub mod iana {
    pub const OCTET_DELTA_COUNT: u16 = 1;
    pub const PACKET_DELTA_COUNT: u16 = 2;
    pub const PROTOCOL_IDENTIFIER: u16 = 4;
    pub const IP_CLASS_OF_SERVICE: u16 = 5;
    pub const TCP_CONTROL_BITS: u16 = 6;
    pub const SOURCE_TRANSPORT_PORT: u16 = 7;
    pub const SOURCE_IPV4_ADDRESS: u16 = 8;
    pub const INGRESS_INTERFACE: u16 = 10;
    pub const DESTINATION_TRANSPORT_PORT: u16 = 11;
    pub const DESTINATION_IPV4_ADDRESS: u16 = 12;
    pub const EGRESS_INTERFACE: u16 = 14;
    pub const BGP_SOURCE_AS_NUMBER: u16 = 16;
    pub const BGP_DESTINATION_AS_NUMBER: u16 = 17;
    pub const FLOW_END_SYS_UP_TIME: u16 = 21;
    pub const FLOW_START_SYS_UP_TIME: u16 = 22;
    pub const POST_OCTET_DELTA_COUNT: u16 = 23;
    pub const POST_PACKET_DELTA_COUNT: u16 = 24;
    pub const ICMP_TYPE_CODE_IPV4: u16 = 32;
    pub const OCTET_TOTAL_COUNT: u16 = 85;
    pub const PACKET_TOTAL_COUNT: u16 = 86;
    pub const DROPPED_OCTET_DELTA_COUNT: u16 = 132;
    pub const DROPPED_PACKET_DELTA_COUNT: u16 = 133;
    pub const FLOW_END_REASON: u16 = 136;
    pub const FLOW_START_SECONDS: u16 = 150;
    pub const FLOW_END_SECONDS: u16 = 151;
    pub const FLOW_START_MILLISECONDS: u16 = 152;
    pub const FLOW_END_MILLISECONDS: u16 = 153;
    pub const FLOW_START_MICROSECONDS: u16 = 154;
    pub const FLOW_END_MICROSECONDS: u16 = 155;
    pub const FLOW_START_NANOSECONDS: u16 = 156;
    pub const FLOW_END_NANOSECONDS: u16 = 157;
}

/// [`PEN_FLOWPOST`] 소속 정보 요소 ID
pub mod private {
    pub const FRONT_PAYLOAD: u16 = 1;
    pub const FRONT_PAYLOAD_LEN: u16 = 2;
    pub const MAX_PACKET_GAP: u16 = 3;
    pub const FRONT_PAYLOAD_PKT_COUNT: u16 = 4;
    pub const DPA_FLOW_COUNT: u16 = 5;
    pub const DPA_FORCED_EXPORT: u16 = 6;
    pub const DPA_REVERSE_START: u16 = 7;
    pub const TRANSPORT_OCTET_DELTA_COUNT: u16 = 8;
}

/// 레지스트리 항목
struct ElementSpec {
    id: u16,
    enterprise: u32,
    name: &'static str,
    aggregatable: bool,
}

const fn spec(id: u16, enterprise: u32, name: &'static str, aggregatable: bool) -> ElementSpec {
    ElementSpec {
        id,
        enterprise,
        name,
        aggregatable,
    }
}

/// 엔진이 이해하는 정보 요소 목록 (정방향 기준)
static REGISTRY: &[ElementSpec] = &[
    spec(iana::OCTET_DELTA_COUNT, 0, "octetDeltaCount", true),
    spec(iana::PACKET_DELTA_COUNT, 0, "packetDeltaCount", true),
    spec(iana::PROTOCOL_IDENTIFIER, 0, "protocolIdentifier", false),
    spec(iana::IP_CLASS_OF_SERVICE, 0, "ipClassOfService", false),
    spec(iana::TCP_CONTROL_BITS, 0, "tcpControlBits", true),
    spec(iana::SOURCE_TRANSPORT_PORT, 0, "sourceTransportPort", false),
    spec(iana::SOURCE_IPV4_ADDRESS, 0, "sourceIPv4Address", false),
    spec(iana::INGRESS_INTERFACE, 0, "ingressInterface", false),
    spec(iana::DESTINATION_TRANSPORT_PORT, 0, "destinationTransportPort", false),
    spec(iana::DESTINATION_IPV4_ADDRESS, 0, "destinationIPv4Address", false),
    spec(iana::EGRESS_INTERFACE, 0, "egressInterface", false),
    spec(iana::BGP_SOURCE_AS_NUMBER, 0, "bgpSourceAsNumber", false),
    spec(iana::BGP_DESTINATION_AS_NUMBER, 0, "bgpDestinationAsNumber", false),
    spec(iana::FLOW_END_SYS_UP_TIME, 0, "flowEndSysUpTime", true),
    spec(iana::FLOW_START_SYS_UP_TIME, 0, "flowStartSysUpTime", true),
    spec(iana::POST_OCTET_DELTA_COUNT, 0, "postOctetDeltaCount", true),
    spec(iana::POST_PACKET_DELTA_COUNT, 0, "postPacketDeltaCount", true),
    spec(iana::ICMP_TYPE_CODE_IPV4, 0, "icmpTypeCodeIPv4", false),
    spec(iana::OCTET_TOTAL_COUNT, 0, "octetTotalCount", true),
    spec(iana::PACKET_TOTAL_COUNT, 0, "packetTotalCount", true),
    spec(iana::DROPPED_OCTET_DELTA_COUNT, 0, "droppedOctetDeltaCount", true),
    spec(iana::DROPPED_PACKET_DELTA_COUNT, 0, "droppedPacketDeltaCount", true),
    spec(iana::FLOW_END_REASON, 0, "flowEndReason", false),
    spec(iana::FLOW_START_SECONDS, 0, "flowStartSeconds", true),
    spec(iana::FLOW_END_SECONDS, 0, "flowEndSeconds", true),
    spec(iana::FLOW_START_MILLISECONDS, 0, "flowStartMilliseconds", true),
    spec(iana::FLOW_END_MILLISECONDS, 0, "flowEndMilliseconds", true),
    spec(iana::FLOW_START_MICROSECONDS, 0, "flowStartMicroseconds", true),
    spec(iana::FLOW_END_MICROSECONDS, 0, "flowEndMicroseconds", true),
    spec(iana::FLOW_START_NANOSECONDS, 0, "flowStartNanoseconds", true),
    spec(iana::FLOW_END_NANOSECONDS, 0, "flowEndNanoseconds", true),
    spec(private::FRONT_PAYLOAD, PEN_FLOWPOST, "frontPayload", true),
    spec(private::FRONT_PAYLOAD_LEN, PEN_FLOWPOST, "frontPayloadLen", true),
    spec(private::MAX_PACKET_GAP, PEN_FLOWPOST, "maxPacketGap", true),
    spec(private::FRONT_PAYLOAD_PKT_COUNT, PEN_FLOWPOST, "frontPayloadPktCount", true),
    spec(private::DPA_FLOW_COUNT, PEN_FLOWPOST, "dpaFlowCount", false),
    spec(private::DPA_FORCED_EXPORT, PEN_FLOWPOST, "dpaForcedExport", false),
    spec(private::DPA_REVERSE_START, PEN_FLOWPOST, "dpaReverseStart", false),
    spec(
        private::TRANSPORT_OCTET_DELTA_COUNT,
        PEN_FLOWPOST,
        "transportOctetDeltaCount",
        true,
    ),
];

/// 정보 요소 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InformationElement {
    /// 요소 ID
    pub id: u16,
    /// enterprise 번호 (IANA = 0)
    #[serde(default)]
    pub enterprise: u32,
    /// 바이트 길이
    pub length: u16,
}

impl InformationElement {
    /// 새 정보 요소를 생성합니다.
    pub const fn new(id: u16, enterprise: u32, length: u16) -> Self {
        Self {
            id,
            enterprise,
            length,
        }
    }

    /// IANA 정보 요소를 생성합니다.
    pub const fn iana(id: u16, length: u16) -> Self {
        Self::new(id, 0, length)
    }

    /// [`PEN_FLOWPOST`] 소속 정보 요소를 생성합니다.
    pub const fn private(id: u16, length: u16) -> Self {
        Self::new(id, PEN_FLOWPOST, length)
    }

    /// 역방향 요소인지 확인합니다.
    pub fn is_reverse(&self) -> bool {
        self.enterprise == PEN_REVERSE || self.enterprise == PEN_FLOWPOST | PEN_REVERSE
    }

    /// 역방향 비트를 제거한 enterprise 번호
    pub fn base_enterprise(&self) -> u32 {
        if self.is_reverse() {
            self.enterprise ^ PEN_REVERSE
        } else {
            self.enterprise
        }
    }

    /// 방향을 뒤집은 요소를 반환합니다. 두 번 적용하면 원래 요소가 됩니다.
    pub fn reversed(&self) -> Self {
        let enterprise = match self.base_enterprise() {
            0 | PEN_FLOWPOST => self.enterprise ^ PEN_REVERSE,
            _ => self.enterprise,
        };
        Self { enterprise, ..*self }
    }

    /// 같은 타입인지 확인합니다 (길이 무시).
    pub fn same_type(&self, other: &Self) -> bool {
        self.id == other.id && self.enterprise == other.enterprise
    }

    /// 타입 비교 헬퍼
    pub fn is(&self, id: u16, enterprise: u32) -> bool {
        self.id == id && self.enterprise == enterprise
    }

    /// 레지스트리에 등록된 요소인지 확인합니다.
    pub fn is_known(&self) -> bool {
        self.lookup().is_some()
    }

    /// 집계 대상 필드인지 확인합니다.
    ///
    /// 집계 대상이 아닌 필드는 모두 플로우 키를 구성합니다.
    pub fn is_aggregatable(&self) -> bool {
        self.lookup().is_some_and(|s| s.aggregatable)
    }

    /// 레지스트리 이름 (역방향이면 `reverse` 접두어)
    pub fn name(&self) -> Option<String> {
        self.lookup().map(|s| {
            if self.is_reverse() {
                let mut chars = s.name.chars();
                let first = chars.next().map(|c| c.to_ascii_uppercase());
                format!("reverse{}{}", first.unwrap_or_default(), chars.as_str())
            } else {
                s.name.to_owned()
            }
        })
    }

    fn lookup(&self) -> Option<&'static ElementSpec> {
        let base = self.base_enterprise();
        REGISTRY
            .iter()
            .find(|s| s.id == self.id && s.enterprise == base)
    }
}

impl fmt::Display for InformationElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}[{}]", name, self.length),
            None => write!(f, "ie({}/{})[{}]", self.id, self.enterprise, self.length),
        }
    }
}
