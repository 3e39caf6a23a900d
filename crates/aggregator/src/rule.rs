//! 집계 규칙: 템플릿 합성의 입력
//!
//! [`Rule`]은 해시 테이블 수명 동안 바뀌지 않는 선언적 입력입니다.
//! 코드에서 직접 만들거나 TOML 규칙 파일에서 로드합니다.
//!
//! # 규칙 파일 예시
//! ```toml
//! [[rule]]
//! id = 888
//! biflow_aggregation = true
//! hash_bits = 16
//!
//! [[rule.field]]
//! id = 8          # sourceIPv4Address
//! length = 4
//! modifier = "mask/24"
//!
//! [[rule.field]]
//! id = 1          # octetDeltaCount
//! length = 8
//! modifier = "aggregate"
//!
//! [[rule.field]]
//! id = 136        # flowEndReason (고정값)
//! length = 1
//! pattern = [3]
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use flowpost_core::ie::{InformationElement, iana};
use flowpost_core::record::TemplateInfo;

use crate::error::AggregatorError;
use crate::layout::{input_field, read_be};

/// 필드 수정자
///
/// 와이어 코드: `Discard` 0, `Keep` 1, `Aggregate` 2, `Mask(n)` 126 + n.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldModifier {
    /// 필드를 템플릿에서 제외
    Discard,
    /// 값을 그대로 유지 (키 필드)
    Keep,
    /// 집계 대상
    Aggregate,
    /// 상위 n 비트만 유지 (주소 마스킹)
    Mask(u8),
}

/// 마스크 코드 시작값
const MASK_START: u8 = 126;

/// 마스크 최대 비트 수
const MASK_MAX_BITS: u8 = 128;

impl FieldModifier {
    /// 와이어 코드로 변환합니다.
    pub fn code(&self) -> u8 {
        match self {
            Self::Discard => 0,
            Self::Keep => 1,
            Self::Aggregate => 2,
            Self::Mask(bits) => MASK_START + (*bits).min(MASK_MAX_BITS),
        }
    }

    /// 와이어 코드에서 복원합니다.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Discard),
            1 => Some(Self::Keep),
            2 => Some(Self::Aggregate),
            c if (MASK_START..=MASK_START + MASK_MAX_BITS).contains(&c) => {
                Some(Self::Mask(c - MASK_START))
            }
            _ => None,
        }
    }
}

impl fmt::Display for FieldModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discard => f.write_str("discard"),
            Self::Keep => f.write_str("keep"),
            Self::Aggregate => f.write_str("aggregate"),
            Self::Mask(bits) => write!(f, "mask/{bits}"),
        }
    }
}

impl TryFrom<String> for FieldModifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "keep" => Ok(Self::Keep),
            "aggregate" => Ok(Self::Aggregate),
            other => other
                .strip_prefix("mask/")
                .and_then(|bits| bits.parse::<u8>().ok())
                .filter(|bits| *bits <= MASK_MAX_BITS)
                .map(Self::Mask)
                .ok_or_else(|| format!("unknown field modifier '{value}'")),
        }
    }
}

impl From<FieldModifier> for String {
    fn from(value: FieldModifier) -> Self {
        value.to_string()
    }
}

/// 규칙의 필드 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawField", into = "RawField")]
pub struct RuleField {
    /// 필드 타입
    pub ie: InformationElement,
    /// 수정자
    pub modifier: FieldModifier,
    /// 고정 패턴 (있으면 고정 데이터 필드)
    pub pattern: Option<Vec<u8>>,
}

impl RuleField {
    /// 값을 유지하는 필드
    pub fn keep(ie: InformationElement) -> Self {
        Self {
            ie,
            modifier: FieldModifier::Keep,
            pattern: None,
        }
    }

    /// 집계되는 필드
    pub fn aggregate(ie: InformationElement) -> Self {
        Self {
            ie,
            modifier: FieldModifier::Aggregate,
            pattern: None,
        }
    }

    /// 제외되는 필드
    pub fn discard(ie: InformationElement) -> Self {
        Self {
            ie,
            modifier: FieldModifier::Discard,
            pattern: None,
        }
    }

    /// 고정 패턴 필드
    pub fn pattern(ie: InformationElement, pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            ie,
            modifier: FieldModifier::Keep,
            pattern: Some(pattern.into()),
        }
    }

    /// 수정자를 바꿉니다.
    pub fn with_modifier(mut self, modifier: FieldModifier) -> Self {
        self.modifier = modifier;
        self
    }

    /// 입력 값이 패턴과 일치하는지 확인합니다.
    ///
    /// IPv4 주소는 접두사 비교 (`Mask(n)`이면 n 비트, 아니면 패턴 전체),
    /// 길이가 같으면 바이트 비교, 8바이트 이하 정수는 축약 인코딩을 허용합니다.
    pub fn matches_pattern(&self, value: &[u8], pattern: &[u8]) -> bool {
        let is_address = self.ie.enterprise == 0
            && matches!(
                self.ie.id,
                iana::SOURCE_IPV4_ADDRESS | iana::DESTINATION_IPV4_ADDRESS
            );
        if is_address {
            let bits = match self.modifier {
                FieldModifier::Mask(bits) => usize::from(bits),
                _ => pattern.len() * 8,
            };
            return prefix_matches(value, pattern, bits);
        }

        if value.len() == pattern.len() {
            return value == pattern;
        }
        value.len() <= 8 && pattern.len() <= 8 && read_be(value) == read_be(pattern)
    }
}

/// 상위 `bits` 비트가 같은지 비교합니다.
fn prefix_matches(value: &[u8], pattern: &[u8], bits: usize) -> bool {
    let bits = bits.min(value.len() * 8).min(pattern.len() * 8);
    let whole = bits / 8;
    if value[..whole] != pattern[..whole] {
        return false;
    }
    let rest = bits % 8;
    if rest == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rest);
    value[whole] & mask == pattern[whole] & mask
}

#[derive(Serialize, Deserialize)]
struct RawField {
    id: u16,
    #[serde(default)]
    enterprise: u32,
    length: u16,
    #[serde(default = "default_modifier")]
    modifier: FieldModifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<Vec<u8>>,
}

fn default_modifier() -> FieldModifier {
    FieldModifier::Keep
}

impl From<RawField> for RuleField {
    fn from(raw: RawField) -> Self {
        Self {
            ie: InformationElement::new(raw.id, raw.enterprise, raw.length),
            modifier: raw.modifier,
            pattern: raw.pattern,
        }
    }
}

impl From<RuleField> for RawField {
    fn from(field: RuleField) -> Self {
        Self {
            id: field.ie.id,
            enterprise: field.ie.enterprise,
            length: field.ie.length,
            modifier: field.modifier,
            pattern: field.pattern,
        }
    }
}

/// 집계 규칙
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// 템플릿 ID
    pub id: u16,
    /// 선행 템플릿 ID (0이면 없음)
    #[serde(default)]
    pub preceding: u16,
    /// 양방향 플로우 병합 여부
    #[serde(default)]
    pub biflow_aggregation: bool,
    /// 해시 테이블 비트 수 (없으면 설정값 사용)
    #[serde(default)]
    pub hash_bits: Option<u8>,
    /// 필드 목록 (순서 유지)
    #[serde(default, rename = "field")]
    pub fields: Vec<RuleField>,
}

impl Rule {
    /// 빈 규칙을 생성합니다.
    pub fn new(id: u16) -> Self {
        Self {
            id,
            preceding: 0,
            biflow_aggregation: false,
            hash_bits: None,
            fields: Vec::new(),
        }
    }

    /// 필드를 추가합니다.
    pub fn field(mut self, field: RuleField) -> Self {
        self.fields.push(field);
        self
    }

    /// biflow 집계를 설정합니다.
    pub fn biflow(mut self, enabled: bool) -> Self {
        self.biflow_aggregation = enabled;
        self
    }

    /// 선행 템플릿 ID를 설정합니다.
    pub fn preceding(mut self, preceding: u16) -> Self {
        self.preceding = preceding;
        self
    }

    /// 해시 테이블 비트 수를 설정합니다.
    pub fn hash_bits(mut self, bits: u8) -> Self {
        self.hash_bits = Some(bits);
        self
    }

    /// 규칙을 검증합니다.
    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.fields.is_empty() {
            return Err(AggregatorError::RuleValidation {
                rule_id: self.id,
                reason: "rule has no fields".to_owned(),
            });
        }

        if let Some(bits) = self.hash_bits
            && !(1..=flowpost_core::config::MAX_HASHTABLE_BITS).contains(&bits)
        {
            return Err(AggregatorError::RuleValidation {
                rule_id: self.id,
                reason: format!("hash_bits {bits} out of range"),
            });
        }

        for field in &self.fields {
            if field.ie.length == 0 {
                return Err(AggregatorError::RuleValidation {
                    rule_id: self.id,
                    reason: format!("field {} has zero length", field.ie),
                });
            }
        }

        Ok(())
    }

    /// 입력 레코드가 이 규칙에 해당하는지 확인합니다.
    ///
    /// - 패턴 필드: 입력에 같은 타입의 필드가 있고 값이 패턴과 일치해야 함
    /// - 패턴 없는 `Discard` 필드: 검사하지 않음
    /// - 그 외 필드: 입력에 있어야 함 (biflow 규칙은 역방향 필드도 인정)
    ///
    /// 역방향 규칙 필드는 건너뜁니다.
    pub fn matches(&self, input: &TemplateInfo, record: &[u8]) -> bool {
        self.fields.iter().filter(|f| !f.ie.is_reverse()).all(|field| {
            if let Some(pattern) = &field.pattern {
                return input_field(input, record, &field.ie)
                    .is_some_and(|value| field.matches_pattern(value, pattern));
            }
            if field.modifier == FieldModifier::Discard {
                return true;
            }
            input_field(input, record, &field.ie).is_some()
                || (self.biflow_aggregation
                    && input_field(input, record, &field.ie.reversed()).is_some())
        })
    }
}

/// 규칙 파일 (`[[rule]]` 테이블 목록)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rules {
    /// 규칙 목록
    #[serde(default, rename = "rule")]
    pub rules: Vec<Rule>,
}

impl Rules {
    /// TOML 문자열에서 규칙을 파싱하고 검증합니다.
    pub fn parse(toml_str: &str) -> Result<Self, AggregatorError> {
        let rules: Self = toml::from_str(toml_str).map_err(|e| AggregatorError::RuleLoad {
            path: "<inline>".to_owned(),
            reason: e.to_string(),
        })?;
        for rule in &rules.rules {
            rule.validate()?;
        }
        Ok(rules)
    }

    /// 규칙 파일을 로드합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AggregatorError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AggregatorError::RuleLoad {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::parse(&content).map_err(|e| match e {
            AggregatorError::RuleLoad { reason, .. } => AggregatorError::RuleLoad {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// ID로 규칙을 찾습니다.
    pub fn get(&self, id: u16) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }
}
