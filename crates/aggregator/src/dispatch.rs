//! 규칙 디스패처: 입력 레코드를 일치하는 규칙의 테이블로 보냄
//!
//! 규칙마다 [`FlowHashtable`] 하나를 두고, 데이터 레코드가 들어오면 모든 규칙을
//! 순서대로 평가합니다. 한 레코드가 여러 규칙과 일치하면 각 테이블에 따로
//! 버퍼링됩니다. 모든 테이블은 하나의 레코드 채널을 공유합니다.
//!
//! ```text
//! (TemplateInfo, record) ──▶ Rule::matches ──┬── rule 256 ──▶ table 256 ──┐
//!                                            ├── rule 257 ──▶ table 257 ──┼──▶ mpsc
//!                                            └── (불일치) ──▶ 무시         │
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, trace};

use flowpost_core::config::AggregatorConfig;
use flowpost_core::error::{AggregationError, ConfigError, FlowpostError};
use flowpost_core::pipeline::{HealthStatus, Lifecycle, RecordSink};
use flowpost_core::record::{FlowRecord, TemplateInfo};

use crate::aggregate::{BufferOutcome, FlowAggregator};
use crate::hashtable::FlowHashtable;
use crate::rule::{Rule, Rules};

/// 규칙 하나와 그 테이블
#[derive(Debug)]
struct RuleEntry {
    rule: Rule,
    aggregator: FlowAggregator,
}

/// 규칙 집합 단위의 집계기
#[derive(Debug)]
pub struct RuleDispatcher {
    entries: Vec<RuleEntry>,
}

impl RuleDispatcher {
    /// 규칙마다 테이블을 만들고 공유 레코드 채널을 반환합니다.
    ///
    /// # 에러
    /// - `ConfigError`: 설정 또는 규칙 검증 실패
    /// - `FlowpostError::Aggregation`: 레이아웃 합성 실패
    pub fn from_config(
        config: &AggregatorConfig,
        rules: &Rules,
    ) -> Result<(Self, mpsc::Receiver<FlowRecord>), FlowpostError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let sink: Arc<dyn RecordSink> = Arc::new(tx);

        let entries = rules
            .rules
            .iter()
            .map(|rule| {
                let table = FlowHashtable::builder()
                    .rule(rule.clone())
                    .with_config(config)
                    .sink(Arc::clone(&sink))
                    .build()?;
                Ok(RuleEntry {
                    rule: rule.clone(),
                    aggregator: FlowAggregator::new(Arc::new(table)),
                })
            })
            .collect::<Result<Vec<_>, FlowpostError>>()?;

        info!(rules = entries.len(), "rule dispatcher ready");
        Ok((Self { entries }, rx))
    }

    /// 설정의 `rules_path`에서 규칙을 로드해 디스패처를 만듭니다.
    pub async fn load(
        config: &AggregatorConfig,
    ) -> Result<(Self, mpsc::Receiver<FlowRecord>), FlowpostError> {
        if config.rules_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "rules_path".to_owned(),
                reason: "no rules file configured".to_owned(),
            }
            .into());
        }
        let rules = Rules::load(&config.rules_path).await?;
        Self::from_config(config, &rules)
    }

    /// 데이터 레코드를 일치하는 모든 규칙의 테이블에 버퍼링합니다.
    ///
    /// 일치한 규칙의 템플릿 ID와 결과를 규칙 순서대로 반환합니다.
    /// 아무 규칙과도 일치하지 않으면 빈 목록입니다.
    pub fn on_data_record(
        &self,
        input: &TemplateInfo,
        record: &[u8],
        observation_domain_id: u32,
    ) -> Result<Vec<(u16, BufferOutcome)>, AggregationError> {
        let mut outcomes = Vec::new();
        for entry in &self.entries {
            if !entry.rule.matches(input, record) {
                continue;
            }
            let outcome =
                entry
                    .aggregator
                    .buffer_data_record(input, record, observation_domain_id)?;
            outcomes.push((entry.rule.id, outcome));
        }
        if outcomes.is_empty() {
            trace!(
                template_id = input.template_id,
                "data record matched no rule"
            );
        }
        Ok(outcomes)
    }

    /// 규칙 순서대로 테이블을 반환합니다.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<FlowHashtable>> {
        self.entries.iter().map(|e| e.aggregator.table())
    }

    /// 템플릿 ID로 테이블을 찾습니다.
    pub fn table(&self, template_id: u16) -> Option<&Arc<FlowHashtable>> {
        self.entries
            .iter()
            .find(|e| e.rule.id == template_id)
            .map(|e| e.aggregator.table())
    }

    /// 모든 테이블을 스캔하고 내보낸 레코드 수의 합을 반환합니다.
    pub fn expire_flows(&self, force_all: bool) -> usize {
        self.tables().map(|t| t.expire_flows(force_all)).sum()
    }

    /// 규칙 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 규칙이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Lifecycle for RuleDispatcher {
    fn on_start(&self) -> Result<(), FlowpostError> {
        self.tables().try_for_each(|t| t.on_start())
    }

    fn on_pre_reconfiguration(&self) -> Result<(), FlowpostError> {
        self.tables().try_for_each(|t| t.on_pre_reconfiguration())
    }

    fn on_post_reconfiguration(&self) -> Result<(), FlowpostError> {
        self.tables().try_for_each(|t| t.on_post_reconfiguration())
    }

    fn on_shutdown(&self) -> Result<(), FlowpostError> {
        self.tables().try_for_each(|t| t.on_shutdown())
    }

    fn health_check(&self) -> HealthStatus {
        self.tables()
            .map(|t| t.health_check())
            .find(|status| !status.is_healthy())
            .unwrap_or(HealthStatus::Healthy)
    }
}
