//! 파이프라인 trait: 집계 엔진과 외부 협력자 사이의 경계

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{FlowpostError, PipelineError};
use crate::record::FlowRecord;

/// 채널이 가득 찼을 때 양보만 하는 재시도 횟수
const FULL_YIELD_ATTEMPTS: u32 = 64;

/// 이후 재시도 사이의 대기 시간
const FULL_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// 완성된 레코드를 받는 push 방식 싱크
///
/// 와이어 인코딩(IPFIX)과 전송은 싱크 구현의 책임입니다.
/// 하류에 여유가 생길 때까지 블로킹할 수 있으며, 만료 스캔은 가드를 놓은 뒤에
/// 호출합니다. 에러는 하류가 더 이상 레코드를 받을 수 없을 때만 반환합니다.
pub trait RecordSink: Send + Sync {
    /// 레코드 하나를 전달합니다.
    fn send(&self, record: FlowRecord) -> Result<(), FlowpostError>;
}

/// 수신 측이 살아 있는 동안은 자리가 날 때까지 재시도하며 레코드를 버리지 않습니다.
///
/// 호출 스레드를 점유하므로, 수신 측과 같은 current-thread 런타임 안에서 호출하면
/// 안 됩니다. 만료 스캔은 전용 스레드나 `spawn_blocking`에서 실행합니다.
impl RecordSink for mpsc::Sender<FlowRecord> {
    fn send(&self, record: FlowRecord) -> Result<(), FlowpostError> {
        let mut record = record;
        let mut attempts = 0u32;
        loop {
            match self.try_send(record) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => {
                    return Err(PipelineError::ChannelSend(
                        "flow record receiver closed".to_owned(),
                    )
                    .into());
                }
                Err(TrySendError::Full(returned)) => {
                    record = returned;
                    attempts = attempts.saturating_add(1);
                    if attempts <= FULL_YIELD_ATTEMPTS {
                        std::thread::yield_now();
                    } else {
                        std::thread::sleep(FULL_RETRY_INTERVAL);
                    }
                }
            }
        }
    }
}

/// 모듈 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 문제가 있음
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 여부
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// 모듈 그래프가 호출하는 라이프사이클 훅
///
/// 재구성 순서: `on_pre_reconfiguration` → (설정 교체) → `on_post_reconfiguration`.
/// 삽입 경로와 만료 스레드가 모듈을 공유하므로 모든 훅은 `&self`를 받습니다.
pub trait Lifecycle: Send + Sync {
    /// 모듈 시작 시 호출됩니다.
    fn on_start(&self) -> Result<(), FlowpostError>;

    /// 재구성 직전에 호출됩니다.
    fn on_pre_reconfiguration(&self) -> Result<(), FlowpostError>;

    /// 재구성 직후에 호출됩니다.
    fn on_post_reconfiguration(&self) -> Result<(), FlowpostError>;

    /// 종료 시 호출됩니다.
    fn on_shutdown(&self) -> Result<(), FlowpostError>;

    /// 현재 상태를 확인합니다.
    fn health_check(&self) -> HealthStatus;
}
