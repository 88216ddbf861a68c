//! 워크로드 로케이터 에러 타입
//!
//! `From<LocatorError> for DroptailError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use droptail_core::error::{DroptailError, PipelineError};

/// 워크로드 로케이터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    /// API 클라이언트 생성 실패
    #[error("kube client error: {0}")]
    Client(String),

    /// list/watch 호출 실패
    #[error("workload api error: {0}")]
    Api(String),

    /// watch의 리소스 버전이 만료됨 (410 Gone), 다시 list 필요
    #[error("watch resource version expired")]
    WatchExpired,

    /// 초기 캐시 동기화 시간 초과
    #[error("workload cache not synced within {timeout_secs}s")]
    SyncTimeout {
        /// 제한 시간 (초)
        timeout_secs: u64,
    },

    /// 이미 시작된 캐시를 다시 시작함
    #[error("workload cache already started")]
    AlreadyStarted,

    /// 캐시 조회 실패
    #[error("workload lookup failed: {0}")]
    Lookup(String),

    /// 역방향 DNS 조회 실패
    #[error("reverse dns lookup failed for {ip}: {reason}")]
    Dns {
        /// 조회한 IP
        ip: String,
        /// 실패 사유
        reason: String,
    },
}

impl From<LocatorError> for DroptailError {
    fn from(err: LocatorError) -> Self {
        match err {
            LocatorError::Client(_) | LocatorError::SyncTimeout { .. } => {
                DroptailError::Pipeline(PipelineError::InitFailed(err.to_string()))
            }
            other => DroptailError::Pipeline(PipelineError::Dependency(other.to_string())),
        }
    }
}
