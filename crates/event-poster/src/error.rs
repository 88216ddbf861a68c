//! 이벤트 포스터 에러 타입
//!
//! `From<PosterError> for DroptailError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use droptail_core::error::{DroptailError, PipelineError};
use droptail_workload_locator::LocatorError;

/// 이벤트 포스터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum PosterError {
    /// 이벤트 대상 객체 참조가 잘못됨 (404/422). 재시도해도 성공하지 않습니다.
    #[error("invalid event target '{target}': {reason}")]
    InvalidTarget {
        /// 대상 객체 키 (`namespace/name`)
        target: String,
        /// 실패 사유
        reason: String,
    },

    /// 이벤트 제출 실패
    #[error("event submit failed for '{target}': {reason}")]
    Submit {
        /// 대상 객체 키 (`namespace/name`)
        target: String,
        /// 실패 사유
        reason: String,
    },

    /// 워크로드 조회 실패
    #[error(transparent)]
    Locator(#[from] LocatorError),
}

impl PosterError {
    /// 재시도할 가치가 있는 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidTarget { .. })
    }
}

impl From<PosterError> for DroptailError {
    fn from(err: PosterError) -> Self {
        match err {
            PosterError::Locator(inner) => inner.into(),
            other => DroptailError::Pipeline(PipelineError::Dependency(other.to_string())),
        }
    }
}
