//! droptail 공통 크레이트
//!
//! 노드의 패킷 드롭 로그를 워크로드 이벤트로 바꾸는 파이프라인의
//! 각 단계가 공유하는 타입, 에러, 설정, 메트릭 수집기를 제공합니다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, DroptailError, PipelineError};

// 설정
pub use config::DroptailConfig;

// 메트릭
pub use metrics::DropMetrics;

// 도메인 타입
pub use types::{IdentityMode, PacketDrop, WorkloadRecord};
