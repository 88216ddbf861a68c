//! droptail 로그 파이프라인
//!
//! 노드의 방화벽 로그를 한 줄씩 읽어 [`PacketDrop`](droptail_core::PacketDrop)으로
//! 바꾸는 앞단 두 단계를 제공합니다.
//!
//! # 모듈 구성
//!
//! - [`collector`]: 로그 소스 (로테이션을 감지하는 파일 감시, journalctl follow)
//! - [`parser`]: 마커 필터링, 필드 추출, 만료 필터링
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! FileWatcher / JournalWatcher -> mpsc<String> -> DropParser -> mpsc<PacketDrop> -> poster
//! ```

pub mod collector;
pub mod error;
pub mod parser;

// --- 주요 타입 re-export ---

pub use collector::{
    FileWatcher, FileWatcherConfig, JournalWatcher, JournalWatcherConfig, LineSource, TailState,
};
pub use error::LogPipelineError;
pub use parser::{DropParser, TimeLayout};
