//! 로그 소스 모듈 -- 물리적 로그 스트림 하나에서 원시 라인을 수집합니다.
//!
//! # 수집 소스
//! - [`FileWatcher`]: 로그 파일 폴링 (지문 기반 로테이션 감지)
//! - [`JournalWatcher`]: `journalctl --follow` 출력 구독
//!
//! # 아키텍처
//! 각 소스는 자체 tokio 태스크에서 실행되며, 스트림 순서대로 한 줄씩
//! `tokio::mpsc::Sender<String>` 채널로 전달합니다. 줄 끝 문자는 제거되고
//! 빈 줄도 그대로 전달됩니다.

pub mod file;
pub mod journal;

pub use file::{FileWatcher, FileWatcherConfig, TailState};
pub use journal::{JournalWatcher, JournalWatcherConfig};

use std::future::Future;

use tokio::sync::{broadcast, mpsc};

use crate::error::LogPipelineError;

/// 원시 라인 소스
///
/// `run`은 종료 신호를 받을 때까지 반환하지 않습니다. 일시적인 실패(파일 없음,
/// 프로세스 종료 등)는 로그만 남기고 다음 주기에 다시 시도합니다.
/// 라인 수신 측이 닫힌 경우에만 에러로 끝납니다.
pub trait LineSource: Send + 'static {
    /// 소스 이름 (로그 필드용)
    fn name(&self) -> &'static str;

    /// 라인 수집 루프를 실행합니다.
    fn run(
        self,
        tx: mpsc::Sender<String>,
        shutdown: broadcast::Receiver<()>,
    ) -> impl Future<Output = Result<(), LogPipelineError>> + Send;
}

/// 라인을 채널로 보냅니다. 수신 측이 닫혔으면 에러를 반환합니다.
async fn forward_line(tx: &mpsc::Sender<String>, line: String) -> Result<(), LogPipelineError> {
    tx.send(line)
        .await
        .map_err(|_| LogPipelineError::Channel("line receiver closed".to_owned()))
}
