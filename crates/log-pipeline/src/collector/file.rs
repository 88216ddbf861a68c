//! 파일 기반 로그 수집기
//!
//! 로그 파일을 주기적으로 폴링하며 마지막 오프셋 이후에 추가된 라인을 수집합니다.
//! `tail -F`와 유사한 동작을 비동기 방식으로 구현합니다.
//!
//! # 로테이션 감지
//! - 파일 앞부분 [`FINGERPRINT_SIZE`] 바이트(지문)가 바뀌면 로테이션으로 판단
//! - 파일이 저장된 오프셋보다 짧아지면 truncation으로 판단
//! - 두 경우 모두 오프셋을 0으로 되돌림
//!
//! 개행으로 끝나지 않은 마지막 라인은 전달하지 않고 다음 주기에 다시 읽습니다.

use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use droptail_core::config::SourceConfig;
use droptail_core::metrics::DropMetrics;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{LineSource, forward_line};
use crate::error::LogPipelineError;

/// 로테이션 감지에 쓰는 파일 앞부분 크기 (바이트)
pub const FINGERPRINT_SIZE: usize = 64;

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct FileWatcherConfig {
    /// 감시할 파일 경로
    pub path: PathBuf,
    /// 파일 상태 체크 주기
    pub poll_interval: Duration,
    /// 한 번에 읽을 최대 라인 수
    pub max_lines_per_read: usize,
}

impl FileWatcherConfig {
    /// core 설정에서 파일 수집기 설정을 만듭니다.
    pub fn from_core(source: &SourceConfig) -> Self {
        Self {
            path: PathBuf::from(&source.log_path),
            poll_interval: source.poll_interval(),
            max_lines_per_read: source.max_lines_per_read,
        }
    }
}

impl Default for FileWatcherConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/log/iptables.log"),
            poll_interval: Duration::from_secs(5),
            max_lines_per_read: 1000,
        }
    }
}

/// 감시 중인 스트림의 읽기 위치와 지문
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailState {
    offset: u64,
    fingerprint: Option<Vec<u8>>,
}

impl TailState {
    /// 마지막으로 읽은 바이트 오프셋
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 마지막 로테이션 체크에서 기록한 지문
    pub fn fingerprint(&self) -> Option<&[u8]> {
        self.fingerprint.as_deref()
    }

    /// 로테이션을 확인한 뒤 저장된 오프셋부터 완성된 라인을 최대 `max_lines`개 읽습니다.
    ///
    /// 지문을 읽을 만큼 데이터가 없으면 상태를 바꾸지 않고
    /// [`LogPipelineError::Fingerprint`]를 반환합니다.
    pub fn read_new_lines<R: Read + Seek>(
        &mut self,
        input: &mut R,
        max_lines: usize,
    ) -> Result<Vec<String>, LogPipelineError> {
        let len = input.seek(SeekFrom::End(0))?;
        input.seek(SeekFrom::Start(0))?;

        let mut prefix = Vec::with_capacity(FINGERPRINT_SIZE);
        (&mut *input)
            .take(FINGERPRINT_SIZE as u64)
            .read_to_end(&mut prefix)?;
        if prefix.len() < FINGERPRINT_SIZE {
            return Err(LogPipelineError::Fingerprint {
                available: prefix.len(),
                required: FINGERPRINT_SIZE,
            });
        }

        match &self.fingerprint {
            Some(known) if *known != prefix => {
                info!(previous_offset = self.offset, "log file rotated, rewinding");
                self.offset = 0;
                self.fingerprint = Some(prefix);
            }
            Some(_) => {}
            None => self.fingerprint = Some(prefix),
        }

        if self.offset > len {
            info!(
                previous_offset = self.offset,
                len, "log file truncated, rewinding"
            );
            self.offset = 0;
        }

        input.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(input);
        let mut lines = Vec::new();
        let mut buf = Vec::new();
        while lines.len() < max_lines {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 || buf.last() != Some(&b'\n') {
                // EOF 또는 아직 쓰는 중인 라인
                break;
            }
            self.offset += read as u64;
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            lines.push(String::from_utf8_lossy(&buf).into_owned());
        }
        Ok(lines)
    }
}

/// 파일 기반 로그 수집기
pub struct FileWatcher {
    config: FileWatcherConfig,
    state: TailState,
    metrics: Arc<DropMetrics>,
}

impl FileWatcher {
    /// 새 파일 수집기를 생성합니다.
    pub fn new(config: FileWatcherConfig, metrics: Arc<DropMetrics>) -> Self {
        Self {
            config,
            state: TailState::default(),
            metrics,
        }
    }

    /// 현재 읽기 상태를 반환합니다.
    pub fn state(&self) -> &TailState {
        &self.state
    }

    /// 파일을 열어 한 번의 체크 주기를 수행합니다.
    ///
    /// 파일 I/O는 blocking 스레드에서 수행합니다.
    pub async fn check(&mut self) -> Result<Vec<String>, LogPipelineError> {
        let path = self.config.path.clone();
        let max_lines = self.config.max_lines_per_read;
        let mut state = std::mem::take(&mut self.state);
        let (state, result) = tokio::task::spawn_blocking(move || {
            let result = match std::fs::File::open(&path) {
                Ok(mut file) => state.read_new_lines(&mut file, max_lines),
                Err(e) => Err(LogPipelineError::Collector {
                    source_type: "file",
                    reason: format!("{}: {e}", path.display()),
                }),
            };
            (state, result)
        })
        .await
        .map_err(|e| LogPipelineError::Collector {
            source_type: "file",
            reason: format!("read task failed: {e}"),
        })?;
        self.state = state;
        result
    }

    /// 한 폴링 주기: 읽을 라인이 남아 있으면 바로 다시 읽습니다.
    async fn poll(&mut self, tx: &mpsc::Sender<String>) -> Result<(), LogPipelineError> {
        loop {
            let lines = match self.check().await {
                Ok(lines) => lines,
                Err(e @ LogPipelineError::Fingerprint { .. }) => {
                    debug!(path = %self.config.path.display(), error = %e, "skipping cycle");
                    return Ok(());
                }
                Err(e) => {
                    warn!(path = %self.config.path.display(), error = %e, "failed to read log file");
                    return Ok(());
                }
            };

            let full = lines.len() >= self.config.max_lines_per_read;
            if !lines.is_empty() {
                self.metrics.lines_collected(lines.len() as u64);
            }
            for line in lines {
                forward_line(tx, line).await?;
            }
            if !full {
                return Ok(());
            }
        }
    }
}

impl LineSource for FileWatcher {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn run(
        mut self,
        tx: mpsc::Sender<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), LogPipelineError> {
        info!(
            path = %self.config.path.display(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "file watcher started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(offset = self.state.offset, "file watcher stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            self.poll(&tx).await?;
        }
    }
}
