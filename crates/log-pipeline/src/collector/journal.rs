//! 저널 기반 로그 수집기
//!
//! `journalctl --follow --output json`을 자식 프로세스로 실행하고 각 엔트리를
//! `<timestamp> <host> <message>` 형식의 라인으로 바꿔 전달합니다.
//! 타임스탬프는 파일 모드와 같은 레이아웃으로 렌더링하므로 파서 설정을 공유합니다.
//!
//! 형식이 잘못된 엔트리는 건너뛰고, 프로세스가 끝나면 잠시 후 다시 실행합니다.
//! 재실행할 때는 마지막으로 읽은 엔트리의 `__CURSOR` 다음부터 이어 읽으므로
//! 같은 엔트리를 두 번 전달하지 않습니다.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use droptail_core::config::DroptailConfig;
use droptail_core::metrics::DropMetrics;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{LineSource, forward_line};
use crate::error::LogPipelineError;

/// 저널 수집기 설정
#[derive(Debug, Clone)]
pub struct JournalWatcherConfig {
    /// 저널 디렉토리
    pub journal_dir: PathBuf,
    /// SYSLOG_IDENTIFIER 필터
    pub identifier: String,
    /// 타임스탬프 렌더링 레이아웃 (chrono strftime)
    pub time_layout: String,
    /// follow 프로세스 재시작 대기 시간
    pub restart_delay: Duration,
}

impl JournalWatcherConfig {
    /// core 설정에서 저널 수집기 설정을 만듭니다.
    pub fn from_core(config: &DroptailConfig) -> Self {
        Self {
            journal_dir: PathBuf::from(&config.source.journal_dir),
            identifier: config.source.journal_identifier.clone(),
            time_layout: config.parser.time_layout.clone(),
            restart_delay: config.source.poll_interval(),
        }
    }
}

/// follow 스트림이 끝난 이유
#[derive(Debug, PartialEq, Eq)]
enum FollowEnd {
    /// 출력 스트림 EOF
    Eof,
    /// 종료 신호 수신
    Shutdown,
}

/// 저널 기반 로그 수집기
pub struct JournalWatcher {
    config: JournalWatcherConfig,
    metrics: Arc<DropMetrics>,
}

impl JournalWatcher {
    /// 새 저널 수집기를 생성합니다.
    pub fn new(config: JournalWatcherConfig, metrics: Arc<DropMetrics>) -> Self {
        Self { config, metrics }
    }

    fn spawn_follow(&self, cursor: Option<&str>) -> Result<Child, LogPipelineError> {
        Command::new("journalctl")
            .args(follow_args(&self.config, cursor))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LogPipelineError::Collector {
                source_type: "journal",
                reason: format!("failed to spawn journalctl: {e}"),
            })
    }

    /// 출력 스트림을 읽어 포맷된 라인을 전달합니다.
    ///
    /// 읽은 엔트리의 `__CURSOR`를 `cursor`에 기록합니다. 건너뛴 엔트리도 포함합니다.
    async fn forward<R: AsyncBufRead + Unpin>(
        &self,
        reader: R,
        tx: &mpsc::Sender<String>,
        shutdown: &mut broadcast::Receiver<()>,
        cursor: &mut Option<String>,
    ) -> Result<FollowEnd, LogPipelineError> {
        let mut entries = reader.lines();
        loop {
            let entry = tokio::select! {
                _ = shutdown.recv() => return Ok(FollowEnd::Shutdown),
                entry = entries.next_line() => entry,
            };
            let entry = match entry {
                Ok(Some(entry)) => entry,
                Ok(None) => return Ok(FollowEnd::Eof),
                Err(e) => {
                    warn!(error = %e, "failed to read journal output");
                    return Ok(FollowEnd::Eof);
                }
            };
            let value: Value = match serde_json::from_str(&entry) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "skipping journal entry that is not json");
                    continue;
                }
            };
            if let Some(next) = value.get("__CURSOR").and_then(Value::as_str) {
                *cursor = Some(next.to_owned());
            }
            match format_value(&value, &self.config.time_layout) {
                Ok(line) => {
                    self.metrics.lines_collected(1);
                    forward_line(tx, line).await?;
                }
                Err(e) => warn!(error = %e, "skipping journal entry"),
            }
        }
    }
}

impl LineSource for JournalWatcher {
    fn name(&self) -> &'static str {
        "journal"
    }

    async fn run(
        self,
        tx: mpsc::Sender<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), LogPipelineError> {
        info!(
            journal_dir = %self.config.journal_dir.display(),
            identifier = %self.config.identifier,
            "journal watcher started"
        );
        let mut cursor: Option<String> = None;
        loop {
            match self.spawn_follow(cursor.as_deref()) {
                Ok(mut child) => {
                    let end = match child.stdout.take() {
                        Some(stdout) => {
                            let reader = BufReader::new(stdout);
                            self.forward(reader, &tx, &mut shutdown, &mut cursor).await?
                        }
                        None => FollowEnd::Eof,
                    };
                    if let Err(e) = child.kill().await {
                        debug!(error = %e, "journalctl already exited");
                    }
                    if end == FollowEnd::Shutdown {
                        info!("journal watcher stopping");
                        return Ok(());
                    }
                    warn!(
                        restart_in_ms = self.config.restart_delay.as_millis() as u64,
                        cursor = cursor.as_deref().unwrap_or("-"),
                        "journalctl exited, restarting"
                    );
                }
                Err(e) => warn!(error = %e, "journal follow unavailable"),
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("journal watcher stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.restart_delay) => {}
            }
        }
    }
}

/// journalctl 실행 인자를 만듭니다.
///
/// 처음 실행할 때는 마지막 엔트리 하나부터, 커서가 있으면 그 다음 엔트리부터 읽습니다.
pub fn follow_args(config: &JournalWatcherConfig, cursor: Option<&str>) -> Vec<OsString> {
    let mut args = vec![
        OsString::from("--directory"),
        config.journal_dir.clone().into_os_string(),
        OsString::from("--follow"),
    ];
    match cursor {
        Some(cursor) => args.extend([OsString::from("--after-cursor"), OsString::from(cursor)]),
        None => args.extend([OsString::from("--lines"), OsString::from("1")]),
    }
    args.extend(
        ["--output", "json", "--identifier", config.identifier.as_str()].map(OsString::from),
    );
    args
}

/// journalctl JSON 엔트리 하나를 `<timestamp> <host> <message>` 라인으로 바꿉니다.
///
/// `__REALTIME_TIMESTAMP`(epoch 마이크로초)를 로컬 시간으로 `layout`에 맞춰 렌더링합니다.
/// `MESSAGE`는 문자열 또는 바이트 배열일 수 있습니다.
pub fn format_entry(entry: &str, layout: &str) -> Result<String, LogPipelineError> {
    let value: Value = serde_json::from_str(entry)
        .map_err(|e| LogPipelineError::JournalEntry(format!("invalid json: {e}")))?;
    format_value(&value, layout)
}

fn format_value(value: &Value, layout: &str) -> Result<String, LogPipelineError> {
    let micros = value
        .get("__REALTIME_TIMESTAMP")
        .and_then(|v| match v {
            Value::String(s) => s.parse::<i64>().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        })
        .ok_or_else(|| LogPipelineError::JournalEntry("missing __REALTIME_TIMESTAMP".to_owned()))?;
    let timestamp = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| {
            LogPipelineError::JournalEntry(format!("timestamp out of range: {micros}"))
        })?
        .with_timezone(&Local);

    let host = value
        .get("_HOSTNAME")
        .and_then(Value::as_str)
        .ok_or_else(|| LogPipelineError::JournalEntry("missing _HOSTNAME".to_owned()))?;

    let message = match value.get("MESSAGE") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(bytes)) => {
            let bytes = bytes
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(|| {
                    LogPipelineError::JournalEntry("MESSAGE is not a byte array".to_owned())
                })?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        _ => return Err(LogPipelineError::JournalEntry("missing MESSAGE".to_owned())),
    };

    let mut line = String::new();
    write!(line, "{} {} {}", timestamp.format(layout), host, message).map_err(|_| {
        LogPipelineError::Layout {
            layout: layout.to_owned(),
            reason: "cannot render timestamp".to_owned(),
        }
    })?;
    Ok(line)
}
