//! 설정 관리 -- droptail.toml 파싱 및 런타임 설정
//!
//! [`DroptailConfig`]는 모든 단계의 설정을 담는 최상위 구조체입니다.
//! 설정은 시작 시 한 번만 읽고 이후 다시 읽지 않습니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`DROPTAIL_PARSER_LOG_PREFIX=calico-drop:` 형식)
//! 3. 설정 파일 (`droptail.toml`, 선택)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), droptail_core::error::DroptailError> {
//! use droptail_core::config::DroptailConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = DroptailConfig::load("droptail.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = DroptailConfig::parse("[parser]\nlog_prefix = \"drop:\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, DroptailError};
use crate::types::IdentityMode;

/// droptail 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DroptailConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 로그 소스 설정
    #[serde(default)]
    pub source: SourceConfig,
    /// 드롭 파서 설정
    #[serde(default)]
    pub parser: ParserConfig,
    /// 이벤트 포스터 설정
    #[serde(default)]
    pub poster: PosterConfig,
    /// 워크로드 식별 설정
    #[serde(default)]
    pub identity: IdentityConfig,
    /// 메트릭 노출 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl DroptailConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DroptailError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 설정 파일 없이 기본값과 환경변수만으로 설정을 만듭니다.
    pub fn from_env() -> Result<Self, DroptailError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 읽습니다 (환경변수 오버라이드와 검증 없음).
    ///
    /// `log_prefix` 같은 필수 값은 환경변수로 채울 수 있으므로
    /// 검증은 [`load`](Self::load)에서 오버라이드 이후에 수행합니다.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, DroptailError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DroptailError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                DroptailError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, DroptailError> {
        toml::from_str(toml_str).map_err(|e| {
            DroptailError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `DROPTAIL_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "DROPTAIL_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "DROPTAIL_GENERAL_LOG_FORMAT");

        // Source
        override_string(&mut self.source.mode, "DROPTAIL_SOURCE_MODE");
        override_string(&mut self.source.log_path, "DROPTAIL_SOURCE_LOG_PATH");
        override_string(&mut self.source.journal_dir, "DROPTAIL_SOURCE_JOURNAL_DIR");
        override_string(
            &mut self.source.journal_identifier,
            "DROPTAIL_SOURCE_JOURNAL_IDENTIFIER",
        );
        override_u64(
            &mut self.source.poll_interval_secs,
            "DROPTAIL_SOURCE_POLL_INTERVAL_SECS",
        );
        override_usize(
            &mut self.source.line_channel_capacity,
            "DROPTAIL_SOURCE_LINE_CHANNEL_CAPACITY",
        );
        override_usize(
            &mut self.source.max_lines_per_read,
            "DROPTAIL_SOURCE_MAX_LINES_PER_READ",
        );

        // Parser
        override_string(&mut self.parser.log_prefix, "DROPTAIL_PARSER_LOG_PREFIX");
        override_string(&mut self.parser.time_layout, "DROPTAIL_PARSER_TIME_LAYOUT");
        override_u64(
            &mut self.parser.expiration_minutes,
            "DROPTAIL_PARSER_EXPIRATION_MINUTES",
        );

        // Poster
        override_usize(
            &mut self.poster.channel_buffer_size,
            "DROPTAIL_POSTER_CHANNEL_BUFFER_SIZE",
        );
        override_u64(
            &mut self.poster.repeated_event_interval_minutes,
            "DROPTAIL_POSTER_REPEATED_EVENT_INTERVAL_MINUTES",
        );
        override_string(&mut self.poster.event_reason, "DROPTAIL_POSTER_EVENT_REASON");
        override_string(
            &mut self.poster.component_name,
            "DROPTAIL_POSTER_COMPONENT_NAME",
        );
        override_u64(
            &mut self.poster.backoff_initial_interval_ms,
            "DROPTAIL_POSTER_BACKOFF_INITIAL_INTERVAL_MS",
        );
        override_u64(
            &mut self.poster.backoff_max_interval_secs,
            "DROPTAIL_POSTER_BACKOFF_MAX_INTERVAL_SECS",
        );
        override_u32(
            &mut self.poster.dedup_prune_factor,
            "DROPTAIL_POSTER_DEDUP_PRUNE_FACTOR",
        );

        // Identity
        override_string(&mut self.identity.mode, "DROPTAIL_IDENTITY_MODE");
        override_string(&mut self.identity.label_key, "DROPTAIL_IDENTITY_LABEL_KEY");
        override_string(&mut self.identity.api_server, "DROPTAIL_IDENTITY_API_SERVER");
        override_u64(
            &mut self.identity.cache_sync_timeout_secs,
            "DROPTAIL_IDENTITY_CACHE_SYNC_TIMEOUT_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "DROPTAIL_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "DROPTAIL_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "DROPTAIL_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DroptailError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        let valid_modes = ["file", "journal"];
        if !valid_modes.contains(&self.source.mode.as_str()) {
            return Err(invalid(
                "source.mode",
                format!("must be one of: {}", valid_modes.join(", ")),
            ));
        }
        if self.source.mode == "file" && self.source.log_path.is_empty() {
            return Err(invalid(
                "source.log_path",
                "log_path must not be empty in file mode".to_owned(),
            ));
        }
        if self.source.mode == "journal" && self.source.journal_dir.is_empty() {
            return Err(invalid(
                "source.journal_dir",
                "journal_dir must not be empty in journal mode".to_owned(),
            ));
        }
        if self.source.poll_interval_secs == 0 {
            return Err(invalid(
                "source.poll_interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.source.line_channel_capacity == 0 {
            return Err(invalid(
                "source.line_channel_capacity",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.source.max_lines_per_read == 0 {
            return Err(invalid(
                "source.max_lines_per_read",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.parser.log_prefix.trim().is_empty() {
            return Err(invalid(
                "parser.log_prefix",
                "log_prefix is required".to_owned(),
            ));
        }
        if self.parser.log_prefix.split_whitespace().count() != 1 {
            return Err(invalid(
                "parser.log_prefix",
                "log_prefix must be a single token".to_owned(),
            ));
        }
        if self.parser.time_layout.trim().is_empty() {
            return Err(invalid(
                "parser.time_layout",
                "time_layout must not be empty".to_owned(),
            ));
        }

        if self.poster.channel_buffer_size == 0 {
            return Err(invalid(
                "poster.channel_buffer_size",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.poster.backoff_initial_interval_ms == 0 {
            return Err(invalid(
                "poster.backoff_initial_interval_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        IdentityMode::from_config(&self.identity.mode, &self.identity.label_key)?;

        if self.metrics.enabled && self.metrics.listen_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(invalid(
                "metrics.listen_addr",
                format!("'{}' is not a valid IP address", self.metrics.listen_addr),
            ));
        }

        Ok(())
    }

    /// 설정된 워크로드 식별 방식
    pub fn identity_mode(&self) -> Result<IdentityMode, DroptailError> {
        Ok(IdentityMode::from_config(
            &self.identity.mode,
            &self.identity.label_key,
        )?)
    }
}

fn invalid(field: &str, reason: String) -> DroptailError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 로그 소스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// 소스 방식 (file, journal)
    pub mode: String,
    /// file 모드에서 감시할 로그 파일 경로
    pub log_path: String,
    /// journal 모드에서 읽을 저널 디렉토리
    pub journal_dir: String,
    /// journal 모드에서 필터링할 SYSLOG_IDENTIFIER
    pub journal_identifier: String,
    /// 파일 폴링 간격 (초)
    pub poll_interval_secs: u64,
    /// 원시 라인 채널 용량
    pub line_channel_capacity: usize,
    /// 한 번의 읽기에서 수집할 최대 라인 수
    pub max_lines_per_read: usize,
}

impl SourceConfig {
    /// 폴링 간격
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: "file".to_owned(),
            log_path: "/var/log/iptables.log".to_owned(),
            journal_dir: "/var/log/journal".to_owned(),
            journal_identifier: "kernel".to_owned(),
            poll_interval_secs: 5,
            line_channel_capacity: 1024,
            max_lines_per_read: 1000,
        }
    }
}

/// 드롭 파서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// 드롭 로그를 구분하는 마커 토큰 (필수)
    pub log_prefix: String,
    /// 로그 타임스탬프 형식 (chrono strftime)
    pub time_layout: String,
    /// 이 시간보다 오래된 드롭은 버림 (분)
    pub expiration_minutes: u64,
}

impl ParserConfig {
    /// 드롭 만료 기간
    pub fn expiration(&self) -> TimeDelta {
        minutes(self.expiration_minutes)
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            log_prefix: String::new(),
            time_layout: "%Y-%m-%dT%H:%M:%S%.6f%:z".to_owned(),
            expiration_minutes: 10,
        }
    }
}

/// 이벤트 포스터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PosterConfig {
    /// 파싱된 드롭 채널 용량
    pub channel_buffer_size: usize,
    /// 같은 (src, dst) 쌍의 반복 이벤트 억제 기간 (분)
    pub repeated_event_interval_minutes: u64,
    /// 이벤트 reason
    pub event_reason: String,
    /// 이벤트 source component
    pub component_name: String,
    /// 재시도 첫 대기 시간 (밀리초)
    pub backoff_initial_interval_ms: u64,
    /// 재시도 대기 시간 상한 (초)
    pub backoff_max_interval_secs: u64,
    /// 억제 기간의 몇 배보다 오래된 기록을 정리할지 (0이면 정리하지 않음)
    pub dedup_prune_factor: u32,
}

impl PosterConfig {
    /// 반복 이벤트 억제 기간
    pub fn repeat_window(&self) -> TimeDelta {
        minutes(self.repeated_event_interval_minutes)
    }

    /// 재시도 첫 대기 시간
    pub fn backoff_initial_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_interval_ms)
    }

    /// 재시도 대기 시간 상한
    pub fn backoff_max_interval(&self) -> Duration {
        Duration::from_secs(self.backoff_max_interval_secs)
    }
}

impl Default for PosterConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 100,
            repeated_event_interval_minutes: 2,
            event_reason: "PacketDrop".to_owned(),
            component_name: "droptail".to_owned(),
            backoff_initial_interval_ms: 500,
            backoff_max_interval_secs: 60,
            dedup_prune_factor: 0,
        }
    }
}

/// 워크로드 식별 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// 식별 방식 (name, label, namespace, namespace-name)
    pub mode: String,
    /// label 모드에서 사용할 레이블 키
    pub label_key: String,
    /// API 서버 주소 오버라이드 (비어 있으면 자동 감지)
    pub api_server: String,
    /// 초기 캐시 동기화 제한 시간 (초)
    pub cache_sync_timeout_secs: u64,
}

impl IdentityConfig {
    /// 초기 캐시 동기화 제한 시간
    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            mode: "namespace".to_owned(),
            label_key: String::new(),
            api_server: String::new(),
            cache_sync_timeout_secs: 60,
        }
    }
}

/// 메트릭 노출 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리스닝 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0".to_owned(),
            port: 9090,
            endpoint: "/metrics".to_owned(),
        }
    }
}

fn minutes(value: u64) -> TimeDelta {
    TimeDelta::try_minutes(i64::try_from(value).unwrap_or(i64::MAX)).unwrap_or(TimeDelta::MAX)
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}
