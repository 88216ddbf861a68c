//! 로그 파이프라인 에러 타입
//!
//! [`LogPipelineError`]는 로그 소스와 파서에서 발생하는 모든 에러를 표현합니다.
//! `From<LogPipelineError> for DroptailError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use droptail_core::error::{DroptailError, PipelineError};

/// 로그 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LogPipelineError {
    /// 타임스탬프 파싱 실패
    #[error("invalid timestamp '{value}' for layout '{layout}': {reason}")]
    Timestamp {
        /// 타임스탬프로 다시 합친 문자열
        value: String,
        /// 설정된 레이아웃
        layout: String,
        /// 실패 사유
        reason: String,
    },

    /// 필드 수 부족
    #[error("too few fields: got {count}, need at least {min}")]
    TooFewFields {
        /// 실제 필드 수 (타임스탬프는 1개로 셈)
        count: usize,
        /// 필요한 최소 필드 수
        min: usize,
    },

    /// 필수 필드가 없거나 값이 비어 있음
    #[error("missing field {field}")]
    MissingField {
        /// 필드 이름 (SRC, DPT ...)
        field: &'static str,
    },

    /// 필드 값 형식 오류
    #[error("malformed field {field}={value}")]
    MalformedField {
        /// 필드 이름
        field: &'static str,
        /// 원래 값
        value: String,
    },

    /// 레이아웃 설정 오류
    #[error("invalid time layout '{layout}': {reason}")]
    Layout {
        /// 설정된 레이아웃
        layout: String,
        /// 사유
        reason: String,
    },

    /// 로테이션 감지용 지문을 읽을 바이트가 부족함
    #[error("fingerprint unavailable: {available} of {required} bytes")]
    Fingerprint {
        /// 읽은 바이트 수
        available: usize,
        /// 필요한 바이트 수
        required: usize,
    },

    /// 저널 엔트리 형식 오류
    #[error("malformed journal entry: {0}")]
    JournalEntry(String),

    /// 수집기 에러 (파일 열기 실패, 프로세스 실행 실패 등)
    #[error("collector error: {source_type}: {reason}")]
    Collector {
        /// 수집 소스 유형 (file, journal)
        source_type: &'static str,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LogPipelineError> for DroptailError {
    fn from(err: LogPipelineError) -> Self {
        match err {
            LogPipelineError::Io(e) => DroptailError::Io(e),
            LogPipelineError::Channel(reason) => {
                DroptailError::Pipeline(PipelineError::ChannelSend(reason))
            }
            other => DroptailError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
