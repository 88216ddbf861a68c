//! 에러 타입 -- 도메인별 에러 정의

/// droptail 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum DroptailError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 외부 의존성(워크로드 캐시, 이벤트 싱크) 실패
    #[error("dependency failed: {0}")]
    Dependency(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_into_top_level() {
        let err: DroptailError = ConfigError::InvalidValue {
            field: "parser.log_prefix".to_owned(),
            reason: "must not be empty".to_owned(),
        }
        .into();
        assert!(matches!(err, DroptailError::Config(_)));
        assert!(err.to_string().contains("parser.log_prefix"));
    }

    #[test]
    fn io_error_converts_into_top_level() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DroptailError = io.into();
        assert!(matches!(err, DroptailError::Io(_)));
    }
}
