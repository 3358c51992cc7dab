//! 로그 파이프라인 에러 타입
//!
//! [`LogPipelineError`]는 수집 파이프라인 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<LogPipelineError> for ScRelayError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use screlay_core::error::{ConfigError, PipelineError, ScRelayError};

/// 로그 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LogPipelineError {
    /// 패턴 컴파일 실패
    #[error("pattern '{name}' failed to compile: {reason}")]
    PatternCompile {
        /// 패턴(이벤트 타입) 이름
        name: String,
        /// 실패 사유
        reason: String,
    },

    /// 패턴 집합이 비어 있음
    #[error("pattern set must not be empty")]
    EmptyPatternSet,

    /// 로그 파일 접근 실패 (시작 시)
    #[error("cannot open log file {path}: {reason}")]
    Open {
        /// 로그 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 연속 읽기 실패가 임계값에 도달
    #[error("log file {path} failed {failures} consecutive reads: {reason}")]
    WatcherFatal {
        /// 로그 파일 경로
        path: String,
        /// 연속 실패 횟수
        failures: u32,
        /// 마지막 실패 사유
        reason: String,
    },

    /// 오프셋 저장소 에러
    #[error("offset store error: {0}")]
    Offset(String),

    /// 디버그 trace 기록 에러
    #[error("trace error: {0}")]
    Trace(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
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

impl From<LogPipelineError> for ScRelayError {
    fn from(err: LogPipelineError) -> Self {
        match err {
            LogPipelineError::Config { field, reason } => {
                ScRelayError::Config(ConfigError::InvalidValue { field, reason })
            }
            LogPipelineError::EmptyPatternSet => ScRelayError::Config(ConfigError::InvalidValue {
                field: "patterns".to_owned(),
                reason: "pattern set must not be empty".to_owned(),
            }),
            LogPipelineError::WatcherFatal { .. } => {
                ScRelayError::Pipeline(PipelineError::Fatal(err.to_string()))
            }
            other => ScRelayError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
