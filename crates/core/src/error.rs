//! 에러 타입 -- 도메인별 에러 정의

/// screlay 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ScRelayError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 외부 전송 에러
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

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

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,

    /// 복구 불가능한 실행 중 에러
    #[error("pipeline fatal error: {0}")]
    Fatal(String),
}

/// 외부 전송 에러
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 인증 실패
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 전송 실패
    #[error("send failed: {0}")]
    Send(String),
}
