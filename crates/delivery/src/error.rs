//! 전달 에러 타입
//!
//! [`SinkError`]는 싱크 전송 시도와 연결 관리에서 발생하는 에러를 표현합니다.
//! `From<SinkError> for ScRelayError` 변환으로 상위 레이어에서 `?`로 전파할 수 있습니다.

use std::time::Duration;

use screlay_core::error::{ConfigError, DeliveryError, ScRelayError};

/// 전달 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config { field: String, reason: String },

    /// 2xx가 아닌 HTTP 응답
    #[error("http status {status}: {body}")]
    Http {
        status: u16,
        /// 응답 본문 (잘린 일부)
        body: String,
        /// `Retry-After` 힌트
        retry_after: Option<Duration>,
    },

    /// 요청 전송/수신 실패 (DNS, TLS, 연결 끊김)
    #[error("transport error: {0}")]
    Transport(String),

    /// 요청 타임아웃
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// 인증/토큰 에러
    #[error("auth error: {0}")]
    Auth(String),

    /// WebSocket 연결 에러
    #[error("connection error: {0}")]
    Connection(String),

    /// 프로토콜 위반 또는 해석 불가 메시지
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 직렬화 실패
    #[error("serialization error: {0}")]
    Serialize(String),
}

impl SinkError {
    /// 같은 요청을 다시 시도할 가치가 있는지
    ///
    /// 429와 5xx, 전송 실패, 타임아웃은 재시도 대상이고 나머지 4xx는 아닙니다.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) | Self::Timeout(_) | Self::Connection(_) => true,
            Self::Config { .. } | Self::Auth(_) | Self::Protocol(_) | Self::Serialize(_) => false,
        }
    }

    /// 서버가 알려준 재시도 대기 시간
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("timeout: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

impl From<SinkError> for ScRelayError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Config { field, reason } => {
                ScRelayError::Config(ConfigError::InvalidValue { field, reason })
            }
            SinkError::Auth(reason) => ScRelayError::Delivery(DeliveryError::Auth(reason)),
            SinkError::Connection(_) | SinkError::Transport(_) | SinkError::Timeout(_) => {
                ScRelayError::Delivery(DeliveryError::Connection(err.to_string()))
            }
            other => ScRelayError::Delivery(DeliveryError::Send(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> SinkError {
        SinkError::Http {
            status,
            body: String::new(),
            retry_after: None,
        }
    }

    #[test]
    fn retryable_statuses() {
        assert!(http(429).is_retryable());
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(401).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(SinkError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!SinkError::Auth("expired".to_owned()).is_retryable());
    }

    #[test]
    fn retry_after_only_from_http() {
        let err = SinkError::Http {
            status: 429,
            body: "slow down".to_owned(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(SinkError::Transport("reset".to_owned()).retry_after(), None);
    }

    #[test]
    fn config_maps_to_invalid_value() {
        let err: ScRelayError = SinkError::Config {
            field: "delivery.webhook.url".to_owned(),
            reason: "empty".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            ScRelayError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn auth_and_connection_mapping() {
        let auth: ScRelayError = SinkError::Auth("refresh rejected".to_owned()).into();
        assert!(matches!(auth, ScRelayError::Delivery(DeliveryError::Auth(_))));

        let conn: ScRelayError = SinkError::Timeout(Duration::from_secs(10)).into();
        assert!(matches!(conn, ScRelayError::Delivery(DeliveryError::Connection(_))));

        let send: ScRelayError = http(400).into();
        assert!(matches!(send, ScRelayError::Delivery(DeliveryError::Send(_))));
    }
}
