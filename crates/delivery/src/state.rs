//! 싱크 상태
//!
//! 각 싱크는 하나의 [`SinkState`]를 가지며 쓰기는 해당 싱크의 워커만 수행합니다.
//! 외부 조회는 [`StateCell::snapshot`]으로 복사본을 받습니다.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 싱크 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Webhook,
    Realtime,
    Store,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Realtime => "realtime",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 연결/전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkStatus {
    Disconnected,
    Connecting,
    Connected,
    /// 연속 실패 후 냉각 중
    Backoff,
}

impl fmt::Display for SinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// 싱크별 상태
#[derive(Clone, Serialize)]
pub struct SinkState {
    pub sink_id: String,
    pub kind: SinkKind,
    pub status: SinkStatus,
    pub consecutive_failure_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub auth_token: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub delivered: u64,
    pub dropped: u64,
    pub last_error: Option<String>,
}

impl fmt::Debug for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkState")
            .field("sink_id", &self.sink_id)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("consecutive_failure_count", &self.consecutive_failure_count)
            .field("last_attempt_at", &self.last_attempt_at)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("last_heartbeat_at", &self.last_heartbeat_at)
            .field("delivered", &self.delivered)
            .field("dropped", &self.dropped)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl SinkState {
    pub fn new(sink_id: impl Into<String>, kind: SinkKind) -> Self {
        Self {
            sink_id: sink_id.into(),
            kind,
            status: SinkStatus::Disconnected,
            consecutive_failure_count: 0,
            last_attempt_at: None,
            auth_token: None,
            last_heartbeat_at: None,
            delivered: 0,
            dropped: 0,
            last_error: None,
        }
    }
}

/// 공유 상태 셀
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<SinkState>>);

impl StateCell {
    pub fn new(sink_id: impl Into<String>, kind: SinkKind) -> Self {
        Self(Arc::new(Mutex::new(SinkState::new(sink_id, kind))))
    }

    /// 잠금을 잡은 채 상태를 수정합니다.
    pub fn update<R>(&self, f: impl FnOnce(&mut SinkState) -> R) -> R {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn snapshot(&self) -> SinkState {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn status(&self) -> SinkStatus {
        self.update(|s| s.status)
    }

    pub fn set_status(&self, status: SinkStatus) {
        self.update(|s| s.status = status);
    }

    /// 성공 기록: 연속 실패 초기화
    pub fn record_success(&self) {
        self.update(|s| {
            s.status = SinkStatus::Connected;
            s.consecutive_failure_count = 0;
            s.last_attempt_at = Some(Utc::now());
            s.delivered += 1;
            s.last_error = None;
        });
    }

    /// 실패 기록 후 연속 실패 횟수를 반환합니다.
    pub fn record_failure(&self, error: impl Into<String>) -> u32 {
        self.update(|s| {
            s.consecutive_failure_count = s.consecutive_failure_count.saturating_add(1);
            s.last_attempt_at = Some(Utc::now());
            s.last_error = Some(error.into());
            s.consecutive_failure_count
        })
    }

    pub fn record_drop(&self) {
        self.update(|s| s.dropped += 1);
    }
}
