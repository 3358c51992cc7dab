//! 실시간 브로드캐스트 싱크
//!
//! 연결 자체는 [`connection`] 태스크가 소유하고, [`RealtimeSink`]는 명령 채널과 상태만
//! 가진 핸들입니다. 연결되지 않은 동안 들어온 이벤트는 큐에 쌓지 않고 버립니다 (best-effort).

mod connection;
pub mod credentials;
pub mod protocol;

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use screlay_core::event::Event;
use screlay_core::metrics as m;

pub use credentials::{
    ConfiguredCredentials, Credential, CredentialProvider, RefreshTokenCredentials,
    StaticCredentials,
};

use crate::config::RealtimeSinkConfig;
use crate::context::{ClientContext, ClientSnapshot};
use crate::payload::realtime_payload;
use crate::sink::SinkOutcome;
use crate::state::{SinkKind, SinkStatus, StateCell};
use connection::{Command, Connection};

/// 연결 태스크로 가는 명령 큐 용량
const COMMAND_CAPACITY: usize = 64;

pub struct RealtimeSink {
    commands: mpsc::Sender<Command>,
    state: StateCell,
}

impl RealtimeSink {
    /// 연결 태스크를 띄우고 핸들을 반환합니다.
    pub fn spawn<P: CredentialProvider>(
        config: RealtimeSinkConfig,
        credentials: Arc<P>,
        context: Arc<ClientContext>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let state = StateCell::new(SinkKind::Realtime.as_str(), SinkKind::Realtime);
        let connection = Connection::new(config, credentials, context, state.clone(), rx, cancel);
        let handle = tokio::spawn(connection.run());
        (
            Self {
                commands: tx,
                state,
            },
            handle,
        )
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.status() == SinkStatus::Connected
    }

    pub fn deliver(&self, event: &Event, content: &str, ctx: &ClientSnapshot) -> SinkOutcome {
        if !self.is_connected() {
            return self.drop_event(event, "disconnected");
        }
        let payload = realtime_payload(event, content, ctx);
        match self.commands.try_send(Command::Broadcast(payload)) {
            Ok(()) => SinkOutcome::Forwarded,
            Err(mpsc::error::TrySendError::Full(_)) => self.drop_event(event, "connection_busy"),
            Err(mpsc::error::TrySendError::Closed(_)) => self.drop_event(event, "closed"),
        }
    }

    fn drop_event(&self, event: &Event, reason: &'static str) -> SinkOutcome {
        self.state.record_drop();
        counter!(
            m::DELIVERY_DROPPED_TOTAL,
            m::LABEL_SINK => "realtime",
            m::LABEL_REASON => reason
        )
        .increment(1);
        debug!(event_type = %event.event_type, reason, "realtime event dropped");
        SinkOutcome::Dropped { reason }
    }
}
