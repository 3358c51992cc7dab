//! 실시간 연결 태스크
//!
//! 하나의 WebSocket 연결을 소유하고 상태를 `connecting -> connected`로 관리합니다.
//! 하트비트는 이벤트와 무관하게 고정 주기로 보내며, `stale_after` 동안 응답이 없으면
//! 연결을 끊고 지수 백오프로 재접속한 뒤 채널에 다시 가입합니다.
//! 프레임 쓰기는 `write_timeout`으로 제한되어, 읽지 않는 상대가 세션을 붙잡지 못합니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use screlay_core::metrics as m;

use super::credentials::{Credential, CredentialProvider};
use super::protocol::{self, Inbound, PhoenixMessage, RefCounter};
use crate::config::RealtimeSinkConfig;
use crate::context::ClientContext;
use crate::error::SinkError;
use crate::state::{SinkStatus, StateCell};

/// 연결 태스크로 보내는 명령
#[derive(Debug)]
pub(crate) enum Command {
    Broadcast(Value),
}

/// 세션 종료 사유
enum SessionEnd {
    Cancelled,
    Lost { joined: bool, reason: String },
    /// 자격 증명 갱신이 연속으로 실패
    CredentialFailure(String),
}

enum Step {
    Cancel,
    Heartbeat,
    Command(Option<Command>),
    Refresh,
    Inbound(Option<Result<Message, tungstenite::Error>>),
}

pub(crate) struct Connection<P> {
    config: RealtimeSinkConfig,
    credentials: Arc<P>,
    context: Arc<ClientContext>,
    state: StateCell,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    refs: RefCounter,
    refresh_failures: u32,
}

impl<P: CredentialProvider> Connection<P> {
    pub(crate) fn new(
        config: RealtimeSinkConfig,
        credentials: Arc<P>,
        context: Arc<ClientContext>,
        state: StateCell,
        commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            credentials,
            context,
            state,
            commands,
            cancel,
            refs: RefCounter::default(),
            refresh_failures: 0,
        }
    }

    /// 취소될 때까지 연결을 유지합니다.
    pub(crate) async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.state.set_status(SinkStatus::Connecting);

            let delay = match self.session().await {
                SessionEnd::Cancelled => break,
                SessionEnd::Lost { joined, reason } => {
                    if joined {
                        attempt = 0;
                    }
                    let failures = self.state.record_failure(reason.clone());
                    let delay = self.config.backoff.next(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        reason = %reason,
                        failures,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "realtime connection lost, reconnecting"
                    );
                    self.state.set_status(SinkStatus::Disconnected);
                    delay
                }
                SessionEnd::CredentialFailure(reason) => {
                    self.state.record_failure(reason.clone());
                    self.state.set_status(SinkStatus::Backoff);
                    let delay = self.config.backoff.max;
                    warn!(
                        reason = %reason,
                        refresh_failures = self.refresh_failures,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "realtime credential refresh keeps failing, backing off"
                    );
                    delay
                }
            };

            gauge!(m::REALTIME_CONNECTED).set(0.0);
            self.state.update(|s| s.auth_token = None);

            if !self.pause(delay).await {
                break;
            }
            counter!(m::REALTIME_RECONNECTS_TOTAL).increment(1);
        }

        gauge!(m::REALTIME_CONNECTED).set(0.0);
        self.state.update(|s| {
            s.status = SinkStatus::Disconnected;
            s.auth_token = None;
        });
        info!("realtime connection task stopped");
    }

    /// 재접속 대기. 취소되거나 모든 핸들이 닫히면 `false`.
    async fn pause(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            let resume = tokio::select! {
                _ = self.cancel.cancelled() => Some(false),
                _ = &mut sleep => Some(true),
                cmd = self.commands.recv() => match cmd {
                    Some(_) => None,
                    None => Some(false),
                },
            };
            match resume {
                Some(resume) => return resume,
                None => self.state.record_drop(),
            }
        }
    }

    fn lost(joined: bool, reason: impl Into<String>) -> SessionEnd {
        SessionEnd::Lost {
            joined,
            reason: reason.into(),
        }
    }

    /// 접속용 자격 증명. 이미 갱신 시점이 지났으면 먼저 갱신합니다.
    async fn connect_credential(&mut self) -> Result<Credential, SessionEnd> {
        let current = self
            .credentials
            .current()
            .await
            .map_err(|e| Self::lost(false, e.to_string()))?;
        let due = self.credentials.can_refresh()
            && current
                .refresh_in(self.config.refresh_margin, Utc::now())
                .is_some_and(|d| d.is_zero());
        if !due {
            return Ok(current);
        }
        self.refresh().await
    }

    async fn refresh(&mut self) -> Result<Credential, SessionEnd> {
        match self.credentials.refresh().await {
            Ok(credential) => {
                self.refresh_failures = 0;
                counter!(m::REALTIME_TOKEN_REFRESHES_TOTAL, "result" => "ok").increment(1);
                Ok(credential)
            }
            Err(e) => {
                self.refresh_failures = self.refresh_failures.saturating_add(1);
                counter!(m::REALTIME_TOKEN_REFRESHES_TOTAL, "result" => "error").increment(1);
                warn!(
                    error = %e,
                    refresh_failures = self.refresh_failures,
                    "realtime credential refresh failed"
                );
                if self.refresh_failures >= self.config.max_refresh_failures {
                    Err(SessionEnd::CredentialFailure(e.to_string()))
                } else {
                    Err(Self::lost(false, e.to_string()))
                }
            }
        }
    }

    fn refresh_deadline(&self, credential: &Credential) -> Option<Instant> {
        if !self.credentials.can_refresh() {
            return None;
        }
        credential
            .refresh_in(self.config.refresh_margin, Utc::now())
            .map(|d| Instant::now() + d)
    }

    async fn session(&mut self) -> SessionEnd {
        let credential = match self.connect_credential().await {
            Ok(c) => c,
            Err(end) => return end,
        };

        let url = self.config.connect_url();
        let connect = tokio_tungstenite::connect_async(url.as_str());
        let ws = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            result = tokio::time::timeout(self.config.connect_timeout, connect) => match result {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => return Self::lost(false, format!("connect failed: {e}")),
                Err(_elapsed) => return Self::lost(false, "connect timed out"),
            },
        };
        let (mut write, mut read) = ws.split();

        let topic = self.config.topic();
        let ctx = self.context.snapshot();
        let join_ref = self.refs.next();
        let join = protocol::join(&topic, &ctx.username, &credential.access_token, join_ref.clone());
        if let Err(e) = send_frame(&mut write, &join, self.config.write_timeout).await {
            return Self::lost(false, e.to_string());
        }

        let reply = tokio::time::timeout(self.config.connect_timeout, async {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(e.to_string()),
                };
                let Ok(msg) = PhoenixMessage::parse(&text) else {
                    continue;
                };
                match protocol::classify(&msg, &topic, Some(&join_ref)) {
                    Inbound::JoinOk => return Ok(()),
                    Inbound::JoinError(reason) => return Err(format!("join rejected: {reason}")),
                    _ => continue,
                }
            }
            Err("closed before join reply".to_owned())
        });
        let joined = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            result = reply => result,
        };
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Self::lost(false, reason),
            Err(_elapsed) => return Self::lost(false, "join timed out"),
        }

        let stale = self.drain_commands();
        if stale > 0 {
            debug!(stale, "discarded broadcasts queued before reconnect");
        }
        let now = Utc::now();
        self.state.update(|s| {
            s.status = SinkStatus::Connected;
            s.consecutive_failure_count = 0;
            s.last_attempt_at = Some(now);
            s.last_heartbeat_at = Some(now);
            s.auth_token = Some(credential.access_token.clone());
            s.last_error = None;
        });
        gauge!(m::REALTIME_CONNECTED).set(1.0);
        info!(topic = %topic, "realtime channel joined");

        let track = protocol::track(&topic, &ctx, self.refs.next(), &join_ref);
        if let Err(e) = send_frame(&mut write, &track, self.config.write_timeout).await {
            return Self::lost(true, e.to_string());
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_reply = Instant::now();
        let mut refresh_at = self.refresh_deadline(&credential);

        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Cancel,
                _ = heartbeat.tick() => Step::Heartbeat,
                cmd = self.commands.recv() => Step::Command(cmd),
                _ = sleep_until_opt(refresh_at) => Step::Refresh,
                frame = read.next() => Step::Inbound(frame),
            };

            match step {
                Step::Cancel | Step::Command(None) => {
                    let close = write.send(Message::Close(None));
                    let _ = tokio::time::timeout(self.config.write_timeout, close).await;
                    return SessionEnd::Cancelled;
                }
                Step::Heartbeat => {
                    if last_reply.elapsed() > self.config.stale_after {
                        return Self::lost(true, "heartbeat replies stopped");
                    }
                    let hb = protocol::heartbeat(self.refs.next());
                    let track =
                        protocol::track(&topic, &self.context.snapshot(), self.refs.next(), &join_ref);
                    if let Err(e) = send_frame(&mut write, &hb, self.config.write_timeout).await {
                        return Self::lost(true, e.to_string());
                    }
                    if let Err(e) = send_frame(&mut write, &track, self.config.write_timeout).await {
                        return Self::lost(true, e.to_string());
                    }
                }
                Step::Command(Some(Command::Broadcast(payload))) => {
                    let frame = protocol::broadcast(
                        &topic,
                        &self.config.broadcast_event,
                        payload,
                        self.refs.next(),
                        &join_ref,
                    );
                    if let Err(e) = send_frame(&mut write, &frame, self.config.write_timeout).await {
                        self.state.record_drop();
                        return Self::lost(true, e.to_string());
                    }
                    self.state.record_success();
                    counter!(m::DELIVERY_SENT_TOTAL, m::LABEL_SINK => "realtime").increment(1);
                }
                Step::Refresh => match self.refresh().await {
                    Ok(fresh) => {
                        let frame = protocol::access_token(
                            &topic,
                            &fresh.access_token,
                            self.refs.next(),
                            &join_ref,
                        );
                        if let Err(e) = send_frame(&mut write, &frame, self.config.write_timeout).await {
                            return Self::lost(true, e.to_string());
                        }
                        refresh_at = self.refresh_deadline(&fresh);
                        self.state.update(|s| s.auth_token = Some(fresh.access_token));
                    }
                    Err(SessionEnd::Lost { reason, .. }) => {
                        // 다음 시도까지 잠시 대기
                        refresh_at = Some(Instant::now() + retry_delay(&self.config));
                        debug!(reason = %reason, "credential refresh will be retried");
                    }
                    Err(end) => return end,
                },
                Step::Inbound(None) => return Self::lost(true, "stream ended"),
                Step::Inbound(Some(Err(e))) => return Self::lost(true, e.to_string()),
                Step::Inbound(Some(Ok(Message::Close(frame)))) => {
                    return Self::lost(true, format!("server closed: {frame:?}"));
                }
                Step::Inbound(Some(Ok(Message::Text(text)))) => {
                    let Ok(msg) = PhoenixMessage::parse(&text) else {
                        debug!("ignoring unparsable realtime frame");
                        continue;
                    };
                    match protocol::classify(&msg, &topic, Some(&join_ref)) {
                        Inbound::HeartbeatReply => {
                            last_reply = Instant::now();
                            self.state.update(|s| s.last_heartbeat_at = Some(Utc::now()));
                        }
                        Inbound::TokenExpired(reason) if self.credentials.can_refresh() => {
                            info!(reason = %reason, "realtime token expired, refreshing");
                            refresh_at = Some(Instant::now());
                        }
                        Inbound::TokenExpired(reason) => {
                            return Self::lost(true, format!("token expired: {reason}"));
                        }
                        Inbound::ChannelClosed(reason) => {
                            return Self::lost(true, format!("channel closed: {reason}"));
                        }
                        Inbound::JoinOk | Inbound::JoinError(_) | Inbound::Other => {}
                    }
                }
                Step::Inbound(Some(Ok(_))) => {}
            }
        }
    }

    fn drain_commands(&mut self) -> usize {
        let mut drained = 0;
        while self.commands.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

fn retry_delay(config: &RealtimeSinkConfig) -> Duration {
    config.backoff.first.max(Duration::from_millis(100))
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn send_frame<S>(write: &mut S, msg: &PhoenixMessage, limit: Duration) -> Result<(), SinkError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = msg.to_text()?;
    match tokio::time::timeout(limit, write.send(Message::text(text))).await {
        Ok(sent) => sent.map_err(|e| SinkError::Connection(e.to_string())),
        Err(_elapsed) => Err(SinkError::Timeout(limit)),
    }
}
