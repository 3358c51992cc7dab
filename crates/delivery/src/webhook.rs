//! 채팅 웹훅 싱크
//!
//! 템플릿으로 렌더링한 메시지를 HTTP POST합니다. 재시도를 소진하면 연속 실패 횟수에
//! 비례한 냉각 시간 동안 전송을 시도하지 않고 이벤트를 버립니다. 내구성 큐는 없습니다.
//!
//! 주요 플레이어가 등장하는 이벤트는 보조 웹훅에 CSV 요약 한 줄을 추가로 보냅니다.
//! 이 전송의 실패는 싱크 상태에 반영하지 않습니다.

use metrics::counter;
use reqwest::header::HeaderMap;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use screlay_core::event::Event;
use screlay_core::metrics as m;

use crate::config::WebhookSinkConfig;
use crate::error::SinkError;
use crate::http::HttpPoster;
use crate::payload::{technical_line, webhook_body};
use crate::sink::SinkOutcome;
use crate::state::{SinkKind, SinkStatus, StateCell};

pub struct WebhookSink {
    config: WebhookSinkConfig,
    poster: HttpPoster,
    state: StateCell,
    cooldown_until: Option<Instant>,
}

impl WebhookSink {
    pub fn new(config: WebhookSinkConfig) -> Result<Self, SinkError> {
        let poster = HttpPoster::new(config.request_timeout)?;
        let state = StateCell::new(SinkKind::Webhook.as_str(), SinkKind::Webhook);
        state.set_status(SinkStatus::Connected);
        Ok(Self {
            config,
            poster,
            state,
            cooldown_until: None,
        })
    }

    pub fn config(&self) -> &WebhookSinkConfig {
        &self.config
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }

    pub async fn deliver(&mut self, event: &Event, content: &str) -> SinkOutcome {
        let now = Instant::now();
        if let Some(until) = self.cooldown_until {
            if now < until {
                return self.drop_event(event, "cooldown");
            }
            self.cooldown_until = None;
            self.state.set_status(SinkStatus::Connected);
        }

        let url = self.config.url_for(&event.event_type).to_owned();
        let body = webhook_body(self.config.format, event, content);
        let result = self
            .poster
            .post_with_retry(
                SinkKind::Webhook,
                &url,
                &HeaderMap::new(),
                &body,
                self.config.max_retries,
                &self.config.backoff,
            )
            .await;

        self.send_technical(event).await;

        match result {
            Ok(success) => {
                self.state.record_success();
                counter!(m::DELIVERY_SENT_TOTAL, m::LABEL_SINK => "webhook").increment(1);
                SinkOutcome::Delivered {
                    attempts: success.attempts,
                }
            }
            Err(e) if e.is_retryable() => {
                let failures = self.state.record_failure(e.to_string());
                let cooldown = self.config.backoff.next(failures.saturating_sub(1));
                self.cooldown_until = Some(Instant::now() + cooldown);
                self.state.set_status(SinkStatus::Backoff);
                warn!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    failures,
                    cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "webhook retries exhausted, entering backoff"
                );
                self.drop_event(event, "retries_exhausted")
            }
            Err(e) => {
                self.state.record_failure(e.to_string());
                warn!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    error = %e,
                    "webhook rejected event"
                );
                self.drop_event(event, "rejected")
            }
        }
    }

    async fn send_technical(&self, event: &Event) {
        let (Some(url), Some(player)) = (
            self.config.secondary_url.as_deref(),
            self.config.important_player(event),
        ) else {
            return;
        };

        let body = json!({ "content": technical_line(event) });
        let result = self
            .poster
            .post_with_retry(
                SinkKind::Webhook,
                url,
                &HeaderMap::new(),
                &body,
                self.config.max_retries,
                &self.config.backoff,
            )
            .await;
        match result {
            Ok(_) => debug!(event_type = %event.event_type, player, "technical line sent"),
            Err(e) => warn!(
                event_type = %event.event_type,
                player,
                error = %e,
                "technical line not delivered"
            ),
        }
    }

    fn drop_event(&self, event: &Event, reason: &'static str) -> SinkOutcome {
        self.state.record_drop();
        counter!(
            m::DELIVERY_DROPPED_TOTAL,
            m::LABEL_SINK => "webhook",
            m::LABEL_REASON => reason
        )
        .increment(1);
        info!(event_type = %event.event_type, reason, "webhook event dropped");
        SinkOutcome::Dropped { reason }
    }
}
