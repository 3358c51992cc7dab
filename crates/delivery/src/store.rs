//! REST 저장소 싱크 (PostgREST)
//!
//! 이벤트 한 건을 `POST {url}/rest/v1/{table}`로 한 행 기록합니다. 409는 이미 저장된
//! 중복으로 보고 성공 처리합니다. 재시도를 소진한 행은 크기 제한이 있는 오버플로
//! 버퍼에 들어가며 (가득 차면 가장 오래된 행을 버림), 다음 성공 직후 순서대로 재전송됩니다.

use std::collections::VecDeque;

use metrics::{counter, gauge};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, info, warn};

use screlay_core::event::Event;
use screlay_core::metrics as m;

use crate::config::StoreSinkConfig;
use crate::context::ClientSnapshot;
use crate::error::SinkError;
use crate::http::HttpPoster;
use crate::payload::store_row;
use crate::sink::SinkOutcome;
use crate::state::{SinkKind, SinkStatus, StateCell};

/// 재전송 대기 행
#[derive(Debug, Clone)]
struct PendingRow {
    table: String,
    event_type: String,
    row: Value,
}

pub struct StoreSink {
    config: StoreSinkConfig,
    poster: HttpPoster,
    headers: HeaderMap,
    state: StateCell,
    overflow: VecDeque<PendingRow>,
}

impl StoreSink {
    pub fn new(config: StoreSinkConfig) -> Result<Self, SinkError> {
        let poster = HttpPoster::new(config.request_timeout)?.with_ok_statuses(&[409]);
        let headers = store_headers(&config.api_key)?;
        let state = StateCell::new(SinkKind::Store.as_str(), SinkKind::Store);
        state.set_status(SinkStatus::Connected);
        Ok(Self {
            config,
            poster,
            headers,
            state,
            overflow: VecDeque::new(),
        })
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }

    pub fn config(&self) -> &StoreSinkConfig {
        &self.config
    }

    /// 오버플로 버퍼에 남은 행 수
    pub fn pending(&self) -> usize {
        self.overflow.len()
    }

    pub async fn deliver(&mut self, event: &Event, ctx: &ClientSnapshot) -> SinkOutcome {
        let pending = PendingRow {
            table: self.config.table_for(&event.event_type).to_owned(),
            event_type: event.event_type.clone(),
            row: store_row(event, ctx, &self.config.hash_fields),
        };
        let url = self.config.endpoint(&pending.table);

        let result = self
            .poster
            .post_with_retry(
                SinkKind::Store,
                &url,
                &self.headers,
                &pending.row,
                self.config.max_retries,
                &self.config.backoff,
            )
            .await;

        match result {
            Ok(success) => {
                if success.status == 409 {
                    debug!(table = %pending.table, "row already stored");
                }
                self.state.record_success();
                counter!(m::DELIVERY_SENT_TOTAL, m::LABEL_SINK => "store").increment(1);
                self.flush_overflow().await;
                SinkOutcome::Delivered {
                    attempts: success.attempts,
                }
            }
            Err(e) if e.is_retryable() => {
                let failures = self.state.record_failure(e.to_string());
                self.state.set_status(SinkStatus::Backoff);
                warn!(
                    table = %pending.table,
                    event_id = %event.id,
                    failures,
                    error = %e,
                    "store retries exhausted, buffering row"
                );
                self.buffer(pending);
                SinkOutcome::Buffered {
                    pending: self.overflow.len(),
                }
            }
            Err(e) => {
                self.state.record_failure(e.to_string());
                self.state.record_drop();
                counter!(
                    m::DELIVERY_DROPPED_TOTAL,
                    m::LABEL_SINK => "store",
                    m::LABEL_REASON => "rejected"
                )
                .increment(1);
                warn!(table = %pending.table, error = %e, "store rejected row");
                SinkOutcome::Dropped { reason: "rejected" }
            }
        }
    }

    fn buffer(&mut self, row: PendingRow) {
        if self.overflow.len() >= self.config.overflow_capacity
            && let Some(oldest) = self.overflow.pop_front()
        {
            self.state.record_drop();
            counter!(
                m::DELIVERY_DROPPED_TOTAL,
                m::LABEL_SINK => "store",
                m::LABEL_REASON => "overflow"
            )
            .increment(1);
            warn!(event_type = %oldest.event_type, "store overflow full, dropped oldest row");
        }
        self.overflow.push_back(row);
        gauge!(m::STORE_OVERFLOW_SIZE).set(self.overflow.len() as f64);
    }

    /// 버퍼된 행을 오래된 순으로 한 번씩 재전송합니다. 첫 실패에서 멈춥니다.
    async fn flush_overflow(&mut self) {
        if self.overflow.is_empty() {
            return;
        }
        let before = self.overflow.len();

        while let Some(pending) = self.overflow.front() {
            let url = self.config.endpoint(&pending.table);
            match self.poster.post_once(&url, &self.headers, &pending.row).await {
                Ok(_) => {
                    self.overflow.pop_front();
                    self.state.update(|s| s.delivered += 1);
                    counter!(m::DELIVERY_SENT_TOTAL, m::LABEL_SINK => "store").increment(1);
                }
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, remaining = self.overflow.len(), "overflow flush paused");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "store rejected buffered row, dropping");
                    self.overflow.pop_front();
                    self.state.record_drop();
                    counter!(
                        m::DELIVERY_DROPPED_TOTAL,
                        m::LABEL_SINK => "store",
                        m::LABEL_REASON => "rejected"
                    )
                    .increment(1);
                }
            }
        }

        gauge!(m::STORE_OVERFLOW_SIZE).set(self.overflow.len() as f64);
        info!(
            flushed = before - self.overflow.len(),
            remaining = self.overflow.len(),
            "store overflow flushed"
        );
    }
}

fn store_headers(api_key: &str) -> Result<HeaderMap, SinkError> {
    let invalid = |e: reqwest::header::InvalidHeaderValue| SinkError::Config {
        field: "delivery.store.api_key".to_owned(),
        reason: e.to_string(),
    };
    let mut headers = HeaderMap::new();
    headers.insert("apikey", HeaderValue::from_str(api_key).map_err(invalid)?);
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(invalid)?,
    );
    headers.insert("prefer", HeaderValue::from_static("return=minimal"));
    Ok(headers)
}
