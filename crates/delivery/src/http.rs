//! HTTP 전송 공통부
//!
//! 웹훅과 저장소 싱크가 공유하는 POST + 재시도 루프입니다.
//! 모든 요청은 reqwest 클라이언트 타임아웃과 `tokio::time::timeout`을 함께 가집니다.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use tracing::{debug, warn};

use screlay_core::metrics as m;

use crate::backoff::BackoffPolicy;
use crate::error::SinkError;
use crate::state::SinkKind;

/// 에러 본문 최대 보존 길이
const MAX_ERROR_BODY: usize = 256;

/// 타임아웃이 설정된 reqwest 클라이언트를 생성합니다.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, SinkError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("screlay/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SinkError::Config {
            field: "delivery.request_timeout_secs".to_owned(),
            reason: format!("failed to build http client: {e}"),
        })
}

/// 재시도 포함 POST 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostSuccess {
    pub status: u16,
    /// 성공까지 사용한 시도 수 (1부터)
    pub attempts: u32,
}

/// JSON POST 전송기
#[derive(Debug, Clone)]
pub struct HttpPoster {
    client: reqwest::Client,
    timeout: Duration,
    /// 2xx 외에 성공으로 취급할 상태 코드
    ok_statuses: Vec<u16>,
}

impl HttpPoster {
    pub fn new(timeout: Duration) -> Result<Self, SinkError> {
        Ok(Self {
            client: build_client(timeout)?,
            timeout,
            ok_statuses: Vec::new(),
        })
    }

    pub fn with_ok_statuses(mut self, statuses: &[u16]) -> Self {
        self.ok_statuses = statuses.to_vec();
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// 한 번 전송합니다. 2xx 또는 `ok_statuses`에 있는 상태는 성공입니다.
    pub async fn post_once(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<u16, SinkError> {
        let request = self
            .client
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send();

        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(SinkError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => return Err(SinkError::Timeout(self.timeout)),
        };

        let status = response.status().as_u16();
        if response.status().is_success() || self.ok_statuses.contains(&status) {
            return Ok(status);
        }

        let retry_after = parse_retry_after(response.headers());
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(SinkError::Http {
            status,
            body,
            retry_after,
        })
    }

    /// 재시도 대상 에러에 한해 `max_retries`번까지 다시 시도합니다.
    ///
    /// 반환된 에러가 [`SinkError::is_retryable`]이면 재시도를 모두 소진한 것이고,
    /// 아니면 첫 비재시도 에러에서 즉시 멈춘 것입니다.
    pub async fn post_with_retry(
        &self,
        kind: SinkKind,
        url: &str,
        headers: &HeaderMap,
        body: &Value,
        max_retries: u32,
        backoff: &BackoffPolicy,
    ) -> Result<PostSuccess, SinkError> {
        let mut last_error: Option<SinkError> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let hint = last_error.as_ref().and_then(SinkError::retry_after);
                let delay = backoff.next_with_hint(attempt - 1, hint);
                warn!(
                    sink = %kind,
                    attempt = attempt,
                    backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying delivery"
                );
                counter!(m::DELIVERY_RETRIES_TOTAL, m::LABEL_SINK => kind.as_str()).increment(1);
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            let result = self.post_once(url, headers, body).await;
            histogram!(m::DELIVERY_DURATION_SECONDS, m::LABEL_SINK => kind.as_str())
                .record(started.elapsed().as_secs_f64());

            match result {
                Ok(status) => {
                    debug!(sink = %kind, status, attempt, "delivered");
                    return Ok(PostSuccess {
                        status,
                        attempts: attempt + 1,
                    });
                }
                Err(e) if e.is_retryable() => {
                    debug!(sink = %kind, attempt, error = %e, "retryable delivery failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| SinkError::Transport("no attempt made".to_owned())))
    }
}

/// `Retry-After` 헤더 (초 단위만, HTTP-date는 무시)
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && (0.0..=f64::from(u32::MAX)).contains(secs))
        .map(Duration::from_secs_f64)
}
