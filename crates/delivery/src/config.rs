//! 전달 설정
//!
//! core의 [`DeliveryConfig`](screlay_core::config::DeliveryConfig)에서 파생되며,
//! 비활성화된 싱크는 `None`으로 표현됩니다.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use screlay_core::config::{RealtimeConfig, ScRelayConfig, StoreConfig, WebhookConfig};
use screlay_core::event::Event;

use crate::backoff::BackoffPolicy;
use crate::error::SinkError;

/// 이벤트 타입 필터 (비어 있으면 전부 허용)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventTypeFilter(Option<HashSet<String>>);

impl EventTypeFilter {
    pub fn all() -> Self {
        Self(None)
    }

    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = types.into_iter().map(Into::into).collect();
        if set.is_empty() {
            Self(None)
        } else {
            Self(Some(set))
        }
    }

    pub fn allows(&self, event_type: &str) -> bool {
        self.0.as_ref().is_none_or(|set| set.contains(event_type))
    }
}

/// 웹훅 본문 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFormat {
    /// `{"content": "..."}`
    Content,
    /// `{"embeds": [...]}`
    Embed,
}

impl WebhookFormat {
    pub fn parse(s: &str) -> Result<Self, SinkError> {
        match s {
            "content" => Ok(Self::Content),
            "embed" => Ok(Self::Embed),
            other => Err(SinkError::Config {
                field: "delivery.webhook.format".to_owned(),
                reason: format!("unknown format '{other}'"),
            }),
        }
    }
}

/// 웹훅 싱크 설정
#[derive(Debug, Clone)]
pub struct WebhookSinkConfig {
    pub url: String,
    pub secondary_url: Option<String>,
    pub secondary_event_types: HashSet<String>,
    /// 관련 이벤트마다 기술 요약을 `secondary_url`로 추가 전송할 플레이어
    pub important_players: HashSet<String>,
    pub event_types: EventTypeFilter,
    pub format: WebhookFormat,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub request_timeout: Duration,
}

impl WebhookSinkConfig {
    /// 기본 URL만 가진 설정
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secondary_url: None,
            secondary_event_types: HashSet::new(),
            important_players: HashSet::new(),
            event_types: EventTypeFilter::all(),
            format: WebhookFormat::Content,
            max_retries: 3,
            backoff: BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(30)),
            request_timeout: Duration::from_secs(10),
        }
    }

    fn from_core(core: &WebhookConfig, request_timeout: Duration) -> Result<Self, SinkError> {
        Ok(Self {
            url: core.url.clone(),
            secondary_url: non_empty(&core.secondary_url),
            secondary_event_types: core.secondary_event_types.iter().cloned().collect(),
            important_players: core.important_players.iter().cloned().collect(),
            event_types: EventTypeFilter::only(core.event_types.iter().cloned()),
            format: WebhookFormat::parse(&core.format)?,
            max_retries: core.max_retries,
            backoff: BackoffPolicy::new(
                Duration::from_millis(core.initial_backoff_ms),
                Duration::from_millis(core.max_backoff_ms),
            ),
            request_timeout,
        })
    }

    /// 이벤트 타입에 맞는 전송 URL
    pub fn url_for(&self, event_type: &str) -> &str {
        match &self.secondary_url {
            Some(url) if self.secondary_event_types.contains(event_type) => url,
            _ => &self.url,
        }
    }

    /// 이벤트에 등장하는 주요 플레이어 (`player`, `victim`, `killer`, `owner` 순)
    pub fn important_player<'a>(&self, event: &'a Event) -> Option<&'a str> {
        if self.important_players.is_empty() {
            return None;
        }
        IMPORTANT_PLAYER_FIELDS
            .iter()
            .filter_map(|name| event.field(name))
            .find(|value| self.important_players.contains(*value))
    }
}

const IMPORTANT_PLAYER_FIELDS: [&str; 4] = ["player", "victim", "killer", "owner"];

/// 저장소 싱크 설정
#[derive(Debug, Clone)]
pub struct StoreSinkConfig {
    pub url: String,
    pub api_key: String,
    pub event_types: EventTypeFilter,
    pub hash_fields: Vec<String>,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub overflow_capacity: usize,
    pub table_map: BTreeMap<String, String>,
    pub request_timeout: Duration,
}

impl StoreSinkConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let core = StoreConfig::default();
        Self {
            url: url.into(),
            api_key: api_key.into(),
            event_types: EventTypeFilter::all(),
            hash_fields: core.hash_fields,
            max_retries: core.max_retries,
            backoff: BackoffPolicy::new(
                Duration::from_millis(core.initial_backoff_ms),
                Duration::from_millis(core.max_backoff_ms),
            ),
            overflow_capacity: core.overflow_capacity,
            table_map: BTreeMap::new(),
            request_timeout: Duration::from_secs(10),
        }
    }

    fn from_core(core: &StoreConfig, request_timeout: Duration) -> Self {
        Self {
            url: core.url.clone(),
            api_key: core.api_key.clone(),
            event_types: EventTypeFilter::only(core.event_types.iter().cloned()),
            hash_fields: core.hash_fields.clone(),
            max_retries: core.max_retries,
            backoff: BackoffPolicy::new(
                Duration::from_millis(core.initial_backoff_ms),
                Duration::from_millis(core.max_backoff_ms),
            ),
            overflow_capacity: core.overflow_capacity,
            table_map: core.table_map.clone(),
            request_timeout,
        }
    }

    /// 이벤트 타입이 기록될 테이블
    pub fn table_for<'a>(&'a self, event_type: &'a str) -> &'a str {
        self.table_map
            .get(event_type)
            .map(String::as_str)
            .unwrap_or(event_type)
    }

    /// `POST` 대상 URL
    pub fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url.trim_end_matches('/'))
    }
}

/// 실시간 싱크 설정
#[derive(Clone)]
pub struct RealtimeSinkConfig {
    pub url: String,
    pub api_key: String,
    pub channel: String,
    pub broadcast_event: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub auth_url: Option<String>,
    pub event_types: EventTypeFilter,
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
    pub connect_timeout: Duration,
    /// 프레임 하나를 쓰는 데 허용하는 시간. 넘기면 연결을 잃은 것으로 봅니다.
    pub write_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub refresh_margin: Duration,
    pub max_refresh_failures: u32,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for RealtimeSinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSinkConfig")
            .field("url", &self.url)
            .field("channel", &self.channel)
            .field("broadcast_event", &self.broadcast_event)
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("stale_after", &self.stale_after)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl RealtimeSinkConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let core = RealtimeConfig::default();
        Self {
            url: url.into(),
            api_key: api_key.into(),
            channel: core.channel,
            broadcast_event: core.broadcast_event,
            access_token: None,
            refresh_token: None,
            auth_url: None,
            event_types: EventTypeFilter::all(),
            heartbeat_interval: Duration::from_secs(core.heartbeat_interval_secs),
            stale_after: Duration::from_secs(core.stale_after_secs),
            connect_timeout: Duration::from_secs(core.connect_timeout_secs),
            write_timeout: Duration::from_secs(core.connect_timeout_secs),
            backoff: BackoffPolicy::new(
                Duration::from_millis(core.initial_backoff_ms),
                Duration::from_millis(core.max_backoff_ms),
            ),
            refresh_margin: Duration::from_secs(core.refresh_margin_secs),
            max_refresh_failures: core.max_refresh_failures,
            request_timeout: Duration::from_secs(10),
        }
    }

    fn from_core(core: &RealtimeConfig, request_timeout: Duration) -> Self {
        Self {
            url: core.url.clone(),
            api_key: core.api_key.clone(),
            channel: core.channel.clone(),
            broadcast_event: core.broadcast_event.clone(),
            access_token: non_empty(&core.access_token),
            refresh_token: non_empty(&core.refresh_token),
            auth_url: non_empty(&core.auth_url),
            event_types: EventTypeFilter::only(core.event_types.iter().cloned()),
            heartbeat_interval: Duration::from_secs(core.heartbeat_interval_secs),
            stale_after: Duration::from_secs(core.stale_after_secs),
            connect_timeout: Duration::from_secs(core.connect_timeout_secs),
            write_timeout: Duration::from_secs(core.connect_timeout_secs),
            backoff: BackoffPolicy::new(
                Duration::from_millis(core.initial_backoff_ms),
                Duration::from_millis(core.max_backoff_ms),
            ),
            refresh_margin: Duration::from_secs(core.refresh_margin_secs),
            max_refresh_failures: core.max_refresh_failures,
            request_timeout,
        }
    }

    /// Phoenix 채널 토픽
    pub fn topic(&self) -> String {
        format!("realtime:{}", self.channel)
    }

    /// 접속 URL (`apikey`, `vsn` 쿼리 포함)
    pub fn connect_url(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}apikey={}&vsn=1.0.0", self.url, self.api_key)
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.heartbeat_interval.is_zero() {
            return Err(config_err(
                "delivery.realtime.heartbeat_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.stale_after <= self.heartbeat_interval {
            return Err(config_err(
                "delivery.realtime.stale_after_secs",
                "must be greater than heartbeat_interval_secs",
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(config_err(
                "delivery.realtime.connect_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.refresh_token.is_some() && self.auth_url.is_none() {
            return Err(config_err(
                "delivery.realtime.auth_url",
                "required when refresh_token is set",
            ));
        }
        Ok(())
    }
}

/// DeliveryManager 전체 설정
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// 싱크별 큐 용량
    pub queue_capacity: usize,
    /// stop 시 큐 소진 대기 한도
    pub drain_timeout: Duration,
    pub webhook: Option<WebhookSinkConfig>,
    pub store: Option<StoreSinkConfig>,
    pub realtime: Option<RealtimeSinkConfig>,
    pub templates: BTreeMap<String, String>,
    /// 설정된 사용자 이름 (비어 있으면 `connected` 이벤트에서 학습)
    pub username: String,
    pub client_version: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            drain_timeout: Duration::from_secs(5),
            webhook: None,
            store: None,
            realtime: None,
            templates: BTreeMap::new(),
            username: String::new(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

impl ManagerConfig {
    /// core 설정에서 전달 설정을 생성하고 검증합니다.
    pub fn from_core(core: &ScRelayConfig) -> Result<Self, SinkError> {
        let delivery = &core.delivery;
        let timeout = Duration::from_secs(delivery.request_timeout_secs);

        let webhook = if delivery.webhook.enabled {
            Some(WebhookSinkConfig::from_core(&delivery.webhook, timeout)?)
        } else {
            None
        };
        let store = delivery
            .store
            .enabled
            .then(|| StoreSinkConfig::from_core(&delivery.store, timeout));
        let realtime = delivery
            .realtime
            .enabled
            .then(|| RealtimeSinkConfig::from_core(&delivery.realtime, timeout));

        let config = Self {
            queue_capacity: delivery.queue_capacity,
            drain_timeout: timeout,
            webhook,
            store,
            realtime,
            templates: delivery.templates.clone(),
            username: core.general.username.clone(),
            client_version: core.general.client_version.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.queue_capacity == 0 {
            return Err(config_err("delivery.queue_capacity", "must be greater than 0"));
        }
        if let Some(store) = &self.store
            && store.overflow_capacity == 0
        {
            return Err(config_err(
                "delivery.store.overflow_capacity",
                "must be greater than 0",
            ));
        }
        if let Some(realtime) = &self.realtime {
            realtime.validate()?;
        }
        Ok(())
    }

    /// 활성화된 싱크 수
    pub fn enabled_sinks(&self) -> usize {
        usize::from(self.webhook.is_some())
            + usize::from(self.store.is_some())
            + usize::from(self.realtime.is_some())
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_owned())
}

fn config_err(field: &str, reason: &str) -> SinkError {
    SinkError::Config {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}
