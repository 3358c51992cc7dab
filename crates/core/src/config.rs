//! 설정 관리 -- screlay.toml 파싱 및 런타임 설정
//!
//! [`ScRelayConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//! 전역 싱글톤 없이 데몬이 한 번 로드한 값을 각 컴포넌트 생성자에 주입합니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SCRELAY_WATCHER_LOG_PATH=/games/Game.log` 형식)
//! 3. 설정 파일 (`screlay.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), screlay_core::error::ScRelayError> {
//! use screlay_core::config::ScRelayConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ScRelayConfig::load("screlay.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ScRelayConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ScRelayError};

/// screlay 통합 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScRelayConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 로그 감시 설정
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// 이벤트 패턴 집합 (`[[patterns]]`)
    #[serde(default = "default_patterns")]
    pub patterns: Vec<PatternConfig>,
    /// 중복 억제/상한 설정
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// 이벤트 버스 설정
    #[serde(default)]
    pub bus: BusConfig,
    /// 외부 전송 설정
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for ScRelayConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            watcher: WatcherConfig::default(),
            patterns: default_patterns(),
            rate_limit: RateLimitConfig::default(),
            bus: BusConfig::default(),
            delivery: DeliveryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ScRelayConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 환경변수 오버라이드 적용
    /// 3. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ScRelayError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음, 검증 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ScRelayError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScRelayError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ScRelayError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ScRelayError> {
        toml::from_str(toml_str).map_err(|e| {
            ScRelayError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `SCRELAY_{SECTION}_{FIELD}`
    /// 예: `SCRELAY_DELIVERY_WEBHOOK_URL=https://...`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SCRELAY_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SCRELAY_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.username, "SCRELAY_GENERAL_USERNAME");
        override_string(
            &mut self.general.client_version,
            "SCRELAY_GENERAL_CLIENT_VERSION",
        );

        // Watcher
        override_string(&mut self.watcher.log_path, "SCRELAY_WATCHER_LOG_PATH");
        override_string(&mut self.watcher.start_mode, "SCRELAY_WATCHER_START_MODE");
        override_u64(
            &mut self.watcher.poll_interval_ms,
            "SCRELAY_WATCHER_POLL_INTERVAL_MS",
        );
        override_string(&mut self.watcher.offset_file, "SCRELAY_WATCHER_OFFSET_FILE");

        // Rate limit
        override_u64(
            &mut self.rate_limit.dedup_window_secs,
            "SCRELAY_RATE_LIMIT_DEDUP_WINDOW_SECS",
        );
        override_u32(
            &mut self.rate_limit.max_duplicates,
            "SCRELAY_RATE_LIMIT_MAX_DUPLICATES",
        );
        override_u32(
            &mut self.rate_limit.ceiling_per_window,
            "SCRELAY_RATE_LIMIT_CEILING_PER_WINDOW",
        );
        override_u64(
            &mut self.rate_limit.ceiling_window_secs,
            "SCRELAY_RATE_LIMIT_CEILING_WINDOW_SECS",
        );
        override_string(
            &mut self.rate_limit.ceiling_scope,
            "SCRELAY_RATE_LIMIT_CEILING_SCOPE",
        );

        // Bus
        override_string(&mut self.bus.trace_path, "SCRELAY_BUS_TRACE_PATH");

        // Delivery: webhook
        override_bool(
            &mut self.delivery.webhook.enabled,
            "SCRELAY_DELIVERY_WEBHOOK_ENABLED",
        );
        override_string(&mut self.delivery.webhook.url, "SCRELAY_DELIVERY_WEBHOOK_URL");
        override_string(
            &mut self.delivery.webhook.secondary_url,
            "SCRELAY_DELIVERY_WEBHOOK_SECONDARY_URL",
        );

        // Delivery: store
        override_bool(
            &mut self.delivery.store.enabled,
            "SCRELAY_DELIVERY_STORE_ENABLED",
        );
        override_string(&mut self.delivery.store.url, "SCRELAY_DELIVERY_STORE_URL");
        override_string(
            &mut self.delivery.store.api_key,
            "SCRELAY_DELIVERY_STORE_API_KEY",
        );

        // Delivery: realtime
        override_bool(
            &mut self.delivery.realtime.enabled,
            "SCRELAY_DELIVERY_REALTIME_ENABLED",
        );
        override_string(
            &mut self.delivery.realtime.url,
            "SCRELAY_DELIVERY_REALTIME_URL",
        );
        override_string(
            &mut self.delivery.realtime.api_key,
            "SCRELAY_DELIVERY_REALTIME_API_KEY",
        );
        override_string(
            &mut self.delivery.realtime.access_token,
            "SCRELAY_DELIVERY_REALTIME_ACCESS_TOKEN",
        );
        override_string(
            &mut self.delivery.realtime.refresh_token,
            "SCRELAY_DELIVERY_REALTIME_REFRESH_TOKEN",
        );
        override_string(
            &mut self.delivery.realtime.auth_url,
            "SCRELAY_DELIVERY_REALTIME_AUTH_URL",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "SCRELAY_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "SCRELAY_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "SCRELAY_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 빈 패턴 집합과 빈 로그 경로는 시작 시 치명적 에러입니다.
    pub fn validate(&self) -> Result<(), ScRelayError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        // Watcher
        if self.watcher.log_path.trim().is_empty() {
            return Err(invalid("watcher.log_path", "must not be empty"));
        }
        let valid_modes = ["catch_up", "live_tail", "resume"];
        if !valid_modes.contains(&self.watcher.start_mode.as_str()) {
            return Err(invalid(
                "watcher.start_mode",
                format!("must be one of: {}", valid_modes.join(", ")),
            ));
        }
        if self.watcher.poll_interval_ms == 0 {
            return Err(invalid("watcher.poll_interval_ms", "must be greater than 0"));
        }
        if self.watcher.max_consecutive_failures == 0 {
            return Err(invalid(
                "watcher.max_consecutive_failures",
                "must be greater than 0",
            ));
        }
        if self.watcher.channel_capacity == 0 {
            return Err(invalid("watcher.channel_capacity", "must be greater than 0"));
        }

        // Patterns
        if self.patterns.is_empty() {
            return Err(invalid("patterns", "pattern set must not be empty"));
        }
        let mut seen = HashSet::new();
        for pattern in &self.patterns {
            if pattern.name.trim().is_empty() {
                return Err(invalid("patterns.name", "must not be empty"));
            }
            if pattern.regex.is_empty() {
                return Err(invalid(
                    format!("patterns.{}.regex", pattern.name),
                    "must not be empty",
                ));
            }
            if !seen.insert(pattern.name.as_str()) {
                return Err(invalid(
                    "patterns.name",
                    format!("duplicate pattern name '{}'", pattern.name),
                ));
            }
        }

        // Rate limit
        if self.rate_limit.dedup_window_secs == 0 {
            return Err(invalid(
                "rate_limit.dedup_window_secs",
                "must be greater than 0",
            ));
        }
        if self.rate_limit.max_duplicates == 0 {
            return Err(invalid(
                "rate_limit.max_duplicates",
                "must be greater than 0",
            ));
        }
        if self.rate_limit.ceiling_window_secs == 0 {
            return Err(invalid(
                "rate_limit.ceiling_window_secs",
                "must be greater than 0",
            ));
        }
        let valid_scopes = ["per_type", "global"];
        if !valid_scopes.contains(&self.rate_limit.ceiling_scope.as_str()) {
            return Err(invalid(
                "rate_limit.ceiling_scope",
                format!("must be one of: {}", valid_scopes.join(", ")),
            ));
        }

        self.delivery.validate()?;

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must not be 0 when metrics are enabled"));
        }

        Ok(())
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ScRelayError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 기본 사용자명 (로그의 `connected` 이벤트로 갱신됨)
    pub username: String,
    /// 클라이언트 버전 (realtime presence / payload에 포함)
    pub client_version: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            username: String::new(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// 로그 감시 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// 감시할 로그 파일 경로
    pub log_path: String,
    /// 시작 모드 (catch_up, live_tail, resume)
    pub start_mode: String,
    /// 폴링 간격 (밀리초)
    pub poll_interval_ms: u64,
    /// 오프셋 저장 파일 (빈 문자열이면 메모리에만 유지)
    pub offset_file: String,
    /// 치명적 에러로 전환되기까지의 연속 실패 횟수
    pub max_consecutive_failures: u32,
    /// 최대 줄 길이 (바이트, 초과 시 폐기)
    pub max_line_length: usize,
    /// watcher → 분류기 채널 용량
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            log_path: "Game.log".to_owned(),
            start_mode: "live_tail".to_owned(),
            poll_interval_ms: 500,
            offset_file: String::new(),
            max_consecutive_failures: 10,
            max_line_length: 64 * 1024,
            channel_capacity: 1024,
        }
    }
}

/// 필드 접두어 제외 규칙
///
/// 캡처된 `field` 값이 `prefixes` 중 하나로 시작하면 해당 패턴 매치를 거부합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldExclusion {
    pub field: String,
    pub prefixes: Vec<String>,
}

/// `[[patterns]]` 항목 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// 이벤트 타입 이름
    pub name: String,
    /// 명명 캡처 그룹을 포함한 정규식
    pub regex: String,
    /// 우선순위 (작을수록 먼저 시도)
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// 중복 판정에 쓰는 필드 (비어 있으면 timestamp를 제외한 모든 필드)
    #[serde(default)]
    pub identity_fields: Vec<String>,
    /// 제외 규칙
    #[serde(default)]
    pub exclude: Vec<FieldExclusion>,
}

fn default_priority() -> u32 {
    100
}

/// NPC/AI 액터 이름 접두어
const NPC_PREFIXES: &[&str] = &["PU_", "NPC_", "AIModule_", "Kopion_", "Quasigrazer_"];

/// 기본 Star Citizen `Game.log` 패턴 집합
pub fn default_patterns() -> Vec<PatternConfig> {
    const TS: &str = r"<(?P<timestamp>[^>]+)>";
    let actor_death = format!(
        r"{TS} \[Notice\] <Actor Death> CActor::Kill: '(?P<victim>[^']+)' \[\d+\] in zone '(?P<zone>[^']+)' killed by '(?P<killer>[^']+)' \[\d+\] using '(?P<weapon>[^']+)' \[Class [^\]]*\] with damage type '(?P<damage_type>[^']+)'"
    );
    vec![
        PatternConfig {
            name: "player_death".to_owned(),
            regex: actor_death.clone(),
            priority: 10,
            exclude: vec![FieldExclusion {
                field: "victim".to_owned(),
                prefixes: NPC_PREFIXES.iter().map(|p| (*p).to_owned()).collect(),
            }],
            identity_fields: Vec::new(),
        },
        PatternConfig {
            name: "actor_death".to_owned(),
            regex: actor_death,
            priority: 20,
            exclude: Vec::new(),
            identity_fields: Vec::new(),
        },
        PatternConfig {
            name: "actor_stall".to_owned(),
            regex: format!(
                r"{TS} \[Notice\] <Actor stall> Actor stall detected, Player: (?P<player>[^,.\s]+)(?:, Type: (?P<stall_type>[^,.\s]+))?(?:, Length: (?P<length>\d+(?:\.\d+)?))?"
            ),
            priority: 10,
            exclude: Vec::new(),
            identity_fields: vec!["player".to_owned()],
        },
        PatternConfig {
            name: "vehicle_destruction".to_owned(),
            regex: format!(
                r"{TS} \[Notice\] <Vehicle Destruction> CVehicle::OnAdvanceDestroyLevel: Vehicle '(?P<vehicle>[^']+)' \[\d+\] in zone '(?P<zone>[^']+)'.*? driven by '(?P<driver>[^']+)' \[\d+\] advanced from destroy level (?P<from_level>\d+) to (?P<to_level>\d+) caused by '(?P<cause>[^']+)'"
            ),
            priority: 10,
            exclude: Vec::new(),
            identity_fields: Vec::new(),
        },
        PatternConfig {
            name: "connected".to_owned(),
            regex: format!(
                r"{TS} \[Notice\] <AccountLoginCharacterStatus_Character> Character: .*?name (?P<player>\S+) - "
            ),
            priority: 10,
            exclude: Vec::new(),
            identity_fields: Vec::new(),
        },
        PatternConfig {
            name: "connection_flow".to_owned(),
            regex: format!(
                r"{TS} \[Notice\] <Join PU> address\[(?P<address>[^\]]+)\] port\[(?P<port>\d+)\] shard\[(?P<shard>[^\]]+)\]"
            ),
            priority: 10,
            exclude: Vec::new(),
            identity_fields: Vec::new(),
        },
        PatternConfig {
            name: "quantum_jump".to_owned(),
            regex: format!(
                r"{TS} \[Notice\] <Quantum Drive Arrived> .*?'(?P<ship>[^']+)'.*? arrived at (?P<destination>\S+)"
            ),
            priority: 30,
            exclude: Vec::new(),
            identity_fields: Vec::new(),
        },
        PatternConfig {
            name: "corpse".to_owned(),
            regex: format!(
                r"{TS} \[Notice\] <\[ActorState\] Corpse> .*?Player '(?P<player>[^']+)' <(?P<side>\w+) client>: (?P<detail>.+)$"
            ),
            priority: 30,
            exclude: Vec::new(),
            identity_fields: vec!["player".to_owned(), "detail".to_owned()],
        },
    ]
}

/// 중복 억제/상한 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 동일 identity_key 억제 윈도우 (초)
    pub dedup_window_secs: u64,
    /// 윈도우당 허용되는 동일 키 발생 수
    pub max_duplicates: u32,
    /// 윈도우당 최대 이벤트 수 (0이면 비활성)
    pub ceiling_per_window: u32,
    /// 상한 윈도우 길이 (초)
    pub ceiling_window_secs: u64,
    /// 상한 범위 (per_type, global)
    pub ceiling_scope: String,
    /// 기회적 정리 주기 (초)
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            max_duplicates: 1,
            ceiling_per_window: 30,
            ceiling_window_secs: 60,
            ceiling_scope: "per_type".to_owned(),
            cleanup_interval_secs: 60,
        }
    }
}

/// 이벤트 버스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 토픽(이벤트 타입)별 보관 이력 수
    pub history_per_topic: usize,
    /// 내부 메타 이벤트 보관 수
    pub meta_event_capacity: usize,
    /// 디버그 trace 파일 경로 (빈 문자열이면 비활성)
    pub trace_path: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_per_topic: 100,
            meta_event_capacity: 256,
            trace_path: String::new(),
        }
    }
}

/// 외부 전송 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 싱크별 작업 큐 용량
    pub queue_capacity: usize,
    /// 외부 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    pub webhook: WebhookConfig,
    pub store: StoreConfig,
    pub realtime: RealtimeConfig,
    /// 이벤트 타입별 메시지 템플릿 (`{field}` 치환)
    pub templates: BTreeMap<String, String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        let templates = [
            ("player_death", "{killer} killed {victim} with {weapon} in {zone}"),
            ("actor_death", "{victim} died ({damage_type}) in {zone}"),
            ("actor_stall", "{player}: Stalled"),
            ("vehicle_destruction", "{vehicle} destroyed by {cause} (level {to_level})"),
            ("connected", "{player} connected"),
            ("connection_flow", "{username} joined shard {shard}"),
            ("quantum_jump", "{ship} arrived at {destination}"),
            ("corpse", "{player}: {detail}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        Self {
            queue_capacity: 256,
            request_timeout_secs: 10,
            webhook: WebhookConfig::default(),
            store: StoreConfig::default(),
            realtime: RealtimeConfig::default(),
            templates,
        }
    }
}

impl DeliveryConfig {
    fn validate(&self) -> Result<(), ScRelayError> {
        if self.queue_capacity == 0 {
            return Err(invalid("delivery.queue_capacity", "must be greater than 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid(
                "delivery.request_timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.webhook.enabled {
            if !is_http_url(&self.webhook.url) {
                return Err(invalid(
                    "delivery.webhook.url",
                    "must be an http(s) URL when webhook is enabled",
                ));
            }
            if !self.webhook.secondary_url.is_empty() && !is_http_url(&self.webhook.secondary_url)
            {
                return Err(invalid("delivery.webhook.secondary_url", "must be an http(s) URL"));
            }
            if !self.webhook.important_players.is_empty() && self.webhook.secondary_url.is_empty() {
                return Err(invalid(
                    "delivery.webhook.important_players",
                    "requires secondary_url",
                ));
            }
            let valid_formats = ["content", "embed"];
            if !valid_formats.contains(&self.webhook.format.as_str()) {
                return Err(invalid(
                    "delivery.webhook.format",
                    format!("must be one of: {}", valid_formats.join(", ")),
                ));
            }
        }

        if self.store.enabled {
            if !is_http_url(&self.store.url) {
                return Err(invalid(
                    "delivery.store.url",
                    "must be an http(s) URL when store is enabled",
                ));
            }
            if self.store.api_key.is_empty() {
                return Err(invalid(
                    "delivery.store.api_key",
                    "must not be empty when store is enabled",
                ));
            }
            if self.store.overflow_capacity == 0 {
                return Err(invalid(
                    "delivery.store.overflow_capacity",
                    "must be greater than 0",
                ));
            }
        }

        if self.realtime.enabled {
            let rt = &self.realtime;
            if !(rt.url.starts_with("ws://") || rt.url.starts_with("wss://")) {
                return Err(invalid(
                    "delivery.realtime.url",
                    "must be a ws(s) URL when realtime is enabled",
                ));
            }
            if rt.channel.is_empty() {
                return Err(invalid("delivery.realtime.channel", "must not be empty"));
            }
            if rt.heartbeat_interval_secs == 0 {
                return Err(invalid(
                    "delivery.realtime.heartbeat_interval_secs",
                    "must be greater than 0",
                ));
            }
            if rt.stale_after_secs <= rt.heartbeat_interval_secs {
                return Err(invalid(
                    "delivery.realtime.stale_after_secs",
                    "must be greater than heartbeat_interval_secs",
                ));
            }
            if !rt.refresh_token.is_empty() && !is_http_url(&rt.auth_url) {
                return Err(invalid(
                    "delivery.realtime.auth_url",
                    "must be an http(s) URL when refresh_token is set",
                ));
            }
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// 채팅 웹훅 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    /// 기본 웹훅 URL
    pub url: String,
    /// 보조 웹훅 URL (`secondary_event_types`로 라우팅)
    pub secondary_url: String,
    /// 보조 웹훅으로 보낼 이벤트 타입
    pub secondary_event_types: Vec<String>,
    /// 주요 플레이어. 관련 이벤트는 기술 요약 한 줄을 보조 웹훅에 추가로 보낸다
    pub important_players: Vec<String>,
    /// 전송할 이벤트 타입 (비어 있으면 전부)
    pub event_types: Vec<String>,
    /// 본문 형식 (content, embed)
    pub format: String,
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 첫 재시도 대기 (밀리초)
    pub initial_backoff_ms: u64,
    /// 최대 재시도 대기 (밀리초)
    pub max_backoff_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            secondary_url: String::new(),
            secondary_event_types: Vec::new(),
            important_players: Vec::new(),
            event_types: Vec::new(),
            format: "content".to_owned(),
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// 영구 저장소(REST) 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub enabled: bool,
    /// 저장소 base URL (예: `https://xyz.supabase.co`)
    pub url: String,
    /// API 키 (apikey 헤더)
    pub api_key: String,
    /// 저장할 이벤트 타입 (비어 있으면 전부)
    pub event_types: Vec<String>,
    /// identity hash에 쓰는 필드
    pub hash_fields: Vec<String>,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 오버플로 버퍼 용량 (가득 차면 가장 오래된 항목 폐기)
    pub overflow_capacity: usize,
    /// 이벤트 타입 → 테이블명 (없으면 이벤트 타입 그대로)
    pub table_map: BTreeMap<String, String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            api_key: String::new(),
            event_types: Vec::new(),
            hash_fields: ["username", "killer", "victim", "timestamp"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            overflow_capacity: 500,
            table_map: BTreeMap::new(),
        }
    }
}

/// 실시간 브로드캐스트 채널 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub enabled: bool,
    /// WebSocket 엔드포인트 (예: `wss://xyz.supabase.co/realtime/v1/websocket`)
    pub url: String,
    /// API 키 (접속 쿼리 파라미터)
    pub api_key: String,
    /// 채널 이름
    pub channel: String,
    /// 브로드캐스트 이벤트 이름
    pub broadcast_event: String,
    /// 초기 access token (비어 있으면 api_key 사용)
    pub access_token: String,
    /// refresh token (설정 시 갱신 가능)
    pub refresh_token: String,
    /// 토큰 갱신 엔드포인트 base URL
    pub auth_url: String,
    /// 전송할 이벤트 타입 (비어 있으면 전부)
    pub event_types: Vec<String>,
    /// 하트비트 주기 (초)
    pub heartbeat_interval_secs: u64,
    /// 응답 없는 상태로 이 시간이 지나면 재연결 (초)
    pub stale_after_secs: u64,
    /// 연결 타임아웃 (초)
    pub connect_timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 만료 전 선제 갱신 여유 (초)
    pub refresh_margin_secs: u64,
    /// 연속 갱신 실패 허용 횟수
    pub max_refresh_failures: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            api_key: String::new(),
            channel: "general".to_owned(),
            broadcast_event: "realtime-event".to_owned(),
            access_token: String::new(),
            refresh_token: String::new(),
            auth_url: String::new(),
            event_types: Vec::new(),
            heartbeat_interval_secs: 30,
            stale_after_secs: 120,
            connect_timeout_secs: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            refresh_margin_secs: 60,
            max_refresh_failures: 3,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9108,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = ScRelayConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.watcher.start_mode, "live_tail");
        assert_eq!(config.rate_limit.dedup_window_secs, 300);
        assert_eq!(config.rate_limit.max_duplicates, 1);
        assert!(!config.delivery.webhook.enabled);
        assert!(!config.delivery.realtime.enabled);
        assert_eq!(config.delivery.realtime.channel, "general");
        assert!(!config.patterns.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        ScRelayConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_uses_default_patterns() {
        let config = ScRelayConfig::parse("").unwrap();
        assert_eq!(config.patterns.len(), default_patterns().len());
        config.validate().unwrap();
    }

    #[test]
    fn explicit_empty_pattern_set_is_rejected() {
        let config = ScRelayConfig::parse("patterns = []").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pattern set must not be empty"));
    }

    #[test]
    fn toml_patterns_replace_defaults() {
        let toml = r#"
[[patterns]]
name = "connected"
regex = "Player (?P<player>\\w+) connected"
priority = 5

[[patterns]]
name = "stall"
regex = "stall (?P<player>\\w+)"
"#;
        let config = ScRelayConfig::parse(toml).unwrap();
        assert_eq!(config.patterns.len(), 2);
        assert_eq!(config.patterns[0].priority, 5);
        assert_eq!(config.patterns[1].priority, 100);
        assert!(config.patterns[1].exclude.is_empty());
    }

    #[test]
    fn duplicate_pattern_names_are_rejected() {
        let mut config = ScRelayConfig::default();
        let first = config.patterns[0].clone();
        config.patterns.push(first);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate pattern name"));
    }

    #[test]
    fn partial_toml_merges_with_defaults() {
        let toml = r#"
[watcher]
log_path = "/games/StarCitizen/LIVE/Game.log"

[rate_limit]
dedup_window_secs = 10
"#;
        let config = ScRelayConfig::parse(toml).unwrap();
        assert_eq!(config.watcher.log_path, "/games/StarCitizen/LIVE/Game.log");
        assert_eq!(config.watcher.poll_interval_ms, 500);
        assert_eq!(config.rate_limit.dedup_window_secs, 10);
        assert_eq!(config.rate_limit.ceiling_scope, "per_type");
    }

    #[test]
    fn full_delivery_toml() {
        let toml = r#"
[delivery]
queue_capacity = 64

[delivery.webhook]
enabled = true
url = "https://discord.com/api/webhooks/1/abc"
format = "embed"

[delivery.store]
enabled = true
url = "https://xyz.supabase.co"
api_key = "anon"

[delivery.store.table_map]
player_death = "kills"

[delivery.realtime]
enabled = true
url = "wss://xyz.supabase.co/realtime/v1/websocket"
api_key = "anon"

[delivery.templates]
actor_stall = "{player} stalled"
"#;
        let config = ScRelayConfig::parse(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.delivery.queue_capacity, 64);
        assert_eq!(config.delivery.webhook.format, "embed");
        assert_eq!(
            config.delivery.store.table_map.get("player_death").map(String::as_str),
            Some("kills")
        );
        // 명시적 templates 테이블은 기본 템플릿 전체를 대체한다
        assert_eq!(config.delivery.templates.len(), 1);
    }

    #[test]
    fn invalid_toml_returns_parse_error() {
        let err = ScRelayConfig::parse("[watcher\nlog_path = 1").unwrap_err();
        assert!(matches!(
            err,
            ScRelayError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_log_path() {
        let mut config = ScRelayConfig::default();
        config.watcher.log_path = "  ".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watcher.log_path"));
    }

    #[test]
    fn validate_rejects_unknown_start_mode() {
        let mut config = ScRelayConfig::default();
        config.watcher.start_mode = "rewind".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_enabled_webhook_without_url() {
        let mut config = ScRelayConfig::default();
        config.delivery.webhook.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("delivery.webhook.url"));
    }

    #[test]
    fn validate_rejects_important_players_without_secondary_url() {
        let mut config = ScRelayConfig::default();
        config.delivery.webhook.enabled = true;
        config.delivery.webhook.url = "https://discord.com/api/webhooks/1/abc".to_owned();
        config.delivery.webhook.important_players = vec!["ElKoukra".to_owned()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("delivery.webhook.important_players"));

        config.delivery.webhook.secondary_url = "https://discord.com/api/webhooks/2/def".to_owned();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_accepts_disabled_webhook_without_url() {
        let mut config = ScRelayConfig::default();
        config.delivery.webhook.enabled = false;
        config.delivery.webhook.url.clear();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_stale_threshold_below_heartbeat() {
        let mut config = ScRelayConfig::default();
        config.delivery.realtime.enabled = true;
        config.delivery.realtime.url = "wss://example.test/ws".to_owned();
        config.delivery.realtime.stale_after_secs = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stale_after_secs"));
    }

    #[test]
    fn validate_rejects_refresh_token_without_auth_url() {
        let mut config = ScRelayConfig::default();
        config.delivery.realtime.enabled = true;
        config.delivery.realtime.url = "wss://example.test/ws".to_owned();
        config.delivery.realtime.refresh_token = "rt".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("auth_url"));
    }

    #[test]
    fn validate_rejects_unknown_ceiling_scope() {
        let mut config = ScRelayConfig::default();
        config.rate_limit.ceiling_scope = "per_user".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_override_string() {
        let mut val = "original".to_owned();
        // SAFETY: serial 테스트로 환경변수 동시 접근이 없습니다.
        unsafe { std::env::set_var("TEST_SCRELAY_STR", "overridden") };
        override_string(&mut val, "TEST_SCRELAY_STR");
        assert_eq!(val, "overridden");
        unsafe { std::env::remove_var("TEST_SCRELAY_STR") };
    }

    #[test]
    #[serial]
    fn env_override_bool_invalid_keeps_original() {
        let mut val = false;
        // SAFETY: serial 테스트로 환경변수 동시 접근이 없습니다.
        unsafe { std::env::set_var("TEST_SCRELAY_BOOL_BAD", "not-a-bool") };
        override_bool(&mut val, "TEST_SCRELAY_BOOL_BAD");
        assert!(!val);
        unsafe { std::env::remove_var("TEST_SCRELAY_BOOL_BAD") };
    }

    #[test]
    #[serial]
    fn env_override_u64_valid() {
        let mut val = 1u64;
        // SAFETY: serial 테스트로 환경변수 동시 접근이 없습니다.
        unsafe { std::env::set_var("TEST_SCRELAY_U64", "42") };
        override_u64(&mut val, "TEST_SCRELAY_U64");
        assert_eq!(val, 42);
        unsafe { std::env::remove_var("TEST_SCRELAY_U64") };
    }

    #[test]
    #[serial]
    fn apply_env_overrides_sets_watcher_path() {
        let mut config = ScRelayConfig::default();
        // SAFETY: serial 테스트로 환경변수 동시 접근이 없습니다.
        unsafe { std::env::set_var("SCRELAY_WATCHER_LOG_PATH", "/tmp/Game.log") };
        config.apply_env_overrides();
        unsafe { std::env::remove_var("SCRELAY_WATCHER_LOG_PATH") };
        assert_eq!(config.watcher.log_path, "/tmp/Game.log");
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_SCRELAY_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = ScRelayConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = ScRelayConfig::parse(&toml_str).unwrap();
        assert_eq!(config.patterns, parsed.patterns);
        assert_eq!(config.delivery.templates, parsed.delivery.templates);
        assert_eq!(
            config.rate_limit.ceiling_window_secs,
            parsed.rate_limit.ceiling_window_secs
        );
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = ScRelayConfig::from_file("/nonexistent/path/screlay.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScRelayError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
