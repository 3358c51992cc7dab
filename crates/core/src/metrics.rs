//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `screlay_`
//! - 모듈명: `ingest_`, `bus_`, `limiter_`, `delivery_`, `realtime_`, `store_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(screlay_core::metrics::INGEST_LINES_READ_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 이벤트 타입 레이블 키
pub const LABEL_EVENT_TYPE: &str = "event_type";

/// 싱크 레이블 키 (webhook, realtime, store)
pub const LABEL_SINK: &str = "sink";

/// 거부 사유 레이블 키 (duplicate, throttled)
pub const LABEL_REASON: &str = "reason";

// ─── Ingest 메트릭 ─────────────────────────────────────────────────

/// Ingest: 읽은 완전한 줄 수 (counter)
pub const INGEST_LINES_READ_TOTAL: &str = "screlay_ingest_lines_read_total";

/// Ingest: 분류된 이벤트 수 (counter, label: event_type)
pub const INGEST_EVENTS_CLASSIFIED_TOTAL: &str = "screlay_ingest_events_classified_total";

/// Ingest: 어떤 패턴과도 맞지 않은 줄 수 (counter)
pub const INGEST_LINES_UNMATCHED_TOTAL: &str = "screlay_ingest_lines_unmatched_total";

/// Ingest: 감지된 로테이션/트렁케이트 수 (counter)
pub const INGEST_ROTATIONS_TOTAL: &str = "screlay_ingest_rotations_total";

/// Ingest: 읽기 실패 수 (counter)
pub const INGEST_READ_ERRORS_TOTAL: &str = "screlay_ingest_read_errors_total";

// ─── EventBus 메트릭 ───────────────────────────────────────────────

/// Bus: 발행된 이벤트 수 (counter)
pub const BUS_EVENTS_PUBLISHED_TOTAL: &str = "screlay_bus_events_published_total";

/// Bus: 핸들러 실패 수 (counter)
pub const BUS_HANDLER_FAILURES_TOTAL: &str = "screlay_bus_handler_failures_total";

/// Bus: 현재 구독자 수 (gauge)
pub const BUS_SUBSCRIBERS: &str = "screlay_bus_subscribers";

// ─── RateLimiter 메트릭 ────────────────────────────────────────────

/// Limiter: 허용된 이벤트 수 (counter)
pub const LIMITER_ALLOWED_TOTAL: &str = "screlay_limiter_allowed_total";

/// Limiter: 거부된 이벤트 수 (counter, label: reason)
pub const LIMITER_DENIED_TOTAL: &str = "screlay_limiter_denied_total";

/// Limiter: 윈도우별 스로틀 통지 수 (counter)
pub const LIMITER_THROTTLE_NOTICES_TOTAL: &str = "screlay_limiter_throttle_notices_total";

/// Limiter: 활성 키 테이블 크기 (gauge)
pub const LIMITER_TABLE_SIZE: &str = "screlay_limiter_table_size";

// ─── Delivery 메트릭 ───────────────────────────────────────────────

/// Delivery: 전송 성공 수 (counter, label: sink)
pub const DELIVERY_SENT_TOTAL: &str = "screlay_delivery_sent_total";

/// Delivery: 재시도 수 (counter, label: sink)
pub const DELIVERY_RETRIES_TOTAL: &str = "screlay_delivery_retries_total";

/// Delivery: 드롭된 이벤트 수 (counter, label: sink)
pub const DELIVERY_DROPPED_TOTAL: &str = "screlay_delivery_dropped_total";

/// Delivery: 전송 지연 시간 (histogram, 초, label: sink)
pub const DELIVERY_DURATION_SECONDS: &str = "screlay_delivery_duration_seconds";

/// Realtime: 재연결 시도 수 (counter)
pub const REALTIME_RECONNECTS_TOTAL: &str = "screlay_realtime_reconnects_total";

/// Realtime: 연결 상태 (gauge, 1 = connected)
pub const REALTIME_CONNECTED: &str = "screlay_realtime_connected";

/// Realtime: 자격증명 갱신 수 (counter, label: result)
pub const REALTIME_TOKEN_REFRESHES_TOTAL: &str = "screlay_realtime_token_refreshes_total";

/// Store: 오버플로 버퍼 크기 (gauge)
pub const STORE_OVERFLOW_SIZE: &str = "screlay_store_overflow_size";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "screlay_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1)
pub const DAEMON_BUILD_INFO: &str = "screlay_daemon_build_info";

/// 전송 지연 히스토그램 버킷 (초)
pub const DELIVERY_DURATION_BUCKETS: [f64; 8] = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 10.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `screlay-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Ingest
    describe_counter!(
        INGEST_LINES_READ_TOTAL,
        "Total number of complete lines read from the game log"
    );
    describe_counter!(
        INGEST_EVENTS_CLASSIFIED_TOTAL,
        "Total number of lines classified into an event type"
    );
    describe_counter!(
        INGEST_LINES_UNMATCHED_TOTAL,
        "Total number of lines matching no configured pattern"
    );
    describe_counter!(
        INGEST_ROTATIONS_TOTAL,
        "Total number of log rotations or truncations detected"
    );
    describe_counter!(
        INGEST_READ_ERRORS_TOTAL,
        "Total number of failed log read attempts"
    );

    // Bus
    describe_counter!(
        BUS_EVENTS_PUBLISHED_TOTAL,
        "Total number of events published on the event bus"
    );
    describe_counter!(
        BUS_HANDLER_FAILURES_TOTAL,
        "Total number of subscriber handler failures caught by the bus"
    );
    describe_gauge!(BUS_SUBSCRIBERS, "Current number of bus subscriptions");

    // Limiter
    describe_counter!(
        LIMITER_ALLOWED_TOTAL,
        "Total number of events admitted by the rate limiter"
    );
    describe_counter!(
        LIMITER_DENIED_TOTAL,
        "Total number of events denied by the rate limiter"
    );
    describe_counter!(
        LIMITER_THROTTLE_NOTICES_TOTAL,
        "Number of windows in which the global ceiling was hit"
    );
    describe_gauge!(
        LIMITER_TABLE_SIZE,
        "Number of identity keys tracked by the rate limiter"
    );

    // Delivery
    describe_counter!(
        DELIVERY_SENT_TOTAL,
        "Total number of events delivered per sink"
    );
    describe_counter!(
        DELIVERY_RETRIES_TOTAL,
        "Total number of delivery retries per sink"
    );
    describe_counter!(
        DELIVERY_DROPPED_TOTAL,
        "Total number of events dropped per sink"
    );
    describe_histogram!(
        DELIVERY_DURATION_SECONDS,
        "Time to deliver a single event to a sink in seconds"
    );
    describe_counter!(
        REALTIME_RECONNECTS_TOTAL,
        "Total number of realtime reconnect attempts"
    );
    describe_gauge!(
        REALTIME_CONNECTED,
        "Realtime connection state (1 = connected)"
    );
    describe_counter!(
        REALTIME_TOKEN_REFRESHES_TOTAL,
        "Total number of realtime credential refreshes"
    );
    describe_gauge!(
        STORE_OVERFLOW_SIZE,
        "Number of store rows waiting in the overflow buffer"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "screlay daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
