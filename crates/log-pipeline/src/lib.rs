#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`pattern`]: 이름 있는 캡처 그룹을 가진 패턴 집합으로 한 줄을 분류
//! - [`watcher`]: 로테이션/truncate에 견디는 로그 파일 tail, 오프셋 저장
//! - [`bus`]: 토픽 필터와 이력을 가진 동기 pub/sub
//! - [`limiter`]: 중복 억제와 상한 판정
//! - [`pipeline`]: 감시 -> 분류 -> 발행 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정에서 파생)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! LogWatcher -> mpsc -> PatternLibrary -> EventBus -> (subscriber) RateLimiter -> delivery
//!     |                     |                |
//!  offset store        priority order    history / trace
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod limiter;
pub mod pattern;
pub mod pipeline;
pub mod watcher;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{IngestPipeline, IngestPipelineBuilder, IngestStats};

// 설정
pub use config::{BusOptions, CeilingScope, IngestConfig, LimiterConfig, StartMode, WatchConfig};

// 에러
pub use error::LogPipelineError;

// 패턴
pub use pattern::{Classification, PatternLibrary};

// 감시기
pub use watcher::{FileOffsetStore, LogWatcher, MemoryOffsetStore, OffsetStore, WatchItem, WatchState};

// 이벤트 버스
pub use bus::{
    BusStats, EventBus, EventHandler, HandlerError, MetaEvent, Predicate, PublishReport,
    SubscriptionId, TopicFilter,
};

// 속도 제한
pub use limiter::{Decision, LimiterStats, RateLimitEntry, RateLimiter};
