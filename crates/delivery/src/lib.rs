#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`manager`]: 싱크별 큐/워커 관리와 `dispatch` (Pipeline trait 구현)
//! - [`sink`]: 닫힌 싱크 집합과 전송 결과
//! - [`webhook`]: 채팅 웹훅 (재시도 후 냉각, 버림)
//! - [`store`]: REST 저장소 (재시도 후 오버플로 버퍼)
//! - [`realtime`]: Phoenix 채널 WebSocket 브로드캐스트, 하트비트, 자격 증명 갱신
//! - [`template`]: `{field}` 메시지 템플릿
//! - [`payload`]: 싱크별 JSON 본문
//! - [`context`]: 사용자 이름/샤드/버전
//! - [`state`]: 싱크 상태 스냅샷
//! - [`backoff`]: 지수 백오프 정책
//! - [`config`]: 전달 설정 (core 설정에서 파생)
//! - [`error`]: 도메인 에러 타입

pub mod backoff;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod manager;
pub mod payload;
pub mod realtime;
pub mod sink;
pub mod state;
pub mod store;
pub mod template;
pub mod webhook;

// --- 주요 타입 re-export ---

// 매니저
pub use manager::{
    DeliveryHandle, DeliveryManager, DeliveryManagerBuilder, DispatchReport, DispatchStatus,
};

// 설정
pub use config::{
    EventTypeFilter, ManagerConfig, RealtimeSinkConfig, StoreSinkConfig, WebhookFormat,
    WebhookSinkConfig,
};

// 에러
pub use error::SinkError;

// 싱크
pub use realtime::{
    ConfiguredCredentials, Credential, CredentialProvider, RealtimeSink, RefreshTokenCredentials,
    StaticCredentials,
};
pub use sink::{Sink, SinkOutcome};
pub use store::StoreSink;
pub use webhook::WebhookSink;

// 상태와 보조 타입
pub use backoff::BackoffPolicy;
pub use context::{ClientContext, ClientSnapshot};
pub use state::{SinkKind, SinkState, SinkStatus};
pub use template::TemplateSet;
