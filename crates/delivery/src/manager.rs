//! 전달 매니저 -- 싱크별 워커와 큐를 관리합니다.
//!
//! [`DeliveryManager`]는 core의 [`Pipeline`] trait을 구현하고, 이벤트 투입은
//! 복제 가능한 [`DeliveryHandle`]로 합니다. `dispatch`는 싱크별 큐에 `try_send`만
//! 하므로 버스 핸들러 안에서 호출해도 수집 태스크를 막지 않습니다.
//!
//! # 내부 아키텍처
//! ```text
//! DeliveryHandle.dispatch -> mpsc(webhook) -> webhook worker -> HTTP POST (retry)
//!                         -> mpsc(store)   -> store worker   -> HTTP POST (retry, overflow)
//!                         -> mpsc(realtime)-> realtime worker -> connection task -> WebSocket
//! ```
//!
//! 한 싱크가 재시도나 백오프 중이어도 다른 싱크의 큐와 워커는 영향을 받지 않습니다.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use screlay_core::error::{PipelineError, ScRelayError};
use screlay_core::event::Event;
use screlay_core::metrics as m;
use screlay_core::pipeline::{HealthStatus, Pipeline};

use crate::config::{EventTypeFilter, ManagerConfig};
use crate::context::ClientContext;
use crate::error::SinkError;
use crate::realtime::{ConfiguredCredentials, CredentialProvider, RealtimeSink};
use crate::sink::{Sink, SinkOutcome};
use crate::state::{SinkKind, SinkState, SinkStatus, StateCell};
use crate::store::StoreSink;
use crate::template::TemplateSet;
use crate::webhook::WebhookSink;

/// 매니저 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerState {
    Initialized,
    Running,
    Stopped,
}

/// 싱크 하나에 대한 투입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Queued,
    /// 이벤트 타입 필터로 제외
    Filtered,
    /// 큐가 가득 차서 버림
    QueueFull,
    /// 워커가 종료됨
    Closed,
}

/// `dispatch` 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub entries: Vec<(SinkKind, DispatchStatus)>,
}

impl DispatchReport {
    pub fn status_of(&self, kind: SinkKind) -> Option<DispatchStatus> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, status)| *status)
    }

    pub fn queued(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, s)| *s == DispatchStatus::Queued)
            .count()
    }
}

#[derive(Clone)]
struct Route {
    kind: SinkKind,
    filter: EventTypeFilter,
    tx: mpsc::Sender<Arc<Event>>,
    state: StateCell,
}

/// 이벤트 투입 핸들
///
/// 매니저가 정지된 동안에는 아무 싱크에도 투입하지 않습니다.
#[derive(Clone)]
pub struct DeliveryHandle {
    routes: Arc<RwLock<Vec<Route>>>,
    context: Arc<ClientContext>,
}

impl DeliveryHandle {
    /// 이벤트를 각 싱크 큐에 넣습니다. 절대 대기하지 않습니다.
    ///
    /// 클라이언트 문맥은 학습하지 않습니다. 호출자가 먼저 [`ClientContext::observe`]를 부릅니다.
    pub fn dispatch(&self, event: &Arc<Event>) -> DispatchReport {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut report = DispatchReport {
            entries: Vec::with_capacity(routes.len()),
        };

        for route in routes.iter() {
            let status = if !route.filter.allows(&event.event_type) {
                DispatchStatus::Filtered
            } else {
                match route.tx.try_send(Arc::clone(event)) {
                    Ok(()) => DispatchStatus::Queued,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        route.state.record_drop();
                        counter!(
                            m::DELIVERY_DROPPED_TOTAL,
                            m::LABEL_SINK => route.kind.as_str(),
                            m::LABEL_REASON => "queue_full"
                        )
                        .increment(1);
                        warn!(
                            sink = %route.kind,
                            event_type = %event.event_type,
                            "sink queue full, event dropped"
                        );
                        DispatchStatus::QueueFull
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => DispatchStatus::Closed,
                }
            };
            report.entries.push((route.kind, status));
        }
        report
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.context
    }
}

/// 전달 매니저
///
/// # 사용 예시
/// ```ignore
/// let mut manager = DeliveryManager::from_config(ManagerConfig::from_core(&core)?)?;
/// let handle = manager.handle();
/// manager.start().await?;
///
/// bus.subscribe(TopicFilter::All, None, move |e: &Arc<Event>| {
///     handle.context().observe(e);
///     handle.dispatch(e);
///     Ok(())
/// });
/// ```
pub struct DeliveryManager<P: CredentialProvider = ConfiguredCredentials> {
    config: ManagerConfig,
    state: ManagerState,
    credentials: Option<Arc<P>>,
    context: Arc<ClientContext>,
    templates: Arc<TemplateSet>,
    routes: Arc<RwLock<Vec<Route>>>,
    sink_states: Vec<StateCell>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    /// 실시간 연결 태스크 (취소 또는 명령 채널 종료 시 끝남)
    connections: Vec<JoinHandle<()>>,
}

impl DeliveryManager<ConfiguredCredentials> {
    /// 설정에 맞는 자격 증명 공급자로 매니저를 생성합니다.
    pub fn from_config(config: ManagerConfig) -> Result<Self, SinkError> {
        let builder = DeliveryManagerBuilder::new();
        let builder = match &config.realtime {
            Some(realtime) => {
                builder.credentials(Arc::new(ConfiguredCredentials::from_config(realtime)?))
            }
            None => builder,
        };
        builder.config(config).build()
    }
}

impl<P: CredentialProvider> DeliveryManager<P> {
    pub fn handle(&self) -> DeliveryHandle {
        DeliveryHandle {
            routes: Arc::clone(&self.routes),
            context: Arc::clone(&self.context),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.context
    }

    pub fn state_name(&self) -> &str {
        match self.state {
            ManagerState::Initialized => "initialized",
            ManagerState::Running => "running",
            ManagerState::Stopped => "stopped",
        }
    }

    /// 싱크별 상태 스냅샷
    pub fn sink_states(&self) -> Vec<SinkState> {
        self.sink_states.iter().map(StateCell::snapshot).collect()
    }

    /// 설정된 싱크를 생성합니다. 실시간 연결 태스크는 `connections`에 따로 등록됩니다.
    fn build_sinks(&mut self) -> Result<Vec<(Sink, EventTypeFilter)>, SinkError> {
        let mut sinks = Vec::new();

        if let Some(webhook) = &self.config.webhook {
            let filter = webhook.event_types.clone();
            sinks.push((Sink::Webhook(WebhookSink::new(webhook.clone())?), filter));
        }
        if let Some(store) = &self.config.store {
            let filter = store.event_types.clone();
            sinks.push((Sink::Store(StoreSink::new(store.clone())?), filter));
        }
        if let Some(realtime) = self.config.realtime.clone() {
            let credentials = self.credentials.clone().ok_or_else(|| SinkError::Config {
                field: "delivery.realtime".to_owned(),
                reason: "credential provider is required".to_owned(),
            })?;
            let filter = realtime.event_types.clone();
            let (sink, connection) = RealtimeSink::spawn(
                realtime,
                credentials,
                Arc::clone(&self.context),
                self.cancel.clone(),
            );
            self.connections.push(connection);
            sinks.push((Sink::Realtime(sink), filter));
        }
        Ok(sinks)
    }
}

async fn sink_worker(
    mut sink: Sink,
    mut rx: mpsc::Receiver<Arc<Event>>,
    context: Arc<ClientContext>,
    templates: Arc<TemplateSet>,
    cancel: CancellationToken,
) {
    let kind = sink.kind();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let ctx = context.snapshot();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(sink = %kind, event_id = %event.id, "delivery interrupted by shutdown");
                break;
            }
            outcome = sink.deliver(&event, &ctx, &templates) => outcome,
        };
        match &outcome {
            SinkOutcome::Delivered { attempts } => {
                trace!(sink = %kind, event_id = %event.id, attempts, "event delivered")
            }
            SinkOutcome::Forwarded => trace!(sink = %kind, event_id = %event.id, "event forwarded"),
            SinkOutcome::Dropped { reason } => {
                debug!(sink = %kind, event_id = %event.id, reason, "event dropped")
            }
            SinkOutcome::Buffered { pending } => {
                debug!(sink = %kind, event_id = %event.id, pending, "event buffered")
            }
        }
    }
    debug!(sink = %kind, "sink worker finished");
}

impl<P: CredentialProvider> Pipeline for DeliveryManager<P> {
    async fn start(&mut self) -> Result<(), ScRelayError> {
        if self.state == ManagerState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(sinks = self.config.enabled_sinks(), "starting delivery manager");
        if self.config.enabled_sinks() == 0 {
            warn!("no delivery sinks enabled, events will only be traced");
        }

        self.cancel = CancellationToken::new();
        let sinks = self.build_sinks()?;

        let mut routes = Vec::with_capacity(sinks.len());
        self.sink_states.clear();
        for (sink, filter) in sinks {
            let (tx, rx) = mpsc::channel(self.config.queue_capacity);
            let state = sink.state().clone();
            routes.push(Route {
                kind: sink.kind(),
                filter,
                tx,
                state: state.clone(),
            });
            self.sink_states.push(state);
            self.workers.push(tokio::spawn(sink_worker(
                sink,
                rx,
                Arc::clone(&self.context),
                Arc::clone(&self.templates),
                self.cancel.clone(),
            )));
        }
        *self.routes.write().unwrap_or_else(PoisonError::into_inner) = routes;

        self.state = ManagerState::Running;
        info!("delivery manager started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ScRelayError> {
        if self.state != ManagerState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping delivery manager");

        // 1. 투입 중단: 송신자를 모두 버리면 워커는 남은 큐를 비우고 끝난다
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        // 2. drain_timeout 동안 소진을 기다린다
        let drain_timeout = self.config.drain_timeout;
        let workers = &mut self.workers;
        let drained = tokio::time::timeout(drain_timeout, async {
            for task in workers.iter_mut() {
                if let Err(e) = task.await {
                    warn!(error = %e, "sink worker terminated abnormally");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                timeout_ms = u64::try_from(drain_timeout.as_millis()).unwrap_or(u64::MAX),
                "delivery drain timed out, cancelling in-flight work"
            );
        }

        // 3. 남은 작업과 연결 태스크 취소
        self.cancel.cancel();
        let remaining = self.workers.drain(..).chain(self.connections.drain(..));
        for task in remaining {
            if !task.is_finished() {
                let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
            }
        }

        self.state = ManagerState::Stopped;
        info!("delivery manager stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            ManagerState::Running => {
                let mut degraded = Vec::new();
                for state in self.sink_states() {
                    match (state.kind, state.status) {
                        (_, SinkStatus::Backoff) => {
                            degraded.push(format!("{} in backoff", state.sink_id));
                        }
                        (SinkKind::Realtime, status) if status != SinkStatus::Connected => {
                            degraded.push(format!("realtime {status}"));
                        }
                        _ => {}
                    }
                }
                if self.workers.iter().any(JoinHandle::is_finished) {
                    HealthStatus::Unhealthy("sink worker exited".to_owned())
                } else if self.connections.iter().any(JoinHandle::is_finished) {
                    HealthStatus::Unhealthy("realtime connection task exited".to_owned())
                } else if degraded.is_empty() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded(degraded.join(", "))
                }
            }
            ManagerState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            ManagerState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 전달 매니저 빌더
pub struct DeliveryManagerBuilder<P: CredentialProvider = ConfiguredCredentials> {
    config: ManagerConfig,
    credentials: Option<Arc<P>>,
}

impl DeliveryManagerBuilder<ConfiguredCredentials> {
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
            credentials: None,
        }
    }
}

impl Default for DeliveryManagerBuilder<ConfiguredCredentials> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CredentialProvider> DeliveryManagerBuilder<P> {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// 실시간 싱크 자격 증명 공급자 (실시간 싱크 사용 시 필수)
    pub fn credentials<Q: CredentialProvider>(self, credentials: Arc<Q>) -> DeliveryManagerBuilder<Q> {
        DeliveryManagerBuilder {
            config: self.config,
            credentials: Some(credentials),
        }
    }

    pub fn build(self) -> Result<DeliveryManager<P>, SinkError> {
        self.config.validate()?;
        if self.config.realtime.is_some() && self.credentials.is_none() {
            return Err(SinkError::Config {
                field: "delivery.realtime".to_owned(),
                reason: "credential provider is required".to_owned(),
            });
        }

        let context = Arc::new(ClientContext::new(
            self.config.username.clone(),
            self.config.client_version.clone(),
        ));
        let templates = Arc::new(TemplateSet::new(self.config.templates.clone()));

        Ok(DeliveryManager {
            config: self.config,
            state: ManagerState::Initialized,
            credentials: self.credentials,
            context,
            templates,
            routes: Arc::new(RwLock::new(Vec::new())),
            sink_states: Vec::new(),
            cancel: CancellationToken::new(),
            workers: Vec::new(),
            connections: Vec::new(),
        })
    }
}
