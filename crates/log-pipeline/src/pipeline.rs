//! 수집 파이프라인 -- 감시/분류/발행의 전체 흐름을 관리합니다.
//!
//! [`IngestPipeline`]은 core의 [`Pipeline`](screlay_core::pipeline::Pipeline) trait을 구현하여
//! `screlay-daemon`에서 전달 모듈과 동일한 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! LogWatcher.run -> mpsc<WatchItem> -> classify task -> PatternLibrary -> EventBus.publish
//! ```
//!
//! 버스 핸들러는 classify 태스크에서 인라인으로 실행되므로 구독자별 전달 순서는
//! 로그 순서와 같습니다.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use screlay_core::error::{PipelineError, ScRelayError};
use screlay_core::metrics as m;
use screlay_core::pipeline::{HealthStatus, Pipeline};

use crate::bus::EventBus;
use crate::config::IngestConfig;
use crate::error::LogPipelineError;
use crate::pattern::PatternLibrary;
use crate::watcher::{LogWatcher, OffsetStore, WatchItem};

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Initialized,
    Running,
    Stopped,
}

/// 수집 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub lines_read: u64,
    pub events_published: u64,
    pub lines_unmatched: u64,
    pub rotations: u64,
}

#[derive(Default)]
struct IngestShared {
    lines_read: AtomicU64,
    events_published: AtomicU64,
    lines_unmatched: AtomicU64,
    rotations: AtomicU64,
    watcher_exited: AtomicBool,
    fatal: Mutex<Option<String>>,
}

impl IngestShared {
    fn fatal(&self) -> Option<String> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_fatal(&self, reason: String) {
        *self.fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }
}

/// 수집 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use screlay_log_pipeline::{IngestPipelineBuilder, PatternLibrary};
///
/// let mut pipeline = IngestPipelineBuilder::new()
///     .config(config)
///     .patterns(Arc::new(PatternLibrary::new(&core.patterns)?))
///     .build()?;
///
/// pipeline.bus().subscribe(TopicFilter::All, None, handler);
/// pipeline.start().await?;
/// ```
pub struct IngestPipeline {
    config: IngestConfig,
    state: PipelineState,
    patterns: Arc<PatternLibrary>,
    bus: Arc<EventBus>,
    /// 다음 start에서 사용할 감시기 (첫 start 이후에는 설정으로 다시 생성)
    watcher: Option<LogWatcher>,
    shared: Arc<IngestShared>,
    cancel: CancellationToken,
    failure: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl IngestPipeline {
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn patterns(&self) -> &Arc<PatternLibrary> {
        &self.patterns
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            lines_read: self.shared.lines_read.load(Ordering::Relaxed),
            events_published: self.shared.events_published.load(Ordering::Relaxed),
            lines_unmatched: self.shared.lines_unmatched.load(Ordering::Relaxed),
            rotations: self.shared.rotations.load(Ordering::Relaxed),
        }
    }

    /// 감시기가 치명적으로 실패하면 취소되는 토큰
    ///
    /// `start()` 이후에 얻은 토큰만 유효합니다.
    pub fn failure_signal(&self) -> CancellationToken {
        self.failure.clone()
    }

    /// 감시기의 치명적 실패 사유
    pub fn fatal_error(&self) -> Option<String> {
        self.shared.fatal()
    }
}

async fn classify_loop(
    mut rx: mpsc::Receiver<WatchItem>,
    patterns: Arc<PatternLibrary>,
    bus: Arc<EventBus>,
    shared: Arc<IngestShared>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            WatchItem::Line(line) => {
                shared.lines_read.fetch_add(1, Ordering::Relaxed);

                let Some(event) = patterns.build_event(&line) else {
                    shared.lines_unmatched.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(m::INGEST_LINES_UNMATCHED_TOTAL).increment(1);
                    continue;
                };
                metrics::counter!(
                    m::INGEST_EVENTS_CLASSIFIED_TOTAL,
                    m::LABEL_EVENT_TYPE => event.event_type.clone()
                )
                .increment(1);
                shared.events_published.fetch_add(1, Ordering::Relaxed);

                let report = bus.publish(Arc::new(event));
                tracing::trace!(
                    sequence = report.sequence,
                    delivered = report.delivered,
                    failed = report.failed,
                    offset = line.offset,
                    "event published"
                );
            }
            WatchItem::Rotated { previous_offset } => {
                shared.rotations.fetch_add(1, Ordering::Relaxed);
                tracing::info!(previous_offset, "log rotated, continuing from offset 0");
            }
        }
    }
    tracing::debug!("classify task finished");
}

impl Pipeline for IngestPipeline {
    async fn start(&mut self) -> Result<(), ScRelayError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        tracing::info!(path = %self.config.watch.log_path.display(), "starting ingest pipeline");

        // 1. 감시기 열기 (실패는 시작 실패)
        let mut watcher = match self.watcher.take() {
            Some(watcher) => watcher,
            None => LogWatcher::from_config(self.config.watch.clone()),
        };
        watcher.open().await?;

        self.cancel = CancellationToken::new();
        self.failure = CancellationToken::new();
        self.shared.watcher_exited.store(false, Ordering::Relaxed);
        *self.shared.fatal.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let (tx, rx) = mpsc::channel(self.config.watch.channel_capacity);

        // 2. 감시 태스크
        let cancel = self.cancel.clone();
        let failure = self.failure.clone();
        let shared = Arc::clone(&self.shared);
        self.tasks.push(tokio::spawn(async move {
            let result = watcher.run(tx, cancel).await;
            shared.watcher_exited.store(true, Ordering::Relaxed);
            if let Err(e) = result {
                tracing::error!(error = %e, "log watcher failed");
                shared.set_fatal(e.to_string());
                failure.cancel();
            }
        }));

        // 3. 분류/발행 태스크
        self.tasks.push(tokio::spawn(classify_loop(
            rx,
            Arc::clone(&self.patterns),
            Arc::clone(&self.bus),
            Arc::clone(&self.shared),
        )));

        self.state = PipelineState::Running;
        tracing::info!(patterns = self.patterns.len(), "ingest pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ScRelayError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping ingest pipeline");

        // 감시기가 먼저 끝나면 채널이 닫히고 classify 태스크가 남은 줄을 모두 처리한 뒤 끝난다
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "ingest task terminated abnormally");
            }
        }

        self.state = PipelineState::Stopped;
        let stats = self.stats();
        tracing::info!(
            lines_read = stats.lines_read,
            events_published = stats.events_published,
            "ingest pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if let Some(reason) = self.shared.fatal() {
                    HealthStatus::Unhealthy(format!("watcher failed: {reason}"))
                } else if self.shared.watcher_exited.load(Ordering::Relaxed) {
                    HealthStatus::Degraded("watcher stopped".to_owned())
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 수집 파이프라인 빌더
pub struct IngestPipelineBuilder {
    config: IngestConfig,
    patterns: Option<Arc<PatternLibrary>>,
    bus: Option<Arc<EventBus>>,
    offset_store: Option<Box<dyn OffsetStore>>,
}

impl IngestPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
            patterns: None,
            bus: None,
            offset_store: None,
        }
    }

    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// 분류에 사용할 패턴 라이브러리 (필수)
    pub fn patterns(mut self, patterns: Arc<PatternLibrary>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// 외부 버스를 공유합니다. 설정하지 않으면 `config.bus`로 새 버스를 만듭니다.
    pub fn bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// 첫 start에서 사용할 오프셋 저장소 (기본: `watch.offset_file`에 따름)
    pub fn offset_store(mut self, store: Box<dyn OffsetStore>) -> Self {
        self.offset_store = Some(store);
        self
    }

    pub fn build(self) -> Result<IngestPipeline, LogPipelineError> {
        self.config.validate()?;

        let patterns = self.patterns.ok_or_else(|| LogPipelineError::Config {
            field: "patterns".to_owned(),
            reason: "pattern library is required".to_owned(),
        })?;

        let bus = match self.bus {
            Some(bus) => bus,
            None => Arc::new(EventBus::new(self.config.bus.clone())?),
        };

        let watcher = match self.offset_store {
            Some(store) => LogWatcher::new(self.config.watch.clone(), store),
            None => LogWatcher::from_config(self.config.watch.clone()),
        };

        Ok(IngestPipeline {
            config: self.config,
            state: PipelineState::Initialized,
            patterns,
            bus,
            watcher: Some(watcher),
            shared: Arc::new(IngestShared::default()),
            cancel: CancellationToken::new(),
            failure: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }
}

impl Default for IngestPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screlay_core::config::default_patterns;

    fn library() -> Arc<PatternLibrary> {
        Arc::new(PatternLibrary::new(&default_patterns()).unwrap())
    }

    #[test]
    fn builder_requires_patterns() {
        let err = IngestPipelineBuilder::new().build().err().unwrap();
        assert!(matches!(err, LogPipelineError::Config { ref field, .. } if field == "patterns"));
    }

    #[test]
    fn builder_creates_pipeline() {
        let pipeline = IngestPipelineBuilder::new()
            .patterns(library())
            .build()
            .unwrap();
        assert_eq!(pipeline.state_name(), "initialized");
        assert_eq!(pipeline.stats(), IngestStats::default());
        assert_eq!(pipeline.bus().subscriber_count(), 0);
    }

    #[test]
    fn builder_with_invalid_config_fails() {
        let mut config = IngestConfig::default();
        config.watch.channel_capacity = 0;
        let result = IngestPipelineBuilder::new()
            .config(config)
            .patterns(library())
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pipeline_lifecycle_without_start() {
        let mut pipeline = IngestPipelineBuilder::new()
            .patterns(library())
            .build()
            .unwrap();
        assert!(pipeline.health_check().await.is_unhealthy());
        assert!(pipeline.stop().await.is_err());
    }

    #[tokio::test]
    async fn start_fails_for_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = IngestConfig::default();
        config.watch.log_path = dir.path().join("absent.log");
        let mut pipeline = IngestPipelineBuilder::new()
            .config(config)
            .patterns(library())
            .build()
            .unwrap();
        assert!(pipeline.start().await.is_err());
        assert_eq!(pipeline.state_name(), "initialized");
    }
}
