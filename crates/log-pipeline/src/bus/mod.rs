//! 이벤트 버스 -- 필터링된 구독과 토픽별 이력을 가진 동기 pub/sub 허브
//!
//! # 전달 규칙
//! - 구독 등록 순서대로, 발행 시점의 구독 목록 스냅샷에 전달합니다.
//! - 핸들러는 잠금 밖에서 실행되므로 핸들러 안에서 구독/해제가 가능합니다.
//! - 이력을 재생 중인 구독에 도착한 라이브 이벤트는 보류했다가 재생이 끝난 뒤
//!   발행 순서대로 전달합니다. 재생된 이벤트를 라이브 이벤트가 앞지르지 않습니다.
//! - 핸들러가 `Err`를 반환하거나 panic하면 내부 메타 이벤트로 기록하고
//!   나머지 핸들러 전달을 계속합니다. 발행자에게는 전파되지 않습니다.
//!
//! # 이력
//! 이벤트 타입(토픽)마다 최근 `history_per_topic`개를 보관합니다 (오래된 것부터 제거).
//! 늦게 붙은 구독자를 위한 best-effort 재생용이며 영속적이지 않습니다.

mod trace;

pub use trace::{TraceRecord, TraceWriter};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use screlay_core::event::Event;
use screlay_core::metrics as m;

use crate::config::BusOptions;
use crate::error::LogPipelineError;

/// 핸들러 에러
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// 구독 핸들러
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Arc<Event>) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&Arc<Event>) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &Arc<Event>) -> Result<(), HandlerError> {
        self(event)
    }
}

/// 추가 필터 predicate
pub type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

/// 구독 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 토픽 필터
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    /// 모든 이벤트 타입
    All,
    /// 지정된 이벤트 타입만
    Types(HashSet<String>),
}

impl TopicFilter {
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Types(types.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Types(set) => set.contains(event_type),
        }
    }
}

/// 버스 내부 메타 이벤트
#[derive(Debug, Clone, Serialize)]
pub enum MetaEvent {
    /// 핸들러 실패 (에러 반환 또는 panic)
    HandlerFailed {
        subscription: SubscriptionId,
        event_type: String,
        event_id: String,
        error: String,
        at: DateTime<Utc>,
    },
}

/// 발행 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub sequence: u64,
    /// 필터를 통과한 구독 수 (재생 중이라 보류된 구독 포함)
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// 버스 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub handler_failures: u64,
    pub subscribers: usize,
}

struct Subscription {
    id: SubscriptionId,
    filter: TopicFilter,
    predicate: Option<Predicate>,
    handler: Box<dyn EventHandler>,
    /// 재생 중이면 `Some`: 그동안 발행된 이벤트를 모아 둔다
    pending: Mutex<Option<Vec<Arc<Event>>>>,
}

enum Dispatch {
    Skipped,
    Delivered,
    Failed(String),
}

impl Subscription {
    fn lock_pending(&self) -> MutexGuard<'_, Option<Vec<Arc<Event>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 재생 중이면 이벤트를 보류하고 `true`
    fn defer(&self, event: &Arc<Event>) -> bool {
        match self.lock_pending().as_mut() {
            Some(queue) => {
                queue.push(Arc::clone(event));
                true
            }
            None => false,
        }
    }

    fn dispatch(&self, event: &Arc<Event>) -> Dispatch {
        if !self.filter.matches(&event.event_type) {
            return Dispatch::Skipped;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if let Some(predicate) = &self.predicate
                && !predicate(event.as_ref())
            {
                return Ok(false);
            }
            self.handler.handle(event).map(|()| true)
        }));
        match outcome {
            Ok(Ok(true)) => Dispatch::Delivered,
            Ok(Ok(false)) => Dispatch::Skipped,
            Ok(Err(e)) => Dispatch::Failed(e.to_string()),
            Err(payload) => Dispatch::Failed(format!("handler panicked: {}", panic_message(&*payload))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[derive(Default)]
struct BusState {
    subscriptions: Vec<Arc<Subscription>>,
    next_id: u64,
    sequence: u64,
    history: HashMap<String, VecDeque<(u64, Arc<Event>)>>,
    meta: VecDeque<MetaEvent>,
    stats: BusStats,
}

/// 이벤트 버스
pub struct EventBus {
    options: BusOptions,
    state: Mutex<BusState>,
    trace: Option<Mutex<TraceWriter>>,
}

impl EventBus {
    /// 버스를 생성합니다. `trace_path`가 설정되어 있으면 trace 파일을 엽니다.
    pub fn new(options: BusOptions) -> Result<Self, LogPipelineError> {
        let trace = match &options.trace_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "event bus trace enabled");
                Some(Mutex::new(TraceWriter::open(path)?))
            }
            None => None,
        };
        Ok(Self {
            options,
            state: Mutex::new(BusState::default()),
            trace,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 구독을 등록합니다.
    pub fn subscribe(
        &self,
        filter: TopicFilter,
        predicate: Option<Predicate>,
        handler: impl EventHandler + 'static,
    ) -> SubscriptionId {
        let mut state = self.lock();
        let sub = Self::register(&mut state, filter, predicate, Box::new(handler), false);
        metrics::gauge!(m::BUS_SUBSCRIBERS).set(state.subscriptions.len() as f64);
        sub.id
    }

    fn register(
        state: &mut BusState,
        filter: TopicFilter,
        predicate: Option<Predicate>,
        handler: Box<dyn EventHandler>,
        replaying: bool,
    ) -> Arc<Subscription> {
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        let sub = Arc::new(Subscription {
            id,
            filter,
            predicate,
            handler,
            pending: Mutex::new(replaying.then(Vec::new)),
        });
        state.subscriptions.push(Arc::clone(&sub));
        state.stats.subscribers = state.subscriptions.len();
        tracing::debug!(subscription = %id, replaying, "subscription registered");
        sub
    }

    /// 구독을 등록하고, 필터에 맞는 이력을 원래 발행 순서대로 먼저 재생합니다.
    ///
    /// 재생하는 동안 (다른 스레드나 핸들러 자신이) 발행한 이벤트는 보류되었다가
    /// 재생이 끝난 뒤 전달되므로, 라이브 이벤트는 항상 재생된 이벤트 뒤에 옵니다.
    pub fn subscribe_with_replay(
        &self,
        filter: TopicFilter,
        predicate: Option<Predicate>,
        handler: impl EventHandler + 'static,
    ) -> SubscriptionId {
        let (sub, mut backlog) = {
            let mut state = self.lock();
            let backlog: Vec<(u64, Arc<Event>)> = state
                .history
                .iter()
                .filter(|(topic, _)| filter.matches(topic))
                .flat_map(|(_, events)| events.iter().cloned())
                .collect();
            let replaying = !backlog.is_empty();
            let sub = Self::register(&mut state, filter, predicate, Box::new(handler), replaying);
            metrics::gauge!(m::BUS_SUBSCRIBERS).set(state.subscriptions.len() as f64);
            (sub, backlog)
        };

        backlog.sort_by_key(|(seq, _)| *seq);
        for (_, event) in &backlog {
            if let Dispatch::Failed(error) = sub.dispatch(event) {
                self.record_failure(sub.id, event, error);
            }
        }

        // 보류된 라이브 이벤트를 비운 뒤에야 직접 전달로 전환
        let mut delivered = 0u64;
        loop {
            let batch = {
                let mut pending = sub.lock_pending();
                match pending.as_mut() {
                    Some(queue) if !queue.is_empty() => std::mem::take(queue),
                    _ => {
                        *pending = None;
                        break;
                    }
                }
            };
            for event in &batch {
                match sub.dispatch(event) {
                    Dispatch::Skipped => {}
                    Dispatch::Delivered => delivered += 1,
                    Dispatch::Failed(error) => self.record_failure(sub.id, event, error),
                }
            }
        }
        if delivered > 0 {
            self.lock().stats.delivered += delivered;
        }
        sub.id
    }

    /// 구독을 해제합니다. 이미 없는 id여도 에러가 아닙니다.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != id);
        let removed = state.subscriptions.len() != before;
        state.stats.subscribers = state.subscriptions.len();
        metrics::gauge!(m::BUS_SUBSCRIBERS).set(state.subscriptions.len() as f64);
        if removed {
            tracing::debug!(subscription = %id, "subscription removed");
        }
        removed
    }

    /// 이벤트를 발행합니다.
    pub fn publish(&self, event: Arc<Event>) -> PublishReport {
        let started = Instant::now();

        let (sequence, snapshot) = {
            let mut state = self.lock();
            state.sequence += 1;
            state.stats.published += 1;
            let sequence = state.sequence;

            let capacity = self.options.history_per_topic;
            if capacity > 0 {
                let topic = state
                    .history
                    .entry(event.event_type.clone())
                    .or_default();
                if topic.len() >= capacity {
                    topic.pop_front();
                }
                topic.push_back((sequence, Arc::clone(&event)));
            }

            (sequence, state.subscriptions.clone())
        };
        metrics::counter!(m::BUS_EVENTS_PUBLISHED_TOTAL).increment(1);

        let mut report = PublishReport {
            sequence,
            matched: 0,
            delivered: 0,
            failed: 0,
        };
        for sub in &snapshot {
            if sub.filter.matches(&event.event_type) && sub.defer(&event) {
                report.matched += 1;
                continue;
            }
            match sub.dispatch(&event) {
                Dispatch::Skipped => {}
                Dispatch::Delivered => {
                    report.matched += 1;
                    report.delivered += 1;
                }
                Dispatch::Failed(error) => {
                    report.matched += 1;
                    report.failed += 1;
                    self.record_failure(sub.id, &event, error);
                }
            }
        }

        self.lock().stats.delivered += report.delivered as u64;

        if let Some(trace) = &self.trace {
            let record = TraceRecord {
                sequence,
                published_at: Utc::now(),
                event: &event,
                matched: report.matched,
                failed: report.failed,
                elapsed_us: started.elapsed().as_micros(),
            };
            let mut writer = trace.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = writer.write(&record) {
                tracing::warn!(error = %e, "failed to write bus trace record");
            }
        }

        report
    }

    fn record_failure(&self, subscription: SubscriptionId, event: &Event, error: String) {
        tracing::warn!(
            subscription = %subscription,
            event_type = %event.event_type,
            event_id = %event.id,
            error = %error,
            "event handler failed"
        );
        metrics::counter!(m::BUS_HANDLER_FAILURES_TOTAL).increment(1);

        let mut state = self.lock();
        state.stats.handler_failures += 1;
        let capacity = self.options.meta_event_capacity;
        if capacity == 0 {
            return;
        }
        if state.meta.len() >= capacity {
            state.meta.pop_front();
        }
        state.meta.push_back(MetaEvent::HandlerFailed {
            subscription,
            event_type: event.event_type.clone(),
            event_id: event.id.to_string(),
            error,
            at: Utc::now(),
        });
    }

    /// 토픽의 보관 이력 (오래된 것부터)
    pub fn history(&self, event_type: &str) -> Vec<Arc<Event>> {
        self.lock()
            .history
            .get(event_type)
            .map(|events| events.iter().map(|(_, e)| Arc::clone(e)).collect())
            .unwrap_or_default()
    }

    /// 메타 이벤트 스냅샷
    pub fn meta_events(&self) -> Vec<MetaEvent> {
        self.lock().meta.iter().cloned().collect()
    }

    pub fn stats(&self) -> BusStats {
        self.lock().stats
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscriptions.len()
    }
}
