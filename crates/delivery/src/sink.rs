//! 싱크 집합
//!
//! 싱크 종류는 닫힌 집합이며 [`Sink::deliver`] 하나로 전송합니다.

use screlay_core::event::Event;

use crate::context::ClientSnapshot;
use crate::realtime::RealtimeSink;
use crate::state::{SinkKind, StateCell};
use crate::store::StoreSink;
use crate::template::TemplateSet;
use crate::webhook::WebhookSink;

/// 단일 전송 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// 전송 성공
    Delivered { attempts: u32 },
    /// 연결 태스크에 넘김 (실시간)
    Forwarded,
    /// 버려짐
    Dropped { reason: &'static str },
    /// 오버플로 버퍼에 보관 (저장소)
    Buffered { pending: usize },
}

pub enum Sink {
    Webhook(WebhookSink),
    Realtime(RealtimeSink),
    Store(StoreSink),
}

impl Sink {
    pub fn kind(&self) -> SinkKind {
        match self {
            Self::Webhook(_) => SinkKind::Webhook,
            Self::Realtime(_) => SinkKind::Realtime,
            Self::Store(_) => SinkKind::Store,
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn state(&self) -> &StateCell {
        match self {
            Self::Webhook(s) => s.state(),
            Self::Realtime(s) => s.state(),
            Self::Store(s) => s.state(),
        }
    }

    pub async fn deliver(
        &mut self,
        event: &Event,
        ctx: &ClientSnapshot,
        templates: &TemplateSet,
    ) -> SinkOutcome {
        match self {
            Self::Webhook(sink) => {
                let content = templates.render(event, ctx);
                sink.deliver(event, &content).await
            }
            Self::Realtime(sink) => {
                let content = templates.render(event, ctx);
                sink.deliver(event, &content, ctx)
            }
            Self::Store(sink) => sink.deliver(event, ctx).await,
        }
    }
}
