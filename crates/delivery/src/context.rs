//! 클라이언트 컨텍스트
//!
//! 페이로드에 붙는 사용자 이름, 샤드, 클라이언트 버전을 보관합니다.
//! 사용자 이름이 설정되지 않았다면 `connected` 이벤트에서, 샤드는
//! `shard` 필드를 가진 모든 이벤트에서 학습합니다.

use std::sync::{PoisonError, RwLock};

use screlay_core::event::Event;
use serde::Serialize;
use tracing::debug;

/// 컨텍스트 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientSnapshot {
    pub username: String,
    pub shard: String,
    pub version: String,
}

/// 공유 클라이언트 컨텍스트
#[derive(Debug)]
pub struct ClientContext {
    inner: RwLock<ClientSnapshot>,
    username_configured: bool,
}

impl ClientContext {
    pub fn new(username: impl Into<String>, version: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            username_configured: !username.is_empty(),
            inner: RwLock::new(ClientSnapshot {
                username,
                shard: String::new(),
                version: version.into(),
            }),
        }
    }

    /// 이벤트에서 사용자 이름과 샤드를 학습합니다.
    pub fn observe(&self, event: &Event) {
        let username = if self.username_configured || event.event_type != "connected" {
            None
        } else {
            event.field("player").filter(|p| !p.is_empty())
        };
        let shard = event.field("shard").filter(|s| !s.is_empty());
        if username.is_none() && shard.is_none() {
            return;
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(username) = username
            && inner.username != username
        {
            debug!(username, "learned username from connected event");
            inner.username = username.to_owned();
        }
        if let Some(shard) = shard
            && inner.shard != shard
        {
            debug!(shard, "shard changed");
            inner.shard = shard.to_owned();
        }
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use screlay_core::event::EventFields;

    fn event(event_type: &str, fields: &[(&str, &str)]) -> Event {
        let fields: EventFields = fields.iter().copied().collect();
        Event::new(event_type, fields, "", Utc::now(), event_type)
    }

    #[test]
    fn learns_username_when_not_configured() {
        let ctx = ClientContext::new("", "1.0.0");
        ctx.observe(&event("connected", &[("player", "ElKoukra")]));
        assert_eq!(ctx.snapshot().username, "ElKoukra");
    }

    #[test]
    fn configured_username_is_kept() {
        let ctx = ClientContext::new("Configured", "1.0.0");
        ctx.observe(&event("connected", &[("player", "Other")]));
        assert_eq!(ctx.snapshot().username, "Configured");
    }

    #[test]
    fn player_field_on_other_events_is_ignored() {
        let ctx = ClientContext::new("", "1.0.0");
        ctx.observe(&event("actor_stall", &[("player", "Someone")]));
        assert_eq!(ctx.snapshot().username, "");
    }

    #[test]
    fn shard_learned_from_any_event() {
        let ctx = ClientContext::new("", "1.0.0");
        ctx.observe(&event("connection_flow", &[("username", "x"), ("shard", "pub_euw1b_123")]));
        let snap = ctx.snapshot();
        assert_eq!(snap.shard, "pub_euw1b_123");
        assert_eq!(snap.version, "1.0.0");
    }
}
