//! Bus subscriber that admits events and hands them to delivery.
//!
//! Runs on the classify task, so it only performs the limiter decision and
//! the non-blocking `dispatch`; sink I/O happens on the delivery workers.

use std::sync::Arc;

use screlay_core::event::Event;
use screlay_delivery::{DeliveryHandle, DispatchStatus};
use screlay_log_pipeline::{HandlerError, RateLimiter};

pub struct RelayHandler {
    limiter: Arc<RateLimiter>,
    delivery: DeliveryHandle,
}

impl RelayHandler {
    pub fn new(limiter: Arc<RateLimiter>, delivery: DeliveryHandle) -> Self {
        Self { limiter, delivery }
    }
}

impl screlay_log_pipeline::EventHandler for RelayHandler {
    fn handle(&self, event: &Arc<Event>) -> Result<(), HandlerError> {
        // username and shard are learned even from suppressed events
        self.delivery.context().observe(event);

        let decision = self.limiter.allow(event);
        if !decision.is_allowed() {
            tracing::trace!(
                event_type = %event.event_type,
                identity_key = %event.identity_key,
                ?decision,
                "event not admitted"
            );
            return Ok(());
        }

        let report = self.delivery.dispatch(event);
        let closed: Vec<&str> = report
            .entries
            .iter()
            .filter(|(_, status)| *status == DispatchStatus::Closed)
            .map(|(kind, _)| kind.as_str())
            .collect();
        if !closed.is_empty() {
            return Err(format!("sink workers closed: {}", closed.join(", ")).into());
        }
        tracing::trace!(
            event_id = %event.id,
            event_type = %event.event_type,
            queued = report.queued(),
            "event admitted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use screlay_core::event::EventFields;
    use screlay_delivery::{DeliveryManager, ManagerConfig};
    use screlay_log_pipeline::{EventHandler, LimiterConfig};

    fn event(identity: &str) -> Arc<Event> {
        let mut fields = EventFields::new();
        fields.insert("player", "Someone");
        Arc::new(Event::new("connected", fields, "", Utc::now(), identity))
    }

    #[test]
    fn test_duplicate_is_not_dispatched_but_context_updates() {
        // Given: a relay with no sinks and a fresh limiter
        let manager = DeliveryManager::from_config(ManagerConfig::default()).unwrap();
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::default()));
        let relay = RelayHandler::new(Arc::clone(&limiter), manager.handle());

        // When: the same event is handled twice
        relay.handle(&event("connected:Someone")).unwrap();
        relay.handle(&event("connected:Someone")).unwrap();

        // Then: only the first is admitted, and the username was learned
        let stats = limiter.stats();
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.duplicate_denied, 1);
        assert_eq!(manager.context().snapshot().username, "Someone");
    }
}
