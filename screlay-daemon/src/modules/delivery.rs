//! Delivery manager initialization.

use anyhow::Result;

use screlay_core::config::ScRelayConfig;
use screlay_delivery::{DeliveryManager, ManagerConfig};

pub fn init(config: &ScRelayConfig) -> Result<DeliveryManager> {
    let manager_config = ManagerConfig::from_core(config)
        .map_err(|e| anyhow::anyhow!("invalid delivery configuration: {e}"))?;

    if manager_config.enabled_sinks() == 0 {
        tracing::warn!("no delivery sinks enabled in [delivery]");
    }

    DeliveryManager::from_config(manager_config)
        .map_err(|e| anyhow::anyhow!("failed to build delivery manager: {e}"))
}
