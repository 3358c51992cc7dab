//! Aggregated health reporting.
//!
//! The orchestrator polls each module's `health_check()` and produces a
//! [`DaemonHealth`] report. The overall status is the worst module status.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;

use screlay_core::pipeline::HealthStatus;
use screlay_delivery::SinkState;
use screlay_log_pipeline::{IngestStats, LimiterStats};

/// Health report for the whole daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Worst status among the modules.
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub modules: Vec<ModuleHealth>,
    /// Per-sink delivery state.
    pub sinks: Vec<SinkState>,
    pub ingest: IngestStats,
    pub limiter: LimiterStats,
}

/// Health status for a single module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleHealth {
    /// Module name ("ingest", "delivery").
    pub name: String,
    pub status: HealthStatus,
}

impl ModuleHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// Returns the worst status found: Unhealthy > Degraded > Healthy.
pub fn aggregate_status(modules: &[ModuleHealth]) -> HealthStatus {
    let mut degraded = Vec::new();
    let mut unhealthy = Vec::new();

    for module in modules {
        match &module.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => degraded.push(format!("{}: {reason}", module.name)),
            HealthStatus::Unhealthy(reason) => {
                unhealthy.push(format!("{}: {reason}", module.name));
            }
        }
    }

    if !unhealthy.is_empty() {
        HealthStatus::Unhealthy(unhealthy.join("; "))
    } else if !degraded.is_empty() {
        HealthStatus::Degraded(degraded.join("; "))
    } else {
        HealthStatus::Healthy
    }
}

/// Log the report at a level matching its status.
pub fn log_report(health: &DaemonHealth) {
    let sinks = serde_json::to_string(&health.sinks).unwrap_or_default();
    match &health.status {
        HealthStatus::Healthy => tracing::debug!(
            uptime_secs = health.uptime_secs,
            lines_read = health.ingest.lines_read,
            events_published = health.ingest.events_published,
            allowed = health.limiter.allowed,
            sinks = %sinks,
            "daemon healthy"
        ),
        HealthStatus::Degraded(reason) => tracing::warn!(
            reason = %reason,
            uptime_secs = health.uptime_secs,
            sinks = %sinks,
            "daemon degraded"
        ),
        HealthStatus::Unhealthy(reason) => tracing::error!(
            reason = %reason,
            uptime_secs = health.uptime_secs,
            sinks = %sinks,
            "daemon unhealthy"
        ),
    }
}
