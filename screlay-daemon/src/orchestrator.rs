//! Module orchestration -- assembly, wiring, and lifecycle management.
//!
//! The [`Orchestrator`] builds the ingest pipeline, the rate limiter and the
//! delivery manager from one [`ScRelayConfig`], connects them through an
//! EventBus subscription, and runs until a shutdown signal arrives.
//!
//! # Startup Order (consumers before producers)
//!
//! 1. Delivery manager (sink workers, realtime connection)
//! 2. Relay subscription on the bus (limiter + dispatch)
//! 3. Ingest pipeline (watcher starts producing lines)
//!
//! # Shutdown Order (producers first)
//!
//! 1. Ingest pipeline (watcher stops, remaining lines are classified)
//! 2. Relay subscription removed
//! 3. Delivery manager (queues drained within the drain timeout)

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use screlay_core::config::ScRelayConfig;
use screlay_core::metrics as m;
use screlay_core::pipeline::Pipeline;
use screlay_delivery::DeliveryManager;
use screlay_log_pipeline::{IngestPipeline, RateLimiter, SubscriptionId, TopicFilter};

use crate::health::{self, DaemonHealth, ModuleHealth, aggregate_status};
use crate::metrics_server;
use crate::modules::{self, relay::RelayHandler};

/// Interval between aggregated health reports.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Interval between uptime gauge updates.
const UPTIME_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: ScRelayConfig,
    ingest: IngestPipeline,
    limiter: Arc<RateLimiter>,
    delivery: DeliveryManager,
    subscription: Option<SubscriptionId>,
    shutdown_tx: broadcast::Sender<()>,
    health_interval: Duration,
    start_time: Instant,
}

impl Orchestrator {
    /// Build from an already-loaded configuration.
    pub fn build_from_config(config: ScRelayConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {e}"))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION"))
                .set(1.0);
        }

        let ingest = modules::ingest::init(&config)?;
        let limiter = Arc::new(RateLimiter::new(ingest.config().limiter.clone()));
        let delivery = modules::delivery::init(&config)?;

        let (shutdown_tx, _) = broadcast::channel(4);

        tracing::info!(
            log_path = %config.watcher.log_path,
            start_mode = %config.watcher.start_mode,
            sinks = delivery.config().enabled_sinks(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            ingest,
            limiter,
            delivery,
            subscription: None,
            shutdown_tx,
            health_interval: HEALTH_CHECK_INTERVAL,
            start_time: Instant::now(),
        })
    }

    /// Override the health report interval.
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Start all modules and run until SIGINT or SIGTERM.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start all modules and run until `shutdown` resolves.
    ///
    /// Returns an error if startup fails or the watcher fails fatally.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        self.start().await?;

        let mut tasks = vec![spawn_sweeper(
            Arc::clone(&self.limiter),
            self.shutdown_tx.subscribe(),
        )];
        if self.config.metrics.enabled {
            tasks.push(spawn_uptime_updater(
                self.start_time,
                self.shutdown_tx.subscribe(),
            ));
        }

        let failure = self.ingest.failure_signal();
        let mut health_tick = tokio::time::interval(self.health_interval);
        health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        health_tick.tick().await;

        tokio::pin!(shutdown);
        tracing::info!("entering main event loop");
        let outcome = loop {
            tokio::select! {
                signal = &mut shutdown => {
                    match signal {
                        Ok(name) => tracing::info!(signal = name, "shutdown signal received"),
                        Err(e) => tracing::error!(error = %e, "shutdown signal handler failed"),
                    }
                    break Ok(());
                }
                _ = failure.cancelled() => {
                    let reason = self.ingest.fatal_error().unwrap_or_default();
                    tracing::error!(reason = %reason, "log watcher failed, shutting down");
                    break Err(anyhow::anyhow!("log watcher failed: {reason}"));
                }
                _ = health_tick.tick() => {
                    health::log_report(&self.health().await);
                }
            }
        };

        let _ = self.shutdown_tx.send(());
        for task in tasks {
            let _ = task.await;
        }

        self.shutdown().await?;
        outcome
    }

    async fn start(&mut self) -> Result<()> {
        tracing::info!("starting delivery manager");
        self.delivery
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start delivery manager: {e}"))?;

        let relay = RelayHandler::new(Arc::clone(&self.limiter), self.delivery.handle());
        self.subscription = Some(self.ingest.bus().subscribe(TopicFilter::All, None, relay));

        tracing::info!("starting ingest pipeline");
        if let Err(e) = self.ingest.start().await {
            tracing::warn!("ingest startup failed, stopping delivery");
            self.unsubscribe();
            if let Err(stop_err) = self.delivery.stop().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "delivery stop also failed during startup cleanup"
                );
            }
            return Err(anyhow::anyhow!("failed to start ingest pipeline: {e}"));
        }
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.ingest.bus().unsubscribe(id);
        }
    }

    /// Stop the watcher first, then drain delivery.
    async fn shutdown(&mut self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.ingest.stop().await {
            tracing::error!(error = %e, "failed to stop ingest pipeline");
            errors.push(format!("ingest: {e}"));
        }
        self.unsubscribe();

        if let Err(e) = self.delivery.stop().await {
            tracing::error!(error = %e, "failed to stop delivery manager");
            errors.push(format!("delivery: {e}"));
        }

        let stats = self.limiter.stats();
        tracing::info!(
            allowed = stats.allowed,
            duplicates = stats.duplicate_denied,
            throttled = stats.throttled,
            "screlay stopped"
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("errors during shutdown: {}", errors.join("; ")))
        }
    }

    /// Current aggregated health.
    pub async fn health(&self) -> DaemonHealth {
        let modules = vec![
            ModuleHealth::new("ingest", self.ingest.health_check().await),
            ModuleHealth::new("delivery", self.delivery.health_check().await),
        ];
        let uptime_secs = self.start_time.elapsed().as_secs();

        DaemonHealth {
            status: aggregate_status(&modules),
            uptime_secs,
            modules,
            sinks: self.delivery.sink_states(),
            ingest: self.ingest.stats(),
            limiter: self.limiter.stats(),
        }
    }

    pub fn config(&self) -> &ScRelayConfig {
        &self.config
    }

    pub fn ingest(&self) -> &IngestPipeline {
        &self.ingest
    }

    pub fn delivery(&self) -> &DeliveryManager {
        &self.delivery
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

/// Wait for SIGTERM or SIGINT and return the signal name.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {e}"))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for Ctrl+C and return the signal name.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to install Ctrl+C handler: {e}"))?;
    Ok("ctrl_c")
}

/// Periodically evict expired rate limiter entries.
fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let period = limiter.config().cleanup_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    limiter.sweep();
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("limiter sweeper shutting down");
                    break;
                }
            }
        }
    })
}

/// Keep the uptime gauge fresh for Prometheus scrapes.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use screlay_core::event::{Event, EventFields};
    use screlay_log_pipeline::LimiterConfig;

    #[tokio::test]
    async fn test_sweeper_evicts_expired_entries() {
        // Given: a limiter with one entry and a short window
        let limiter = Arc::new(RateLimiter::new(LimiterConfig {
            dedup_window: Duration::from_millis(50),
            cleanup_interval: Duration::from_millis(100),
            ..LimiterConfig::default()
        }));
        let event = Event::new(
            "corpse",
            EventFields::new(),
            "",
            chrono::Utc::now(),
            "corpse:P",
        );
        assert!(limiter.allow(&event).is_allowed());
        assert_eq!(limiter.stats().table_size, 1);

        // When: the sweeper runs past the window
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_sweeper(Arc::clone(&limiter), shutdown_rx);
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Then: the entry is gone
        assert!(limiter.entry("corpse:P").is_none());
        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_uptime_updater_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_uptime_updater(Instant::now(), shutdown_rx);
        let _ = shutdown_tx.send(());
        let result = tokio::time::timeout(Duration::from_millis(500), task).await;
        assert!(result.is_ok(), "uptime updater should stop promptly");
    }
}
