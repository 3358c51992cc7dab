//! Ingest pipeline initialization.
//!
//! Converts the core config into an `IngestConfig`, compiles the pattern
//! set, and builds the `IngestPipeline` with its own event bus.

use std::sync::Arc;

use anyhow::Result;

use screlay_core::config::ScRelayConfig;
use screlay_log_pipeline::{IngestConfig, IngestPipeline, IngestPipelineBuilder, PatternLibrary};

pub fn init(config: &ScRelayConfig) -> Result<IngestPipeline> {
    let ingest_config = IngestConfig::from_core(config)
        .map_err(|e| anyhow::anyhow!("invalid ingest configuration: {e}"))?;

    let patterns = PatternLibrary::new(&config.patterns)
        .map_err(|e| anyhow::anyhow!("failed to compile event patterns: {e}"))?;
    tracing::info!(
        patterns = patterns.len(),
        order = ?patterns.priority_order(),
        "event patterns compiled"
    );

    if let Some(path) = &ingest_config.bus.trace_path {
        tracing::info!(path = %path.display(), "bus trace enabled");
    }

    IngestPipelineBuilder::new()
        .config(ingest_config)
        .patterns(Arc::new(patterns))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build ingest pipeline: {e}"))
}
