//! Module initialization.
//!
//! Each library crate is built from the shared [`ScRelayConfig`] here, so the
//! orchestrator only deals with ready-to-start pipelines.
//!
//! # Wiring
//!
//! ```text
//! ingest (watcher -> patterns -> bus) --subscriber--> relay (limiter) --dispatch--> delivery
//! ```
//!
//! [`ScRelayConfig`]: screlay_core::config::ScRelayConfig

pub mod delivery;
pub mod ingest;
pub mod relay;
