//! CLI argument definitions for screlay-daemon.
//!
//! Uses `clap` v4 derive macros. Flags given here take precedence over
//! both the config file and `SCRELAY_*` environment variables.

use std::path::PathBuf;

use clap::Parser;

use screlay_core::config::ScRelayConfig;

/// Game-log event relay.
///
/// Tails the game log, classifies lines into events, suppresses duplicates,
/// and forwards admitted events to the configured webhook, realtime channel
/// and REST store.
#[derive(Parser, Debug, Default)]
#[command(name = "screlay-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to the screlay.toml configuration file.
    #[arg(short, long, default_value = "screlay.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate the configuration and exit without starting.
    #[arg(long)]
    pub validate: bool,

    /// Read the log from the beginning instead of tailing from the end.
    #[arg(long)]
    pub catch_up: bool,

    /// Record every bus publish to this JSON lines file.
    #[arg(long, value_name = "PATH")]
    pub trace: Option<PathBuf>,
}

impl DaemonCli {
    /// Apply command-line overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut ScRelayConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if self.catch_up {
            config.watcher.start_mode = "catch_up".to_owned();
        }
        if let Some(path) = &self.trace {
            config.bus.trace_path = path.display().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let cli = DaemonCli::parse_from(["screlay-daemon"]);
        assert_eq!(cli.config, PathBuf::from("screlay.toml"));
        assert!(!cli.validate);
        assert!(!cli.catch_up);
        assert!(cli.trace.is_none());
    }

    #[test]
    fn test_overrides_take_precedence() {
        // Given: a config with file values
        let mut config = ScRelayConfig::default();
        config.general.log_level = "info".to_owned();
        config.watcher.start_mode = "live_tail".to_owned();

        // When: CLI flags are applied
        let cli = DaemonCli::parse_from([
            "screlay-daemon",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--catch-up",
            "--trace",
            "/tmp/bus-trace.jsonl",
        ]);
        cli.apply_overrides(&mut config);

        // Then: flags win
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.watcher.start_mode, "catch_up");
        assert_eq!(config.bus.trace_path, "/tmp/bus-trace.jsonl");
    }

    #[test]
    fn test_absent_flags_leave_config_untouched() {
        let mut config = ScRelayConfig::default();
        config.watcher.start_mode = "resume".to_owned();
        DaemonCli::parse_from(["screlay-daemon", "-c", "other.toml"]).apply_overrides(&mut config);
        assert_eq!(config.watcher.start_mode, "resume");
        assert_eq!(config.general.log_format, "json");
    }
}
