//! 수집 파이프라인 설정
//!
//! [`IngestConfig`]는 core의 [`ScRelayConfig`](screlay_core::config::ScRelayConfig)에서
//! watcher / rate_limit / bus 섹션을 읽어 파이프라인 내부 타입으로 변환합니다.
//!
//! # 사용 예시
//! ```ignore
//! use screlay_core::config::ScRelayConfig;
//! use screlay_log_pipeline::config::IngestConfig;
//!
//! let core_config = ScRelayConfig::default();
//! let config = IngestConfig::from_core(&core_config)?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use screlay_core::config::{BusConfig, RateLimitConfig, ScRelayConfig, WatcherConfig};

use crate::error::LogPipelineError;

/// watcher 시작 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// 파일 처음부터 (오프셋 0)
    CatchUp,
    /// 파일 끝부터
    LiveTail,
    /// 저장된 오프셋부터, 없으면 파일 끝부터
    Resume,
}

impl StartMode {
    pub fn parse(s: &str) -> Result<Self, LogPipelineError> {
        match s {
            "catch_up" => Ok(Self::CatchUp),
            "live_tail" => Ok(Self::LiveTail),
            "resume" => Ok(Self::Resume),
            other => Err(LogPipelineError::Config {
                field: "watcher.start_mode".to_owned(),
                reason: format!("unknown start mode '{other}'"),
            }),
        }
    }
}

/// 전역 상한 적용 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeilingScope {
    /// 이벤트 타입별로 따로 센다
    PerType,
    /// 모든 타입을 합산한다
    Global,
}

impl CeilingScope {
    pub fn parse(s: &str) -> Result<Self, LogPipelineError> {
        match s {
            "per_type" => Ok(Self::PerType),
            "global" => Ok(Self::Global),
            other => Err(LogPipelineError::Config {
                field: "rate_limit.ceiling_scope".to_owned(),
                reason: format!("unknown ceiling scope '{other}'"),
            }),
        }
    }
}

/// LogWatcher 설정
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub log_path: PathBuf,
    pub start_mode: StartMode,
    pub poll_interval: Duration,
    /// `None`이면 메모리 오프셋 저장소 사용
    pub offset_file: Option<PathBuf>,
    pub max_consecutive_failures: u32,
    pub max_line_length: usize,
    /// 한 번의 poll에서 읽을 최대 바이트
    pub max_read_bytes: usize,
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("Game.log"),
            start_mode: StartMode::LiveTail,
            poll_interval: Duration::from_millis(500),
            offset_file: None,
            max_consecutive_failures: 10,
            max_line_length: 64 * 1024,
            max_read_bytes: 1024 * 1024,
            channel_capacity: 1024,
        }
    }
}

impl WatchConfig {
    pub fn from_core(core: &WatcherConfig) -> Result<Self, LogPipelineError> {
        Ok(Self {
            log_path: PathBuf::from(&core.log_path),
            start_mode: StartMode::parse(&core.start_mode)?,
            poll_interval: Duration::from_millis(core.poll_interval_ms),
            offset_file: (!core.offset_file.is_empty()).then(|| PathBuf::from(&core.offset_file)),
            max_consecutive_failures: core.max_consecutive_failures,
            max_line_length: core.max_line_length,
            channel_capacity: core.channel_capacity,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.log_path.as_os_str().is_empty() {
            return Err(LogPipelineError::Config {
                field: "watcher.log_path".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(LogPipelineError::Config {
                field: "watcher.poll_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.max_consecutive_failures == 0 {
            return Err(LogPipelineError::Config {
                field: "watcher.max_consecutive_failures".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.max_line_length == 0 || self.max_read_bytes == 0 {
            return Err(LogPipelineError::Config {
                field: "watcher.max_line_length".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(LogPipelineError::Config {
                field: "watcher.channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}

/// RateLimiter 설정
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// 중복 억제 윈도우 (첫 발생 기준)
    pub dedup_window: Duration,
    /// 윈도우당 허용되는 동일 키 발생 수
    pub max_duplicates: u32,
    /// 윈도우당 최대 이벤트 수 (0이면 비활성)
    pub ceiling: u32,
    pub ceiling_window: Duration,
    pub ceiling_scope: CeilingScope,
    /// 기회적 정리 주기
    pub cleanup_interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(300),
            max_duplicates: 1,
            ceiling: 30,
            ceiling_window: Duration::from_secs(60),
            ceiling_scope: CeilingScope::PerType,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl LimiterConfig {
    pub fn from_core(core: &RateLimitConfig) -> Result<Self, LogPipelineError> {
        Ok(Self {
            dedup_window: Duration::from_secs(core.dedup_window_secs),
            max_duplicates: core.max_duplicates,
            ceiling: core.ceiling_per_window,
            ceiling_window: Duration::from_secs(core.ceiling_window_secs),
            ceiling_scope: CeilingScope::parse(&core.ceiling_scope)?,
            cleanup_interval: Duration::from_secs(core.cleanup_interval_secs),
        })
    }

    pub fn validate(&self) -> Result<(), LogPipelineError> {
        if self.dedup_window.is_zero() {
            return Err(LogPipelineError::Config {
                field: "rate_limit.dedup_window_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.max_duplicates == 0 {
            return Err(LogPipelineError::Config {
                field: "rate_limit.max_duplicates".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.ceiling_window.is_zero() {
            return Err(LogPipelineError::Config {
                field: "rate_limit.ceiling_window_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}

/// EventBus 설정
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub history_per_topic: usize,
    pub meta_event_capacity: usize,
    /// 설정 시 모든 publish를 JSON lines로 기록
    pub trace_path: Option<PathBuf>,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            history_per_topic: 100,
            meta_event_capacity: 256,
            trace_path: None,
        }
    }
}

impl BusOptions {
    pub fn from_core(core: &BusConfig) -> Self {
        Self {
            history_per_topic: core.history_per_topic,
            meta_event_capacity: core.meta_event_capacity,
            trace_path: (!core.trace_path.is_empty()).then(|| PathBuf::from(&core.trace_path)),
        }
    }
}

/// 수집 파이프라인 전체 설정
#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    pub watch: WatchConfig,
    pub limiter: LimiterConfig,
    pub bus: BusOptions,
}

impl IngestConfig {
    /// core 설정에서 파이프라인 설정을 생성하고 검증합니다.
    pub fn from_core(core: &ScRelayConfig) -> Result<Self, LogPipelineError> {
        let config = Self {
            watch: WatchConfig::from_core(&core.watcher)?,
            limiter: LimiterConfig::from_core(&core.rate_limit)?,
            bus: BusOptions::from_core(&core.bus),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LogPipelineError> {
        self.watch.validate()?;
        self.limiter.validate()
    }
}
