//! 디버그 publish trace -- 모든 발행을 JSON lines로 기록합니다.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use screlay_core::event::Event;

use crate::error::LogPipelineError;

/// trace 한 줄
#[derive(Debug, Serialize)]
pub struct TraceRecord<'a> {
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
    pub event: &'a Event,
    pub matched: usize,
    pub failed: usize,
    pub elapsed_us: u128,
}

/// append-only trace 기록기
pub struct TraceWriter {
    out: BufWriter<File>,
}

impl TraceWriter {
    pub fn open(path: &Path) -> Result<Self, LogPipelineError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| LogPipelineError::Trace(format!("{}: {e}", path.display())))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub fn write(&mut self, record: &TraceRecord<'_>) -> Result<(), LogPipelineError> {
        serde_json::to_writer(&mut self.out, record)
            .map_err(|e| LogPipelineError::Trace(e.to_string()))?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}
