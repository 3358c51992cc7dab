//! 로그 파일 감시기 -- 계속 늘어나는 파일에서 완전한 줄만 꺼냅니다.
//!
//! `tail -F`와 유사하게 폴링으로 동작합니다.
//!
//! # 상태
//! `Idle -> Tailing` (open), `Tailing -> Rotated -> Tailing` (로테이션 감지),
//! `* -> Closed` (close, 종료 상태).
//!
//! # 로테이션 감지
//! - 파일 크기 < 읽은 오프셋 (truncate)
//! - inode 변경 (Unix, rename 방식 로테이션)
//! - 파일이 사라졌다가 다시 생김
//!
//! 두 poll 사이에 truncate 후 이전 크기 이상으로 다시 자란 경우는 크기만으로 구분할 수 없습니다.
//!
//! # 오프셋
//! 완전한 줄을 내보낼 때마다 그 줄의 끝 오프셋이 커밋됩니다. 커밋과 소비자 처리 사이에
//! 종료되면 재시작 시 한 줄이 다시 나올 수 있습니다 (at-least-once).

mod offset;

pub use offset::{FileOffsetStore, MemoryOffsetStore, OffsetStore};

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use screlay_core::event::LogLine;
use screlay_core::metrics as m;

use crate::config::{StartMode, WatchConfig};
use crate::error::LogPipelineError;

/// 감시기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Tailing,
    Rotated,
    Closed,
}

/// 감시기가 내보내는 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchItem {
    /// 완전한 한 줄
    Line(LogLine),
    /// 로테이션/truncate 감지. 이후 줄은 오프셋 0부터 다시 시작합니다.
    Rotated { previous_offset: u64 },
}

/// 로그 파일 감시기
pub struct LogWatcher {
    config: WatchConfig,
    store: Box<dyn OffsetStore>,
    state: WatchState,
    file: Option<File>,
    inode: Option<u64>,
    /// 파일에서 읽은 바이트 위치 (부분 줄 포함)
    read_offset: u64,
    /// 마지막으로 커밋된 완전한 줄의 끝
    committed: u64,
    /// 아직 종결자를 보지 못한 부분 줄
    partial: Vec<u8>,
    /// 너무 긴 줄을 버리는 중
    skipping: bool,
    consecutive_failures: u32,
    missing_reported: bool,
}

impl LogWatcher {
    pub fn new(config: WatchConfig, store: Box<dyn OffsetStore>) -> Self {
        Self {
            config,
            store,
            state: WatchState::Idle,
            file: None,
            inode: None,
            read_offset: 0,
            committed: 0,
            partial: Vec::new(),
            skipping: false,
            consecutive_failures: 0,
            missing_reported: false,
        }
    }

    /// 설정의 `offset_file`에 따라 파일 또는 메모리 저장소를 고릅니다.
    pub fn from_config(config: WatchConfig) -> Self {
        let store: Box<dyn OffsetStore> = match &config.offset_file {
            Some(path) => Box::new(FileOffsetStore::new(path, &config.log_path)),
            None => Box::new(MemoryOffsetStore::new()),
        };
        Self::new(config, store)
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.config.log_path
    }

    /// 마지막으로 커밋된 오프셋
    pub fn committed_offset(&self) -> u64 {
        self.committed
    }

    /// 읽기 위치 (버퍼링된 부분 줄 포함)
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// 파일을 열고 시작 오프셋을 정합니다.
    ///
    /// 시작 시점에 열 수 없는 경로는 치명적 에러입니다.
    pub async fn open(&mut self) -> Result<(), LogPipelineError> {
        let path = self.config.log_path.display().to_string();
        let open_err = |reason: String| LogPipelineError::Open {
            path: path.clone(),
            reason,
        };

        if self.state == WatchState::Closed {
            return Err(open_err("watcher is closed".to_owned()));
        }

        let file = File::open(&self.config.log_path)
            .await
            .map_err(|e| open_err(e.to_string()))?;
        let meta = file.metadata().await.map_err(|e| open_err(e.to_string()))?;
        if !meta.is_file() {
            return Err(open_err("not a regular file".to_owned()));
        }
        let len = meta.len();

        let start = match self.config.start_mode {
            StartMode::CatchUp => 0,
            StartMode::LiveTail => len,
            StartMode::Resume => match self.store.load()? {
                Some(stored) if stored <= len => stored,
                Some(stored) => {
                    tracing::info!(
                        path = %path,
                        stored,
                        len,
                        "stored offset is past end of file, starting from 0"
                    );
                    0
                }
                None => len,
            },
        };

        self.inode = inode_of(&meta);
        self.file = Some(file);
        self.read_offset = start;
        self.committed = start;
        self.partial.clear();
        self.skipping = false;
        self.state = WatchState::Tailing;

        tracing::info!(
            path = %path,
            mode = ?self.config.start_mode,
            offset = start,
            "log watcher opened"
        );
        Ok(())
    }

    /// 새로 추가된 완전한 줄을 읽습니다.
    ///
    /// 파일이 잠시 사라진 경우는 빈 결과로 재시도하고, 그 외 에러는
    /// `max_consecutive_failures`번 연속되면 `WatcherFatal`을 반환합니다.
    pub async fn poll(&mut self) -> Result<Vec<WatchItem>, LogPipelineError> {
        match self.state {
            WatchState::Idle => {
                return Err(LogPipelineError::Open {
                    path: self.config.log_path.display().to_string(),
                    reason: "watcher not opened".to_owned(),
                });
            }
            WatchState::Closed => return Ok(Vec::new()),
            WatchState::Rotated | WatchState::Tailing => {}
        }

        match self.poll_inner().await {
            Ok(items) => {
                self.consecutive_failures = 0;
                self.missing_reported = false;
                Ok(items)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !self.missing_reported {
                    tracing::warn!(
                        path = %self.config.log_path.display(),
                        "log file missing, waiting for it to reappear"
                    );
                    self.missing_reported = true;
                }
                // 다시 생기면 새 파일로 취급
                self.file = None;
                Ok(Vec::new())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                metrics::counter!(m::INGEST_READ_ERRORS_TOTAL).increment(1);
                tracing::warn!(
                    path = %self.config.log_path.display(),
                    error = %e,
                    failures = self.consecutive_failures,
                    "log read failed"
                );
                if self.consecutive_failures >= self.config.max_consecutive_failures {
                    return Err(LogPipelineError::WatcherFatal {
                        path: self.config.log_path.display().to_string(),
                        failures: self.consecutive_failures,
                        reason: e.to_string(),
                    });
                }
                Ok(Vec::new())
            }
        }
    }

    async fn poll_inner(&mut self) -> std::io::Result<Vec<WatchItem>> {
        let meta = tokio::fs::metadata(&self.config.log_path).await?;
        let mut items = Vec::new();

        let inode = inode_of(&meta);
        let replaced = matches!((self.inode, inode), (Some(old), Some(new)) if old != new);
        if self.file.is_none() || replaced || meta.len() < self.read_offset {
            let previous_offset = self.read_offset;
            self.state = WatchState::Rotated;
            let file = File::open(&self.config.log_path).await?;
            self.file = Some(file);
            self.inode = inode;
            self.read_offset = 0;
            self.committed = 0;
            self.partial.clear();
            self.skipping = false;
            metrics::counter!(m::INGEST_ROTATIONS_TOTAL).increment(1);
            tracing::info!(
                path = %self.config.log_path.display(),
                previous_offset,
                "log rotation detected, restarting from offset 0"
            );
            items.push(WatchItem::Rotated { previous_offset });
            self.state = WatchState::Tailing;
        }

        let len = meta.len();
        if len <= self.read_offset {
            return Ok(items);
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(items);
        };
        file.seek(SeekFrom::Start(self.read_offset)).await?;
        let budget = (len - self.read_offset).min(self.config.max_read_bytes as u64);
        let mut buf = Vec::with_capacity(budget as usize);
        (&mut *file).take(budget).read_to_end(&mut buf).await?;
        self.read_offset += buf.len() as u64;

        let before = items.len();
        self.split_lines(&buf, &mut items);
        let lines = (items.len() - before) as u64;
        if lines > 0 {
            metrics::counter!(m::INGEST_LINES_READ_TOTAL).increment(lines);
        }
        Ok(items)
    }

    /// `buf`는 `read_offset - buf.len()`부터 읽은 바이트입니다.
    fn split_lines(&mut self, buf: &[u8], items: &mut Vec<WatchItem>) {
        let max = self.config.max_line_length;
        let mut pos = self.read_offset - buf.len() as u64;
        let mut rest = buf;

        while let Some(nl) = rest.iter().position(|b| *b == b'\n') {
            let segment = &rest[..nl];
            let line_end = pos + nl as u64 + 1;

            if self.skipping {
                self.skipping = false;
            } else {
                let start = pos - self.partial.len() as u64;
                self.partial.extend_from_slice(segment);
                if self.partial.len() > max {
                    tracing::warn!(offset = start, len = self.partial.len(), max, "dropping overlong line");
                } else {
                    let mut bytes = std::mem::take(&mut self.partial);
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                    let text = String::from_utf8(bytes)
                        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
                    items.push(WatchItem::Line(LogLine::new(text, start, line_end)));
                }
            }
            self.partial.clear();
            pos = line_end;
            rest = &rest[nl + 1..];
        }

        if !rest.is_empty() && !self.skipping {
            self.partial.extend_from_slice(rest);
            if self.partial.len() > max {
                tracing::warn!(len = self.partial.len(), max, "dropping overlong partial line");
                self.partial.clear();
                self.skipping = true;
            }
        }
    }

    /// 소비자가 처리한 줄의 끝 오프셋을 커밋합니다.
    pub fn commit(&mut self, offset: u64) -> Result<(), LogPipelineError> {
        self.committed = offset;
        self.store.save(offset)
    }

    /// 핸들을 해제하고 `Closed`로 전환합니다.
    pub fn close(&mut self) {
        if self.state != WatchState::Closed {
            self.file = None;
            self.partial.clear();
            self.state = WatchState::Closed;
            tracing::info!(
                path = %self.config.log_path.display(),
                committed = self.committed,
                "log watcher closed"
            );
        }
    }

    /// 취소될 때까지 파일을 폴링하며 항목을 채널로 보냅니다.
    ///
    /// 각 줄은 전송이 끝난 뒤에 커밋됩니다. 수신 측이 닫히면 정상 종료합니다.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<WatchItem>,
        cancel: CancellationToken,
    ) -> Result<(), LogPipelineError> {
        if self.state == WatchState::Idle {
            self.open().await?;
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let items = match self.poll().await {
                Ok(items) => items,
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            };

            for item in items {
                let commit_to = match &item {
                    WatchItem::Line(line) => line.end_offset,
                    WatchItem::Rotated { .. } => 0,
                };
                tokio::select! {
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            tracing::debug!("watch receiver dropped, stopping watcher");
                            self.close();
                            return Ok(());
                        }
                    }
                    () = cancel.cancelled() => {
                        self.close();
                        return Ok(());
                    }
                }
                if let Err(e) = self.commit(commit_to) {
                    tracing::warn!(error = %e, offset = commit_to, "failed to persist offset");
                }
            }
        }

        self.close();
        Ok(())
    }
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}
