//! 읽기 오프셋 저장소
//!
//! 마지막으로 내보낸 완전한 줄의 끝 오프셋을 저장합니다.
//! 재시작 시 `StartMode::Resume`이 이 값을 사용합니다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LogPipelineError;

/// 오프셋 저장소 trait
pub trait OffsetStore: Send + Sync {
    /// 저장된 오프셋. 없으면 `None`.
    fn load(&self) -> Result<Option<u64>, LogPipelineError>;

    /// 오프셋을 저장합니다.
    fn save(&mut self, offset: u64) -> Result<(), LogPipelineError>;
}

/// 메모리 전용 저장소 (재시작 시 사라짐)
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    offset: Option<u64>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(offset: u64) -> Self {
        Self {
            offset: Some(offset),
        }
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn load(&self) -> Result<Option<u64>, LogPipelineError> {
        Ok(self.offset)
    }

    fn save(&mut self, offset: u64) -> Result<(), LogPipelineError> {
        self.offset = Some(offset);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OffsetRecord {
    log_path: String,
    offset: u64,
}

/// 파일 기반 저장소
///
/// 임시 파일에 쓴 뒤 rename하므로 중간에 죽어도 이전 값 또는 새 값 중 하나만 남습니다.
/// 기록된 로그 경로가 현재 경로와 다르면 저장값을 무시합니다.
#[derive(Debug)]
pub struct FileOffsetStore {
    path: PathBuf,
    tmp_path: PathBuf,
    log_path: String,
    last_saved: Option<u64>,
}

impl FileOffsetStore {
    pub fn new(path: impl Into<PathBuf>, log_path: &Path) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
            log_path: log_path.display().to_string(),
            last_saved: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OffsetStore for FileOffsetStore {
    fn load(&self) -> Result<Option<u64>, LogPipelineError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LogPipelineError::Offset(format!("{}: {e}", self.path.display()))),
        };
        let record: OffsetRecord = match serde_json::from_str(&content) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "offset file is corrupt, ignoring"
                );
                return Ok(None);
            }
        };
        if record.log_path != self.log_path {
            tracing::info!(
                stored = %record.log_path,
                current = %self.log_path,
                "offset file belongs to a different log, ignoring"
            );
            return Ok(None);
        }
        Ok(Some(record.offset))
    }

    fn save(&mut self, offset: u64) -> Result<(), LogPipelineError> {
        if self.last_saved == Some(offset) {
            return Ok(());
        }
        let record = OffsetRecord {
            log_path: self.log_path.clone(),
            offset,
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| LogPipelineError::Offset(e.to_string()))?;
        std::fs::write(&self.tmp_path, json)
            .and_then(|()| std::fs::rename(&self.tmp_path, &self.path))
            .map_err(|e| LogPipelineError::Offset(format!("{}: {e}", self.path.display())))?;
        self.last_saved = Some(offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let mut store = MemoryOffsetStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(42).unwrap();
        assert_eq!(store.load().unwrap(), Some(42));
    }

    #[test]
    fn file_store_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOffsetStore::new(dir.path().join("offset.json"), Path::new("/g/Game.log"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offset.json");
        let log = Path::new("/g/Game.log");

        let mut store = FileOffsetStore::new(&path, log);
        store.save(1234).unwrap();
        drop(store);

        let reopened = FileOffsetStore::new(&path, log);
        assert_eq!(reopened.load().unwrap(), Some(1234));
        assert!(!dir.path().join("offset.json.tmp").exists());
    }

    #[test]
    fn file_store_ignores_other_log_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offset.json");
        FileOffsetStore::new(&path, Path::new("/live/Game.log"))
            .save(99)
            .unwrap();
        let other = FileOffsetStore::new(&path, Path::new("/ptu/Game.log"));
        assert_eq!(other.load().unwrap(), None);
    }

    #[test]
    fn file_store_ignores_corrupt_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offset.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileOffsetStore::new(&path, Path::new("/g/Game.log"));
        assert_eq!(store.load().unwrap(), None);
    }
}
