//! 처리 위치 체크포인트 저장소
//!
//! 프로세스 재시작 후에도 마지막 커밋 위치부터 재개할 수 있도록
//! [`BinlogOffset`]을 영속화합니다.

use crate::error::{CdcError, Result};
use crate::offset::BinlogOffset;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

/// 체크포인트 저장소
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 마지막 체크포인트 로드 (없으면 `None`)
    async fn load(&self) -> Result<Option<BinlogOffset>>;

    /// 체크포인트 저장
    async fn save(&self, offset: &BinlogOffset) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// JSON 파일 기반 체크포인트
///
/// 임시 파일에 쓴 뒤 rename 하므로 중간에 죽어도 이전 체크포인트가 남습니다.
pub struct FileCheckpoint {
    path: PathBuf,
    last_saved: Mutex<Option<BinlogOffset>>,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_saved: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn load(&self) -> Result<Option<BinlogOffset>> {
        match fs::read(&self.path).await {
            Ok(content) => {
                let offset: BinlogOffset = serde_json::from_slice(&content).map_err(|e| {
                    CdcError::CheckpointError(format!("체크포인트 파싱 실패: {}", e))
                })?;
                info!(path = ?self.path, ?offset, "체크포인트 로드");
                *self.last_saved.lock() = Some(offset.clone());
                Ok(Some(offset))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = ?self.path, "체크포인트 파일 없음");
                Ok(None)
            }
            Err(e) => Err(CdcError::CheckpointError(format!(
                "체크포인트 읽기 실패: {}",
                e
            ))),
        }
    }

    async fn save(&self, offset: &BinlogOffset) -> Result<()> {
        if self.last_saved.lock().as_ref() == Some(offset) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    CdcError::CheckpointError(format!("체크포인트 디렉토리 생성 실패: {}", e))
                })?;
            }
        }

        let body = serde_json::to_vec(offset)?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, body)
            .await
            .map_err(|e| CdcError::CheckpointError(format!("체크포인트 쓰기 실패: {}", e)))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| CdcError::CheckpointError(format!("체크포인트 rename 실패: {}", e)))?;

        *self.last_saved.lock() = Some(offset.clone());
        debug!(?offset, "체크포인트 저장");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file_checkpoint"
    }
}

/// 메모리 체크포인트 (테스트용)
#[derive(Default)]
pub struct MemoryCheckpoint {
    offset: Mutex<Option<BinlogOffset>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(offset: BinlogOffset) -> Self {
        Self {
            offset: Mutex::new(Some(offset)),
        }
    }

    pub fn current(&self) -> Option<BinlogOffset> {
        self.offset.lock().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn load(&self) -> Result<Option<BinlogOffset>> {
        Ok(self.offset.lock().clone())
    }

    async fn save(&self, offset: &BinlogOffset) -> Result<()> {
        *self.offset.lock() = Some(offset.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory_checkpoint"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::BinlogPosition;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_checkpoint_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("checkpoint.json");

        let store = FileCheckpoint::new(&path);
        assert_eq!(store.load().await.unwrap(), None);

        let offset = BinlogOffset::from_position(BinlogPosition::new("mysql-bin.000007", 1234));
        store.save(&offset).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let reopened = FileCheckpoint::new(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(offset));
    }

    #[tokio::test]
    async fn test_file_checkpoint_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = FileCheckpoint::new(&path);
        assert!(matches!(
            store.load().await,
            Err(CdcError::CheckpointError(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_checkpoint() {
        let store = MemoryCheckpoint::new();
        assert_eq!(store.load().await.unwrap(), None);

        let offset = BinlogOffset {
            position: None,
            gtid_set: "550e8400-e29b-41d4-a716-446655440000:1-3".to_string(),
        };
        store.save(&offset).await.unwrap();
        assert_eq!(store.current(), Some(offset));
    }
}
