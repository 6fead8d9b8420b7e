//! 记忆快照持久化
//!
//! 将全部记录写入/从 JSON 文件加载，用于跨进程恢复（可选使用）。
//! 加载时每条记录都重新校验维度，维度不符则整个快照拒绝加载。

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::memory::{MemoryRecord, MemoryStore};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    dimension: usize,
    records: Vec<MemoryRecord>,
}

/// 单文件 JSON 快照
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    path: PathBuf,
}

impl MemorySnapshot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 将记忆库写入 JSON 文件；父目录不存在时自动创建
    pub fn save(&self, store: &MemoryStore) -> anyhow::Result<usize> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            dimension: store.dimension(),
            records: store.records(),
        };
        let count = file.records.len();
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("writing snapshot {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), count, "Memory snapshot saved");
        Ok(count)
    }

    /// 从 JSON 文件恢复到记忆库；文件不存在时返回 0
    pub fn load_into(&self, store: &MemoryStore) -> anyhow::Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading snapshot {}", self.path.display()))?;
        let file: SnapshotFile = serde_json::from_str(&data)?;
        if file.version != SNAPSHOT_VERSION {
            anyhow::bail!("unsupported snapshot version {}", file.version);
        }
        if file.dimension != store.dimension() {
            anyhow::bail!(
                "snapshot dimension {} does not match store dimension {}",
                file.dimension,
                store.dimension()
            );
        }
        if let Some(bad) = file.records.iter().find(|r| r.dimension() != store.dimension()) {
            anyhow::bail!("snapshot record {} has dimension {}", bad.id(), bad.dimension());
        }
        let count = file.records.len();
        for record in file.records {
            store.insert_record(record)?;
        }
        tracing::info!(path = %self.path.display(), count, "Memory snapshot restored");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::llm::HashEmbedder;

    #[tokio::test]
    async fn test_snapshot_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.json");

        let store = MemoryStore::new(Arc::new(HashEmbedder::new(16)), 16);
        store.store("the user is building an agent").await.unwrap();
        store.store("the memory subsystem comes next").await.unwrap();

        let snapshot = MemorySnapshot::new(&path);
        assert_eq!(snapshot.save(&store).unwrap(), 2);

        let restored = MemoryStore::new(Arc::new(HashEmbedder::new(16)), 16);
        assert_eq!(snapshot.load_into(&restored).unwrap(), 2);
        assert_eq!(restored.records(), store.records());
    }

    #[tokio::test]
    async fn test_snapshot_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let store = MemoryStore::new(Arc::new(HashEmbedder::new(8)), 8);
        store.store("hello").await.unwrap();
        MemorySnapshot::new(&path).save(&store).unwrap();

        let other = MemoryStore::new(Arc::new(HashEmbedder::new(4)), 4);
        assert!(MemorySnapshot::new(&path).load_into(&other).is_err());
        assert!(other.is_empty());
    }

    #[test]
    fn test_missing_file_loads_nothing() {
        let store = MemoryStore::new(Arc::new(HashEmbedder::new(4)), 4);
        let n = MemorySnapshot::new("/nonexistent/aether/memory.json")
            .load_into(&store)
            .unwrap();
        assert_eq!(n, 0);
    }
}
