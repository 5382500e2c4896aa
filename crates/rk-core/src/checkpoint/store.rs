use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Durable byte storage for checkpoint records, one slot per sink id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Atomically replace the stored bytes for `sink_id`.
    async fn put(&self, sink_id: &str, bytes: &[u8]) -> anyhow::Result<()>;
    /// Bytes last stored for `sink_id`, `None` if never written.
    async fn get(&self, sink_id: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// FileCheckpointStore
// ---------------------------------------------------------------------------

/// Stores `<dir>/<sink_id>.ckpt`, replaced via temp file + fsync + rename.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, sink_id: &str) -> PathBuf {
        self.dir.join(format!("{sink_id}.ckpt"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, sink_id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(sink_id);
        let tmp = path.with_extension("ckpt.tmp");
        {
            let mut file = fs::File::create(&tmp)
                .await
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        // Persist the rename itself.
        #[cfg(unix)]
        fs::File::open(&self.dir)
            .await?
            .sync_all()
            .await
            .with_context(|| format!("failed to sync {}", self.dir.display()))?;
        Ok(())
    }

    async fn get(&self, sink_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(sink_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

/// In-process store with failure injection for `put`.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    slots: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every `put` fails.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, sink_id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        if self.fail_puts.load(Ordering::Relaxed) {
            anyhow::bail!("injected checkpoint write failure for {sink_id}");
        }
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sink_id.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, sink_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(sink_id)
            .cloned())
    }
}
