use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::output::OutputRow;

use super::Sink;

// ---------------------------------------------------------------------------
// KeyedFileSink: idempotent upsert store
// ---------------------------------------------------------------------------

/// A JSON object `{ key: row }` on disk, rewritten atomically on every
/// write. Writing the same key again replaces the row, so replays leave
/// no duplicates.
pub struct KeyedFileSink {
    path: PathBuf,
    rows: BTreeMap<String, Value>,
}

impl KeyedFileSink {
    /// Open (or create) the store at `path`, loading existing rows.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let rows = Self::read_all(&path).await?;
        Ok(Self { path, rows })
    }

    /// Load a store file. A missing file is an empty store.
    pub async fn read_all(path: impl AsRef<Path>) -> anyhow::Result<BTreeMap<String, Value>> {
        let path = path.as_ref();
        match tokio::fs::read(path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt keyed store {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    async fn persist(&self, rows: &BTreeMap<String, Value>) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(rows)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl Sink for KeyedFileSink {
    async fn write(&mut self, rows: &[OutputRow]) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        // Stage on a copy so a failed persist leaves memory and disk in step.
        let mut next = self.rows.clone();
        for row in rows {
            let Some(key) = &row.key else {
                bail!("keyed sink {} received a row without a key", self.path.display());
            };
            let value: Value = serde_json::from_str(&row.json)
                .with_context(|| format!("row {key:?} is not valid JSON"))?;
            next.insert(key.clone(), value);
        }
        self.persist(&next).await?;
        self.rows = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, v: f64) -> OutputRow {
        OutputRow {
            key: Some(key.into()),
            json: format!(r#"{{"total_sale_volume":{v:?}}}"#),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kpi.json");

        let mut sink = KeyedFileSink::open(&path).await.unwrap();
        sink.write(&[row("a", 1.0), row("b", 2.0)]).await.unwrap();
        sink.write(&[row("a", 3.5)]).await.unwrap();
        assert_eq!(sink.len(), 2);

        let stored = KeyedFileSink::read_all(&path).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["a"]["total_sale_volume"], 3.5);
        assert_eq!(stored["b"]["total_sale_volume"], 2.0);
    }

    #[tokio::test]
    async fn reopen_keeps_rows_and_replay_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kpi.json");

        let mut sink = KeyedFileSink::open(&path).await.unwrap();
        sink.write(&[row("w1", 5.0)]).await.unwrap();
        let before = std::fs::read(&path).unwrap();

        let mut sink = KeyedFileSink::open(&path).await.unwrap();
        assert_eq!(sink.len(), 1);
        sink.write(&[row("w1", 5.0)]).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn keyless_row_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = KeyedFileSink::open(dir.path().join("kpi.json")).await.unwrap();
        let keyless = OutputRow {
            key: None,
            json: "{}".into(),
        };
        assert!(sink.write(&[keyless]).await.is_err());
        assert!(sink.is_empty());
    }
}
