use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::output::OutputRow;

use super::Sink;

// ---------------------------------------------------------------------------
// JsonLinesSink: append-only JSON lines file
// ---------------------------------------------------------------------------

/// Appends one JSON object per line. Rows replayed after a crash are
/// appended again.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: tokio::io::BufWriter<tokio::fs::File>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        Ok(Self {
            path,
            writer: tokio::io::BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn write(&mut self, rows: &[OutputRow]) -> anyhow::Result<()> {
        for row in rows {
            self.writer.write_all(row.json.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
        }
        self.writer.flush().await?;
        self.writer.get_ref().sync_data().await?;
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.writer.flush().await.context("flush on stop")?;
        self.writer.shutdown().await.context("shutdown")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.jsonl");
        let row = |n: u32| OutputRow {
            key: None,
            json: format!(r#"{{"n":{n}}}"#),
        };

        let mut sink = JsonLinesSink::open(&path).await.unwrap();
        sink.write(&[row(1), row(2)]).await.unwrap();
        sink.stop().await.unwrap();

        let mut sink = JsonLinesSink::open(&path).await.unwrap();
        sink.write(&[row(3)]).await.unwrap();
        sink.stop().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n");
    }
}
