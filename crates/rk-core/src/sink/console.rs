use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::output::OutputRow;

use super::Sink;

/// Append-only sink writing `[<label>] <json>` lines, stdout by default.
pub struct ConsoleSink<W = tokio::io::Stdout> {
    label: String,
    out: W,
}

impl ConsoleSink<tokio::io::Stdout> {
    pub fn stdout(label: impl Into<String>) -> Self {
        Self::new(label, tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> ConsoleSink<W> {
    pub fn new(label: impl Into<String>, out: W) -> Self {
        Self {
            label: label.into(),
            out,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Sink for ConsoleSink<W> {
    async fn write(&mut self, rows: &[OutputRow]) -> anyhow::Result<()> {
        let mut buf = String::new();
        for row in rows {
            buf.push('[');
            buf.push_str(&self.label);
            buf.push_str("] ");
            buf.push_str(&row.json);
            buf.push('\n');
        }
        self.out.write_all(buf.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.out.flush().await?;
        Ok(())
    }
}
