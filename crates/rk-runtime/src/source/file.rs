use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{Source, SourceError, SourceRecord};

/// Tail-following JSON-lines file source.
///
/// The offset of a record is its zero-based line number. A trailing line
/// without a newline is held back until it is completed, so a writer that
/// is mid-append never produces a torn record. Blank lines consume an
/// offset but yield no record.
pub struct FileSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    next_offset: u64,
    committed: Option<u64>,
    partial: Vec<u8>,
}

impl FileSource {
    /// The file is opened lazily on the first poll or seek.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            next_offset: 0,
            committed: None,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset the next poll starts at.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    async fn open_at(&mut self, next_offset: u64) -> Result<(), SourceError> {
        self.reader = None;
        let file = File::open(&self.path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                SourceError::Disconnected(format!("{}: {e}", self.path.display()))
            }
            _ => SourceError::Io(e),
        })?;
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        for skipped in 0..next_offset {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).await?;
            if n == 0 || line.last() != Some(&b'\n') {
                return Err(SourceError::Disconnected(format!(
                    "{} has {skipped} complete lines, cannot resume at offset {next_offset}",
                    self.path.display()
                )));
            }
        }
        self.reader = Some(reader);
        self.next_offset = next_offset;
        self.partial.clear();
        Ok(())
    }
}

#[async_trait]
impl Source for FileSource {
    async fn poll(&mut self, max_records: usize) -> Result<Vec<SourceRecord>, SourceError> {
        if self.reader.is_none() {
            self.open_at(self.next_offset).await?;
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        while out.len() < max_records {
            let n = reader.read_until(b'\n', &mut self.partial).await?;
            if n == 0 || self.partial.last() != Some(&b'\n') {
                break;
            }
            let offset = self.next_offset;
            self.next_offset += 1;
            let payload = trim_line_end(std::mem::take(&mut self.partial));
            if payload.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            out.push(SourceRecord { offset, payload });
        }
        Ok(out)
    }

    async fn commit(&mut self, offset: u64) -> Result<(), SourceError> {
        self.committed = self.committed.max(Some(offset));
        Ok(())
    }

    async fn seek(&mut self, next_offset: u64) -> Result<(), SourceError> {
        self.open_at(next_offset).await
    }

    async fn reconnect(&mut self) -> Result<(), SourceError> {
        let resume = self.committed.map_or(0, |c| c + 1);
        self.open_at(resume).await
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn replay_handle(&self) -> Option<Box<dyn Source>> {
        Some(Box::new(FileSource::new(&self.path)))
    }
}

fn trim_line_end(mut line: Vec<u8>) -> Vec<u8> {
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    line
}
