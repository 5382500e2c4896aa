use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::output::OutputRow;

use super::Sink;

#[derive(Default)]
struct Shared {
    rows: Mutex<Vec<OutputRow>>,
    writes: AtomicU32,
    fail_next: AtomicU32,
}

/// In-memory sink. Rows and failure injection are reached through a
/// [`MemorySinkHandle`].
pub struct MemorySink {
    shared: Arc<Shared>,
}

/// Inspection side of a [`MemorySink`].
#[derive(Clone)]
pub struct MemorySinkHandle {
    shared: Arc<Shared>,
}

impl MemorySink {
    pub fn new() -> (Self, MemorySinkHandle) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemorySinkHandle { shared },
        )
    }
}

impl MemorySinkHandle {
    /// Everything written so far, in write order.
    pub fn rows(&self) -> Vec<OutputRow> {
        self.shared
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn json(&self) -> Vec<String> {
        self.rows().into_iter().map(|r| r.json).collect()
    }

    /// Successful `write` calls.
    pub fn writes(&self) -> u32 {
        self.shared.writes.load(Ordering::Relaxed)
    }

    /// Make the next `n` writes fail.
    pub fn fail_next(&self, n: u32) {
        self.shared.fail_next.store(n, Ordering::Relaxed);
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&mut self, rows: &[OutputRow]) -> anyhow::Result<()> {
        let pending = self.shared.fail_next.load(Ordering::Relaxed);
        if pending > 0 {
            self.shared.fail_next.store(pending - 1, Ordering::Relaxed);
            anyhow::bail!("injected write failure");
        }
        self.shared
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(rows);
        self.shared.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
