use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Source, SourceError, SourceRecord};

#[derive(Default)]
struct State {
    records: Vec<Vec<u8>>,
    committed: Option<u64>,
    fail_polls: u32,
    reconnects: u32,
}

/// In-memory source; offsets are indexes into the pushed payloads.
pub struct MemorySource {
    state: Arc<Mutex<State>>,
    position: u64,
}

/// Producer and inspection side of a [`MemorySource`].
#[derive(Clone)]
pub struct MemorySourceHandle {
    state: Arc<Mutex<State>>,
}

impl MemorySource {
    pub fn new() -> (Self, MemorySourceHandle) {
        let state = Arc::new(Mutex::new(State::default()));
        (
            Self {
                state: Arc::clone(&state),
                position: 0,
            },
            MemorySourceHandle { state },
        )
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemorySourceHandle {
    /// Append a payload; returns its offset.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> u64 {
        let mut state = self.state();
        state.records.push(payload.into());
        state.records.len() as u64 - 1
    }

    pub fn committed(&self) -> Option<u64> {
        self.state().committed
    }

    pub fn reconnects(&self) -> u32 {
        self.state().reconnects
    }

    /// Make the next `n` polls fail with a disconnect.
    pub fn fail_next_polls(&self, n: u32) {
        self.state().fail_polls = n;
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn poll(&mut self, max_records: usize) -> Result<Vec<SourceRecord>, SourceError> {
        let position = self.position;
        let mut state = self.state();
        if state.fail_polls > 0 {
            state.fail_polls -= 1;
            return Err(SourceError::Disconnected("injected disconnect".into()));
        }
        let start = usize::try_from(position).unwrap_or(usize::MAX);
        let out: Vec<SourceRecord> = state
            .records
            .iter()
            .enumerate()
            .skip(start)
            .take(max_records)
            .map(|(i, payload)| SourceRecord {
                offset: i as u64,
                payload: payload.clone(),
            })
            .collect();
        drop(state);
        if let Some(last) = out.last() {
            self.position = last.offset + 1;
        }
        Ok(out)
    }

    async fn commit(&mut self, offset: u64) -> Result<(), SourceError> {
        let mut state = self.state();
        state.committed = state.committed.max(Some(offset));
        Ok(())
    }

    async fn seek(&mut self, next_offset: u64) -> Result<(), SourceError> {
        self.position = next_offset;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), SourceError> {
        let mut state = self.state();
        state.reconnects += 1;
        let resume = state.committed.map_or(0, |c| c + 1);
        drop(state);
        self.position = resume;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn replay_handle(&self) -> Option<Box<dyn Source>> {
        Some(Box::new(MemorySource {
            state: Arc::clone(&self.state),
            position: 0,
        }))
    }
}
