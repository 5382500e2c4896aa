use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreReason, CoreResult, core_err};
use crate::window::WindowSnapshot;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Batch boundary persisted before a batch is processed. A restart replays
/// exactly `(committed_offset, end_offset]` under `batch_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub batch_id: u64,
    pub end_offset: u64,
}

/// Durable progress of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub sink_id: String,
    /// Last committed batch; `0` before the first commit.
    pub batch_id: u64,
    /// Highest source offset whose effects are committed.
    pub committed_offset: Option<u64>,
    /// Window state as of `committed_offset`; windowed pipelines only.
    pub window_state: Option<WindowSnapshot>,
    /// Batch planned but not yet committed.
    pub planned: Option<BatchPlan>,
}

impl CheckpointRecord {
    pub fn fresh(sink_id: impl Into<String>) -> Self {
        Self {
            sink_id: sink_id.into(),
            batch_id: 0,
            committed_offset: None,
            window_state: None,
            planned: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    /// Lowercase hex SHA-256 of `payload`.
    checksum: String,
    payload: String,
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Serialise a record inside a versioned, checksummed envelope.
pub fn encode_record(record: &CheckpointRecord) -> CoreResult<Vec<u8>> {
    let payload = serde_json::to_string(record).owe(CoreReason::Checkpoint)?;
    let envelope = Envelope {
        version: CHECKPOINT_VERSION,
        checksum: sha256_hex(payload.as_bytes()),
        payload,
    };
    serde_json::to_vec(&envelope).owe(CoreReason::Checkpoint)
}

/// Parse and verify an envelope produced by [`encode_record`].
pub fn decode_record(bytes: &[u8]) -> CoreResult<CheckpointRecord> {
    let envelope: Envelope = serde_json::from_slice(bytes).owe(CoreReason::Checkpoint)?;
    if envelope.version != CHECKPOINT_VERSION {
        return Err(core_err(
            CoreReason::Checkpoint,
            format!(
                "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
                envelope.version
            ),
        ));
    }
    let actual = sha256_hex(envelope.payload.as_bytes());
    if actual != envelope.checksum {
        return Err(core_err(
            CoreReason::Checkpoint,
            format!(
                "checkpoint checksum mismatch: stored {}, computed {actual}",
                envelope.checksum
            ),
        ));
    }
    serde_json::from_str(&envelope.payload).owe(CoreReason::Checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CheckpointRecord {
        CheckpointRecord {
            sink_id: "time_kpi".into(),
            batch_id: 3,
            committed_offset: Some(41),
            window_state: Some(WindowSnapshot {
                watermark: 1_000,
                open: Vec::new(),
                tombstones: Vec::new(),
            }),
            planned: Some(BatchPlan {
                batch_id: 4,
                end_offset: 57,
            }),
        }
    }

    #[test]
    fn envelope_roundtrip() {
        let bytes = encode_record(&sample()).unwrap();
        assert_eq!(decode_record(&bytes).unwrap(), sample());
    }

    #[test]
    fn tampered_payload_detected() {
        let bytes = encode_record(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let tampered = text.replace(r#"\"committed_offset\":41"#, r#"\"committed_offset\":42"#);
        assert_ne!(text, tampered);
        assert!(decode_record(tampered.as_bytes()).is_err());
    }

    #[test]
    fn unknown_version_rejected() {
        let payload = serde_json::to_string(&sample()).unwrap();
        let env = Envelope {
            version: 99,
            checksum: sha256_hex(payload.as_bytes()),
            payload,
        };
        let bytes = serde_json::to_vec(&env).unwrap();
        assert!(decode_record(&bytes).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(decode_record(b"\x00\x01not json").is_err());
    }

    #[test]
    fn checksum_is_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
