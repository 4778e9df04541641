use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A serialized spatial-tracking snapshot used for relocalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldMapRecord {
    /// Opaque bytes produced by the tracking session.
    pub snapshot: Vec<u8>,
    pub anchor_count: u32,
    pub saved_at: DateTime<Utc>,
}

impl WorldMapRecord {
    pub fn new(snapshot: Vec<u8>, anchor_count: u32) -> Self {
        Self {
            snapshot,
            anchor_count,
            saved_at: Utc::now(),
        }
    }

    pub(crate) fn metadata(&self) -> WorldMapMetadata {
        WorldMapMetadata {
            anchor_count: self.anchor_count,
            saved_at: self.saved_at,
            snapshot_len: self.snapshot.len() as u64,
        }
    }
}

/// Sidecar written next to the blob on disk. Its presence commits the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WorldMapMetadata {
    pub anchor_count: u32,
    pub saved_at: DateTime<Utc>,
    pub snapshot_len: u64,
}
