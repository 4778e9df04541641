//! World map persistence for pause/resume.
//!
//! A [`WorldMapStore`] is an explicitly owned, process-scoped cache of the
//! last spatial snapshot. It is backed by an ordered list of tiers: the
//! first tier that holds a record wins, and a hit in a later tier is
//! promoted into the earlier ones.
//!
//! ```text
//!  get ──► MemoryTier ──miss──► FileTier ──hit──► promote to MemoryTier
//!  put ──► every tier
//!  clear(Volatile) ──► MemoryTier only
//!  clear(All) ──► every tier
//! ```

mod file;
mod memory;
mod record;

pub use file::{FileTier, WORLD_MAP_BLOB_NAME, WORLD_MAP_META_NAME};
pub use memory::MemoryTier;
pub use record::WorldMapRecord;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WorldMapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt world map: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, WorldMapError>;

/// Whether a tier survives process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Volatile,
    Durable,
}

/// Which tiers a [`WorldMapStore::clear`] touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Volatile,
    All,
}

/// One storage provider behind the store.
pub trait WorldMapTier: Send + Sync {
    fn name(&self) -> &'static str;
    fn durability(&self) -> Durability;
    fn load(&self) -> Result<Option<WorldMapRecord>>;
    fn store(&self, record: &WorldMapRecord) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Read-through cache over ordered tiers.
pub struct WorldMapStore {
    tiers: Vec<Box<dyn WorldMapTier>>,
}

impl WorldMapStore {
    pub fn new(tiers: Vec<Box<dyn WorldMapTier>>) -> Self {
        Self { tiers }
    }

    /// Volatile memory tier in front of a durable file tier in `dir`.
    pub fn two_tier(dir: impl Into<PathBuf>) -> Self {
        Self::new(vec![
            Box::new(MemoryTier::new()),
            Box::new(FileTier::new(dir)),
        ])
    }

    /// Memory-only store, for callers that never resume across launches.
    pub fn in_memory() -> Self {
        Self::new(vec![Box::new(MemoryTier::new())])
    }

    /// Return the first record found, promoting it into earlier tiers.
    ///
    /// A tier that fails to load is logged and treated as a miss, so a
    /// corrupt file never hides a good in-memory copy or vice versa.
    pub fn get(&self) -> Option<WorldMapRecord> {
        for (index, tier) in self.tiers.iter().enumerate() {
            match tier.load() {
                Ok(Some(record)) => {
                    tracing::debug!(
                        tier = tier.name(),
                        anchors = record.anchor_count,
                        bytes = record.snapshot.len(),
                        "world map hit"
                    );
                    for earlier in &self.tiers[..index] {
                        if let Err(e) = earlier.store(&record) {
                            tracing::warn!(tier = earlier.name(), error = %e, "failed to promote world map");
                        }
                    }
                    return Some(record);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(tier = tier.name(), error = %e, "world map tier unreadable");
                }
            }
        }
        tracing::debug!("world map miss in every tier");
        None
    }

    /// Write the record to every tier.
    ///
    /// Succeeds if at least one tier accepted it.
    pub fn put(&self, record: &WorldMapRecord) -> Result<()> {
        let mut last_err = None;
        let mut stored = 0usize;
        for tier in &self.tiers {
            match tier.store(record) {
                Ok(()) => stored += 1,
                Err(e) => {
                    tracing::warn!(tier = tier.name(), error = %e, "failed to store world map");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if stored == 0 => Err(e),
            _ => {
                tracing::info!(
                    anchors = record.anchor_count,
                    bytes = record.snapshot.len(),
                    tiers = stored,
                    "world map saved"
                );
                Ok(())
            }
        }
    }

    /// Clear the tiers selected by `scope`. Every selected tier is attempted.
    pub fn clear(&self, scope: ClearScope) -> Result<()> {
        let mut first_err = None;
        for tier in &self.tiers {
            if scope == ClearScope::Volatile && tier.durability() == Durability::Durable {
                continue;
            }
            if let Err(e) = tier.clear() {
                tracing::warn!(tier = tier.name(), error = %e, "failed to clear world map");
                first_err.get_or_insert(e);
            }
        }
        tracing::debug!(?scope, "world map cleared");
        first_err.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for WorldMapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldMapStore")
            .field(
                "tiers",
                &self.tiers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
