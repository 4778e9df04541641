use crate::{Durability, Result, WorldMapRecord, WorldMapTier};
use std::sync::{Mutex, MutexGuard};

/// Volatile tier. Authoritative while the process lives.
#[derive(Debug, Default)]
pub struct MemoryTier {
    slot: Mutex<Option<WorldMapRecord>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<WorldMapRecord>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WorldMapTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn durability(&self) -> Durability {
        Durability::Volatile
    }

    fn load(&self) -> Result<Option<WorldMapRecord>> {
        Ok(self.slot().clone())
    }

    fn store(&self, record: &WorldMapRecord) -> Result<()> {
        *self.slot() = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}
