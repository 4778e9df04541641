//! Durable tier: a blob plus a JSON sidecar in one directory.

use crate::record::WorldMapMetadata;
use crate::{Durability, Result, WorldMapError, WorldMapRecord, WorldMapTier};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const WORLD_MAP_BLOB_NAME: &str = "worldmap.bin";
pub const WORLD_MAP_META_NAME: &str = "worldmap.json";

/// Survives restarts. Writes go to a temp file and are renamed into place;
/// the sidecar is written last so a half-written blob is never loaded.
#[derive(Debug, Clone)]
pub struct FileTier {
    dir: PathBuf,
}

impl FileTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn blob_path(&self) -> PathBuf {
        self.dir.join(WORLD_MAP_BLOB_NAME)
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join(WORLD_MAP_META_NAME)
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl WorldMapTier for FileTier {
    fn name(&self) -> &'static str {
        "file"
    }

    fn durability(&self) -> Durability {
        Durability::Durable
    }

    fn load(&self) -> Result<Option<WorldMapRecord>> {
        let meta_json = match fs::read(self.meta_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: WorldMapMetadata = serde_json::from_slice(&meta_json)?;

        let snapshot = match fs::read(self.blob_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(WorldMapError::Corrupt(format!(
                    "{} missing",
                    WORLD_MAP_BLOB_NAME
                )))
            }
            Err(e) => return Err(e.into()),
        };
        if snapshot.len() as u64 != meta.snapshot_len {
            return Err(WorldMapError::Corrupt(format!(
                "expected {} bytes, found {}",
                meta.snapshot_len,
                snapshot.len()
            )));
        }

        Ok(Some(WorldMapRecord {
            snapshot,
            anchor_count: meta.anchor_count,
            saved_at: meta.saved_at,
        }))
    }

    fn store(&self, record: &WorldMapRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        // Drop the commit marker first so a crash mid-write reads as a miss.
        remove_if_present(&self.meta_path())?;
        Self::write_atomic(&self.blob_path(), &record.snapshot)?;
        let meta = serde_json::to_vec_pretty(&record.metadata())?;
        Self::write_atomic(&self.meta_path(), &meta)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        remove_if_present(&self.meta_path())?;
        remove_if_present(&self.blob_path())?;
        Ok(())
    }
}
