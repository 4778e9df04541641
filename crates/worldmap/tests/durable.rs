//! Durable tier behaviour across store instances (simulated relaunch).

use roomscan_worldmap::{ClearScope, FileTier, MemoryTier, WorldMapRecord, WorldMapStore, WorldMapTier};
use tempfile::tempdir;

fn sample_record() -> WorldMapRecord {
    WorldMapRecord::new((0..=255u8).collect(), 12)
}

#[test]
fn test_record_survives_relaunch() {
    let dir = tempdir().unwrap();
    let original = sample_record();

    {
        let store = WorldMapStore::two_tier(dir.path());
        store.put(&original).unwrap();
    }

    let store = WorldMapStore::two_tier(dir.path());
    let loaded = store.get().expect("durable tier should serve the record");
    assert_eq!(loaded.snapshot, original.snapshot);
    assert_eq!(loaded.anchor_count, 12);
    assert_eq!(loaded.saved_at, original.saved_at);
}

#[test]
fn test_durable_hit_is_promoted_to_memory() {
    let dir = tempdir().unwrap();
    FileTier::new(dir.path()).store(&sample_record()).unwrap();

    let store = WorldMapStore::two_tier(dir.path());
    assert!(store.get().is_some());

    // Remove the file behind the store's back: memory now answers.
    FileTier::new(dir.path()).clear().unwrap();
    assert_eq!(store.get().unwrap().anchor_count, 12);
}

#[test]
fn test_volatile_tier_is_authoritative() {
    let dir = tempdir().unwrap();
    FileTier::new(dir.path())
        .store(&WorldMapRecord::new(vec![1], 1))
        .unwrap();

    let memory = MemoryTier::new();
    memory.store(&WorldMapRecord::new(vec![2, 2], 2)).unwrap();
    let store = WorldMapStore::new(vec![Box::new(memory), Box::new(FileTier::new(dir.path()))]);

    assert_eq!(store.get().unwrap().anchor_count, 2);
}

#[test]
fn test_clear_all_removes_files() {
    let dir = tempdir().unwrap();
    let store = WorldMapStore::two_tier(dir.path());
    store.put(&sample_record()).unwrap();
    assert!(dir.path().join(roomscan_worldmap::WORLD_MAP_META_NAME).exists());

    store.clear(ClearScope::All).unwrap();
    assert!(!dir.path().join(roomscan_worldmap::WORLD_MAP_META_NAME).exists());
    assert!(!dir.path().join(roomscan_worldmap::WORLD_MAP_BLOB_NAME).exists());
    assert!(WorldMapStore::two_tier(dir.path()).get().is_none());
}
