//! Pause/resume bookkeeping and world map persistence jobs.
//!
//! At most one relocalization attempt is live. Each attempt gets a fresh id
//! and both its world map load and its timeout carry that id, so results
//! for an earlier attempt can never act on a later one.
//!
//! Snapshots are only persisted by the actor. Each one is tagged with the
//! map generation it was requested in; every point that forgets the map
//! bumps the generation, so a snapshot from a discarded scan is dropped.

use roomscan_worldmap::{WorldMapRecord, WorldMapStore};
use std::sync::Arc;
use std::time::Duration;

use crate::command::{Mailbox, SessionMsg};
use crate::engine::SpatialTrackingSession;
use crate::timer::ScheduledTask;

pub const MSG_NO_WORLD_MAP: &str = "No saved world map; starting a fresh scan";
pub const MSG_RELOCALIZING: &str = "Move the device around the area scanned before pausing";
pub const MSG_RELOCATED: &str = "Relocalized against the saved world map";

#[derive(Debug)]
pub struct Relocalization {
    timeout: Duration,
    attempts: u64,
    /// Attempt whose world map load is still in flight.
    loading: Option<u64>,
    timer: Option<ScheduledTask>,
    snapshots_in_flight: usize,
    map_generation: u64,
    resume_deferred: bool,
}

impl Relocalization {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            attempts: 0,
            loading: None,
            timer: None,
            snapshots_in_flight: 0,
            map_generation: 0,
            resume_deferred: false,
        }
    }

    /// Allocate the id for a new attempt and mark its load in flight.
    pub fn begin(&mut self) -> u64 {
        self.disarm();
        self.attempts += 1;
        self.loading = Some(self.attempts);
        self.attempts
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    /// Settle the load for `attempt`. `false` if it is not the live one.
    pub fn finish_loading(&mut self, attempt: u64) -> bool {
        if self.loading != Some(attempt) {
            return false;
        }
        self.loading = None;
        true
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub(crate) fn arm_timeout(&mut self, attempt: u64, mailbox: &Mailbox) {
        let mailbox = mailbox.clone();
        self.timer = Some(ScheduledTask::after(self.timeout, move || {
            mailbox.post(SessionMsg::RelocalizationTimeout { attempt });
        }));
    }

    pub fn disarm(&mut self) {
        self.timer = None;
    }

    /// Disarm and drop any pending load or deferred resume; snapshot
    /// accounting is kept.
    pub fn abort(&mut self) {
        self.disarm();
        self.loading = None;
        self.resume_deferred = false;
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Count a snapshot in flight and return the map generation to tag it with.
    pub fn snapshot_started(&mut self) -> u64 {
        self.snapshots_in_flight += 1;
        self.map_generation
    }

    pub fn snapshot_finished(&mut self) {
        self.snapshots_in_flight = self.snapshots_in_flight.saturating_sub(1);
    }

    pub fn snapshot_in_flight(&self) -> bool {
        self.snapshots_in_flight > 0
    }

    /// The saved map was cleared; snapshots requested before now are stale.
    pub fn forget_map(&mut self) {
        self.map_generation += 1;
    }

    pub fn is_current_map(&self, generation: u64) -> bool {
        generation == self.map_generation
    }

    pub fn defer_resume(&mut self) {
        self.resume_deferred = true;
    }

    pub fn is_resume_pending(&self) -> bool {
        self.loading.is_some() || self.resume_deferred
    }

    /// A deferred resume is due once no snapshot is outstanding.
    pub fn take_deferred_resume(&mut self) -> bool {
        if self.snapshot_in_flight() {
            return false;
        }
        std::mem::take(&mut self.resume_deferred)
    }

    pub fn reset(&mut self) {
        self.abort();
        self.snapshots_in_flight = 0;
        self.forget_map();
    }
}

/// Snapshot the live tracking map. Persisting it is left to the actor.
pub(crate) async fn take_snapshot(
    tracking: Arc<dyn SpatialTrackingSession>,
) -> Result<WorldMapRecord, String> {
    tracking
        .snapshot_world_map()
        .await
        .map_err(|e| format!("snapshot failed: {e}"))
}

pub(crate) async fn load_world_map(store: Arc<WorldMapStore>) -> Option<WorldMapRecord> {
    match tokio::task::spawn_blocking(move || store.get()).await {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, "world map load task failed");
            None
        }
    }
}
