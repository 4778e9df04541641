//! Messages processed by the session actor.

use roomscan_events::ExportResult;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::aggregator::PhotoArtifact;
use crate::engine::{ProcessedRoom, RawRoomData, TrackingState};
use crate::error::{EngineError, ScanError};
use crate::state::SessionState;
use roomscan_audio::OpenedRecording;
use roomscan_worldmap::WorldMapRecord;

/// Commands accepted by a scan session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
    Finish,
    AddRoom,
    Export,
    Pause,
    Resume,
    CapturePhoto,
    /// `None` (or a zero interval) disables automatic photos.
    SetAutoPhotoInterval(Option<Duration>),
    StartAudio,
    StopAudio,
    Reset {
        /// Also forget the durable world map.
        clear_world_map: bool,
    },
}

impl Command {
    /// Lifecycle commands wait for an in-flight export to finish.
    pub fn defers_during_export(&self) -> bool {
        matches!(
            self,
            Self::Start | Self::Finish | Self::AddRoom | Self::Pause | Self::Resume
        )
    }
}

/// Point-in-time view of the session, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub epoch: u64,
    pub room_count: usize,
    pub photo_count: usize,
    pub pending_export: bool,
    pub deferred_commands: usize,
    /// A resume is waiting on a snapshot or a world map load.
    pub resume_pending: bool,
    pub recording_audio: bool,
}

#[derive(Debug)]
pub(crate) enum EngineEvent {
    RawRoom(RawRoomData),
    CaptureEnded,
    CaptureFailed(String),
    Tracking(TrackingState),
    TrackingFailed(String),
}

#[derive(Debug)]
pub(crate) enum SessionMsg {
    Command(Command),
    Engine {
        epoch: u64,
        event: EngineEvent,
    },
    CameraPermission {
        epoch: u64,
        granted: bool,
    },
    MicrophonePermission {
        epoch: u64,
        granted: bool,
    },
    /// Not epoch filtered; the audio controller settles its own stale opens.
    AudioOpened(OpenedRecording),
    RoomBuilt {
        epoch: u64,
        result: Result<ProcessedRoom, EngineError>,
    },
    SnapshotTaken {
        epoch: u64,
        map_generation: u64,
        result: Result<WorldMapRecord, String>,
    },
    WorldMapLoaded {
        epoch: u64,
        attempt: u64,
        record: Option<WorldMapRecord>,
    },
    RelocalizationTimeout {
        attempt: u64,
    },
    PhotoTick {
        generation: u64,
    },
    PhotoSaved {
        epoch: u64,
        result: Result<PhotoArtifact, ScanError>,
    },
    ExportDone {
        generation: u64,
        result: Result<ExportResult, ScanError>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Posting side of the actor's queue used by spawned work, timers and
/// engines. Holds a weak sender so the actor still exits once every
/// [`ScanSessionHandle`](crate::ScanSessionHandle) is gone.
#[derive(Clone)]
pub(crate) struct Mailbox(mpsc::WeakUnboundedSender<SessionMsg>);

impl Mailbox {
    pub(crate) fn new(tx: &mpsc::UnboundedSender<SessionMsg>) -> Self {
        Self(tx.downgrade())
    }

    pub(crate) fn post(&self, msg: SessionMsg) -> bool {
        match self.0.upgrade() {
            Some(tx) => tx.send(msg).is_ok(),
            None => {
                tracing::debug!("session actor gone; message dropped");
                false
            }
        }
    }
}
