//! Collaborator seams.
//!
//! The orchestrator never talks to hardware or geometry code directly. The
//! platform layer implements these traits and reports asynchronous results
//! through the [`EngineSink`] it is handed on `run`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roomscan_worldmap::WorldMapRecord;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::command::{EngineEvent, Mailbox, SessionMsg};
use crate::error::EngineError;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Kind of 3D model written by [`Structure::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    /// Walls, openings and objects as parametric primitives.
    #[default]
    Parametric,
    Mesh,
    Model,
}

impl ExportType {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Parametric | Self::Mesh | Self::Model => "usdz",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    pub coaching_enabled: bool,
    /// The tracking session from the previous segment is still alive and
    /// the new room should share its coordinate space.
    pub continuation: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TrackingConfig {
    pub initial_world_map: Option<WorldMapRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Normal,
    Limited,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YCbCr 4:2:0 bi-planar, full range. Plane 0 is luma, plane 1 holds
    /// interleaved Cb/Cr at half resolution.
    Nv12,
    Bgra8,
    Rgba8,
}

#[derive(Debug, Clone)]
pub struct Plane {
    pub bytes_per_row: usize,
    pub data: Arc<[u8]>,
}

/// A camera frame as delivered by the tracking session.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

/// Raw capture output for one room segment.
#[derive(Debug, Clone)]
pub struct RawRoomData {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub payload: Arc<[u8]>,
}

impl RawRoomData {
    pub fn new(payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            payload: payload.into(),
        }
    }
}

/// Geometry for one room. Opaque to the orchestrator.
#[derive(Debug, Clone)]
pub struct ProcessedRoom {
    pub id: Uuid,
    /// Position in the session's room list, assigned on append.
    pub index: usize,
    pub built_at: DateTime<Utc>,
    pub geometry: Arc<[u8]>,
}

impl ProcessedRoom {
    pub fn new(id: Uuid, geometry: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id,
            index: 0,
            built_at: Utc::now(),
            geometry: geometry.into(),
        }
    }
}

/// Produces raw room data. Segment results arrive through the sink:
/// every `stop` ends with exactly one of `raw_room_ready`,
/// `capture_ended` or `capture_failed`.
pub trait SpatialCaptureEngine: Send + Sync {
    fn is_supported(&self) -> bool;

    fn run(&self, config: &CaptureConfig, sink: EngineSink) -> EngineResult<()>;

    fn stop(&self, keep_tracking_alive: bool);
}

#[async_trait]
pub trait RoomSynthesizer: Send + Sync {
    async fn build_room(&self, raw: RawRoomData) -> EngineResult<ProcessedRoom>;
}

#[async_trait]
pub trait StructureSynthesizer: Send + Sync {
    async fn merge(&self, rooms: &[ProcessedRoom]) -> EngineResult<Box<dyn Structure>>;
}

/// Merged multi-room result.
pub trait Structure: Send {
    fn room_count(&self) -> usize;

    fn export(&self, path: &Path, export_type: ExportType) -> EngineResult<()>;

    fn serialize(&self) -> EngineResult<Vec<u8>>;
}

#[async_trait]
pub trait SpatialTrackingSession: Send + Sync {
    /// Latest camera frame, if tracking is running.
    fn current_frame(&self) -> Option<Frame>;

    async fn snapshot_world_map(&self) -> EngineResult<WorldMapRecord>;

    /// (Re)start tracking. State changes arrive via `tracking_state`.
    fn run(&self, config: TrackingConfig, sink: EngineSink) -> EngineResult<()>;
}

#[async_trait]
pub trait CameraPermission: Send + Sync {
    async fn request_access(&self) -> bool;
}

/// Hands exported files to the user when their locations are not sent back.
pub trait SharePresenter: Send + Sync {
    fn present(&self, files: Vec<PathBuf>);
}

/// Callback inlet handed to engines. Cloneable, never blocks.
///
/// Every message is tagged with the session epoch it was created in, so
/// callbacks from before a reset are discarded.
#[derive(Clone)]
pub struct EngineSink {
    mailbox: Mailbox,
    epoch: u64,
}

impl EngineSink {
    pub(crate) fn new(mailbox: Mailbox, epoch: u64) -> Self {
        Self { mailbox, epoch }
    }

    pub fn raw_room_ready(&self, raw: RawRoomData) -> bool {
        self.post(EngineEvent::RawRoom(raw))
    }

    /// The segment stopped without producing room data.
    pub fn capture_ended(&self) -> bool {
        self.post(EngineEvent::CaptureEnded)
    }

    pub fn capture_failed(&self, error: impl Into<String>) -> bool {
        self.post(EngineEvent::CaptureFailed(error.into()))
    }

    pub fn tracking_state(&self, state: TrackingState) -> bool {
        self.post(EngineEvent::Tracking(state))
    }

    pub fn tracking_failed(&self, error: impl Into<String>) -> bool {
        self.post(EngineEvent::TrackingFailed(error.into()))
    }

    fn post(&self, event: EngineEvent) -> bool {
        self.mailbox.post(SessionMsg::Engine {
            epoch: self.epoch,
            event,
        })
    }
}

impl std::fmt::Debug for EngineSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSink")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
