//! Scan session orchestration.
//!
//! Drives a multi-room spatial capture: starts and stops capture segments,
//! collects built rooms, takes photos against the live camera feed, saves
//! and restores tracking state across a pause, and exports the merged
//! structure. Hardware and geometry live behind the traits in [`engine`];
//! everything the session reports goes out as a
//! [`ScanEvent`](roomscan_events::ScanEvent).
//!
//! ```ignore
//! let (handle, _task) = ScanSession::spawn(config, collaborators, world_maps, events)?;
//! handle.send(Command::Start);
//! handle.trigger(TriggerChannel::Finish, Some(1));
//! ```

pub mod aggregator;
mod command;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
mod orchestrator;
pub mod photo;
pub mod relocalization;
pub mod state;
pub mod timer;
pub mod trigger;

pub use aggregator::{ExportJob, PhotoArtifact, RoomAggregator};
pub use command::{Command, SessionSnapshot};
pub use config::SessionConfig;
pub use engine::{
    CameraPermission, CaptureConfig, EngineResult, EngineSink, ExportType, Frame, PixelFormat,
    Plane, ProcessedRoom, RawRoomData, RoomSynthesizer, SharePresenter, SpatialCaptureEngine,
    SpatialTrackingSession, Structure, StructureSynthesizer, TrackingConfig, TrackingState,
};
pub use error::{EngineError, PermissionKind, Result, ScanError};
pub use orchestrator::{Collaborators, ScanSession, ScanSessionHandle};
pub use state::{Outcome, ReturnState, SessionState};
pub use timer::ScheduledTask;
pub use trigger::{should_fire, TriggerChannel, TriggerDeduper, TriggerInputs};

pub use roomscan_worldmap::{WorldMapRecord, WorldMapStore};
