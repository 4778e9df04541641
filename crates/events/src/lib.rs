//! Outward event contract for the scan session orchestrator.
//!
//! Every event the orchestrator emits is a [`ScanEvent`]. Consumers that
//! cross a process or language boundary serialize it as tagged JSON; the
//! topic constants in [`event_names`] name the channel each event goes on.
//!
//! Also provides the `EventBus` trait for decoupled event emission.

mod bus;

pub use bus::{ChannelEventBus, EventBus, EventBusRef, InMemoryEventBus, NullEventBus};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Session-level status kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Started,
    Canceled,
    Finishing,
    RoomCaptured,
    Exporting,
    Reset,
    Error,
}

/// Lifecycle of a recording as reported on the audio channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioStatus {
    Started,
    Stopped,
    Error,
}

/// Phases reported while resuming a paused session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocalizationPhase {
    /// Neither tier held a world map; a fresh capture was started.
    #[serde(rename = "no_worldmap")]
    NoWorldMap,
    Relocalizing,
    Relocated,
    RelocalizationFailed,
    RelocalizationTimeout,
}

impl RelocalizationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoWorldMap => "no_worldmap",
            Self::Relocalizing => "relocalizing",
            Self::Relocated => "relocated",
            Self::RelocalizationFailed => "relocalization_failed",
            Self::RelocalizationTimeout => "relocalization_timeout",
        }
    }
}

/// Files produced by one export operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_url: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_url: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<PathBuf>,
    #[serde(default)]
    pub photo_urls: Vec<PathBuf>,
    /// Number of rooms merged into the exported structure.
    #[serde(default)]
    pub room_count: usize,
}

/// Everything the orchestrator reports outward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Status {
        kind: StatusKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The finished scan is ready to be previewed.
    Preview { room_count: usize },
    Photo { url: PathBuf, ts_ms: i64 },
    Audio {
        status: AudioStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A fixed-size block of 16-bit PCM from the active recording.
    AudioData {
        chunk: Vec<i16>,
        sample_rate: u32,
        ts_ms: i64,
    },
    Exported(ExportResult),
    Paused,
    Resumed,
    RelocalizationStatus {
        phase: RelocalizationPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor_count: Option<u32>,
        message: String,
    },
}

impl ScanEvent {
    pub fn status(kind: StatusKind, message: Option<String>) -> Self {
        Self::Status { kind, message }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Status {
            kind: StatusKind::Error,
            message: Some(message.into()),
        }
    }

    /// Topic this event is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Status { .. } => event_names::STATUS,
            Self::Preview { .. } => event_names::PREVIEW,
            Self::Photo { .. } => event_names::PHOTO,
            Self::Audio { .. } => event_names::AUDIO,
            Self::AudioData { .. } => event_names::AUDIO_DATA,
            Self::Exported(_) => event_names::EXPORTED,
            Self::Paused => event_names::PAUSED,
            Self::Resumed => event_names::RESUMED,
            Self::RelocalizationStatus { .. } => event_names::RELOCALIZATION,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::Status {
                kind: StatusKind::Error,
                ..
            }
        )
    }
}

/// Event names as constants to prevent typos.
pub mod event_names {
    pub const STATUS: &str = "scan:status";
    pub const PREVIEW: &str = "scan:preview";
    pub const PHOTO: &str = "scan:photo";
    pub const AUDIO: &str = "scan:audio";
    pub const AUDIO_DATA: &str = "scan:audio_data";
    pub const EXPORTED: &str = "scan:exported";
    pub const PAUSED: &str = "scan:paused";
    pub const RESUMED: &str = "scan:resumed";
    pub const RELOCALIZATION: &str = "scan:relocalization";
}
