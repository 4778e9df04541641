use roomscan_events::ScanEvent;
use serde::{Serialize, Serializer};

/// Which permission prompt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Camera,
    Microphone,
}

impl std::fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera => f.write_str("camera"),
            Self::Microphone => f.write_str("microphone"),
        }
    }
}

/// Error returned by collaborator engines.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Failed(String),

    #[error("not supported on this device")]
    Unsupported,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Everything the session reports as a `Status{error}` event.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Room capture is not supported on this device")]
    DeviceUnsupported,

    #[error("{0} permission denied")]
    PermissionDenied(PermissionKind),

    #[error("Capture engine failed: {0}")]
    EngineFailure(String),

    #[error("Room build failed: {0}")]
    RoomBuildFailure(String),

    #[error("Export failed: {0}")]
    ExportFailure(String),

    #[error("Relocalization timed out")]
    RelocalizationTimeout,

    #[error("Relocalization failed: {0}")]
    RelocalizationFailed(String),

    #[error("Audio engine failed: {0}")]
    AudioEngineFailure(String),

    #[error("Photo capture failed: {0}")]
    PhotoCaptureFailure(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ScanError {
    /// Stable snake_case name, used as the prefix of status messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeviceUnsupported => "device_unsupported",
            Self::PermissionDenied(_) => "permission_denied",
            Self::EngineFailure(_) => "engine_failure",
            Self::RoomBuildFailure(_) => "room_build_failure",
            Self::ExportFailure(_) => "export_failure",
            Self::RelocalizationTimeout => "relocalization_timeout",
            Self::RelocalizationFailed(_) => "relocalization_failed",
            Self::AudioEngineFailure(_) => "audio_engine_failure",
            Self::PhotoCaptureFailure(_) => "photo_capture_failure",
            Self::Config(_) => "config",
        }
    }

    pub fn to_event(&self) -> ScanEvent {
        ScanEvent::error(format!("{}: {}", self.kind(), self))
    }
}

impl Serialize for ScanError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<roomscan_audio::AudioError> for ScanError {
    fn from(e: roomscan_audio::AudioError) -> Self {
        match e {
            roomscan_audio::AudioError::PermissionDenied => {
                ScanError::PermissionDenied(PermissionKind::Microphone)
            }
            other => ScanError::AudioEngineFailure(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
