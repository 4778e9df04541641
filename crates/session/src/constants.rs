use std::time::Duration;

/// How long a resumed session waits for tracking to report `Normal`
/// against a saved world map before falling back to a fresh scan.
pub const DEFAULT_RELOCALIZATION_TIMEOUT: Duration = Duration::from_secs(6);

/// Samples per live `AudioData` event.
pub const DEFAULT_AUDIO_CHUNK_SAMPLES: usize = 4096;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

pub const DEFAULT_SCAN_NAME: &str = "scan";

pub const JSON_EXTENSION: &str = "json";
pub const PHOTO_EXTENSION: &str = "jpg";

/// Suffix appended to the scan name for the recording file stem.
pub const AUDIO_FILE_SUFFIX: &str = "_audio";
