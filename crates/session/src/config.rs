//! Session configuration.

use roomscan_audio::AudioConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    AUDIO_FILE_SUFFIX, DEFAULT_AUDIO_CHUNK_SAMPLES, DEFAULT_JPEG_QUALITY,
    DEFAULT_RELOCALIZATION_TIMEOUT, DEFAULT_SCAN_NAME,
};
use crate::engine::ExportType;
use crate::error::{Result, ScanError};

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("roomscan")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base name of every exported file.
    pub scan_name: String,
    pub export_type: ExportType,
    /// Export as soon as a finish completes.
    pub export_on_finish: bool,
    /// Report file locations in `Exported`; otherwise hand them to the
    /// share presenter.
    pub send_file_loc: bool,
    pub stop_audio_on_finish: bool,
    pub auto_start_audio: bool,
    /// Finish lands in `Paused` instead of ending the scan.
    pub pause_on_finish: bool,
    pub auto_photo_interval_ms: Option<u64>,
    pub relocalization_timeout_ms: u64,
    pub export_dir: PathBuf,
    pub photo_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub world_map_dir: PathBuf,
    pub audio_chunk_samples: usize,
    pub jpeg_quality: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let base = data_dir();
        Self {
            scan_name: DEFAULT_SCAN_NAME.to_string(),
            export_type: ExportType::default(),
            export_on_finish: false,
            send_file_loc: true,
            stop_audio_on_finish: true,
            auto_start_audio: false,
            pause_on_finish: false,
            auto_photo_interval_ms: None,
            relocalization_timeout_ms: DEFAULT_RELOCALIZATION_TIMEOUT.as_millis() as u64,
            export_dir: base.join("exports"),
            photo_dir: base.join("photos"),
            audio_dir: base.join("audio"),
            world_map_dir: base.join("worldmap"),
            audio_chunk_samples: DEFAULT_AUDIO_CHUNK_SAMPLES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl SessionConfig {
    /// Default configuration with every output directory under `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self::default().rooted_at(root)
    }

    pub fn rooted_at(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.export_dir = root.join("exports");
        self.photo_dir = root.join("photos");
        self.audio_dir = root.join("audio");
        self.world_map_dir = root.join("worldmap");
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ScanError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ScanError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_name.trim().is_empty() {
            return Err(ScanError::Config("scan_name must not be empty".to_string()));
        }
        if self.scan_name.contains(['/', '\\']) {
            return Err(ScanError::Config(
                "scan_name must not contain path separators".to_string(),
            ));
        }
        if self.relocalization_timeout_ms == 0 {
            return Err(ScanError::Config(
                "relocalization_timeout_ms must be positive".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ScanError::Config(
                "jpeg_quality must be between 1 and 100".to_string(),
            ));
        }
        Ok(())
    }

    pub fn relocalization_timeout(&self) -> Duration {
        Duration::from_millis(self.relocalization_timeout_ms)
    }

    pub fn auto_photo_interval(&self) -> Option<Duration> {
        self.auto_photo_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn audio_file_stem(&self) -> String {
        format!("{}{AUDIO_FILE_SUFFIX}", self.scan_name)
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            chunk_samples: self.audio_chunk_samples,
            output_dir: self.audio_dir.clone(),
            ..AudioConfig::default()
        }
    }
}
