//! Audio capture for scan sessions.
//!
//! The platform engine pushes tap blocks into a [`PcmSink`]; a writer task
//! drains them into a WAV file and re-chunks them into fixed-size
//! `AudioData` events. The hot path never blocks on either, and the
//! blocking setup of a recording runs on a blocking thread.

mod chunker;
mod controller;
mod engine;
mod writer;

pub use chunker::PcmChunker;
pub use controller::{AudioCaptureController, OpenedRecording};
pub use engine::{AudioCaptureEngine, AudioEngineRef, PcmSink};
pub use writer::{to_pcm16, WavFileWriter};

use std::path::PathBuf;

/// Samples per `AudioData` event (~85ms at 48kHz).
pub const DEFAULT_CHUNK_SAMPLES: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("audio route configuration failed: {0}")]
    Route(String),
    #[error("audio engine error: {0}")]
    Engine(String),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("writer error: {0}")]
    Writer(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AudioError>;

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per live `AudioData` event.
    pub chunk_samples: usize,
    /// How much audio the PCM bus buffers before dropping tap blocks.
    pub buffer_capacity_ms: u32,
    pub output_dir: PathBuf,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: roomscan_bus::DEFAULT_SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            buffer_capacity_ms: roomscan_bus::DEFAULT_BUFFER_CAPACITY_MS,
            output_dir: std::env::temp_dir().join("roomscan").join("audio"),
        }
    }
}
