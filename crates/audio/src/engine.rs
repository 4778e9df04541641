//! Seam between the controller and the platform audio engine.

use async_trait::async_trait;
use roomscan_bus::PcmBusSender;
use std::sync::Arc;

use crate::Result;

/// Platform microphone engine.
///
/// Implementations own the hardware tap and push every block into the
/// [`PcmSink`] they were started with. `stop` must be idempotent.
#[async_trait]
pub trait AudioCaptureEngine: Send + Sync {
    /// Ask the user for microphone access. May show UI and take seconds.
    async fn request_permission(&self) -> bool;

    /// Configure the shared audio route for simultaneous playback and
    /// recording alongside the tracking session's camera.
    fn configure_route(&self) -> Result<()>;

    fn start(&self, sink: PcmSink) -> Result<()>;

    fn stop(&self);
}

pub type AudioEngineRef = Arc<dyn AudioCaptureEngine>;

/// Non-blocking inlet for the tap callback.
#[derive(Clone)]
pub struct PcmSink {
    sender: PcmBusSender,
    sample_rate: u32,
}

impl PcmSink {
    pub(crate) fn new(sender: PcmBusSender, sample_rate: u32) -> Self {
        Self {
            sender,
            sample_rate,
        }
    }

    /// Hand a tap block to the writer. Never blocks; returns `false` if the
    /// block was dropped because the writer fell behind or is gone.
    pub fn push(&self, samples: &[f32]) -> bool {
        let ts_ms = chrono::Utc::now().timestamp_millis();
        self.sender.send(ts_ms, self.sample_rate, samples.to_vec())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.sender.dropped_chunks()
    }
}
