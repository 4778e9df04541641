//! Audio Capture Controller.
//!
//! Independent of the scan lifecycle: the session only tells it to start,
//! stop, or report where the current recording lives. Failures are reported
//! on the audio event channel and never propagate to the caller.

use futures::future::BoxFuture;
use roomscan_bus::{PcmBus, PcmBusConfig, PcmBusReceiver, PcmChunk};
use roomscan_events::{AudioStatus, EventBusRef, ScanEvent};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::chunker::PcmChunker;
use crate::engine::{AudioEngineRef, PcmSink};
use crate::writer::WavFileWriter;
use crate::{AudioConfig, AudioError, Result};

struct ActiveRecording {
    url: PathBuf,
    cancel: CancellationToken,
}

enum RecorderPhase {
    Idle,
    AwaitingPermission,
    /// Route, file and engine are being set up off the caller's context.
    Opening {
        stop_requested: bool,
    },
    Recording(ActiveRecording),
}

/// Resources produced by a successful open, not yet draining.
struct OpenedParts {
    url: PathBuf,
    writer: WavFileWriter,
    receiver: PcmBusReceiver,
}

/// Result of the blocking half of a start request. Hand it back to
/// [`AudioCaptureController::opened`].
pub struct OpenedRecording(Result<OpenedParts>);

impl std::fmt::Debug for OpenedRecording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Ok(parts) => f.debug_tuple("OpenedRecording").field(&parts.url).finish(),
            Err(e) => f.debug_tuple("OpenedRecording").field(e).finish(),
        }
    }
}

pub struct AudioCaptureController {
    engine: AudioEngineRef,
    events: EventBusRef,
    config: AudioConfig,
    phase: RecorderPhase,
    last_recording: Option<PathBuf>,
}

impl AudioCaptureController {
    pub fn new(engine: AudioEngineRef, events: EventBusRef, config: AudioConfig) -> Self {
        Self {
            engine,
            events,
            config,
            phase: RecorderPhase::Idle,
            last_recording: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.phase, RecorderPhase::Recording(_))
    }

    pub fn is_awaiting_permission(&self) -> bool {
        matches!(self.phase, RecorderPhase::AwaitingPermission)
    }

    pub fn is_opening(&self) -> bool {
        matches!(self.phase, RecorderPhase::Opening { .. })
    }

    /// The active recording, or the most recent finished one.
    pub fn recording_url(&self) -> Option<&Path> {
        match &self.phase {
            RecorderPhase::Recording(active) => Some(active.url.as_path()),
            _ => self.last_recording.as_deref(),
        }
    }

    /// Begin a start request.
    ///
    /// Returns the permission prompt to run off the caller's context, or
    /// `None` if a recording is already active or pending. Feed the answer
    /// back through [`permission_resolved`](Self::permission_resolved).
    pub fn request_start(&mut self) -> Option<BoxFuture<'static, bool>> {
        match self.phase {
            RecorderPhase::Idle => {
                self.phase = RecorderPhase::AwaitingPermission;
                let engine = self.engine.clone();
                Some(Box::pin(async move { engine.request_permission().await }))
            }
            RecorderPhase::AwaitingPermission | RecorderPhase::Opening { .. } => {
                tracing::debug!("audio start already in progress");
                None
            }
            RecorderPhase::Recording(_) => {
                tracing::warn!("audio already recording; start ignored");
                None
            }
        }
    }

    /// Continue a start request. `file_stem` names the WAV file.
    ///
    /// On a grant, returns the open job: route setup, file creation and
    /// engine start, all on a blocking thread. Run it off the caller's
    /// context and feed its output to [`opened`](Self::opened).
    pub fn permission_resolved(
        &mut self,
        granted: bool,
        file_stem: &str,
    ) -> Option<BoxFuture<'static, OpenedRecording>> {
        if !self.is_awaiting_permission() {
            tracing::debug!(granted, "stale microphone permission answer ignored");
            return None;
        }

        if !granted {
            self.phase = RecorderPhase::Idle;
            tracing::warn!("microphone permission denied");
            self.emit_error(&AudioError::PermissionDenied);
            return None;
        }

        self.phase = RecorderPhase::Opening {
            stop_requested: false,
        };
        let engine = self.engine.clone();
        let config = self.config.clone();
        let url = self.config.output_dir.join(format!("{file_stem}.wav"));
        Some(Box::pin(async move {
            let opened = tokio::task::spawn_blocking(move || open(&engine, &config, url))
                .await
                .unwrap_or_else(|e| Err(AudioError::Engine(format!("open task failed: {e}"))));
            OpenedRecording(opened)
        }))
    }

    /// Finish a start request with the output of its open job.
    pub fn opened(&mut self, opened: OpenedRecording) {
        let RecorderPhase::Opening { stop_requested } = self.phase else {
            tracing::debug!(?opened, "open result without a start in progress");
            self.discard(opened);
            return;
        };
        self.phase = RecorderPhase::Idle;

        if stop_requested {
            tracing::debug!("audio stopped while opening; recording discarded");
            self.discard(opened);
            return;
        }

        match opened.0 {
            Ok(parts) => {
                let cancel = CancellationToken::new();
                let url = parts.url.clone();
                let task = RecordingTask {
                    receiver: parts.receiver,
                    writer: parts.writer,
                    chunker: PcmChunker::new(self.config.chunk_samples),
                    events: self.events.clone(),
                    url: parts.url,
                };
                tokio::spawn(task.run(cancel.child_token()));

                tracing::info!(url = %url.display(), "audio recording started");
                self.events.emit(ScanEvent::Audio {
                    status: AudioStatus::Started,
                    url: Some(url.clone()),
                    error: None,
                });
                self.phase = RecorderPhase::Recording(ActiveRecording { url, cancel });
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start audio recording");
                self.emit_error(&e);
            }
        }
    }

    /// Stop the active recording. The writer drains, finalizes the file and
    /// emits the `stopped` event. Returns `true` if a recording was active.
    ///
    /// A start still opening is marked so its result is discarded.
    pub fn stop(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, RecorderPhase::Idle) {
            RecorderPhase::Recording(active) => {
                self.engine.stop();
                active.cancel.cancel();
                tracing::info!(url = %active.url.display(), "audio recording stopping");
                self.last_recording = Some(active.url);
                true
            }
            RecorderPhase::Opening { .. } => {
                self.phase = RecorderPhase::Opening {
                    stop_requested: true,
                };
                false
            }
            RecorderPhase::AwaitingPermission => {
                tracing::debug!("audio start abandoned before permission answer");
                false
            }
            RecorderPhase::Idle => false,
        }
    }

    /// Stop and forget every recording reference.
    pub fn reset(&mut self) {
        self.stop();
        self.last_recording = None;
    }

    fn discard(&self, opened: OpenedRecording) {
        let Ok(parts) = opened.0 else {
            return;
        };
        self.engine.stop();
        drop(parts.writer);
        if let Err(e) = std::fs::remove_file(&parts.url) {
            tracing::debug!(error = %e, "could not remove discarded recording file");
        }
    }

    fn emit_error(&self, error: &AudioError) {
        self.events.emit(ScanEvent::Audio {
            status: AudioStatus::Error,
            url: None,
            error: Some(error.to_string()),
        });
    }
}

/// Blocking half of a start: route, WAV file and engine.
fn open(engine: &AudioEngineRef, config: &AudioConfig, url: PathBuf) -> Result<OpenedParts> {
    engine.configure_route()?;

    let writer = WavFileWriter::create(&url, config.sample_rate)?;

    let mut bus = PcmBus::with_config(PcmBusConfig {
        capacity_ms: config.buffer_capacity_ms,
        ..PcmBusConfig::default()
    });
    let receiver = bus
        .take_receiver()
        .ok_or_else(|| AudioError::Engine("PCM bus receiver unavailable".to_string()))?;
    let sink = PcmSink::new(bus.sender(), config.sample_rate);

    if let Err(e) = engine.start(sink) {
        drop(writer);
        if let Err(rm) = std::fs::remove_file(&url) {
            tracing::debug!(error = %rm, "could not remove unused recording file");
        }
        return Err(e);
    }

    Ok(OpenedParts {
        url,
        writer,
        receiver,
    })
}

impl Drop for AudioCaptureController {
    fn drop(&mut self) {
        if self.is_opening() {
            self.engine.stop();
        }
        self.stop();
    }
}

impl std::fmt::Debug for AudioCaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCaptureController")
            .field("recording", &self.is_recording())
            .field("awaiting_permission", &self.is_awaiting_permission())
            .field("opening", &self.is_opening())
            .field("last_recording", &self.last_recording)
            .finish_non_exhaustive()
    }
}

/// Drains the bus into the WAV file and the live event channel.
struct RecordingTask {
    receiver: PcmBusReceiver,
    writer: WavFileWriter,
    chunker: PcmChunker,
    events: EventBusRef,
    url: PathBuf,
}

impl RecordingTask {
    async fn run(mut self, cancel: CancellationToken) {
        let mut blocks = 0u64;
        let mut last_ts = chrono::Utc::now().timestamp_millis();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                chunk = self.receiver.recv() => chunk,
            };
            let Some(chunk) = chunk else {
                tracing::debug!("PCM bus closed; recording ends");
                break;
            };
            last_ts = chunk.ts_ms;
            if let Err(e) = self.handle(&chunk) {
                self.fail(e);
                return;
            }
            blocks += 1;
        }

        // Blocks already queued when stop arrived still belong to the take.
        self.receiver.close();
        while let Some(chunk) = self.receiver.try_recv() {
            last_ts = chunk.ts_ms;
            if let Err(e) = self.handle(&chunk) {
                self.fail(e);
                return;
            }
            blocks += 1;
        }

        if let Some(tail) = self.chunker.flush() {
            self.emit_data(tail, last_ts);
        }

        if let Err(e) = self.writer.finalize() {
            self.fail(e);
            return;
        }

        tracing::info!(
            blocks,
            gaps = self.receiver.gaps_detected(),
            duration_secs = self.writer.duration_secs(),
            "audio recording finalized"
        );
        self.events.emit(ScanEvent::Audio {
            status: AudioStatus::Stopped,
            url: Some(self.url.clone()),
            error: None,
        });
    }

    fn handle(&mut self, chunk: &PcmChunk) -> Result<()> {
        self.writer.write(&chunk.samples)?;
        for frame in self.chunker.push(&chunk.samples) {
            self.emit_data(frame, chunk.ts_ms);
        }
        Ok(())
    }

    fn emit_data(&self, frame: Vec<i16>, ts_ms: i64) {
        self.events.emit(ScanEvent::AudioData {
            chunk: frame,
            sample_rate: self.writer.sample_rate(),
            ts_ms,
        });
    }

    fn fail(&mut self, error: AudioError) {
        tracing::error!(error = %error, url = %self.url.display(), "audio recording failed");
        let _ = self.writer.finalize();
        self.events.emit(ScanEvent::Audio {
            status: AudioStatus::Error,
            url: Some(self.url.clone()),
            error: Some(error.to_string()),
        });
    }
}
