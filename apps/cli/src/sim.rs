//! Simulated platform engines for running a session without sensors.

use async_trait::async_trait;
use roomscan_audio::{AudioCaptureEngine, PcmSink};
use roomscan_session::{
    CameraPermission, CaptureConfig, EngineError, EngineResult, EngineSink, ExportType, Frame,
    PixelFormat, Plane, ProcessedRoom, RawRoomData, RoomSynthesizer, SpatialCaptureEngine,
    SpatialTrackingSession, Structure, StructureSynthesizer, TrackingConfig, TrackingState,
    WorldMapRecord,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Capture engine whose segments yield whatever room was last scanned.
#[derive(Default)]
pub struct SimCapture {
    running: AtomicBool,
    sink: Mutex<Option<EngineSink>>,
    scanned: Mutex<Option<String>>,
}

impl SimCapture {
    /// Pretend the current segment covered `label`.
    pub fn scan(&self, label: impl Into<String>) {
        *lock(&self.scanned) = Some(label.into());
    }
}

impl SpatialCaptureEngine for SimCapture {
    fn is_supported(&self) -> bool {
        true
    }

    fn run(&self, config: &CaptureConfig, sink: EngineSink) -> EngineResult<()> {
        tracing::debug!(continuation = config.continuation, "sim capture running");
        *lock(&self.sink) = Some(sink);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, keep_tracking_alive: bool) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(keep_tracking_alive, "sim capture stopped");
        let scanned = lock(&self.scanned).take();
        if let Some(sink) = lock(&self.sink).as_ref() {
            match scanned {
                Some(label) => sink.raw_room_ready(RawRoomData::new(label.into_bytes())),
                None => sink.capture_ended(),
            };
        }
    }
}

/// Tracking session that relocalizes after a fixed delay.
pub struct SimTracking {
    relocalize_after: Duration,
    frames: AtomicU64,
}

impl SimTracking {
    pub fn new(relocalize_after: Duration) -> Self {
        Self {
            relocalize_after,
            frames: AtomicU64::new(0),
        }
    }
}

const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 48;

#[async_trait]
impl SpatialTrackingSession for SimTracking {
    fn current_frame(&self) -> Option<Frame> {
        let n = self.frames.fetch_add(1, Ordering::Relaxed);
        let (w, h) = (FRAME_WIDTH as usize, FRAME_HEIGHT as usize);
        let mut data = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            for x in 0..w {
                let shade = ((x + y + n as usize * 8) % 256) as u8;
                data.extend_from_slice(&[shade, (y * 5) as u8, (x * 4) as u8, 255]);
            }
        }
        Some(Frame {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            format: PixelFormat::Bgra8,
            planes: vec![Plane {
                bytes_per_row: w * 4,
                data: Arc::from(data),
            }],
        })
    }

    async fn snapshot_world_map(&self) -> EngineResult<WorldMapRecord> {
        let anchors = 8 + (self.frames.load(Ordering::Relaxed) % 8) as u32;
        Ok(WorldMapRecord::new(vec![0x5A; 256], anchors))
    }

    fn run(&self, config: TrackingConfig, sink: EngineSink) -> EngineResult<()> {
        let Some(map) = config.initial_world_map else {
            return Ok(());
        };
        tracing::debug!(anchors = map.anchor_count, "sim tracking relocalizing");
        let delay = self.relocalize_after;
        tokio::spawn(async move {
            sink.tracking_state(TrackingState::Limited);
            tokio::time::sleep(delay).await;
            sink.tracking_state(TrackingState::Normal);
        });
        Ok(())
    }
}

/// Builds rooms after a short delay; empty payloads fail.
pub struct SimRooms {
    pub build_time: Duration,
}

#[async_trait]
impl RoomSynthesizer for SimRooms {
    async fn build_room(&self, raw: RawRoomData) -> EngineResult<ProcessedRoom> {
        tokio::time::sleep(self.build_time).await;
        if raw.payload.is_empty() {
            return Err(EngineError::msg("no surfaces detected"));
        }
        Ok(ProcessedRoom::new(raw.id, raw.payload))
    }
}

pub struct SimStructureSynthesizer;

struct SimStructure {
    rooms: Vec<ProcessedRoom>,
}

impl SimStructure {
    fn labels(&self) -> Vec<String> {
        self.rooms
            .iter()
            .map(|r| String::from_utf8_lossy(&r.geometry).into_owned())
            .collect()
    }
}

#[async_trait]
impl StructureSynthesizer for SimStructureSynthesizer {
    async fn merge(&self, rooms: &[ProcessedRoom]) -> EngineResult<Box<dyn Structure>> {
        if rooms.is_empty() {
            return Err(EngineError::msg("nothing to merge"));
        }
        Ok(Box::new(SimStructure {
            rooms: rooms.to_vec(),
        }))
    }
}

impl Structure for SimStructure {
    fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn export(&self, path: &Path, export_type: ExportType) -> EngineResult<()> {
        let body = format!("{export_type:?} model\n{}\n", self.labels().join("\n"));
        std::fs::write(path, body)?;
        Ok(())
    }

    fn serialize(&self) -> EngineResult<Vec<u8>> {
        let rooms: Vec<_> = self
            .rooms
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id.to_string(),
                    "index": r.index,
                    "label": String::from_utf8_lossy(&r.geometry),
                })
            })
            .collect();
        serde_json::to_vec_pretty(&serde_json::json!({ "rooms": rooms }))
            .map_err(|e| EngineError::msg(e.to_string()))
    }
}

pub struct SimCamera;

#[async_trait]
impl CameraPermission for SimCamera {
    async fn request_access(&self) -> bool {
        true
    }
}

/// Microphone that plays a 440 Hz tone into the sink.
#[derive(Default)]
pub struct SimMicrophone {
    cancel: Mutex<Option<CancellationToken>>,
}

const TONE_HZ: f32 = 440.0;
const TAP_MS: u64 = 20;

#[async_trait]
impl AudioCaptureEngine for SimMicrophone {
    async fn request_permission(&self) -> bool {
        true
    }

    fn configure_route(&self) -> roomscan_audio::Result<()> {
        Ok(())
    }

    fn start(&self, sink: PcmSink) -> roomscan_audio::Result<()> {
        let cancel = CancellationToken::new();
        if let Some(previous) = lock(&self.cancel).replace(cancel.clone()) {
            previous.cancel();
        }

        let rate = sink.sample_rate();
        let block = (rate as u64 * TAP_MS / 1000) as usize;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(TAP_MS));
            let mut phase = 0usize;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let samples: Vec<f32> = (phase..phase + block)
                            .map(|i| {
                                let t = i as f32 / rate as f32;
                                0.2 * (2.0 * std::f32::consts::PI * TONE_HZ * t).sin()
                            })
                            .collect();
                        phase += block;
                        if !sink.push(&samples) {
                            tracing::trace!(dropped = sink.dropped_blocks(), "sim microphone block dropped");
                        }
                    }
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        if let Some(cancel) = lock(&self.cancel).take() {
            cancel.cancel();
        }
    }
}
