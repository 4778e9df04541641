//! Mock collaborators and a harness that drives a session end to end.

#![allow(dead_code)]

use async_trait::async_trait;
use roomscan_audio::{AudioCaptureEngine, PcmSink};
use roomscan_events::{ChannelEventBus, RelocalizationPhase, ScanEvent, StatusKind};
use roomscan_session::{
    CameraPermission, CaptureConfig, Collaborators, Command, EngineError, EngineResult,
    EngineSink, ExportType, Frame, PixelFormat, Plane, ProcessedRoom, RawRoomData,
    RoomSynthesizer, ScanSession, ScanSessionHandle, SessionConfig, SessionSnapshot,
    SharePresenter, SpatialCaptureEngine, SpatialTrackingSession, Structure,
    StructureSynthesizer, TrackingConfig, TrackingState, WorldMapRecord, WorldMapStore,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;

/// Capture engine that hands back a staged room when a segment stops.
#[derive(Default)]
pub struct MockCapture {
    pub unsupported: AtomicBool,
    pub fail_run: AtomicBool,
    running: AtomicBool,
    sink: Mutex<Option<EngineSink>>,
    staged: Mutex<Option<Vec<u8>>>,
    pub runs: Mutex<Vec<CaptureConfig>>,
    pub stops: Mutex<Vec<bool>>,
}

impl MockCapture {
    /// The next `stop` delivers this payload as the segment's raw room.
    pub fn stage_room(&self, payload: &[u8]) {
        *self.staged.lock().unwrap() = Some(payload.to_vec());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn fail_segment(&self, message: &str) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.capture_failed(message);
        }
    }
}

impl SpatialCaptureEngine for MockCapture {
    fn is_supported(&self) -> bool {
        !self.unsupported.load(Ordering::SeqCst)
    }

    fn run(&self, config: &CaptureConfig, sink: EngineSink) -> EngineResult<()> {
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(EngineError::msg("camera busy"));
        }
        self.runs.lock().unwrap().push(config.clone());
        *self.sink.lock().unwrap() = Some(sink);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, keep_tracking_alive: bool) {
        self.stops.lock().unwrap().push(keep_tracking_alive);
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let staged = self.staged.lock().unwrap().take();
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            match staged {
                Some(payload) => sink.raw_room_ready(RawRoomData::new(payload)),
                None => sink.capture_ended(),
            };
        }
    }
}

pub fn nv12_frame() -> Frame {
    Frame {
        width: 4,
        height: 4,
        format: PixelFormat::Nv12,
        planes: vec![
            Plane {
                bytes_per_row: 4,
                data: Arc::from(vec![120u8; 16]),
            },
            Plane {
                bytes_per_row: 4,
                data: Arc::from(vec![128u8; 8]),
            },
        ],
    }
}

pub struct MockTracking {
    pub frame: Mutex<Option<Frame>>,
    pub anchors: u32,
    pub fail_snapshot: AtomicBool,
    /// Snapshots wait for `release_snapshot` while set.
    pub hold_snapshot: AtomicBool,
    pub release_snapshot: Notify,
    /// Snapshots that have returned, successful or not.
    pub snapshots: AtomicUsize,
    sink: Mutex<Option<EngineSink>>,
    /// Anchor count of the map each `run` was given.
    pub runs: Mutex<Vec<Option<u32>>>,
}

impl Default for MockTracking {
    fn default() -> Self {
        Self {
            frame: Mutex::new(Some(nv12_frame())),
            anchors: 12,
            fail_snapshot: AtomicBool::new(false),
            hold_snapshot: AtomicBool::new(false),
            release_snapshot: Notify::new(),
            snapshots: AtomicUsize::new(0),
            sink: Mutex::new(None),
            runs: Mutex::new(Vec::new()),
        }
    }
}

impl MockTracking {
    pub fn report(&self, state: TrackingState) {
        let guard = self.sink.lock().unwrap();
        guard.as_ref().expect("tracking not running").tracking_state(state);
    }

    pub fn fail(&self, message: &str) {
        let guard = self.sink.lock().unwrap();
        guard.as_ref().expect("tracking not running").tracking_failed(message);
    }
}

#[async_trait]
impl SpatialTrackingSession for MockTracking {
    fn current_frame(&self) -> Option<Frame> {
        self.frame.lock().unwrap().clone()
    }

    async fn snapshot_world_map(&self) -> EngineResult<WorldMapRecord> {
        if self.hold_snapshot.load(Ordering::SeqCst) {
            self.release_snapshot.notified().await;
        }
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return Err(EngineError::msg("not enough features"));
        }
        Ok(WorldMapRecord::new(vec![7u8; 32], self.anchors))
    }

    fn run(&self, config: TrackingConfig, sink: EngineSink) -> EngineResult<()> {
        self.runs
            .lock()
            .unwrap()
            .push(config.initial_world_map.map(|m| m.anchor_count));
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }
}

/// Builds instantly unless held, in which case each build waits for `release`.
#[derive(Default)]
pub struct MockRooms {
    pub fail: AtomicBool,
    pub hold: AtomicBool,
    pub release: Notify,
}

#[async_trait]
impl RoomSynthesizer for MockRooms {
    async fn build_room(&self, raw: RawRoomData) -> EngineResult<ProcessedRoom> {
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::msg("degenerate room"));
        }
        Ok(ProcessedRoom::new(raw.id, raw.payload))
    }
}

pub struct MergedStructure {
    rooms: Vec<ProcessedRoom>,
}

impl Structure for MergedStructure {
    fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn export(&self, path: &Path, export_type: ExportType) -> EngineResult<()> {
        std::fs::write(path, format!("{export_type:?}:{}", self.rooms.len()))?;
        Ok(())
    }

    fn serialize(&self) -> EngineResult<Vec<u8>> {
        let payloads: Vec<String> = self
            .rooms
            .iter()
            .map(|r| String::from_utf8_lossy(&r.geometry).into_owned())
            .collect();
        serde_json::to_vec(&serde_json::json!({ "rooms": payloads }))
            .map_err(|e| EngineError::msg(e.to_string()))
    }
}

/// Merges instantly unless held, in which case each merge waits for `release`.
#[derive(Default)]
pub struct MockStructure {
    pub hold: AtomicBool,
    pub release: Notify,
    pub fail: AtomicBool,
    pub merges: AtomicUsize,
}

#[async_trait]
impl StructureSynthesizer for MockStructure {
    async fn merge(&self, rooms: &[ProcessedRoom]) -> EngineResult<Box<dyn Structure>> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::msg("rooms do not overlap"));
        }
        Ok(Box::new(MergedStructure {
            rooms: rooms.to_vec(),
        }))
    }
}

pub struct MockCamera {
    pub grant: AtomicBool,
    pub requests: AtomicUsize,
}

impl Default for MockCamera {
    fn default() -> Self {
        Self {
            grant: AtomicBool::new(true),
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CameraPermission for MockCamera {
    async fn request_access(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.grant.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockMicrophone {
    pub sink: Mutex<Option<PcmSink>>,
}

#[async_trait]
impl AudioCaptureEngine for MockMicrophone {
    async fn request_permission(&self) -> bool {
        true
    }

    fn configure_route(&self) -> roomscan_audio::Result<()> {
        Ok(())
    }

    fn start(&self, sink: PcmSink) -> roomscan_audio::Result<()> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&self) {
        self.sink.lock().unwrap().take();
    }
}

#[derive(Default)]
pub struct MockShare {
    pub presented: Mutex<Vec<PathBuf>>,
}

impl SharePresenter for MockShare {
    fn present(&self, files: Vec<PathBuf>) {
        self.presented.lock().unwrap().extend(files);
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub handle: ScanSessionHandle,
    pub events: UnboundedReceiver<ScanEvent>,
    pub seen: Vec<ScanEvent>,
    pub capture: Arc<MockCapture>,
    pub tracking: Arc<MockTracking>,
    pub rooms: Arc<MockRooms>,
    pub structure: Arc<MockStructure>,
    pub camera: Arc<MockCamera>,
    pub microphone: Arc<MockMicrophone>,
    pub share: Arc<MockShare>,
    pub world_maps: Arc<WorldMapStore>,
}

const EVENT_WAIT: Duration = Duration::from_secs(30);

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut SessionConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig::with_root(dir.path());
        config.scan_name = "apartment".to_string();
        tweak(&mut config);

        let capture = Arc::new(MockCapture::default());
        let tracking = Arc::new(MockTracking::default());
        let rooms = Arc::new(MockRooms::default());
        let structure = Arc::new(MockStructure::default());
        let camera = Arc::new(MockCamera::default());
        let microphone = Arc::new(MockMicrophone::default());
        let share = Arc::new(MockShare::default());
        let world_maps = Arc::new(WorldMapStore::two_tier(config.world_map_dir.clone()));

        let collaborators = Collaborators {
            capture: capture.clone(),
            tracking: tracking.clone(),
            rooms: rooms.clone(),
            structure: structure.clone(),
            camera: camera.clone(),
            audio: microphone.clone(),
            share: Some(share.clone()),
        };
        let (bus, events) = ChannelEventBus::new();
        let (handle, _task) = ScanSession::spawn(
            config,
            collaborators,
            Arc::clone(&world_maps),
            Arc::new(bus),
        )
        .unwrap();

        Self {
            dir,
            handle,
            events,
            seen: Vec::new(),
            capture,
            tracking,
            rooms,
            structure,
            camera,
            microphone,
            share,
            world_maps,
        }
    }

    pub fn send(&self, command: Command) {
        assert!(self.handle.send(command), "session closed");
    }

    /// Wait for the first event matching `pred`, recording everything seen.
    pub async fn wait_for(&mut self, what: &str, pred: impl Fn(&ScanEvent) -> bool) -> ScanEvent {
        loop {
            let event = tokio::time::timeout(EVENT_WAIT, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {what}; saw {:?}", self.seen))
                .expect("event bus closed");
            self.seen.push(event.clone());
            if pred(&event) {
                return event;
            }
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.handle.snapshot().await.expect("session closed")
    }

    /// Round-trip through the actor, then collect whatever was emitted.
    pub async fn settle(&mut self) {
        self.snapshot().await;
        tokio::task::yield_now().await;
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
    }

    pub fn count(&self, pred: impl Fn(&ScanEvent) -> bool) -> usize {
        self.seen.iter().filter(|e| pred(e)).count()
    }

    pub async fn start(&mut self) {
        self.send(Command::Start);
        self.wait_for("started", is_status(StatusKind::Started)).await;
    }

    /// Start, capture one room and pause, which requests a world map snapshot.
    pub async fn pause_with_room(&mut self) {
        self.start().await;
        self.capture.stage_room(b"living room");
        self.send(Command::Pause);
        self.wait_for("paused", is_paused).await;
        self.wait_for("room", is_status(StatusKind::RoomCaptured)).await;
    }

    /// Wait until `n` world map snapshots have returned.
    pub async fn wait_for_snapshots(&self, n: usize) {
        for _ in 0..2000 {
            if self.tracking.snapshots.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {n} world map snapshots");
    }

    pub fn world_map_committed(&self) -> bool {
        self.dir
            .path()
            .join("worldmap")
            .join(roomscan_worldmap::WORLD_MAP_META_NAME)
            .exists()
    }
}

pub fn is_status(kind: StatusKind) -> impl Fn(&ScanEvent) -> bool {
    move |event| matches!(event, ScanEvent::Status { kind: k, .. } if *k == kind)
}

pub fn is_error(event: &ScanEvent) -> bool {
    event.is_error()
}

pub fn error_kind(event: &ScanEvent) -> Option<String> {
    match event {
        ScanEvent::Status {
            message: Some(message),
            ..
        } if event.is_error() => message.split(':').next().map(str::to_string),
        _ => None,
    }
}

pub fn is_exported(event: &ScanEvent) -> bool {
    matches!(event, ScanEvent::Exported(_))
}

pub fn is_preview(event: &ScanEvent) -> bool {
    matches!(event, ScanEvent::Preview { .. })
}

pub fn is_photo(event: &ScanEvent) -> bool {
    matches!(event, ScanEvent::Photo { .. })
}

pub fn is_paused(event: &ScanEvent) -> bool {
    matches!(event, ScanEvent::Paused)
}

pub fn is_resumed(event: &ScanEvent) -> bool {
    matches!(event, ScanEvent::Resumed)
}

pub fn is_relocalization(phase: RelocalizationPhase) -> impl Fn(&ScanEvent) -> bool {
    move |event| matches!(event, ScanEvent::RelocalizationStatus { phase: p, .. } if *p == phase)
}
