//! Scan session actor.
//!
//! One task owns every piece of session state. Commands, engine callbacks,
//! timer ticks and the results of spawned work all arrive as [`SessionMsg`]s
//! on a single queue and are handled one at a time, so no two transitions
//! ever interleave. Spawned work only posts results back; it never touches
//! the session.

use chrono::Utc;
use roomscan_audio::AudioCaptureController;
use roomscan_events::{EventBusRef, RelocalizationPhase, ScanEvent, StatusKind};
use roomscan_worldmap::{ClearScope, WorldMapRecord, WorldMapStore};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::aggregator::{ExportJob, PhotoArtifact, RoomAggregator};
use crate::command::{Command, EngineEvent, Mailbox, SessionMsg, SessionSnapshot};
use crate::config::SessionConfig;
use crate::engine::{
    CameraPermission, CaptureConfig, EngineSink, ProcessedRoom, RawRoomData, RoomSynthesizer,
    SharePresenter, SpatialCaptureEngine, SpatialTrackingSession, StructureSynthesizer,
    TrackingConfig, TrackingState,
};
use crate::error::{EngineError, PermissionKind, Result, ScanError};
use crate::photo::{photo_path, write_photo, PhotoCapture};
use crate::relocalization::{
    load_world_map, take_snapshot, Relocalization, MSG_NO_WORLD_MAP, MSG_RELOCALIZING,
    MSG_RELOCATED,
};
use crate::state::{Outcome, ReturnState, SessionState};
use crate::trigger::{TriggerChannel, TriggerDeduper, TriggerInputs};

/// Platform services the session drives.
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn SpatialCaptureEngine>,
    pub tracking: Arc<dyn SpatialTrackingSession>,
    pub rooms: Arc<dyn RoomSynthesizer>,
    pub structure: Arc<dyn StructureSynthesizer>,
    pub camera: Arc<dyn CameraPermission>,
    pub audio: roomscan_audio::AudioEngineRef,
    pub share: Option<Arc<dyn SharePresenter>>,
}

/// Cloneable front door to a running session. Never blocks.
#[derive(Clone)]
pub struct ScanSessionHandle {
    tx: mpsc::UnboundedSender<SessionMsg>,
    triggers: Arc<Mutex<TriggerDeduper>>,
}

impl ScanSessionHandle {
    /// Enqueue a command. Returns `false` once the session has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(SessionMsg::Command(command)).is_ok()
    }

    /// Deliver a trigger token. The bound command is enqueued only when the
    /// token differs from the last one seen on `channel`.
    pub fn trigger(&self, channel: TriggerChannel, token: Option<u64>) -> bool {
        let fired = self
            .triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(channel, token);
        fired && self.send(channel.command())
    }

    /// Deliver every trigger token at once. Returns how many commands fired.
    pub fn apply_triggers(&self, inputs: &TriggerInputs) -> usize {
        let commands = self
            .triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .diff(inputs);
        commands
            .into_iter()
            .filter(|command| self.send(command.clone()))
            .count()
    }

    /// Current session state, after every message queued before this call.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionMsg::Snapshot(reply)).ok()?;
        rx.await.ok()
    }

    /// Stop engines and timers and end the actor.
    pub fn shutdown(&self) -> bool {
        self.tx.send(SessionMsg::Shutdown).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for ScanSessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSessionHandle")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

pub struct ScanSession {
    config: SessionConfig,
    collab: Collaborators,
    world_maps: Arc<WorldMapStore>,
    events: EventBusRef,
    mailbox: Mailbox,
    state: SessionState,
    /// Bumped on reset; async results tagged with an older epoch are dropped.
    epoch: u64,
    aggregator: RoomAggregator,
    photos: PhotoCapture,
    audio: AudioCaptureController,
    reloc: Relocalization,
    deferred: VecDeque<Command>,
    camera_request_pending: bool,
    export_after_finish: bool,
}

impl ScanSession {
    /// Validate `config` and start the session actor on the current runtime.
    pub fn spawn(
        config: SessionConfig,
        collab: Collaborators,
        world_maps: Arc<WorldMapStore>,
        events: EventBusRef,
    ) -> Result<(ScanSessionHandle, JoinHandle<()>)> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let audio =
            AudioCaptureController::new(collab.audio.clone(), events.clone(), config.audio_config());
        let session = Self {
            photos: PhotoCapture::new(config.auto_photo_interval()),
            reloc: Relocalization::new(config.relocalization_timeout()),
            mailbox: Mailbox::new(&tx),
            config,
            collab,
            world_maps,
            events,
            state: SessionState::Idle,
            epoch: 0,
            aggregator: RoomAggregator::new(),
            audio,
            deferred: VecDeque::new(),
            camera_request_pending: false,
            export_after_finish: false,
        };

        let task = tokio::spawn(session.run(rx));
        let handle = ScanSessionHandle {
            tx,
            triggers: Arc::new(Mutex::new(TriggerDeduper::new())),
        };
        Ok((handle, task))
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionMsg>) {
        tracing::info!(scan = %self.config.scan_name, "scan session started");
        while let Some(msg) = rx.recv().await {
            if matches!(msg, SessionMsg::Shutdown) {
                break;
            }
            self.handle(msg);
        }
        self.teardown();
        tracing::info!(scan = %self.config.scan_name, "scan session stopped");
    }

    fn handle(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::Command(command) => self.handle_command(command),
            SessionMsg::Engine { epoch, event } => {
                if self.is_current(epoch, "engine callback") {
                    self.on_engine_event(event);
                }
            }
            SessionMsg::CameraPermission { epoch, granted } => {
                if self.is_current(epoch, "camera permission") {
                    self.on_camera_permission(granted);
                }
            }
            SessionMsg::MicrophonePermission { epoch, granted } => {
                if self.is_current(epoch, "microphone permission") {
                    self.on_microphone_permission(granted);
                }
            }
            SessionMsg::AudioOpened(opened) => self.audio.opened(opened),
            SessionMsg::RoomBuilt { epoch, result } => {
                if self.is_current(epoch, "room build") {
                    self.on_room_built(result);
                }
            }
            SessionMsg::SnapshotTaken {
                epoch,
                map_generation,
                result,
            } => {
                if self.is_current(epoch, "world map snapshot") {
                    self.on_snapshot_taken(map_generation, result);
                }
            }
            SessionMsg::WorldMapLoaded {
                epoch,
                attempt,
                record,
            } => {
                if self.is_current(epoch, "world map load") {
                    self.on_world_map_loaded(attempt, record);
                }
            }
            SessionMsg::RelocalizationTimeout { attempt } => self.on_relocalization_timeout(attempt),
            SessionMsg::PhotoTick { generation } => {
                if self.photos.is_current(generation) && self.state.is_running() {
                    self.capture_photo();
                } else {
                    tracing::debug!(generation, "stale photo tick dropped");
                }
            }
            SessionMsg::PhotoSaved { epoch, result } => {
                if self.is_current(epoch, "photo") {
                    self.on_photo_saved(result);
                }
            }
            SessionMsg::ExportDone { generation, result } => self.on_export_done(generation, result),
            SessionMsg::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionMsg::Shutdown => {}
        }
    }

    fn handle_command(&mut self, command: Command) {
        tracing::debug!(?command, state = %self.state, "command received");
        if self.state.is_exporting() && command.defers_during_export() {
            tracing::debug!(?command, "deferred until export completes");
            self.deferred.push_back(command);
            return;
        }

        match command {
            Command::Start => self.start(),
            Command::Cancel => self.cancel(),
            Command::Finish => self.finish(),
            Command::AddRoom => self.add_room(),
            Command::Export => self.export(),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::CapturePhoto => self.capture_photo(),
            Command::SetAutoPhotoInterval(interval) => {
                self.photos.set_interval(interval);
                if self.state.is_running() {
                    self.photos.arm(&self.mailbox);
                }
            }
            Command::StartAudio => self.start_audio(),
            Command::StopAudio => {
                self.audio.stop();
            }
            Command::Reset { clear_world_map } => self.reset(clear_world_map),
        }
    }

    // Lifecycle commands

    fn start(&mut self) {
        if !self.state.is_resting() {
            tracing::debug!(state = %self.state, "start ignored; scan already active");
            return;
        }
        if self.camera_request_pending {
            tracing::debug!("start ignored; camera permission request outstanding");
            return;
        }
        if !self.collab.capture.is_supported() {
            self.report(ScanError::DeviceUnsupported);
            return;
        }

        self.camera_request_pending = true;
        let camera = Arc::clone(&self.collab.camera);
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let granted = camera.request_access().await;
            mailbox.post(SessionMsg::CameraPermission { epoch, granted });
        });
    }

    fn on_camera_permission(&mut self, granted: bool) {
        self.camera_request_pending = false;
        if !self.state.is_resting() {
            tracing::debug!(state = %self.state, "camera permission answer ignored");
            return;
        }
        if !granted {
            self.report(ScanError::PermissionDenied(PermissionKind::Camera));
            return;
        }

        if self.aggregator.room_count() == 0 {
            // New scan: a map from an earlier one would relocalize against the wrong space.
            self.reloc.forget_map();
            if let Err(e) = self.world_maps.clear(ClearScope::All) {
                tracing::warn!(error = %e, "failed to clear stale world map");
            }
        }
        if let Err(e) = self.run_capture(false) {
            self.report(e);
            return;
        }
        self.set_state(SessionState::Running);
        if self.config.auto_start_audio {
            self.start_audio();
        }
        self.emit(ScanEvent::status(StatusKind::Started, None));
    }

    fn cancel(&mut self) {
        let next = match self.state {
            SessionState::Running | SessionState::Paused | SessionState::Relocalizing { .. } => {
                SessionState::Idle
            }
            SessionState::FinishPending { .. } | SessionState::Exporting { .. } => {
                SessionState::Terminal(Outcome::Canceled)
            }
            SessionState::Idle | SessionState::Terminal(_) => {
                tracing::debug!("cancel ignored; nothing to cancel");
                return;
            }
        };

        self.collab.capture.stop(false);
        self.aggregator.abandon_segments();
        self.aggregator.invalidate_export();
        self.aggregator.set_pending_export(false);
        self.reloc.abort();
        self.deferred.clear();
        self.export_after_finish = false;
        self.set_state(next);
        self.emit(ScanEvent::status(StatusKind::Canceled, None));
    }

    fn finish(&mut self) {
        match self.state {
            SessionState::Running => {
                self.collab.capture.stop(true);
                self.request_snapshot();
            }
            SessionState::Paused => {}
            SessionState::FinishPending { .. } => {
                tracing::debug!("finish already pending");
                return;
            }
            _ => {
                tracing::debug!(state = %self.state, "finish ignored");
                return;
            }
        }

        self.set_state(SessionState::FinishPending {
            pause_after: self.config.pause_on_finish,
            awaiting_capture: self.aggregator.segments_open() > 0,
        });
        self.emit(ScanEvent::status(StatusKind::Finishing, None));
        self.check_finish();
    }

    fn check_finish(&mut self) {
        let SessionState::FinishPending { pause_after, .. } = self.state else {
            return;
        };
        if !self.aggregator.is_settled() {
            tracing::debug!(
                segments = self.aggregator.segments_open(),
                builds = self.aggregator.builds_in_flight(),
                photos = self.aggregator.photos_in_flight(),
                "finish waiting for rooms and photos"
            );
            return;
        }
        self.complete_finish(pause_after);
    }

    fn complete_finish(&mut self, pause_after: bool) {
        if self.config.stop_audio_on_finish {
            self.audio.stop();
        }

        let room_count = self.aggregator.room_count();
        if room_count == 0 {
            self.fail(ScanError::RoomBuildFailure(
                "no rooms were captured".to_string(),
            ));
            return;
        }

        self.emit(ScanEvent::Preview { room_count });
        let rest = if pause_after {
            ReturnState::Paused
        } else {
            ReturnState::Terminal(Outcome::Ok)
        };
        if self.config.export_on_finish || self.aggregator.pending_export() {
            self.begin_export(rest, true);
        } else {
            self.set_state(rest.into_state());
            if rest == ReturnState::Paused {
                self.emit(ScanEvent::Paused);
            }
        }
    }

    fn add_room(&mut self) {
        if !self.state.is_capturing() {
            tracing::debug!(state = %self.state, "add room ignored");
            return;
        }
        self.aggregator.set_pending_export(false);
        if self.state.is_running() {
            self.collab.capture.stop(true);
        }
        if let Err(e) = self.run_capture(true) {
            self.fail(e);
            return;
        }
        self.set_state(SessionState::Running);
        tracing::info!(rooms = self.aggregator.room_count(), "capturing next room");
    }

    fn pause(&mut self) {
        match self.state {
            SessionState::Running => {
                self.collab.capture.stop(true);
                self.request_snapshot();
                self.set_state(SessionState::Paused);
                self.emit(ScanEvent::Paused);
            }
            SessionState::FinishPending {
                awaiting_capture, ..
            } => {
                self.state = SessionState::FinishPending {
                    pause_after: true,
                    awaiting_capture,
                };
                tracing::debug!("finish will pause instead of ending the scan");
            }
            SessionState::Idle | SessionState::Terminal(_) if self.aggregator.room_count() > 0 => {
                self.set_state(SessionState::Paused);
                self.emit(ScanEvent::Paused);
            }
            _ => tracing::debug!(state = %self.state, "pause ignored"),
        }
    }

    fn export(&mut self) {
        match self.state {
            SessionState::Exporting { .. } => {
                self.aggregator.set_pending_export(true);
                tracing::debug!("export coalesced into the one in flight");
            }
            SessionState::FinishPending { .. } | SessionState::Relocalizing { .. } => {
                self.aggregator.set_pending_export(true);
                tracing::debug!(state = %self.state, "export queued");
            }
            state => {
                if self.aggregator.room_count() == 0 {
                    self.aggregator.set_pending_export(true);
                    tracing::info!("export queued until the first room is built");
                    return;
                }
                if self.aggregator.photos_in_flight() > 0 {
                    self.aggregator.set_pending_export(true);
                    tracing::info!(
                        photos = self.aggregator.photos_in_flight(),
                        "export queued until photos are saved"
                    );
                    return;
                }
                if let Some(return_to) = state.return_point() {
                    self.begin_export(return_to, false);
                }
            }
        }
    }

    /// Run a queued export once rooms exist and no photo is still encoding.
    fn run_pending_export(&mut self) {
        if !self.aggregator.pending_export()
            || self.aggregator.room_count() == 0
            || self.aggregator.photos_in_flight() > 0
        {
            return;
        }
        if let Some(return_to) = self.state.return_point() {
            tracing::info!("running queued export");
            self.begin_export(return_to, false);
        }
    }

    fn reset(&mut self, clear_world_map: bool) {
        self.collab.capture.stop(false);
        self.photos.reset();
        self.reloc.reset();
        self.audio.reset();
        self.aggregator.clear();
        self.deferred.clear();
        self.camera_request_pending = false;
        self.export_after_finish = false;
        self.epoch += 1;

        let scope = if clear_world_map {
            ClearScope::All
        } else {
            ClearScope::Volatile
        };
        if let Err(e) = self.world_maps.clear(scope) {
            tracing::warn!(error = %e, "failed to clear world map on reset");
        }

        self.set_state(SessionState::Idle);
        tracing::info!(epoch = self.epoch, clear_world_map, "session reset");
        self.emit(ScanEvent::status(StatusKind::Reset, None));
    }

    // Capture segments and rooms

    fn sink(&self) -> EngineSink {
        EngineSink::new(self.mailbox.clone(), self.epoch)
    }

    fn run_capture(&mut self, continuation: bool) -> Result<()> {
        let config = CaptureConfig {
            coaching_enabled: !continuation,
            continuation,
        };
        self.collab
            .capture
            .run(&config, self.sink())
            .map_err(|e| ScanError::EngineFailure(e.to_string()))?;
        self.aggregator.segment_started();
        Ok(())
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::RawRoom(raw) => self.on_raw_room(raw),
            EngineEvent::CaptureEnded => {
                if self.state.is_resting() {
                    tracing::debug!("capture end after teardown ignored");
                    return;
                }
                self.aggregator.segment_closed();
                self.refresh_awaiting_capture();
                self.check_finish();
            }
            EngineEvent::CaptureFailed(message) => {
                if self.state.is_resting() {
                    tracing::debug!(%message, "capture failure after teardown ignored");
                    return;
                }
                self.aggregator.segment_closed();
                if self.state.is_capturing() {
                    self.fail(ScanError::EngineFailure(message));
                } else {
                    tracing::warn!(%message, state = %self.state, "stopped segment failed");
                }
            }
            EngineEvent::Tracking(tracking) => self.on_tracking_state(tracking),
            EngineEvent::TrackingFailed(message) => self.on_tracking_failed(message),
        }
    }

    fn on_raw_room(&mut self, raw: RawRoomData) {
        if self.state.is_resting() {
            tracing::debug!(id = %raw.id, "raw room after teardown dropped");
            return;
        }
        self.aggregator.segment_closed();
        self.refresh_awaiting_capture();
        self.aggregator.build_started();

        let rooms = Arc::clone(&self.collab.rooms);
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = rooms.build_room(raw).await;
            mailbox.post(SessionMsg::RoomBuilt { epoch, result });
        });
    }

    fn refresh_awaiting_capture(&mut self) {
        if let SessionState::FinishPending { pause_after, .. } = self.state {
            self.state = SessionState::FinishPending {
                pause_after,
                awaiting_capture: self.aggregator.segments_open() > 0,
            };
        }
    }

    fn on_room_built(&mut self, result: std::result::Result<ProcessedRoom, EngineError>) {
        self.aggregator.build_finished();
        let room = match result {
            Ok(room) => room,
            Err(e) => {
                let error = ScanError::RoomBuildFailure(e.to_string());
                if matches!(self.state, SessionState::FinishPending { .. }) {
                    self.fail(error);
                } else {
                    self.report(error);
                }
                return;
            }
        };

        let count = self.aggregator.append(room);
        tracing::info!(rooms = count, "room built");
        self.emit(ScanEvent::status(
            StatusKind::RoomCaptured,
            Some(format!("room {count} captured")),
        ));

        if matches!(self.state, SessionState::FinishPending { .. }) {
            self.check_finish();
        } else {
            self.run_pending_export();
        }
    }

    /// Report, tear capture down and go idle.
    fn fail(&mut self, error: ScanError) {
        self.report(error);
        self.collab.capture.stop(false);
        self.aggregator.abandon_segments();
        self.reloc.abort();
        self.set_state(SessionState::Idle);
    }

    // Export

    fn begin_export(&mut self, return_to: ReturnState, after_finish: bool) {
        self.aggregator.set_pending_export(false);
        self.export_after_finish = after_finish;
        let generation = self.aggregator.next_export_generation();
        self.set_state(SessionState::Exporting { return_to });
        self.emit(ScanEvent::status(StatusKind::Exporting, None));

        let job = ExportJob {
            rooms: self.aggregator.rooms().to_vec(),
            synthesizer: Arc::clone(&self.collab.structure),
            share: self.collab.share.clone(),
            export_dir: self.config.export_dir.clone(),
            scan_name: self.config.scan_name.clone(),
            export_type: self.config.export_type,
            send_file_loc: self.config.send_file_loc,
            audio_url: self.audio.recording_url().map(Path::to_path_buf),
            photo_urls: self.aggregator.photo_urls(),
        };
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let result = job.run().await;
            mailbox.post(SessionMsg::ExportDone { generation, result });
        });
    }

    fn on_export_done(
        &mut self,
        generation: u64,
        result: std::result::Result<roomscan_events::ExportResult, ScanError>,
    ) {
        let SessionState::Exporting { return_to } = self.state else {
            tracing::debug!(generation, "export finished outside exporting state; dropped");
            return;
        };
        if !self.aggregator.is_current_export(generation) {
            tracing::debug!(generation, "stale export dropped");
            return;
        }

        let target = match result {
            Ok(exported) => {
                tracing::info!(rooms = exported.room_count, "export complete");
                self.emit(ScanEvent::Exported(exported));
                return_to
            }
            Err(e) => {
                self.report(e);
                return_to.after_failure()
            }
        };

        let announce_pause = self.export_after_finish && target == ReturnState::Paused;
        self.export_after_finish = false;
        self.set_state(target.into_state());
        if announce_pause {
            self.emit(ScanEvent::Paused);
        }

        if self.aggregator.pending_export()
            && self.aggregator.room_count() > 0
            && self.aggregator.photos_in_flight() == 0
        {
            self.begin_export(target, false);
            return;
        }
        self.replay_deferred();
    }

    fn replay_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        let queued: Vec<Command> = self.deferred.drain(..).collect();
        tracing::debug!(count = queued.len(), "replaying deferred commands");
        for command in queued {
            self.handle_command(command);
        }
    }

    // Pause/resume

    fn request_snapshot(&mut self) {
        let map_generation = self.reloc.snapshot_started();
        let tracking = Arc::clone(&self.collab.tracking);
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = take_snapshot(tracking).await;
            mailbox.post(SessionMsg::SnapshotTaken {
                epoch,
                map_generation,
                result,
            });
        });
    }

    /// Persist a snapshot. Stored here so no clear can be overtaken by it.
    fn on_snapshot_taken(
        &mut self,
        map_generation: u64,
        result: std::result::Result<WorldMapRecord, String>,
    ) {
        self.reloc.snapshot_finished();
        match result {
            Ok(record) if !self.reloc.is_current_map(map_generation) => {
                tracing::debug!(
                    anchors = record.anchor_count,
                    "snapshot of a forgotten world map dropped"
                );
            }
            Ok(record) => match self.world_maps.put(&record) {
                Ok(()) => tracing::info!(anchors = record.anchor_count, "world map snapshot saved"),
                Err(e) => {
                    tracing::warn!(error = %e, "world map store failed; resume will start fresh")
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "world map snapshot failed; resume will start fresh")
            }
        }
        if self.reloc.take_deferred_resume() {
            self.resume();
        }
    }

    fn resume(&mut self) {
        match self.state {
            SessionState::Paused | SessionState::Idle | SessionState::Terminal(_) => {}
            SessionState::Relocalizing { .. } => {
                tracing::debug!("resume ignored; relocalization already in progress");
                return;
            }
            _ => {
                tracing::debug!(state = %self.state, "resume ignored");
                return;
            }
        }
        if self.reloc.is_loading() {
            tracing::debug!("resume ignored; world map load already in flight");
            return;
        }
        if self.reloc.snapshot_in_flight() {
            tracing::info!("resume deferred until the world map snapshot completes");
            self.reloc.defer_resume();
            return;
        }

        // The state is left alone until the load says whether a map exists.
        let attempt = self.reloc.begin();
        tracing::debug!(attempt, "loading world map");
        let store = Arc::clone(&self.world_maps);
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let record = load_world_map(store).await;
            mailbox.post(SessionMsg::WorldMapLoaded {
                epoch,
                attempt,
                record,
            });
        });
    }

    fn on_world_map_loaded(&mut self, attempt: u64, record: Option<WorldMapRecord>) {
        if !self.reloc.finish_loading(attempt) {
            tracing::debug!(attempt, "world map load for stale attempt dropped");
            return;
        }
        match self.state {
            SessionState::Paused | SessionState::Idle | SessionState::Terminal(_) => {}
            SessionState::Exporting { .. } => {
                tracing::debug!(attempt, "resume deferred until export completes");
                self.deferred.push_back(Command::Resume);
                return;
            }
            _ => {
                tracing::debug!(attempt, state = %self.state, "resume overtaken; world map unused");
                return;
            }
        }

        let Some(map) = record else {
            tracing::warn!(attempt, "no world map to relocalize against");
            self.emit_relocalization(RelocalizationPhase::NoWorldMap, None, MSG_NO_WORLD_MAP);
            self.resume_fresh();
            return;
        };

        let anchors = map.anchor_count;
        self.collab.capture.stop(false);
        let config = TrackingConfig {
            initial_world_map: Some(map),
        };
        if let Err(e) = self.collab.tracking.run(config, self.sink()) {
            self.abandon_relocalization(
                RelocalizationPhase::RelocalizationFailed,
                ScanError::RelocalizationFailed(e.to_string()),
            );
            return;
        }

        self.set_state(SessionState::Relocalizing { attempt });
        self.reloc.arm_timeout(attempt, &self.mailbox);
        tracing::info!(attempt, anchors, "relocalizing");
        self.emit_relocalization(
            RelocalizationPhase::Relocalizing,
            Some(anchors),
            MSG_RELOCALIZING,
        );
    }

    fn on_tracking_state(&mut self, tracking: TrackingState) {
        match (self.state, tracking) {
            (SessionState::Relocalizing { attempt }, TrackingState::Normal) => {
                self.reloc.disarm();
                tracing::info!(attempt, "relocalized");
                self.emit_relocalization(RelocalizationPhase::Relocated, None, MSG_RELOCATED);
                if let Err(e) = self.run_capture(true) {
                    self.fail(e);
                    return;
                }
                self.set_state(SessionState::Running);
                self.emit(ScanEvent::Resumed);
                self.run_pending_export();
            }
            (SessionState::Relocalizing { attempt }, other) => {
                tracing::debug!(attempt, tracking = ?other, "waiting for normal tracking");
            }
            (_, other) => tracing::trace!(tracking = ?other, "tracking state"),
        }
    }

    fn on_tracking_failed(&mut self, message: String) {
        match self.state {
            SessionState::Relocalizing { .. } => self.abandon_relocalization(
                RelocalizationPhase::RelocalizationFailed,
                ScanError::RelocalizationFailed(message),
            ),
            state if state.is_capturing() => {
                self.fail(ScanError::EngineFailure(format!("tracking failed: {message}")))
            }
            _ => tracing::debug!(%message, state = %self.state, "tracking failure ignored"),
        }
    }

    fn on_relocalization_timeout(&mut self, attempt: u64) {
        if self.state != (SessionState::Relocalizing { attempt }) {
            tracing::debug!(attempt, "stale relocalization timeout dropped");
            return;
        }
        self.abandon_relocalization(
            RelocalizationPhase::RelocalizationTimeout,
            ScanError::RelocalizationTimeout,
        );
    }

    /// Give up on the saved map and continue with a fresh capture.
    fn abandon_relocalization(&mut self, phase: RelocalizationPhase, error: ScanError) {
        self.reloc.disarm();
        self.reloc.forget_map();
        tracing::warn!(phase = phase.as_str(), error = %error, "relocalization abandoned");
        if let Err(e) = self.world_maps.clear(ClearScope::All) {
            tracing::warn!(error = %e, "failed to clear world map");
        }
        self.emit_relocalization(phase, None, &error.to_string());
        self.report(error);
        self.resume_fresh();
    }

    fn resume_fresh(&mut self) {
        self.reloc.disarm();
        if let Err(e) = self.run_capture(false) {
            self.fail(e);
            return;
        }
        self.set_state(SessionState::Running);
        self.emit(ScanEvent::Resumed);
        self.run_pending_export();
    }

    // Photos

    fn capture_photo(&mut self) {
        if self.state.is_resting() {
            tracing::debug!("photo ignored; no scan active");
            return;
        }
        let Some(frame) = self.collab.tracking.current_frame() else {
            self.report(ScanError::PhotoCaptureFailure(
                "no camera frame available".to_string(),
            ));
            return;
        };

        self.aggregator.photo_started();
        let index = self.photos.next_index();
        let timestamp_ms = Utc::now().timestamp_millis();
        let path = photo_path(
            &self.config.photo_dir,
            &self.config.scan_name,
            index,
            timestamp_ms,
        );
        let quality = self.config.jpeg_quality;
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let encoded = tokio::task::spawn_blocking(move || {
                write_photo(&frame, &path, quality).map(|()| PhotoArtifact {
                    file_url: path,
                    timestamp_ms,
                })
            })
            .await;
            let result = encoded.unwrap_or_else(|e| {
                Err(ScanError::PhotoCaptureFailure(format!(
                    "encoder task failed: {e}"
                )))
            });
            mailbox.post(SessionMsg::PhotoSaved { epoch, result });
        });
    }

    fn on_photo_saved(&mut self, result: Result<PhotoArtifact>) {
        self.aggregator.photo_finished();
        match result {
            Ok(photo) => {
                tracing::debug!(url = %photo.file_url.display(), "photo saved");
                self.emit(ScanEvent::Photo {
                    url: photo.file_url.clone(),
                    ts_ms: photo.timestamp_ms,
                });
                self.aggregator.add_photo(photo);
            }
            Err(e) => self.report(e),
        }

        if matches!(self.state, SessionState::FinishPending { .. }) {
            self.check_finish();
        } else {
            self.run_pending_export();
        }
    }

    // Audio

    fn on_microphone_permission(&mut self, granted: bool) {
        let stem = self.config.audio_file_stem();
        let Some(open) = self.audio.permission_resolved(granted, &stem) else {
            return;
        };
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let opened = open.await;
            mailbox.post(SessionMsg::AudioOpened(opened));
        });
    }

    fn start_audio(&mut self) {
        let Some(permission) = self.audio.request_start() else {
            return;
        };
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let granted = permission.await;
            mailbox.post(SessionMsg::MicrophonePermission { epoch, granted });
        });
    }

    // Helpers

    fn set_state(&mut self, next: SessionState) {
        let prev = self.state;
        if prev == next {
            return;
        }
        self.state = next;
        match (prev.is_running(), next.is_running()) {
            (false, true) => self.photos.arm(&self.mailbox),
            (true, false) => self.photos.disarm(),
            _ => {}
        }
        tracing::info!(
            from = %prev,
            to = %next,
            rooms = self.aggregator.room_count(),
            epoch = self.epoch,
            "session state changed"
        );
    }

    fn is_current(&self, epoch: u64, what: &str) -> bool {
        if epoch != self.epoch {
            tracing::debug!(epoch, current = self.epoch, what, "stale result dropped");
            return false;
        }
        true
    }

    fn emit(&self, event: ScanEvent) {
        self.events.emit(event);
    }

    fn emit_relocalization(
        &self,
        phase: RelocalizationPhase,
        anchor_count: Option<u32>,
        message: &str,
    ) {
        self.emit(ScanEvent::RelocalizationStatus {
            phase,
            anchor_count,
            message: message.to_string(),
        });
    }

    fn report(&self, error: ScanError) {
        tracing::warn!(kind = error.kind(), error = %error, "session error");
        self.emit(error.to_event());
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            epoch: self.epoch,
            room_count: self.aggregator.room_count(),
            photo_count: self.aggregator.photos().len(),
            pending_export: self.aggregator.pending_export(),
            deferred_commands: self.deferred.len(),
            resume_pending: self.reloc.is_resume_pending(),
            recording_audio: self.audio.is_recording(),
        }
    }

    fn teardown(&mut self) {
        self.collab.capture.stop(false);
        self.photos.reset();
        self.reloc.reset();
        self.audio.stop();
        self.deferred.clear();
    }
}
