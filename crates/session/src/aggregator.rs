//! Room and export aggregation.
//!
//! Tracks which capture segments and room builds are outstanding, keeps the
//! accumulated rooms and photos, and turns them into export artifacts.

use roomscan_events::ExportResult;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::constants::JSON_EXTENSION;
use crate::engine::{ExportType, ProcessedRoom, SharePresenter, StructureSynthesizer};
use crate::error::{Result, ScanError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhotoArtifact {
    pub file_url: PathBuf,
    pub timestamp_ms: i64,
}

#[derive(Debug, Default)]
pub struct RoomAggregator {
    rooms: Vec<ProcessedRoom>,
    photos: Vec<PhotoArtifact>,
    segments_open: usize,
    builds_in_flight: usize,
    photos_in_flight: usize,
    pending_export: bool,
    export_generation: u64,
}

impl RoomAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment_started(&mut self) {
        self.segments_open += 1;
    }

    pub fn segment_closed(&mut self) {
        if self.segments_open == 0 {
            tracing::debug!("segment close without an open segment");
        }
        self.segments_open = self.segments_open.saturating_sub(1);
    }

    /// Capture was torn down; late segment results are dropped by state.
    pub fn abandon_segments(&mut self) {
        self.segments_open = 0;
    }

    pub fn segments_open(&self) -> usize {
        self.segments_open
    }

    pub fn build_started(&mut self) {
        self.builds_in_flight += 1;
    }

    pub fn build_finished(&mut self) {
        self.builds_in_flight = self.builds_in_flight.saturating_sub(1);
    }

    pub fn builds_in_flight(&self) -> usize {
        self.builds_in_flight
    }

    pub fn photo_started(&mut self) {
        self.photos_in_flight += 1;
    }

    pub fn photo_finished(&mut self) {
        self.photos_in_flight = self.photos_in_flight.saturating_sub(1);
    }

    pub fn photos_in_flight(&self) -> usize {
        self.photos_in_flight
    }

    /// Nothing is left that could still add a room or a photo.
    pub fn is_settled(&self) -> bool {
        self.segments_open == 0 && self.builds_in_flight == 0 && self.photos_in_flight == 0
    }

    /// Append a built room and return the new room count.
    pub fn append(&mut self, mut room: ProcessedRoom) -> usize {
        room.index = self.rooms.len();
        self.rooms.push(room);
        self.rooms.len()
    }

    pub fn rooms(&self) -> &[ProcessedRoom] {
        &self.rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn add_photo(&mut self, photo: PhotoArtifact) {
        self.photos.push(photo);
    }

    pub fn photos(&self) -> &[PhotoArtifact] {
        &self.photos
    }

    pub fn photo_urls(&self) -> Vec<PathBuf> {
        self.photos.iter().map(|p| p.file_url.clone()).collect()
    }

    pub fn pending_export(&self) -> bool {
        self.pending_export
    }

    pub fn set_pending_export(&mut self, pending: bool) {
        self.pending_export = pending;
    }

    /// Start a new export generation; completions from older ones are stale.
    pub fn next_export_generation(&mut self) -> u64 {
        self.export_generation += 1;
        self.export_generation
    }

    pub fn is_current_export(&self, generation: u64) -> bool {
        generation == self.export_generation
    }

    /// Discard whatever export is in flight.
    pub fn invalidate_export(&mut self) {
        self.export_generation += 1;
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
        self.photos.clear();
        self.segments_open = 0;
        self.builds_in_flight = 0;
        self.photos_in_flight = 0;
        self.pending_export = false;
        self.invalidate_export();
    }
}

/// One export run, detached from the session so it can execute off the actor.
pub struct ExportJob {
    pub rooms: Vec<ProcessedRoom>,
    pub synthesizer: Arc<dyn StructureSynthesizer>,
    pub share: Option<Arc<dyn SharePresenter>>,
    pub export_dir: PathBuf,
    pub scan_name: String,
    pub export_type: ExportType,
    pub send_file_loc: bool,
    pub audio_url: Option<PathBuf>,
    pub photo_urls: Vec<PathBuf>,
}

impl ExportJob {
    pub fn scan_path(&self) -> PathBuf {
        self.export_dir
            .join(format!("{}.{}", self.scan_name, self.export_type.extension()))
    }

    pub fn json_path(&self) -> PathBuf {
        self.export_dir
            .join(format!("{}.{JSON_EXTENSION}", self.scan_name))
    }

    #[tracing::instrument(name = "export", skip(self), fields(rooms = self.rooms.len(), scan = %self.scan_name))]
    pub async fn run(self) -> Result<ExportResult> {
        let structure = self
            .synthesizer
            .merge(&self.rooms)
            .await
            .map_err(|e| ScanError::ExportFailure(format!("merge failed: {e}")))?;

        let scan_path = self.scan_path();
        let json_path = self.json_path();
        let export_dir = self.export_dir.clone();
        let export_type = self.export_type;

        let written = {
            let scan_path = scan_path.clone();
            let json_path = json_path.clone();
            tokio::task::spawn_blocking(move || -> Result<usize> {
                std::fs::create_dir_all(&export_dir).map_err(|e| {
                    ScanError::ExportFailure(format!("{}: {e}", export_dir.display()))
                })?;
                structure
                    .export(&scan_path, export_type)
                    .map_err(|e| ScanError::ExportFailure(format!("model export: {e}")))?;
                let json = structure
                    .serialize()
                    .map_err(|e| ScanError::ExportFailure(format!("serialize: {e}")))?;
                std::fs::write(&json_path, json).map_err(|e| {
                    ScanError::ExportFailure(format!("{}: {e}", json_path.display()))
                })?;
                Ok(structure.room_count())
            })
            .await
            .map_err(|e| ScanError::ExportFailure(format!("export task failed: {e}")))?
        };
        let room_count = written?;

        tracing::info!(room_count, path = %scan_path.display(), "structure exported");

        let (scan_url, json_url) = if self.send_file_loc {
            (Some(scan_path), Some(json_path))
        } else {
            match &self.share {
                Some(share) => share.present(vec![scan_path, json_path]),
                None => tracing::warn!("no share presenter; exported files not presented"),
            }
            (None, None)
        };

        Ok(ExportResult {
            scan_url,
            json_url,
            audio_url: self.audio_url,
            photo_urls: self.photo_urls,
            room_count,
        })
    }
}
