//! Scripted walk through a scan, echoing every event as a JSON line.

use anyhow::{anyhow, bail, Result};
use roomscan_events::{ExportResult, ScanEvent, StatusKind};
use roomscan_session::{Command, ScanSessionHandle, TriggerChannel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::sim::SimCapture;

const STEP_TIMEOUT: Duration = Duration::from_secs(20);

pub struct Script {
    pub rooms: usize,
    pub photos_per_room: usize,
    pub pause: bool,
    pub audio: bool,
    pub dwell: Duration,
    pub export_on_finish: bool,
}

pub struct Driver {
    handle: ScanSessionHandle,
    events: UnboundedReceiver<ScanEvent>,
    capture: Arc<SimCapture>,
    photo_token: u64,
    audio_chunks: usize,
}

impl Driver {
    pub fn new(
        handle: ScanSessionHandle,
        events: UnboundedReceiver<ScanEvent>,
        capture: Arc<SimCapture>,
    ) -> Self {
        Self {
            handle,
            events,
            capture,
            photo_token: 0,
            audio_chunks: 0,
        }
    }

    pub fn audio_chunks(&self) -> usize {
        self.audio_chunks
    }

    pub async fn run(&mut self, script: &Script) -> Result<ExportResult> {
        if script.rooms == 0 {
            bail!("nothing to scan: --rooms must be at least 1");
        }

        self.send(Command::Start)?;
        self.expect("start", |e| is_status(e, StatusKind::Started))
            .await?;
        if script.audio {
            self.send(Command::StartAudio)?;
        }

        for room in 1..=script.rooms {
            tracing::info!(room, "scanning room");
            for _ in 0..script.photos_per_room {
                tokio::time::sleep(script.dwell).await;
                self.photo_token += 1;
                self.handle
                    .trigger(TriggerChannel::CapturePhoto, Some(self.photo_token));
                self.expect("photo", |e| matches!(e, ScanEvent::Photo { .. }))
                    .await?;
            }
            tokio::time::sleep(script.dwell).await;
            self.capture.scan(format!("room-{room}"));
            if room < script.rooms {
                self.send(Command::AddRoom)?;
                self.expect("room", |e| is_status(e, StatusKind::RoomCaptured))
                    .await?;
            }
        }

        if script.pause {
            self.send(Command::Pause)?;
            self.expect("pause", |e| matches!(e, ScanEvent::Paused))
                .await?;
            self.expect("room", |e| is_status(e, StatusKind::RoomCaptured))
                .await?;
            self.send(Command::Resume)?;
            self.expect("resume", |e| matches!(e, ScanEvent::Resumed))
                .await?;
        }

        self.send(Command::Finish)?;
        self.expect("preview", |e| matches!(e, ScanEvent::Preview { .. }))
            .await?;
        if !script.export_on_finish {
            self.send(Command::Export)?;
        }
        match self
            .expect("export", |e| matches!(e, ScanEvent::Exported(_)))
            .await?
        {
            ScanEvent::Exported(result) => Ok(result),
            other => Err(anyhow!("unexpected event {other:?}")),
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        if !self.handle.send(command.clone()) {
            bail!("session stopped before {command:?}");
        }
        Ok(())
    }

    /// Echo events until one matches. Errors end the script.
    async fn expect(&mut self, step: &str, pred: impl Fn(&ScanEvent) -> bool) -> Result<ScanEvent> {
        loop {
            let event = tokio::time::timeout(STEP_TIMEOUT, self.events.recv())
                .await
                .map_err(|_| anyhow!("timed out waiting for {step}"))?
                .ok_or_else(|| anyhow!("event stream closed waiting for {step}"))?;

            if let ScanEvent::AudioData { .. } = event {
                self.audio_chunks += 1;
                continue;
            }
            println!("{}", serde_json::to_string(&event)?);
            if pred(&event) {
                return Ok(event);
            }
            if let ScanEvent::Status {
                kind: StatusKind::Error,
                message,
            } = &event
            {
                bail!(
                    "{step} failed: {}",
                    message.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
}

fn is_status(event: &ScanEvent, kind: StatusKind) -> bool {
    matches!(event, ScanEvent::Status { kind: k, .. } if *k == kind)
}
