//! End-to-end walkthroughs of a scan session against mock engines.

mod common;

use common::*;
use roomscan_events::{RelocalizationPhase, ScanEvent, StatusKind};
use roomscan_session::{Command, SessionState, TrackingState, TriggerChannel};

fn exported(event: ScanEvent) -> roomscan_events::ExportResult {
    match event {
        ScanEvent::Exported(result) => result,
        other => panic!("expected an export, got {other:?}"),
    }
}

#[tokio::test]
async fn test_finish_previews_then_exports() {
    let mut h = Harness::with_config(|c| c.export_on_finish = true);
    h.start().await;

    h.capture.stage_room(b"kitchen");
    h.send(Command::Finish);

    let preview = h.wait_for("preview", is_preview).await;
    assert_eq!(preview, ScanEvent::Preview { room_count: 1 });
    let result = exported(h.wait_for("export", is_exported).await);

    assert_eq!(result.room_count, 1);
    let scan_url = result.scan_url.expect("scan url");
    let json_url = result.json_url.expect("json url");
    assert!(scan_url.ends_with("apartment.usdz"));
    assert!(json_url.ends_with("apartment.json"));
    assert!(scan_url.exists());
    assert!(json_url.exists());
    assert!(result.photo_urls.is_empty());
    assert!(h.share.presented.lock().unwrap().is_empty());

    let snapshot = h.snapshot().await;
    assert_eq!(
        snapshot.state,
        SessionState::Terminal(roomscan_session::Outcome::Ok)
    );
    assert_eq!(h.capture.stops.lock().unwrap().as_slice(), &[true]);
}

#[tokio::test]
async fn test_early_export_fires_once_after_first_room() {
    let mut h = Harness::with_config(|c| c.export_on_finish = true);
    h.start().await;

    h.send(Command::Export);
    let snapshot = h.snapshot().await;
    assert!(snapshot.pending_export);
    assert_eq!(snapshot.state, SessionState::Running);
    h.settle().await;
    assert_eq!(h.count(is_error), 0);
    assert_eq!(h.count(is_exported), 0);

    h.capture.stage_room(b"hall");
    h.send(Command::Finish);
    h.wait_for("preview", is_preview).await;
    h.wait_for("export", is_exported).await;

    h.settle().await;
    assert_eq!(h.count(is_exported), 1);
    assert_eq!(h.count(is_error), 0);
    assert!(!h.snapshot().await.pending_export);
}

#[tokio::test]
async fn test_pause_resume_add_room_merges_both_rooms() {
    let mut h = Harness::with_config(|c| c.export_on_finish = true);
    h.start().await;

    h.capture.stage_room(b"bedroom");
    h.send(Command::Finish);
    h.wait_for("first export", is_exported).await;

    h.send(Command::Pause);
    h.wait_for("paused", is_paused).await;
    h.send(Command::Resume);

    let relocalizing = h
        .wait_for(
            "relocalizing",
            is_relocalization(RelocalizationPhase::Relocalizing),
        )
        .await;
    match relocalizing {
        ScanEvent::RelocalizationStatus { anchor_count, .. } => {
            assert_eq!(anchor_count, Some(h.tracking.anchors))
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(h.tracking.runs.lock().unwrap().as_slice(), &[Some(12)]);

    h.tracking.report(TrackingState::Limited);
    h.tracking.report(TrackingState::Normal);
    h.wait_for("relocated", is_relocalization(RelocalizationPhase::Relocated))
        .await;
    h.wait_for("resumed", is_resumed).await;
    assert_eq!(h.snapshot().await.state, SessionState::Running);

    h.capture.stage_room(b"study");
    h.send(Command::AddRoom);
    h.wait_for("second room", is_status(StatusKind::RoomCaptured))
        .await;
    assert_eq!(h.snapshot().await.room_count, 2);

    h.send(Command::Finish);
    let preview = h.wait_for("second preview", is_preview).await;
    assert_eq!(preview, ScanEvent::Preview { room_count: 2 });
    let result = exported(h.wait_for("second export", is_exported).await);
    assert_eq!(result.room_count, 2);

    let json = std::fs::read_to_string(result.json_url.unwrap()).unwrap();
    let merged: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(merged["rooms"], serde_json::json!(["bedroom", "study"]));

    // Continuation segments skip coaching.
    let runs = h.capture.runs.lock().unwrap();
    assert!(runs[0].coaching_enabled);
    assert!(runs.iter().skip(1).all(|r| r.continuation));
}

#[tokio::test]
async fn test_three_photo_triggers_yield_three_photos() {
    let mut h = Harness::with_config(|c| c.export_on_finish = true);
    h.start().await;

    h.capture.stage_room(b"garage");
    for token in 1..=3 {
        assert!(h.handle.trigger(TriggerChannel::CapturePhoto, Some(token)));
    }
    // Finish right away; the export must still carry every photo.
    h.send(Command::Finish);

    let result = exported(h.wait_for("export", is_exported).await);
    let urls: Vec<_> = h
        .seen
        .iter()
        .filter_map(|event| match event {
            ScanEvent::Photo { url, .. } => Some(url.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(urls.len(), 3);
    assert!(urls.iter().all(|u| u.exists()));
    assert_eq!(result.photo_urls.len(), 3);
    for url in &urls {
        assert!(result.photo_urls.contains(url));
    }
    assert_eq!(h.snapshot().await.photo_count, 3);
}
