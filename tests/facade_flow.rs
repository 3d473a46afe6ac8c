//! End-to-end flows through the request façade.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use offline_sync::analytics::AnalyticsEvent;
use offline_sync::config::ConnectionKind;
use offline_sync::download::PoolEvent;
use offline_sync::error::Error;
use offline_sync::store::{DownloadStore, DownloadedState};
use offline_sync::sync::{CancelTarget, DialogItem, PolicyDecision, RemovalTarget};

#[tokio::test]
async fn test_small_request_proceeds_silently() {
    let h = Harness::new();
    let mut events = h.engine.events();

    let decision = h
        .engine
        .request_download(COURSE, &ids(&["seq-1"]), false)
        .await
        .unwrap();

    assert_eq!(decision.decision, PolicyDecision::ProceedSilently);
    assert!(!decision.is_pending());
    let task = decision.task.unwrap();
    assert_eq!(task.accepted, ids(&["video-a", "html-b"]));

    let finished = wait_terminal(&mut events, &["video-a", "html-b"]).await;
    assert!(finished
        .values()
        .all(|e| matches!(e, PoolEvent::Completed { .. })));

    let record = h.store.get("video-a").await.unwrap().unwrap();
    assert_eq!(record.state, DownloadedState::Downloaded);
    assert!(record.local_path.exists());
    assert!(record.last_modified.is_some());

    eventually(|| {
        let snapshot = h.engine.snapshot();
        ["video-a", "html-b"]
            .iter()
            .all(|id| snapshot.block_state(id) == DownloadedState::Downloaded)
    })
    .await;
    // 15 of 36 MiB is below the size-match threshold.
    assert_eq!(
        h.engine.snapshot().course_state(COURSE),
        DownloadedState::NotDownloaded
    );
    assert_eq!(h.analytics.count(AnalyticsEvent::DownloadConfirmed), 1);
}

#[tokio::test]
async fn test_cancel_then_request_again_downloads_cleanly() {
    let h = Harness::new();
    let mut events = h.engine.events();
    h.transfer.hold("video-a");

    h.engine
        .request_download(COURSE, &ids(&["video-a"]), false)
        .await
        .unwrap();
    wait_started(&mut events, "video-a").await;

    let cancelled = h
        .engine
        .cancel_download(CancelTarget::Blocks(ids(&["video-a"])))
        .await
        .unwrap();
    assert_eq!(cancelled, ids(&["video-a"]));
    assert!(h.store.get("video-a").await.unwrap().is_none());

    let finished = wait_terminal(&mut events, &["video-a"]).await;
    assert!(matches!(finished["video-a"], PoolEvent::Cancelled { .. }));

    h.transfer.release("video-a");
    let decision = h
        .engine
        .request_download(COURSE, &ids(&["video-a"]), false)
        .await
        .unwrap();
    assert_eq!(decision.task.unwrap().accepted, ids(&["video-a"]));

    let finished = wait_terminal(&mut events, &["video-a"]).await;
    assert!(matches!(finished["video-a"], PoolEvent::Completed { .. }));

    let record = h.store.get("video-a").await.unwrap().unwrap();
    assert_eq!(record.state, DownloadedState::Downloaded);

    let files = files_under(&h.download_dir());
    assert_eq!(files, vec![record.local_path.clone()]);
    assert_eq!(h.transfer.attempts(), ids(&["video-a", "video-a"]));
}

#[tokio::test]
async fn test_failed_block_does_not_abort_siblings() {
    let h = Harness::new();
    let mut events = h.engine.events();

    h.engine
        .request_download(COURSE, &ids(&["seq-2"]), false)
        .await
        .unwrap();

    let finished = wait_terminal(&mut events, &["video-c", "video-d"]).await;
    assert!(matches!(finished["video-c"], PoolEvent::Failed { .. }));
    assert!(matches!(finished["video-d"], PoolEvent::Completed { .. }));

    let failed = h.store.get("video-c").await.unwrap().unwrap();
    assert_eq!(failed.state, DownloadedState::NotDownloaded);
    assert!(!failed.local_path.exists());

    eventually(|| h.analytics.count(AnalyticsEvent::DownloadError) == 1).await;
    eventually(|| h.analytics.count(AnalyticsEvent::DownloadCompleted) == 1).await;

    let retry = h
        .engine
        .request_retry(COURSE, &ids(&["seq-2"]))
        .await
        .unwrap();
    match &retry.decision {
        PolicyDecision::BlockFailedRetry(payload) => {
            assert_eq!(payload.total_bytes, 20 * MIB);
        }
        other => panic!("expected a retry offer, got {:?}", other),
    }
    assert!(retry.is_pending());
    h.engine.dismiss(retry.handle).unwrap();
}

#[tokio::test]
async fn test_course_rolls_up_to_downloading_and_cancels() {
    let h = Harness::new();
    let mut events = h.engine.events();
    let mut states = h.engine.subscribe();
    h.transfer.hold("video-a");

    let decision = h.engine.request_course_download(COURSE).await.unwrap();
    assert_eq!(decision.decision, PolicyDecision::ProceedSilently);
    assert_eq!(decision.task.unwrap().accepted.len(), 4);

    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| s.course_state(COURSE) == DownloadedState::Downloading),
    )
    .await
    .unwrap()
    .unwrap();

    wait_terminal(&mut events, &["html-b", "video-c", "video-d"]).await;

    let cancelled = h
        .engine
        .cancel_download(CancelTarget::Course(COURSE.to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled, ids(&["video-a"]));
    wait_terminal(&mut events, &["video-a"]).await;

    assert!(h.store.get("video-a").await.unwrap().is_none());
    assert_eq!(
        h.store.get("html-b").await.unwrap().unwrap().state,
        DownloadedState::Downloaded
    );

    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| s.course_state(COURSE) == DownloadedState::NotDownloaded),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_loading_state_holds_until_blocks_are_queued() {
    // One worker keeps the held block first and the rest WAITING.
    let h = Harness::with_config(|config| config.workers.parallelism = 1);
    let gate = h.source.gate_fetches();
    h.transfer.hold("video-a");

    let mut states = h.engine.subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let collector = {
        let seen = Arc::clone(&seen);
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().course_state(COURSE);
                seen.lock().unwrap().push(state);
                if state == DownloadedState::Downloading {
                    break;
                }
            }
        })
    };

    let engine = Arc::clone(&h.engine);
    let request = tokio::spawn(async move { engine.request_course_download(COURSE).await });

    eventually(|| {
        seen.lock()
            .unwrap()
            .contains(&DownloadedState::LoadingCourseStructure)
    })
    .await;

    gate.notify_one();
    let decision = request.await.unwrap().unwrap();
    assert!(decision.task.is_some());

    tokio::time::timeout(Duration::from_secs(5), collector)
        .await
        .unwrap()
        .unwrap();

    let seen = seen.lock().unwrap().clone();
    let loading_at = seen
        .iter()
        .position(|s| *s == DownloadedState::LoadingCourseStructure)
        .unwrap();
    assert!(
        !seen[loading_at..].contains(&DownloadedState::NotDownloaded),
        "course fell back to not downloaded while loading: {:?}",
        seen
    );
    assert_eq!(seen.last(), Some(&DownloadedState::Downloading));

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_remove_all_leaves_nothing_behind() {
    let h = Harness::new();
    let mut events = h.engine.events();

    h.engine
        .request_download(COURSE, &ids(&["seq-1"]), false)
        .await
        .unwrap();
    wait_terminal(&mut events, &["video-a", "html-b"]).await;
    assert_eq!(files_under(&h.download_dir()).len(), 2);

    let removed = h.engine.remove_all(COURSE).await.unwrap();
    assert_eq!(removed, 2);

    assert!(h
        .store
        .get_by_course_ids(&[COURSE.to_string()])
        .await
        .unwrap()
        .is_empty());
    assert!(files_under(&h.download_dir()).is_empty());
    assert!(h.engine.snapshot().course(COURSE).is_none());

    let status = h.engine.course_status(COURSE).await.unwrap();
    assert_eq!(status.sizes.downloaded_bytes, 0);
    eventually(|| h.engine.snapshot().course_state(COURSE) == DownloadedState::NotDownloaded)
        .await;
}

#[tokio::test]
async fn test_downloaded_request_offers_removal() {
    let h = Harness::new();
    let mut events = h.engine.events();

    h.engine
        .request_download(COURSE, &ids(&["seq-1"]), false)
        .await
        .unwrap();
    wait_terminal(&mut events, &["video-a", "html-b"]).await;

    let decision = h
        .engine
        .request_download(COURSE, &ids(&["seq-1"]), false)
        .await
        .unwrap();
    assert!(matches!(decision.decision, PolicyDecision::ConfirmRemoval(_)));
    assert!(decision.is_pending());

    // A removal handle cannot be confirmed as a download.
    assert!(matches!(
        h.engine.confirm_download(decision.handle).await,
        Err(Error::UnknownRequest(_))
    ));

    let decision = h
        .engine
        .request_removal(RemovalTarget::Blocks {
            course_id: COURSE.to_string(),
            block_ids: ids(&["vert-1"]),
        })
        .await
        .unwrap();
    let removed = h.engine.confirm_removal(decision.handle).await.unwrap();
    assert_eq!(removed, 2);
    assert!(files_under(&h.download_dir()).is_empty());
    assert_eq!(h.analytics.count(AnalyticsEvent::DownloadRemoved), 1);
}

#[tokio::test]
async fn test_video_only_groups_by_sequential() {
    let h = Harness::new();
    h.network.set(ConnectionKind::Offline);

    let decision = h
        .engine
        .request_download(COURSE, &ids(&["chapter"]), true)
        .await
        .unwrap();

    let payload = decision.decision.payload().unwrap();
    assert_eq!(
        payload.items,
        vec![
            DialogItem::new("Intro", 10 * MIB),
            DialogItem::new("Deep dive", 21 * MIB),
        ]
    );
    assert_eq!(payload.total_bytes, 31 * MIB);
}

#[tokio::test]
async fn test_offline_request_is_parked_until_connected() {
    let h = Harness::new();
    h.network.set(ConnectionKind::Offline);

    let decision = h
        .engine
        .request_download(COURSE, &ids(&["seq-1"]), false)
        .await
        .unwrap();
    assert!(matches!(
        decision.decision,
        PolicyDecision::BlockNoConnection(_)
    ));
    assert!(h.store.get_all().await.unwrap().is_empty());

    assert!(matches!(
        h.engine.confirm_download(decision.handle).await,
        Err(Error::NoConnection)
    ));

    h.network.set(ConnectionKind::Wifi);
    let task = h.engine.confirm_download(decision.handle).await.unwrap();
    assert_eq!(task.accepted, ids(&["video-a", "html-b"]));
}

#[tokio::test]
async fn test_low_storage_blocks_with_free_bytes() {
    let h = Harness::new();
    h.storage.set(20 * MIB);

    let decision = h
        .engine
        .request_download(COURSE, &ids(&["seq-1"]), false)
        .await
        .unwrap();

    match &decision.decision {
        PolicyDecision::BlockStorage(payload) => {
            assert_eq!(payload.total_bytes, 15 * MIB);
            assert_eq!(payload.free_bytes, Some(20 * MIB));
        }
        other => panic!("expected storage block, got {:?}", other),
    }

    assert!(matches!(
        h.engine.confirm_download(decision.handle).await,
        Err(Error::InsufficientStorage { .. })
    ));
}

#[tokio::test]
async fn test_wifi_only_blocks_cellular() {
    let h = Harness::with_config(|config| config.preferences.wifi_only = true);
    h.network.set(ConnectionKind::Cellular);

    let decision = h
        .engine
        .request_download(COURSE, &ids(&["video-d"]), false)
        .await
        .unwrap();
    assert!(matches!(
        decision.decision,
        PolicyDecision::BlockWifiRequired(_)
    ));

    h.engine.set_wifi_only(false);
    let decision = h
        .engine
        .request_download(COURSE, &ids(&["video-d"]), false)
        .await
        .unwrap();
    assert!(matches!(decision.decision, PolicyDecision::WarnCellular(_)));

    let task = h.engine.confirm_download(decision.handle).await.unwrap();
    assert_eq!(task.accepted, ids(&["video-d"]));
}

#[tokio::test]
async fn test_large_course_needs_confirmation() {
    let h = Harness::new();

    let decision = h.engine.request_course_download(BIG_COURSE).await.unwrap();
    match &decision.decision {
        PolicyDecision::Confirm(payload) => {
            assert_eq!(payload.items, vec![DialogItem::new("Big Course", 110 * MIB)]);
        }
        other => panic!("expected confirmation, got {:?}", other),
    }

    h.engine.dismiss(decision.handle).unwrap();
    assert_eq!(h.analytics.count(AnalyticsEvent::DownloadCancelled), 1);
    assert!(matches!(
        h.engine.dismiss(decision.handle),
        Err(Error::UnknownRequest(_))
    ));
    assert!(h.store.get_all().await.unwrap().is_empty());

    // Not on Wi-Fi the cellular warning takes precedence over the size prompt.
    h.network.set(ConnectionKind::Cellular);
    let decision = h.engine.request_course_download(BIG_COURSE).await.unwrap();
    assert!(matches!(decision.decision, PolicyDecision::WarnCellular(_)));

    h.storage.set(150 * MIB);
    let decision = h.engine.request_course_download(BIG_COURSE).await.unwrap();
    match &decision.decision {
        PolicyDecision::BlockStorage(payload) => {
            assert_eq!(payload.free_bytes, Some(150 * MIB));
        }
        other => panic!("expected storage block, got {:?}", other),
    }
    assert_eq!(h.analytics.count(AnalyticsEvent::DownloadCourseClicked), 3);
}

#[tokio::test]
async fn test_unnameable_leaf_does_not_block_course() {
    let h = Harness::new();
    let mut events = h.engine.events();

    let decision = h.engine.request_course_download(ODD_COURSE).await.unwrap();
    assert_eq!(decision.decision, PolicyDecision::ProceedSilently);
    assert_eq!(decision.task.unwrap().accepted, ids(&["good"]));

    let finished = wait_terminal(&mut events, &["good"]).await;
    assert!(matches!(finished["good"], PoolEvent::Completed { .. }));
    assert!(h.store.get("odd..id").await.unwrap().is_none());
    assert_eq!(h.transfer.attempts(), ids(&["good"]));
}

#[tokio::test]
async fn test_unknown_course_is_unavailable() {
    let h = Harness::new();
    let missing = "course-v1:edX+Missing+2024";

    let result = h.engine.request_course_download(missing).await;
    assert!(matches!(result, Err(Error::StructureUnavailable(_))));
    assert_eq!(h.analytics.count(AnalyticsEvent::DownloadError), 1);
    assert_eq!(
        h.engine.snapshot().course_state(missing),
        DownloadedState::NotDownloaded
    );
}

#[tokio::test]
async fn test_structure_lost_before_confirm_returns_to_not_downloaded() {
    let h = Harness::new();

    let decision = h.engine.request_course_download(BIG_COURSE).await.unwrap();
    assert!(matches!(decision.decision, PolicyDecision::Confirm(_)));

    let gate = h.source.gate_fetches();
    h.source.remove(BIG_COURSE);

    let engine = Arc::clone(&h.engine);
    let handle = decision.handle;
    let confirm = tokio::spawn(async move { engine.confirm_download(handle).await });

    eventually(|| {
        h.engine.snapshot().course_state(BIG_COURSE) == DownloadedState::LoadingCourseStructure
    })
    .await;
    gate.notify_one();

    let result = confirm.await.unwrap();
    assert!(matches!(result, Err(Error::StructureUnavailable(_))));
    assert_eq!(
        h.engine.snapshot().course_state(BIG_COURSE),
        DownloadedState::NotDownloaded
    );
    assert_eq!(h.analytics.count(AnalyticsEvent::DownloadError), 1);
    assert!(h.store.get_all().await.unwrap().is_empty());
}

/// Order of a block's states along one download.
fn progress_rank(state: DownloadedState) -> u8 {
    match state {
        DownloadedState::Waiting => 1,
        DownloadedState::Downloading => 2,
        DownloadedState::Downloaded => 3,
        _ => 0,
    }
}

#[tokio::test]
async fn test_block_state_only_moves_forward_or_resets() {
    let h = Harness::new();
    let mut events = h.engine.events();
    h.transfer.hold("video-a");

    let mut states = h.engine.subscribe();
    let seen = Arc::new(Mutex::new(vec![DownloadedState::NotDownloaded]));
    let collector = {
        let seen = Arc::clone(&seen);
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().block_state("video-a");
                let mut seen = seen.lock().unwrap();
                if seen.last() != Some(&state) {
                    seen.push(state);
                }
            }
        })
    };
    let last_seen = |state: DownloadedState| seen.lock().unwrap().last() == Some(&state);

    h.engine
        .request_download(COURSE, &ids(&["video-a"]), false)
        .await
        .unwrap();
    wait_started(&mut events, "video-a").await;
    eventually(|| last_seen(DownloadedState::Downloading)).await;

    h.engine
        .cancel_download(CancelTarget::Blocks(ids(&["video-a"])))
        .await
        .unwrap();
    wait_terminal(&mut events, &["video-a"]).await;
    eventually(|| last_seen(DownloadedState::NotDownloaded)).await;

    h.transfer.release("video-a");
    h.engine
        .request_download(COURSE, &ids(&["video-a"]), false)
        .await
        .unwrap();
    wait_terminal(&mut events, &["video-a"]).await;
    eventually(|| last_seen(DownloadedState::Downloaded)).await;

    collector.abort();
    let seen = seen.lock().unwrap().clone();
    for pair in seen.windows(2) {
        let (before, after) = (progress_rank(pair[0]), progress_rank(pair[1]));
        assert!(
            after > before || after == 0,
            "block went backwards: {:?}",
            seen
        );
    }
    assert!(seen.contains(&DownloadedState::Downloading));
    assert_eq!(
        seen.iter()
            .filter(|s| **s == DownloadedState::NotDownloaded)
            .count(),
        2
    );
}
