// Copyright (c) 2024-2025 AppleSword Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User commands: adds, batch control and removal suppression.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use applesword::error::{CommandError, TransportError};
use applesword::rpc::methods;
use applesword::store::{AddOptions, TorrentSource};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::{gids, store_for, task, torrent_bytes, MockEngine};
use serde_json::json;

fn visible(store: &applesword::TaskStore) -> Vec<String> {
    store.snapshot().tasks.iter().map(|t| t.gid.clone()).collect()
}

fn selection(indices: &[&str]) -> BTreeSet<String> {
    indices.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Batch control
// =============================================================================

#[tokio::test]
async fn test_batch_pause_reports_each_gid() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("g1", "active"), task("g3", "active")]);
    let store = store_for(&mock);

    let outcome = store.pause(&gids(&["g1", "g2", "g3"])).await;

    assert_eq!(outcome.len(), 3);
    assert!(outcome.get("g1").unwrap().is_ok());
    assert!(outcome.get("g3").unwrap().is_ok());
    let err = outcome.get("g2").unwrap().as_ref().unwrap_err();
    assert!(err.is_rejection());
    assert!(!outcome.is_success());
    assert_eq!(outcome.succeeded(), vec!["g1", "g3"]);

    // All three were attempted.
    assert_eq!(mock.calls_to(methods::PAUSE).len(), 3);
}

#[tokio::test]
async fn test_stop_and_resume_methods() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    mock.set_waiting(vec![task("b", "paused")]);
    let store = store_for(&mock);

    assert!(store.stop(&gids(&["a"])).await.is_success());
    assert!(store.resume(&gids(&["b"])).await.is_success());

    assert_eq!(mock.calls_to(methods::FORCE_PAUSE), vec![vec![json!("a")]]);
    assert_eq!(mock.calls_to(methods::UNPAUSE), vec![vec![json!("b")]]);
}

#[tokio::test]
async fn test_batch_deduplicates_gids() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    let store = store_for(&mock);

    let outcome = store.pause(&gids(&["a", "a"])).await;
    assert_eq!(outcome.len(), 1);
    assert_eq!(mock.calls_to(methods::PAUSE).len(), 1);
}

#[tokio::test]
async fn test_successful_command_requests_refresh() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    let store = store_for(&mock);

    store.pause(&gids(&["a"])).await;
    let hinted =
        tokio::time::timeout(Duration::from_millis(50), store.refresh_requested()).await;
    assert!(hinted.is_ok());
}

// =============================================================================
// Adding downloads
// =============================================================================

#[tokio::test]
async fn test_add_uri_sends_mirrors_in_one_call() {
    let mock = MockEngine::new();
    let store = store_for(&mock);
    let uris = gids(&[
        "https://mirror-a.example/ubuntu.iso",
        "https://mirror-b.example/ubuntu.iso",
    ]);

    let gid = store.add_uri(&uris, &AddOptions::default()).await.unwrap();
    assert_eq!(gid.len(), 16);

    let calls = mock.calls_to(methods::ADD_URI);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0], json!(uris));
    assert_eq!(calls[0][1], json!({ "dir": "/downloads" }));
}

#[tokio::test]
async fn test_add_uri_rejects_empty_input_locally() {
    let mock = MockEngine::new();
    let store = store_for(&mock);

    let err = store
        .add_uri(&gids(&["", "  "]), &AddOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::InvalidInput(_)));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_add_uri_transport_failure_is_returned() {
    let mock = MockEngine::new();
    mock.set_offline(true);
    let store = store_for(&mock);

    let err = store
        .add_uri(&gids(&["magnet:?xt=urn:btih:abc"]), &AddOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Transport(TransportError::Connect { .. })));
    assert_eq!(mock.calls_to(methods::ADD_URI).len(), 1);
}

#[tokio::test]
async fn test_add_torrent_with_selection() {
    let mock = MockEngine::new();
    let store = store_for(&mock);
    let payload = torrent_bytes("pack", &[("a.bin", 100), ("b.bin", 200)]);

    store
        .add_torrent(
            TorrentSource::Bytes(payload.clone()),
            Some(&selection(&["2"])),
            &AddOptions::with_dir("/media"),
        )
        .await
        .unwrap();

    let calls = mock.calls_to(methods::ADD_TORRENT);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0], json!(STANDARD.encode(&payload)));
    assert_eq!(calls[0][1], json!([]));
    assert_eq!(calls[0][2], json!({ "dir": "/media", "select-file": "2" }));
}

#[tokio::test]
async fn test_add_torrent_without_selection_downloads_all() {
    let mock = MockEngine::new();
    let store = store_for(&mock);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pack.torrent");
    std::fs::write(&path, torrent_bytes("pack", &[("a.bin", 100), ("b.bin", 200)])).unwrap();

    store
        .add_torrent(TorrentSource::Path(path), None, &AddOptions::default())
        .await
        .unwrap();

    let calls = mock.calls_to(methods::ADD_TORRENT);
    assert!(calls[0][2].get("select-file").is_none());
}

#[tokio::test]
async fn test_add_torrent_rejects_bad_selection_locally() {
    let mock = MockEngine::new();
    let store = store_for(&mock);
    let payload = torrent_bytes("pack", &[("a.bin", 100), ("b.bin", 200)]);

    let empty = store
        .add_torrent(
            TorrentSource::Bytes(payload.clone()),
            Some(&BTreeSet::new()),
            &AddOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(empty, CommandError::InvalidInput(_)));

    let unknown = store
        .add_torrent(
            TorrentSource::Bytes(payload),
            Some(&selection(&["3"])),
            &AddOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(unknown, CommandError::InvalidInput(_)));

    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_add_torrent_rejects_malformed_and_missing() {
    let mock = MockEngine::new();
    let store = store_for(&mock);

    let malformed = store
        .add_torrent(
            TorrentSource::Bytes(b"d4:infoi1ee".to_vec()),
            None,
            &AddOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(malformed, CommandError::MalformedTorrent(_)));

    let missing = store
        .add_torrent(
            TorrentSource::Path("/nonexistent/file.torrent".into()),
            None,
            &AddOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(missing, CommandError::Io { .. }));

    assert!(mock.calls().is_empty());
}

// =============================================================================
// Removal
// =============================================================================

#[tokio::test]
async fn test_remove_hides_before_engine_answers() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active"), task("b", "active")]);
    let store = store_for(&mock);
    store.refresh().await.unwrap();

    let hold = mock.hold_next(methods::REMOVE);
    let to_remove = gids(&["a"]);
    let remove = store.remove(&to_remove);
    let check = async {
        hold.arrived.notified().await;
        assert_eq!(visible(&store), gids(&["b"]));
        hold.release.notify_one();
    };

    let (outcome, ()) = tokio::join!(remove, check);
    assert!(outcome.is_success());
    assert_eq!(visible(&store), gids(&["b"]));
}

#[tokio::test(start_paused = true)]
async fn test_removed_task_reappears_after_ttl() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    let store = store_for(&mock);
    store.refresh().await.unwrap();

    store.remove(&gids(&["a"])).await;
    assert!(visible(&store).is_empty());

    tokio::time::advance(Duration::from_secs(9)).await;
    store.refresh().await.unwrap();
    assert!(visible(&store).is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    store.refresh().await.unwrap();
    assert_eq!(visible(&store), gids(&["a"]));
}

#[tokio::test]
async fn test_engine_dropping_gid_clears_suppression() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    let store = store_for(&mock);
    store.refresh().await.unwrap();
    store.remove(&gids(&["a"])).await;

    mock.set_active(vec![]);
    store.refresh().await.unwrap();
    assert!(visible(&store).is_empty());

    // A new task reusing the gid is shown straight away.
    mock.set_active(vec![task("a", "active")]);
    store.refresh().await.unwrap();
    assert_eq!(visible(&store), gids(&["a"]));
}

#[tokio::test]
async fn test_acknowledged_removal_is_purged_once() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    let store = store_for(&mock);
    store.refresh().await.unwrap();
    store.remove(&gids(&["a"])).await;

    mock.set_active(vec![]);
    mock.set_stopped(vec![task("a", "removed")]);
    store.refresh().await.unwrap();
    store.refresh().await.unwrap();

    assert!(visible(&store).is_empty());
    assert_eq!(
        mock.calls_to(methods::REMOVE_DOWNLOAD_RESULT),
        vec![vec![json!("a")]]
    );
}

#[tokio::test]
async fn test_rejected_removal_shows_task_again() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active"), task("b", "active")]);
    mock.reject_gid("a");
    let store = store_for(&mock);
    store.refresh().await.unwrap();

    let outcome = store.remove(&gids(&["a", "b"])).await;

    assert!(outcome.get("a").unwrap().as_ref().unwrap_err().is_rejection());
    assert!(outcome.get("b").unwrap().is_ok());
    assert_eq!(visible(&store), gids(&["a"]));
}

#[tokio::test]
async fn test_transport_failure_keeps_task_hidden() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    mock.fail_method(methods::REMOVE);
    let store = store_for(&mock);
    store.refresh().await.unwrap();

    let outcome = store.remove(&gids(&["a"])).await;

    assert!(matches!(
        outcome.get("a"),
        Some(Err(CommandError::Transport(TransportError::Timeout { .. })))
    ));
    store.refresh().await.unwrap();
    assert!(visible(&store).is_empty());
}

#[tokio::test]
async fn test_remove_finished_task_purges_result() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    mock.set_stopped(vec![task("done", "complete")]);
    let store = store_for(&mock);
    store.refresh().await.unwrap();

    let outcome = store.remove(&gids(&["a", "done"])).await;
    assert!(outcome.is_success());

    assert_eq!(mock.calls_to(methods::REMOVE), vec![vec![json!("a")]]);
    assert_eq!(
        mock.calls_to(methods::REMOVE_DOWNLOAD_RESULT),
        vec![vec![json!("done")]]
    );
}

#[tokio::test]
async fn test_remove_task_finished_since_last_refresh() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    let store = store_for(&mock);
    store.refresh().await.unwrap();

    // The download completes before the user's remove reaches the engine.
    mock.set_active(vec![]);
    mock.set_stopped(vec![task("a", "complete")]);
    let outcome = store.remove(&gids(&["a"])).await;

    assert!(outcome.is_success());
    assert_eq!(mock.calls_to(methods::REMOVE), vec![vec![json!("a")]]);
    assert_eq!(
        mock.calls_to(methods::REMOVE_DOWNLOAD_RESULT),
        vec![vec![json!("a")]]
    );
    assert!(visible(&store).is_empty());
}

#[tokio::test]
async fn test_failed_purge_is_retried() {
    let mock = MockEngine::new();
    mock.set_active(vec![task("a", "active")]);
    let store = store_for(&mock);
    store.refresh().await.unwrap();
    store.remove(&gids(&["a"])).await;

    mock.set_active(vec![]);
    mock.set_stopped(vec![task("a", "removed")]);
    mock.fail_method(methods::REMOVE_DOWNLOAD_RESULT);
    store.refresh().await.unwrap();
    assert_eq!(mock.calls_to(methods::REMOVE_DOWNLOAD_RESULT).len(), 1);

    mock.heal_method(methods::REMOVE_DOWNLOAD_RESULT);
    store.refresh().await.unwrap();
    store.refresh().await.unwrap();

    assert_eq!(mock.calls_to(methods::REMOVE_DOWNLOAD_RESULT).len(), 2);
    assert!(visible(&store).is_empty());
}
