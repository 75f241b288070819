//! Marker-file locking between independent lock managers

#[allow(dead_code)]
mod common;

use common::quick_locks;
use primenet_manager::{Error, lock::marker_path};
use std::path::Path;
use tempfile::TempDir;

#[tokio::test]
async fn test_two_processes_one_winner() {
    let temp_dir = TempDir::new().expect("temp dir");
    let resource = temp_dir.path().join("worktodo.txt");

    // separate managers stand in for separate processes
    let (a, b) = (quick_locks(), quick_locks());
    let paths = [resource.as_path()];
    let (first, second) = tokio::join!(a.acquire(&paths), b.acquire(&paths));

    let (winner, loser) = match (first, second) {
        (Ok(guard), Err(e)) | (Err(e), Ok(guard)) => (guard, e),
        (Ok(_), Ok(_)) => panic!("both acquired the same lock"),
        (Err(a), Err(b)) => panic!("neither acquired the lock: {a}; {b}"),
    };
    assert!(matches!(loser, Error::Lock { attempts: 2, .. }));

    winner.release().await;
    assert!(!marker_path(&resource).exists());

    let again = quick_locks()
        .acquire(&[resource.as_path()])
        .await
        .expect("free after release");
    again.release().await;
}

#[tokio::test]
async fn test_overlapping_sets_do_not_leave_markers() {
    let temp_dir = TempDir::new().expect("temp dir");
    let todo = temp_dir.path().join("worktodo.txt");
    let results = temp_dir.path().join("results.txt");
    let sent = temp_dir.path().join("results_sent.txt");

    let held = quick_locks()
        .acquire(&[todo.as_path()])
        .await
        .expect("queue lock");

    let err = quick_locks()
        .acquire(&[results.as_path(), sent.as_path(), todo.as_path()])
        .await
        .expect_err("queue is held");
    assert!(matches!(err, Error::Lock { ref path, .. } if path == &marker_path(&todo)));

    for path in [&results, &sent] {
        assert!(!marker_path(path).exists(), "{} left locked", path.display());
    }
    held.release().await;
}

#[test]
fn test_marker_is_resource_path_with_suffix() {
    assert_eq!(
        marker_path(Path::new("/work/dev0/results.txt")),
        Path::new("/work/dev0/results.txt.lck")
    );
}
