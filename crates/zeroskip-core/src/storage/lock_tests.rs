use std::time::Duration;

use tempfile::tempdir;

use super::lock::FileLock;

#[test]
fn acquire_then_release_round_trips() {
    let dir = tempdir().unwrap();
    let mut lock = FileLock::new(dir.path(), "zsdbw");
    assert!(!lock.is_locked());

    lock.acquire(Duration::from_millis(100), 1, 1000).unwrap();
    assert!(lock.is_locked());
    assert!(dir.path().join("zsdbw").exists());

    lock.release().unwrap();
    assert!(!lock.is_locked());
    assert!(!dir.path().join("zsdbw").exists());
}

#[test]
fn acquire_is_idempotent_for_the_same_handle() {
    let dir = tempdir().unwrap();
    let mut lock = FileLock::new(dir.path(), "zsdbw");
    lock.acquire(Duration::from_millis(100), 1, 1000).unwrap();
    lock.acquire(Duration::from_millis(100), 1, 1000).unwrap();
    assert!(lock.is_locked());
}

#[test]
fn release_of_never_held_lock_is_ok() {
    let dir = tempdir().unwrap();
    let mut lock = FileLock::new(dir.path(), "zsdbw");
    lock.release().unwrap();
    lock.release().unwrap();
}

#[test]
fn second_handle_times_out_while_first_holds_the_lock() {
    let dir = tempdir().unwrap();
    let mut first = FileLock::new(dir.path(), "zsdbw");
    first.acquire(Duration::from_millis(100), 1, 1000).unwrap();

    let mut second = FileLock::new(dir.path(), "zsdbw");
    let start = std::time::Instant::now();
    let result = second.acquire(Duration::from_millis(50), 1, 1000);
    assert!(result.is_err());
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(!second.is_locked());
}

#[test]
fn zero_timeout_fails_fast_when_already_held() {
    let dir = tempdir().unwrap();
    let mut first = FileLock::new(dir.path(), "zsdbw");
    first.acquire(Duration::from_millis(100), 1, 1000).unwrap();

    let mut second = FileLock::new(dir.path(), "zsdbw");
    assert!(second.acquire(Duration::ZERO, 1, 1000).is_err());
}

#[test]
fn second_handle_acquires_after_first_releases() {
    let dir = tempdir().unwrap();
    let mut first = FileLock::new(dir.path(), "zsdbw");
    first.acquire(Duration::from_millis(100), 1, 1000).unwrap();
    first.release().unwrap();

    let mut second = FileLock::new(dir.path(), "zsdbw");
    second.acquire(Duration::from_millis(100), 1, 1000).unwrap();
    assert!(second.is_locked());
}

#[test]
fn drop_releases_a_held_lock() {
    let dir = tempdir().unwrap();
    {
        let mut lock = FileLock::new(dir.path(), "zsdbw");
        lock.acquire(Duration::from_millis(100), 1, 1000).unwrap();
    }
    assert!(!dir.path().join("zsdbw").exists());
}
