use std::time::Duration;

use tempfile::tempdir;
use zeroskip_core::{DbEngine, OpenMode, ZeroskipConfig};

#[test]
fn exceeding_the_threshold_rotates_exactly_once() {
    let dir = tempdir().unwrap();
    let config = ZeroskipConfig::builder().rotation_threshold(1024).build();
    let mut db = DbEngine::open_with_config(dir.path(), OpenMode::Create, config).unwrap();
    db.write_lock_acquire(Duration::from_millis(500)).unwrap();

    let txn = db.transaction_begin().unwrap();
    db.add(b"pre-rotation-key", b"pre-rotation-value", &txn).unwrap();
    db.commit(&txn).unwrap();

    // A single record bigger than the threshold pushes the active file
    // over the line in one shot; `maybe_rotate` only checks size on the
    // *next* add, so a second small write is needed to trip it. That
    // keeps the crossing deterministic instead of depending on how many
    // filler iterations it takes to add up past 1024 bytes.
    let oversized_value = vec![b'x'; 2048];
    db.add(b"oversized-filler", &oversized_value, &txn).unwrap();
    db.commit(&txn).unwrap();

    db.add(b"post-rotation-key", b"post-rotation-value", &txn).unwrap();
    db.commit(&txn).unwrap();

    assert_eq!(
        db.fetch(b"pre-rotation-key").unwrap().as_deref(),
        Some(b"pre-rotation-value".as_ref())
    );
    assert_eq!(
        db.fetch(b"oversized-filler").unwrap().as_deref(),
        Some(oversized_value.as_slice())
    );
    assert_eq!(
        db.fetch(b"post-rotation-key").unwrap().as_deref(),
        Some(b"post-rotation-value".as_ref())
    );

    let info = db.info();
    assert_eq!(info.finalised_files.len(), 1, "exactly one file should have been rotated out");

    let finalised_name = &info.finalised_files[0].0;
    assert!(
        finalised_name.ends_with("-0-0") || finalised_name.matches('-').count() >= 3,
        "finalised file {finalised_name} should carry a `-<idx>` suffix"
    );
    assert_ne!(info.active_file, *finalised_name);
}
