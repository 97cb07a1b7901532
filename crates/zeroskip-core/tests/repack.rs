use std::time::Duration;

use tempfile::tempdir;
use zeroskip_core::{DbEngine, OpenMode, ZeroskipConfig};

#[test]
fn repack_merges_finalised_files_and_keeps_every_key_fetchable() {
    let dir = tempdir().unwrap();
    let config = ZeroskipConfig::builder().rotation_threshold(512).build();
    let mut db = DbEngine::open_with_config(dir.path(), OpenMode::Create, config).unwrap();
    db.write_lock_acquire(Duration::from_millis(500)).unwrap();

    let txn = db.transaction_begin().unwrap();
    let filler_value = vec![b'x'; 600];
    for i in 0..6u32 {
        db.add(format!("key-{i:02}").as_bytes(), &filler_value, &txn).unwrap();
        db.commit(&txn).unwrap();
    }

    let info_before = db.info();
    assert!(
        !info_before.finalised_files.is_empty(),
        "the filler loop should have rotated out at least one finalised file"
    );
    assert!(info_before.packed_files.is_empty());

    db.pack_lock_acquire(Duration::from_millis(500)).unwrap();
    db.repack().unwrap();
    db.pack_lock_release().unwrap();

    let info_after = db.info();
    assert!(info_after.finalised_files.is_empty(), "repack should consume every finalised file");
    assert_eq!(info_after.packed_files.len(), 1, "repack should produce exactly one packed file");

    for path in &info_before.finalised_files {
        assert!(!dir.path().join(&path.0).exists(), "consumed finalised file should be unlinked");
    }

    for i in 0..6u32 {
        assert_eq!(
            db.fetch(format!("key-{i:02}").as_bytes()).unwrap().as_deref(),
            Some(filler_value.as_slice()),
            "key-{i:02} should still be fetchable after repack"
        );
    }
}

#[test]
fn repack_without_finalised_files_is_a_harmless_no_op() {
    let dir = tempdir().unwrap();
    let mut db = DbEngine::open(dir.path(), OpenMode::Create).unwrap();
    db.write_lock_acquire(Duration::from_millis(500)).unwrap();
    let txn = db.transaction_begin().unwrap();
    db.add(b"only-key", b"only-value", &txn).unwrap();
    db.commit(&txn).unwrap();

    db.pack_lock_acquire(Duration::from_millis(500)).unwrap();
    db.repack().unwrap();
    db.pack_lock_release().unwrap();

    let info = db.info();
    assert!(info.finalised_files.is_empty());
    assert!(info.packed_files.is_empty());
    assert_eq!(db.fetch(b"only-key").unwrap().as_deref(), Some(b"only-value".as_ref()));
}

#[test]
fn repack_requires_the_pack_lock() {
    let dir = tempdir().unwrap();
    let config = ZeroskipConfig::builder().rotation_threshold(512).build();
    let mut db = DbEngine::open_with_config(dir.path(), OpenMode::Create, config).unwrap();
    db.write_lock_acquire(Duration::from_millis(500)).unwrap();

    let txn = db.transaction_begin().unwrap();
    let filler_value = vec![b'x'; 600];
    db.add(b"a", &filler_value, &txn).unwrap();
    db.commit(&txn).unwrap();
    db.add(b"b", &filler_value, &txn).unwrap();
    db.commit(&txn).unwrap();

    assert!(db.repack().is_err());
}
