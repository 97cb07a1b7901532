use std::time::Duration;

use tempfile::tempdir;
use zeroskip_core::{DbEngine, OpenMode};

/// The 14-record canonical test vector (spec §8 scenario 2).
const RECORDS: &[(&str, &str)] = &[
    ("123", "one"),
    ("foo", "two"),
    ("abc", "three"),
    ("abc.name", "four"),
    ("1233", "five"),
    ("abc.place", "six"),
    ("1232", "seven"),
    ("abc.animal", "eight"),
    ("Apple", "nine"),
    ("abc.thing", "ten"),
    ("12311", "eleven"),
    ("blackberry", "twelve"),
    ("1231", "thirteen"),
    ("nokia", "fourteen"),
];

#[test]
fn fourteen_records_then_delete_foreach_counts_thirteen() {
    let dir = tempdir().unwrap();
    let mut db = DbEngine::open(dir.path(), OpenMode::Create).unwrap();
    db.write_lock_acquire(Duration::from_millis(500)).unwrap();
    let txn = db.transaction_begin().unwrap();

    for (key, value) in RECORDS {
        db.add(key.as_bytes(), value.as_bytes(), &txn).unwrap();
    }
    db.commit(&txn).unwrap();

    db.remove(b"foo", &txn).unwrap();
    db.commit(&txn).unwrap();

    let mut live_count = 0usize;
    let mut visitor = |_key: &[u8], _value: &[u8]| live_count += 1;
    db.foreach(b"", &mut visitor).unwrap();

    assert_eq!(live_count, 13);
    assert_eq!(db.fetch(b"foo").unwrap(), None);
    assert_eq!(db.fetch(b"nokia").unwrap().as_deref(), Some(b"fourteen".as_ref()));
}

#[test]
fn foreach_visits_in_ascending_lex_order() {
    let dir = tempdir().unwrap();
    let mut db = DbEngine::open(dir.path(), OpenMode::Create).unwrap();
    db.write_lock_acquire(Duration::from_millis(500)).unwrap();
    let txn = db.transaction_begin().unwrap();
    for (key, value) in RECORDS {
        db.add(key.as_bytes(), value.as_bytes(), &txn).unwrap();
    }
    db.commit(&txn).unwrap();

    let mut seen = Vec::new();
    let mut visitor = |key: &[u8], _value: &[u8]| seen.push(key.to_vec());
    db.foreach(b"", &mut visitor).unwrap();

    let mut expected: Vec<Vec<u8>> = RECORDS.iter().map(|(k, _)| k.as_bytes().to_vec()).collect();
    expected.sort();
    assert_eq!(seen, expected);
}
