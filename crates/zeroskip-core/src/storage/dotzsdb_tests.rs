use tempfile::tempdir;
use uuid::Uuid;

use super::dotzsdb::DotZsdb;

#[test]
fn create_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let uuid = Uuid::new_v4();
    let created = DotZsdb::create(dir.path(), uuid).unwrap();

    let (read_back, _ino) = DotZsdb::read(dir.path()).unwrap();
    assert_eq!(read_back, created);
    assert_eq!(read_back.uuid, uuid);
    assert_eq!(read_back.curidx, 0);
}

#[test]
fn on_disk_size_is_48_bytes() {
    let dir = tempdir().unwrap();
    DotZsdb::create(dir.path(), Uuid::new_v4()).unwrap();
    let meta = std::fs::metadata(dir.path().join(".zsdb")).unwrap();
    assert_eq!(meta.len(), super::dotzsdb::SIZE);
}

#[test]
fn update_index_and_offset_persists() {
    let dir = tempdir().unwrap();
    let mut meta = DotZsdb::create(dir.path(), Uuid::new_v4()).unwrap();

    meta.update_index_and_offset(dir.path(), 3, 4096).unwrap();
    let (read_back, _ino) = DotZsdb::read(dir.path()).unwrap();
    assert_eq!(read_back.curidx, 3);
    assert_eq!(read_back.next_offset, 4096);
}

#[test]
fn begin_and_end_update_bump_the_inode() {
    let dir = tempdir().unwrap();
    let meta = DotZsdb::create(dir.path(), Uuid::new_v4()).unwrap();
    let ino_before = DotZsdb::inode(dir.path()).unwrap();

    meta.begin_update(dir.path()).unwrap();
    let ino_after_begin = DotZsdb::inode(dir.path()).unwrap();
    assert_ne!(ino_before, ino_after_begin);

    meta.end_update(dir.path()).unwrap();
    let ino_after_end = DotZsdb::inode(dir.path()).unwrap();
    assert_ne!(ino_after_begin, ino_after_end);

    let (read_back, _ino) = DotZsdb::read(dir.path()).unwrap();
    assert_eq!(read_back, meta);
}

#[test]
fn read_rejects_a_bad_signature() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join(".zsdb"), [0u8; 48]).unwrap();
    assert!(DotZsdb::read(dir.path()).is_err());
}

#[test]
fn read_rejects_a_truncated_file() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join(".zsdb"), [0u8; 10]).unwrap();
    assert!(DotZsdb::read(dir.path()).is_err());
}
