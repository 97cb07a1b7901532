use tempfile::tempdir;

use super::mmap::{MappedFile, OpenFlags};

#[test]
fn fresh_file_is_unmapped_until_first_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    let file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
    assert_eq!(file.len(), 0);
    assert!(file.is_empty());
}

#[test]
fn write_grows_and_read_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();

    file.write(b"hello world").unwrap();
    assert_eq!(file.len(), 11);

    file.seek(0).unwrap();
    let mut buf = [0u8; 11];
    let n = file.read(&mut buf).unwrap();
    assert_eq!(n, 11);
    assert_eq!(&buf, b"hello world");
}

#[test]
fn write_iov_coalesces_into_one_append() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();

    file.write_iov(&[b"abc", b"def"]).unwrap();
    assert_eq!(file.len(), 6);
    assert_eq!(file.read_at(0, 6).unwrap(), b"abcdef");
}

#[test]
fn read_at_does_not_move_cursor() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
    file.write(b"0123456789").unwrap();

    file.seek(2).unwrap();
    let slice = file.read_at(5, 3).unwrap().to_vec();
    assert_eq!(slice, b"567");
    assert_eq!(file.offset(), 2);
}

#[test]
fn seek_past_end_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
    file.write(b"abc").unwrap();
    assert!(file.seek(10).is_err());
}

#[test]
fn truncate_shrinks_and_clamps_cursor() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
    file.write(b"0123456789").unwrap();

    file.truncate(4).unwrap();
    assert_eq!(file.len(), 4);
    assert_eq!(file.offset(), 4);
    assert_eq!(file.read_at(0, 4).unwrap(), b"0123");
}

#[test]
fn truncate_to_zero_clears_mapping() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
    file.write(b"data").unwrap();

    file.truncate(0).unwrap();
    assert_eq!(file.len(), 0);
    assert!(file.is_empty());
}

#[test]
fn readonly_file_rejects_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    {
        let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
        file.write(b"seed").unwrap();
    }

    let mut file = MappedFile::open(&path, OpenFlags::RDONLY).unwrap();
    assert!(file.write(b"x").is_err());
}

#[test]
fn crc_begin_end_covers_only_tracked_range() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();

    file.write(b"untracked").unwrap();
    file.crc_begin();
    file.write(b"tracked bytes").unwrap();
    let tracked_len = file.crc_data_len();
    let crc = file.crc_end().unwrap();

    assert_eq!(tracked_len, "tracked bytes".len() as u64);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(b"tracked bytes");
    assert_eq!(crc, hasher.finalize());
}

#[test]
fn crc_end_without_begin_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
    file.write(b"x").unwrap();
    assert!(file.crc_end().is_err());
}
