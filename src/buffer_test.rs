use super::*;
use crate::revision::Action;
use crate::value::{PrimaryKey, Text, Value};
use tempfile::tempdir;

fn rev(record: u64, version: u64) -> PrimaryRevision {
    PrimaryRevision::new(
        PrimaryKey(record),
        Text::from("name"),
        Value::text("alice").for_storage(version),
        version,
        Action::Add,
    )
}

#[test]
fn insert_then_seek_finds_record() {
    let dir = tempdir().unwrap();
    let buffer = Buffer::new(dir.path(), 0);
    buffer.insert(rev(1, 1)).unwrap();
    buffer.insert(rev(2, 2)).unwrap();
    let found = buffer.seek(&PrimaryKey(1));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].version(), 1);
}

#[test]
fn rolls_to_new_page_when_full() {
    let dir = tempdir().unwrap();
    // tiny page size forces a roll after the first insert's bytes.
    let buffer = Buffer::new(dir.path(), 1);
    buffer.insert(rev(1, 1)).unwrap();
    buffer.insert(rev(2, 2)).unwrap();
    assert_eq!(buffer.page_count(), 2);
}

#[test]
fn transfer_drains_oldest_sealed_page() {
    let dir = tempdir().unwrap();
    let buffer = Buffer::new(dir.path(), 1);
    buffer.insert(rev(1, 1)).unwrap();
    buffer.insert(rev(2, 2)).unwrap();
    assert_eq!(buffer.page_count(), 2);

    let mut sunk = vec![];
    let transferred = buffer
        .transfer(|revisions| {
            sunk.extend(revisions.iter().cloned());
            Ok(())
        })
        .unwrap();
    assert!(transferred.is_some());
    assert_eq!(sunk.len(), 1);
    assert_eq!(sunk[0].version(), 1);
    assert_eq!(buffer.page_count(), 1);
}

#[test]
fn transfer_is_noop_when_nothing_sealed() {
    let dir = tempdir().unwrap();
    let buffer = Buffer::new(dir.path(), 0);
    buffer.insert(rev(1, 1)).unwrap();
    let transferred = buffer.transfer(|_| Ok(())).unwrap();
    assert!(transferred.is_none());
    assert_eq!(buffer.page_count(), 1);
}

#[test]
fn reopen_after_close_preserves_revisions() {
    let dir = tempdir().unwrap();
    {
        let buffer = Buffer::new(dir.path(), 1);
        buffer.insert(rev(1, 1)).unwrap();
        buffer.insert(rev(2, 2)).unwrap();
    }
    let reopened = Buffer::open(dir.path(), 1).unwrap();
    let all = reopened.scan();
    assert_eq!(all.len(), 2);
}
