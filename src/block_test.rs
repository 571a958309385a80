use super::*;
use crate::value::{PrimaryKey, Text, Value};
use tempfile::tempdir;

type PrimaryBlock = Block<PrimaryKey, Text, Value>;

#[test]
fn mutable_insert_and_seek() {
    let dir = tempdir().unwrap();
    let block: PrimaryBlock = Block::new_mutable(1, dir.path(), false);
    block
        .insert(PrimaryKey(1), Text::from("name"), Value::text("alice").for_storage(1), 1, Action::Add)
        .unwrap();
    let found = block.seek(&PrimaryKey(1), None, None).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].version(), 1);
}

#[test]
fn insert_fails_after_flush() {
    let dir = tempdir().unwrap();
    let block: PrimaryBlock = Block::new_mutable(2, dir.path(), false);
    block
        .insert(PrimaryKey(1), Text::from("name"), Value::text("bob").for_storage(1), 1, Action::Add)
        .unwrap();
    block.flush().unwrap();
    assert!(!block.is_mutable());
    let err = block.insert(PrimaryKey(2), Text::from("name"), Value::text("x").for_storage(2), 2, Action::Add);
    assert!(err.is_err());
}

#[test]
fn flush_then_reopen_round_trips() {
    let dir = tempdir().unwrap();
    {
        let block: PrimaryBlock = Block::new_mutable(3, dir.path(), false);
        for i in 0..20u64 {
            block
                .insert(
                    PrimaryKey(i),
                    Text::from("age"),
                    Value::long(i as i64).for_storage(i),
                    i,
                    Action::Add,
                )
                .unwrap();
        }
        block.flush().unwrap();
    }
    let reopened: PrimaryBlock = Block::open(3, dir.path(), false).unwrap();
    for i in 0..20u64 {
        let found = reopened.seek(&PrimaryKey(i), None, None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value().as_long(), Some(i as i64));
    }
    assert!(reopened.might_contain(&PrimaryKey(5), None));
}

#[test]
fn might_contain_has_no_false_negatives() {
    let dir = tempdir().unwrap();
    let block: PrimaryBlock = Block::new_mutable(4, dir.path(), false);
    for i in 0..100u64 {
        block
            .insert(PrimaryKey(i), Text::from("a"), Value::long(0).for_storage(i), i, Action::Add)
            .unwrap();
    }
    block.flush().unwrap();
    for i in 0..100u64 {
        assert!(block.might_contain(&PrimaryKey(i), None));
    }
}

#[test]
fn composite_index_requires_key_for_exact_lookup() {
    let dir = tempdir().unwrap();
    type SecondaryBlock = Block<Text, Value, PrimaryKey>;
    let block: SecondaryBlock = Block::new_mutable(5, dir.path(), true);
    block
        .insert(Text::from("age"), Value::long(30), PrimaryKey(1), 1, Action::Add)
        .unwrap();
    block
        .insert(Text::from("age"), Value::long(40), PrimaryKey(2), 2, Action::Add)
        .unwrap();
    block.flush().unwrap();

    let exact = block.seek(&Text::from("age"), Some(&Value::long(30)), None).unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].value(), &PrimaryKey(1));

    let all_for_locator = block.seek(&Text::from("age"), None, None).unwrap();
    assert_eq!(all_for_locator.len(), 2);
}
