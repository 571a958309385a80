use super::*;
use crate::revision::Action;
use tempfile::tempdir;

#[test]
fn primary_parity_round_trip() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path(), 0);
    db.accept_primary(PrimaryKey(1), Text::from("name"), Value::text("alice"), 1, Action::Add).unwrap();
    let record = db.get(&PrimaryKey(1), None).unwrap();
    let live = record.live(u64::MAX);
    assert!(live.contains(&(Text::from("name"), Value::text("alice"))));
}

#[test]
fn primary_add_then_remove_is_absent() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path(), 0);
    db.accept_primary(PrimaryKey(1), Text::from("name"), Value::text("alice"), 1, Action::Add).unwrap();
    db.accept_primary(PrimaryKey(1), Text::from("name"), Value::text("alice"), 2, Action::Remove).unwrap();
    let record = db.get(&PrimaryKey(1), None).unwrap();
    assert!(record.live(u64::MAX).is_empty());
}

#[test]
fn find_equality_and_range() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path(), 0);
    db.accept_secondary(Text::from("age"), Value::long(30), PrimaryKey(1), 1, Action::Add).unwrap();
    db.accept_secondary(Text::from("age"), Value::long(40), PrimaryKey(2), 2, Action::Add).unwrap();
    db.accept_secondary(Text::from("age"), Value::long(50), PrimaryKey(3), 3, Action::Add).unwrap();

    let eq = db.find(&Text::from("age"), Operator::Eq, &[Value::long(30)], u64::MAX).unwrap();
    assert_eq!(eq, [PrimaryKey(1)].into_iter().collect());

    let gt = db.find(&Text::from("age"), Operator::Gt, &[Value::long(35)], u64::MAX).unwrap();
    assert_eq!(gt, [PrimaryKey(2), PrimaryKey(3)].into_iter().collect());

    let between = db
        .find(&Text::from("age"), Operator::Between, &[Value::long(30), Value::long(45)], u64::MAX)
        .unwrap();
    assert_eq!(between, [PrimaryKey(1), PrimaryKey(2)].into_iter().collect());
}

#[test]
fn find_respects_time_travel() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path(), 0);
    db.accept_secondary(Text::from("age"), Value::long(30), PrimaryKey(1), 1, Action::Add).unwrap();
    db.accept_secondary(Text::from("age"), Value::long(30), PrimaryKey(1), 2, Action::Remove).unwrap();

    let at_t1 = db.find(&Text::from("age"), Operator::Eq, &[Value::long(30)], 1).unwrap();
    assert_eq!(at_t1, [PrimaryKey(1)].into_iter().collect());

    let at_t2 = db.find(&Text::from("age"), Operator::Eq, &[Value::long(30)], 2).unwrap();
    assert!(at_t2.is_empty());
}

#[test]
fn search_substring_and_order() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path(), 0);
    db.accept_search(&Text::from("bio"), "foo bar baz", PrimaryKey(1), 1, Action::Add).unwrap();
    db.accept_search(&Text::from("bio"), "food barn", PrimaryKey(2), 2, Action::Add).unwrap();

    let found = db.search(&Text::from("bio"), "fo ar").unwrap();
    assert!(found.contains(&PrimaryKey(1)));
    assert!(found.contains(&PrimaryKey(2)));
}

#[test]
fn search_out_of_order_query_does_not_match() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path(), 0);
    db.accept_search(&Text::from("bio"), "foo bar", PrimaryKey(1), 1, Action::Add).unwrap();

    // "bar" occurs after "foo" in the text; querying "bar foo" requires the
    // reverse order and must not match.
    let found = db.search(&Text::from("bio"), "bar foo").unwrap();
    assert!(!found.contains(&PrimaryKey(1)));
}

#[test]
fn flush_all_transitions_current_blocks_to_immutable() {
    let dir = tempdir().unwrap();
    let db = Database::new(dir.path(), 0);
    db.accept_primary(PrimaryKey(1), Text::from("name"), Value::text("alice"), 1, Action::Add).unwrap();
    db.flush_all().unwrap();
    let record = db.get(&PrimaryKey(1), None).unwrap();
    assert!(record.live(u64::MAX).contains(&(Text::from("name"), Value::text("alice"))));
}
