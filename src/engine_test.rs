use super::*;
use crate::config::Config;
use tempfile::tempdir;

fn engine(dir: &tempfile::TempDir) -> Engine {
    let config = Config::new(dir.path().join("buffer"), dir.path().join("database"));
    Engine::new(&config).unwrap()
}

#[test]
fn add_fetch_describe_round_trip() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    assert!(engine.add("name", Value::text("alice"), record, None).unwrap());
    let fetched = engine.fetch("name", record, Timestamp::Now, None).unwrap();
    assert!(fetched.contains(&Value::text("alice")));
    let described = engine.describe(record, Timestamp::Now, None).unwrap();
    assert!(described.contains(&Text::from("name")));
}

#[test]
fn add_duplicate_value_fails() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    engine.add("name", Value::text("alice"), record, None).unwrap();
    assert!(engine.add("name", Value::text("alice"), record, None).is_err());
}

#[test]
fn remove_absent_value_fails() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    assert!(engine.remove("name", Value::text("alice"), record, None).is_err());
}

#[test]
fn audit_sees_add_remove_add_history() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    engine.add("name", Value::text("alice"), record, None).unwrap();
    engine.remove("name", Value::text("alice"), record, None).unwrap();
    engine.add("name", Value::text("bob"), record, None).unwrap();
    let trail = engine.audit(record, Some("name")).unwrap();
    assert_eq!(trail.len(), 3);
    assert!(engine.fetch("name", record, Timestamp::Now, None).unwrap().contains(&Value::text("bob")));
}

#[test]
fn time_travel_fetch_respects_historical_timestamp() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    engine.add("name", Value::text("alice"), record, None).unwrap();
    let trail = engine.audit(record, Some("name")).unwrap();
    let add_version = trail[0].0;
    engine.remove("name", Value::text("alice"), record, None).unwrap();

    let before = engine.fetch("name", record, Timestamp::At(add_version), None).unwrap();
    assert!(before.contains(&Value::text("alice")));
    let after = engine.fetch("name", record, Timestamp::Now, None).unwrap();
    assert!(!after.contains(&Value::text("alice")));
}

#[test]
fn set_replaces_prior_live_values() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    engine.add("name", Value::text("alice"), record, None).unwrap();
    engine.set("name", Value::text("bob"), record, None).unwrap();
    let live = engine.fetch("name", record, Timestamp::Now, None).unwrap();
    assert_eq!(live, [Value::text("bob")].into_iter().collect());
}

#[test]
fn clear_key_removes_every_live_value() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    engine.add("tag", Value::text("red"), record, None).unwrap();
    engine.add("tag", Value::text("blue"), record, None).unwrap();
    engine.clear_key("tag", record, None).unwrap();
    assert!(engine.fetch("tag", record, Timestamp::Now, None).unwrap().is_empty());
}

#[test]
fn verify_and_swap_succeeds_only_when_expected_matches() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    engine.add("balance", Value::long(100), record, None).unwrap();
    assert!(!engine.verify_and_swap("balance", Value::long(50), Value::long(200), record, None).unwrap());
    assert!(engine.verify_and_swap("balance", Value::long(100), Value::long(200), record, None).unwrap());
    assert!(engine.fetch("balance", record, Timestamp::Now, None).unwrap().contains(&Value::long(200)));
}

#[test]
fn revert_restores_prior_state_and_is_idempotent() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    engine.add("name", Value::text("alice"), record, None).unwrap();
    let trail = engine.audit(record, Some("name")).unwrap();
    let snapshot = trail[0].0;
    engine.remove("name", Value::text("alice"), record, None).unwrap();
    engine.add("name", Value::text("bob"), record, None).unwrap();

    engine.revert("name", record, snapshot).unwrap();
    assert!(engine.fetch("name", record, Timestamp::Now, None).unwrap().contains(&Value::text("alice")));
    assert!(!engine.fetch("name", record, Timestamp::Now, None).unwrap().contains(&Value::text("bob")));

    let before = engine.audit(record, Some("name")).unwrap().len();
    engine.revert("name", record, snapshot).unwrap();
    let after = engine.audit(record, Some("name")).unwrap().len();
    assert_eq!(before, after, "second revert to the same snapshot must be a no-op");
}

#[test]
fn find_and_search_see_committed_writes() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let r1 = engine.create();
    let r2 = engine.create();
    engine.add("age", Value::long(30), r1, None).unwrap();
    engine.add("age", Value::long(40), r2, None).unwrap();
    engine.add("bio", Value::text("loves rust programming"), r1, None).unwrap();

    let found = engine.find("age", Operator::Gt, &[Value::long(35)], Timestamp::Now).unwrap();
    assert_eq!(found, [r2].into_iter().collect());

    let matched = engine.search("bio", "rust").unwrap();
    assert!(matched.contains(&r1));
}

#[test]
fn staged_writes_are_invisible_until_commit() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    let tx = engine.stage();
    engine.add("name", Value::text("alice"), record, Some(tx)).unwrap();

    assert!(engine.fetch("name", record, Timestamp::Now, None).unwrap().is_empty());
    assert!(engine.fetch("name", record, Timestamp::Now, Some(tx)).unwrap().contains(&Value::text("alice")));

    engine.commit(tx).unwrap();
    assert!(engine.fetch("name", record, Timestamp::Now, None).unwrap().contains(&Value::text("alice")));
}

#[test]
fn abort_discards_pending_writes() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    let tx = engine.stage();
    engine.add("name", Value::text("alice"), record, Some(tx)).unwrap();
    engine.abort(tx).unwrap();
    assert!(engine.fetch("name", record, Timestamp::Now, None).unwrap().is_empty());
    assert!(engine.commit(tx).is_err());
}

#[test]
fn concurrent_transactions_on_same_key_conflict() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let record = engine.create();
    engine.add("balance", Value::long(100), record, None).unwrap();

    let tx_a = engine.stage();
    let tx_b = engine.stage();
    engine.verify_and_swap("balance", Value::long(100), Value::long(150), record, Some(tx_a)).unwrap();
    engine.verify_and_swap("balance", Value::long(100), Value::long(90), record, Some(tx_b)).unwrap();

    assert!(engine.commit(tx_a).is_ok());
    assert!(engine.commit(tx_b).is_err(), "second commit must see a conflict on the same token");
    assert!(engine.fetch("balance", record, Timestamp::Now, None).unwrap().contains(&Value::long(150)));
}

#[test]
fn record_ids_are_unique_and_monotonic() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let a = engine.create();
    let b = engine.create();
    assert!(b.0 > a.0);
}

#[test]
fn ping_reports_alive() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    assert!(engine.ping());
}
