use super::*;

fn rec() -> Record<&'static str, i64> {
    Record::from_revisions(vec![
        ("age", 30, 1, Action::Add),
        ("age", 30, 2, Action::Remove),
        ("age", 30, 3, Action::Add),
        ("name", 7, 1, Action::Add),
    ])
}

#[test]
fn parity_tracks_add_remove_pairs() {
    let r = rec();
    assert!(r.live(1).contains(&("age", 30)));
    assert!(!r.live(2).contains(&("age", 30)));
    assert!(r.live(3).contains(&("age", 30)));
    assert!(r.live(10).contains(&("age", 30)));
}

#[test]
fn describe_collects_live_keys() {
    let r = rec();
    let described = r.describe(1);
    assert!(described.contains(&"age"));
    assert!(described.contains(&"name"));
}

#[test]
fn history_filters_by_key() {
    let r = rec();
    let h = r.history(Some(&"age"));
    assert_eq!(h, vec![(1, Action::Add), (2, Action::Remove), (3, Action::Add)]);
    let all = r.history(None);
    assert_eq!(all.len(), 4);
}

#[test]
fn out_of_order_push_keeps_version_order() {
    let mut r: Record<&str, i64> = Record::new();
    r.push("x", 5, 3, Action::Add);
    r.push("x", 5, 1, Action::Add);
    r.push("x", 5, 2, Action::Remove);
    assert_eq!(
        r.history(None),
        vec![(1, Action::Add), (2, Action::Remove), (3, Action::Add)]
    );
}
