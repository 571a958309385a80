use super::*;

#[test]
fn named_pool_is_cached() {
    let a = named(SEARCH_INDEX).unwrap();
    let b = named(SEARCH_INDEX).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn fan_out_blocks_until_all_tasks_drain() {
    let items: Vec<u64> = (0..200).collect();
    let results = fan_out(SEARCH_INDEX, items.clone(), |n| n * n).unwrap();
    let expected: Vec<u64> = items.iter().map(|n| n * n).collect();
    assert_eq!(results, expected);
}
