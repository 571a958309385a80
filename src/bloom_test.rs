use super::*;

#[test]
fn contains_after_build_no_false_negatives() {
    let mut bloom = BlockBloom::new();
    let keys: Vec<u64> = (0..500).collect();
    for k in &keys {
        bloom.add_key(k);
    }
    bloom.build().unwrap();
    for k in &keys {
        assert!(bloom.contains(k));
    }
}

#[test]
fn round_trip_bytes() {
    let mut bloom = BlockBloom::new();
    for k in 0u64..50 {
        bloom.add_key(&k);
    }
    bloom.build().unwrap();
    let bytes = bloom.to_bytes().unwrap();
    let reloaded = BlockBloom::from_bytes(&bytes).unwrap();
    for k in 0u64..50 {
        assert!(reloaded.contains(&k));
    }
}
