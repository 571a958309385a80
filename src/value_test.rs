use super::*;

#[test]
fn round_trip_each_variant() {
    let values = vec![
        Value::boolean(true),
        Value::integer(-42),
        Value::long(i64::MIN),
        Value::float(3.25),
        Value::double(-1.5),
        Value::text("hello world"),
        Value::link(PrimaryKey(7)),
        Value::long(9).for_storage(100),
    ];
    for v in values {
        let mut buf = vec![];
        v.encode(&mut buf);
        let (decoded, n) = Value::decode(&buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(decoded, v);
    }
}

#[test]
fn total_order_across_types() {
    assert!(Value::boolean(true) < Value::integer(i32::MIN));
    assert!(Value::integer(100) < Value::long(0));
    assert!(Value::text("a") < Value::link(PrimaryKey(0)));
    assert!(Value::text("a") < Value::text("b"));
    assert!(Value::long(1) < Value::long(2));
}

#[test]
fn equality_respects_version_only_for_storage() {
    let a = Value::long(5);
    let b = Value::long(5);
    assert_eq!(a, b);

    let a = Value::long(5).for_storage(1);
    let b = Value::long(5).for_storage(2);
    assert_ne!(a, b);

    let a = Value::long(5).for_storage(9);
    let b = Value::long(5).for_storage(9);
    assert_eq!(a, b);
}
