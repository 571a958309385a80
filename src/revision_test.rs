use super::*;

#[test]
fn round_trip_primary_revision() {
    let rev: PrimaryRevision = Revision::new(
        PrimaryKey(1),
        Text::from("name"),
        Value::text("alice").for_storage(42),
        42,
        Action::Add,
    );
    let bytes = rev.to_bytes();
    let (decoded, n) = PrimaryRevision::from_bytes(&bytes).unwrap();
    assert_eq!(n, bytes.len());
    assert_eq!(decoded, rev);
    assert_eq!(decoded.version(), 42);
    assert_eq!(decoded.action(), Action::Add);
}

#[test]
fn round_trip_search_revision() {
    let rev: SearchRevision = Revision::new(
        Text::from("ba"),
        Text::from("bar"),
        Position::new(PrimaryKey(9), 2),
        7,
        Action::Remove,
    );
    let bytes = rev.to_bytes();
    let (decoded, n) = SearchRevision::from_bytes(&bytes).unwrap();
    assert_eq!(n, bytes.len());
    assert_eq!(decoded, rev);
}

#[test]
fn size_matches_encoded_length() {
    let rev: PrimaryRevision = Revision::new(
        PrimaryKey(1),
        Text::from("age"),
        Value::long(30).for_storage(3),
        3,
        Action::Add,
    );
    assert_eq!(rev.size(), rev.to_bytes().len());
}
