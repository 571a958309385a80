use super::*;

#[test]
fn rejects_equal_directories() {
    let config = Config::new("/tmp/concourse/buf", "/tmp/concourse/buf");
    assert!(config.validate().is_err());
}

#[test]
fn rejects_nested_directories() {
    let config = Config::new("/tmp/concourse/db/buffer", "/tmp/concourse/db");
    assert!(config.validate().is_err());
    let config = Config::new("/tmp/concourse/buffer", "/tmp/concourse/buffer/db");
    assert!(config.validate().is_err());
}

#[test]
fn accepts_sibling_directories() {
    let config = Config::new("/tmp/concourse/buffer", "/tmp/concourse/db");
    assert!(config.validate().is_ok());
}

#[test]
fn builder_overrides_defaults() {
    let config = Config::new("/tmp/a", "/tmp/b").buffer_page_size(4096).log_level("debug");
    assert_eq!(config.buffer_page_size, 4096);
    assert_eq!(config.log_level, "debug");
}
