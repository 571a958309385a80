use super::*;
use std::sync::Barrier;
use std::thread;

#[test]
fn lock_identity_overlapping_holds_share_instance() {
    let service = Arc::new(LockService::new());
    let token = Token::new(&("name", 1u64));
    let barrier = Arc::new(Barrier::new(2));

    let s1 = service.clone();
    let b1 = barrier.clone();
    let t1 = thread::spawn(move || {
        let guard = s1.read(token, 1);
        b1.wait();
        // hold until second thread has also acquired
        b1.wait();
        drop(guard);
    });

    let s2 = service.clone();
    let b2 = barrier.clone();
    let t2 = thread::spawn(move || {
        b2.wait();
        let guard = s2.read(token, 2);
        b2.wait();
        drop(guard);
    });

    t1.join().unwrap();
    t2.join().unwrap();
}

#[test]
fn token_evicted_after_last_release() {
    let service = LockService::new();
    let token = Token::new(&("key", "record"));
    assert_eq!(service.cached_tokens(), 0);
    {
        let _g = service.write(token, 1);
        assert_eq!(service.cached_tokens(), 1);
    }
    assert_eq!(service.cached_tokens(), 0);
}

#[test]
fn same_holder_reentrant_write() {
    let service = LockService::new();
    let token = Token::new(&"reentrant");
    let g1 = service.write(token, 1);
    // same holder, same token: must not deadlock.
    let g2 = service.write(token, 1);
    drop(g2);
    drop(g1);
}

#[test]
fn different_tokens_are_independent() {
    let a = Token::new(&"a");
    let b = Token::new(&"b");
    assert_ne!(a, b);
}

#[test]
fn concurrent_writers_serialize() {
    use std::sync::atomic::{AtomicU64, Ordering};

    let service = Arc::new(LockService::new());
    let token = Token::new(&"counter");
    let counter = Arc::new(AtomicU64::new(0));
    let mut handles = vec![];
    for i in 0..8u64 {
        let service = service.clone();
        let counter = counter.clone();
        handles.push(thread::spawn(move || {
            let _guard = service.write(token, 100 + i);
            let v = counter.load(Ordering::SeqCst);
            thread::yield_now();
            counter.store(v + 1, Ordering::SeqCst);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 8);
}
