//! [`LockService`]: a process-wide map from [`Token`] to a shared/exclusive
//! lock (§4.6). The same lock instance is handed out to every caller while
//! at least one holder is outstanding; the entry is evicted from the cache
//! the moment the last holder releases.
//!
//! Grounded on the admission rules from `spinlock.rs`'s latch-and-spin doc
//! comment and the atomic-bitfield state machine in `latch_lock.rs`, but
//! implemented with a condvar-backed reentrant read/write primitive rather
//! than a spinning latch: transactions (§4.7) require a thread to
//! re-acquire a lock it already holds without deadlocking itself, which a
//! bare spin latch does not provide.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar, Mutex};

/// Identifies the logical owner of a lock hold: a transaction id in
/// `STAGING` mode, or a synthetic per-call id for `AUTOCOMMIT` operations.
/// Reentrant acquisition is keyed on this, not on the OS thread id, because
/// a transaction's commit validation may run on a different thread than
/// the operations that built up its write set.
pub type HolderId = u64;

/// A 128-bit hash of an arbitrary tuple of identifying objects (e.g.
/// `(key, record)`), stable for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Token(u128);

impl Token {
    pub fn new<T: Hash + ?Sized>(obj: &T) -> Token {
        use std::collections::hash_map::DefaultHasher;

        let mut lo_hasher = DefaultHasher::new();
        obj.hash(&mut lo_hasher);
        let lo = lo_hasher.finish();

        let mut hi_hasher = DefaultHasher::new();
        0xA5_u8.hash(&mut hi_hasher);
        obj.hash(&mut hi_hasher);
        let hi = hi_hasher.finish();

        Token(((hi as u128) << 64) | lo as u128)
    }

    /// Hash value, usable as an ascending ordering key for deadlock-free
    /// multi-token acquisition (§4.7, §5).
    pub fn order_key(&self) -> u128 {
        self.0
    }
}

#[derive(Default)]
struct Inner {
    readers: HashMap<HolderId, u32>,
    writer: Option<(HolderId, u32)>,
}

struct TokenLock {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl TokenLock {
    fn new() -> TokenLock {
        TokenLock { inner: Mutex::new(Inner::default()), cond: Condvar::new() }
    }

    fn acquire_read(&self, holder: HolderId) {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let blocked = matches!(inner.writer, Some((w, _)) if w != holder);
            if !blocked {
                break;
            }
            inner = self.cond.wait(inner).unwrap();
        }
        *inner.readers.entry(holder).or_insert(0) += 1;
    }

    fn acquire_write(&self, holder: HolderId) {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let blocked_by_writer = matches!(inner.writer, Some((w, _)) if w != holder);
            let blocked_by_readers = inner.readers.keys().any(|&r| r != holder);
            if !blocked_by_writer && !blocked_by_readers {
                break;
            }
            inner = self.cond.wait(inner).unwrap();
        }
        match &mut inner.writer {
            Some((w, count)) if *w == holder => *count += 1,
            _ => inner.writer = Some((holder, 1)),
        }
    }

    fn release_read(&self, holder: HolderId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(count) = inner.readers.get_mut(&holder) {
            *count -= 1;
            if *count == 0 {
                inner.readers.remove(&holder);
            }
        }
        drop(inner);
        self.cond.notify_all();
    }

    fn release_write(&self, holder: HolderId) {
        let mut inner = self.inner.lock().unwrap();
        let done = match &mut inner.writer {
            Some((w, count)) if *w == holder => {
                *count -= 1;
                *count == 0
            }
            _ => false,
        };
        if done {
            inner.writer = None;
        }
        drop(inner);
        self.cond.notify_all();
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

struct Entry {
    lock: Arc<TokenLock>,
    refs: usize,
}

/// Process-wide lock cache, keyed by [`Token`] (§4.6, §5, §9).
pub struct LockService {
    table: Mutex<HashMap<Token, Entry>>,
}

impl LockService {
    pub fn new() -> LockService {
        LockService { table: Mutex::new(HashMap::new()) }
    }

    fn checkout(&self, token: Token) -> Arc<TokenLock> {
        let mut table = self.table.lock().unwrap();
        let entry = table
            .entry(token)
            .or_insert_with(|| Entry { lock: Arc::new(TokenLock::new()), refs: 0 });
        entry.refs += 1;
        entry.lock.clone()
    }

    fn checkin(&self, token: Token) {
        let mut table = self.table.lock().unwrap();
        let evict = match table.get_mut(&token) {
            Some(entry) => {
                entry.refs -= 1;
                entry.refs == 0
            }
            None => false,
        };
        if evict {
            table.remove(&token);
        }
    }

    /// Number of tokens currently cached (held by at least one caller).
    /// Exposed for tests (LOCK-IDENTITY, eviction).
    pub fn cached_tokens(&self) -> usize {
        self.table.lock().unwrap().len()
    }
}

impl Default for LockService {
    fn default() -> LockService {
        LockService::new()
    }
}

/// RAII guard: releases the underlying read/write hold, then checks the
/// token back in to the service (evicting it if this was the last hold).
pub struct LockGuard<'a> {
    service: &'a LockService,
    token: Token,
    lock: Arc<TokenLock>,
    holder: HolderId,
    mode: Mode,
}

impl<'a> LockGuard<'a> {
    pub fn token(&self) -> Token {
        self.token
    }
}

impl<'a> Drop for LockGuard<'a> {
    fn drop(&mut self) {
        match self.mode {
            Mode::Read => self.lock.release_read(self.holder),
            Mode::Write => self.lock.release_write(self.holder),
        }
        self.service.checkin(self.token);
    }
}

impl LockService {
    pub fn read(&self, token: Token, holder: HolderId) -> LockGuard<'_> {
        let lock = self.checkout(token);
        lock.acquire_read(holder);
        LockGuard { service: self, token, lock, holder, mode: Mode::Read }
    }

    pub fn write(&self, token: Token, holder: HolderId) -> LockGuard<'_> {
        let lock = self.checkout(token);
        lock.acquire_write(holder);
        LockGuard { service: self, token, lock, holder, mode: Mode::Write }
    }
}

#[cfg(test)]
mod lock_test;
