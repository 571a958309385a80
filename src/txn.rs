//! Transaction bookkeeping for [`crate::engine::Engine`] (§4.7).
//!
//! A `Transaction` is a private write set plus a read set, both keyed by
//! [`Token`], accumulated while the session is in `STAGING` mode. No locks
//! are held while staging — only `commit()` acquires them, which is what
//! makes the validation optimistic rather than pessimistic.
//!
//! Grounded on `core.rs`'s `Replay` trait (apply a recorded batch of
//! mutations against an index) and `wal.rs`'s "replay the WAL into the
//! index" commit-time doc comment, adapted from replaying a durable log to
//! replaying one transaction's private write set into the Buffer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::lock::Token;
use crate::revision::Action;
use crate::value::{PrimaryKey, Text, Value};

pub type TransactionId = u64;

/// One pending mutation recorded against a token while staging.
#[derive(Clone, Debug)]
pub struct PendingWrite {
    pub record: PrimaryKey,
    pub key: Text,
    pub value: Value,
    pub action: Action,
}

/// Private write set + read set for one in-flight transaction (§4.7).
pub struct Transaction {
    pub id: TransactionId,
    /// Last committed version visible when this transaction started;
    /// commit validation rejects if anything newer touched a read token.
    pub start_version: u64,
    /// Insertion-ordered pending writes, per token — preserves the order
    /// `audit()` expects even though writes land across several tokens.
    writes: Vec<(Token, PendingWrite)>,
    /// Every token this transaction has read or written, validated at
    /// commit (§4.7 "verify that no committed revision ... touches a
    /// read-set token"). `Token` is a one-way hash, so the concrete
    /// `(key, record)` pair is kept alongside it — commit validation needs
    /// to re-scan that pair's revisions, not just know the token matched.
    touched: HashMap<Token, (Text, PrimaryKey)>,
}

impl Transaction {
    fn new(id: TransactionId, start_version: u64) -> Transaction {
        Transaction { id, start_version, writes: vec![], touched: HashMap::new() }
    }

    pub fn record_read(&mut self, token: Token, key: Text, record: PrimaryKey) {
        self.touched.insert(token, (key, record));
    }

    pub fn record_write(&mut self, token: Token, write: PendingWrite) {
        self.touched.insert(token, (write.key.clone(), write.record));
        self.writes.push((token, write));
    }

    /// Pending writes for `token`, in the order they were staged — reads
    /// within the transaction consult this before falling back to the
    /// committed snapshot (§4.7).
    pub fn pending_for(&self, token: Token) -> Vec<&PendingWrite> {
        self.writes.iter().filter(|(t, _)| *t == token).map(|(_, w)| w).collect()
    }

    pub fn writes(&self) -> &[(Token, PendingWrite)] {
        &self.writes
    }

    /// Every `(token, key, record)` this transaction read or wrote, for
    /// commit-time validation (`Token` alone can't be mapped back to the
    /// pair it was built from).
    pub fn touched_pairs(&self) -> Vec<(Token, Text, PrimaryKey)> {
        self.touched.iter().map(|(t, (k, r))| (*t, k.clone(), *r)).collect()
    }
}

/// Process-wide table of in-flight transactions, keyed by id (§4.7).
pub struct TransactionManager {
    next_id: AtomicU64,
    table: Mutex<HashMap<TransactionId, Transaction>>,
}

impl TransactionManager {
    pub fn new() -> TransactionManager {
        TransactionManager { next_id: AtomicU64::new(1), table: Mutex::new(HashMap::new()) }
    }

    /// `stage()`: allocate a transaction id and snapshot the current
    /// version as its isolation start point.
    pub fn stage(&self, start_version: u64) -> TransactionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.table.lock().unwrap().insert(id, Transaction::new(id, start_version));
        id
    }

    pub fn with<R>(&self, id: TransactionId, f: impl FnOnce(&mut Transaction) -> R) -> Option<R> {
        self.table.lock().unwrap().get_mut(&id).map(f)
    }

    /// Remove and return the transaction (used by both `commit` and
    /// `abort` to discard the write set once finished).
    pub fn take(&self, id: TransactionId) -> Option<Transaction> {
        self.table.lock().unwrap().remove(&id)
    }
}

impl Default for TransactionManager {
    fn default() -> TransactionManager {
        TransactionManager::new()
    }
}
