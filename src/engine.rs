//! [`Engine`]: the façade that owns one [`Buffer`], one [`Database`], one
//! [`LockService`] and one [`TransactionManager`], and implements every
//! operation in §4.5/§4.7 on top of them.
//!
//! Grounded on `rdms.rs`'s role as the single entry point composing a WAL,
//! an index and a lock-free-reads/serialized-writes discipline into one
//! handle; the version clock is grounded on `wal.rs`'s monotonic sequence
//! number, adapted from "next WAL sequence" to "next revision version"
//! (wall-clock microseconds, bumped to stay strictly increasing even if the
//! clock doesn't advance between two calls).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::buffer::Buffer;
use crate::config::Config;
use crate::database::{Database, Operator};
use crate::error::{Error, Result};
use crate::lock::{LockService, Token};
use crate::record::Record;
use crate::revision::Action;
use crate::txn::{PendingWrite, TransactionId, TransactionManager};
use crate::value::{PrimaryKey, Text, Value};

/// A read timestamp: either "as of the most recently committed revision"
/// or a specific historical version (§9 resolved open question).
#[derive(Clone, Copy, Debug)]
pub enum Timestamp {
    Now,
    At(u64),
}

fn now_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_micros() as u64
}

/// Owner of the Buffer, Database, LockService and TransactionManager; the
/// only object client code talks to (§2, §4.5, §4.7).
pub struct Engine {
    buffer: Buffer,
    database: Database,
    locks: LockService,
    transactions: TransactionManager,
    version_clock: AtomicU64,
    record_seq: AtomicU64,
    holder_seq: AtomicU64,
}

impl Engine {
    /// Fresh engine over empty buffer/database directories.
    pub fn new(config: &Config) -> Result<Engine> {
        config.validate()?;
        Ok(Engine {
            buffer: Buffer::new(config.buffer_directory.clone(), config.buffer_page_size),
            database: Database::new(config.database_directory.clone(), config.block_size),
            locks: LockService::new(),
            transactions: TransactionManager::new(),
            version_clock: AtomicU64::new(0),
            record_seq: AtomicU64::new(1),
            holder_seq: AtomicU64::new(1),
        })
    }

    /// Reopen an engine over directories written by a previous process.
    pub fn open(config: &Config) -> Result<Engine> {
        config.validate()?;
        let buffer = Buffer::open(config.buffer_directory.clone(), config.buffer_page_size)?;
        let database = Database::open(config.database_directory.clone(), config.block_size)?;
        info!(target: "engine", "reopened engine (buffer={:?}, database={:?})",
            config.buffer_directory, config.database_directory);
        Ok(Engine {
            buffer,
            database,
            locks: LockService::new(),
            transactions: TransactionManager::new(),
            version_clock: AtomicU64::new(0),
            record_seq: AtomicU64::new(1),
            holder_seq: AtomicU64::new(1),
        })
    }

    /// §6: strictly increasing version, even across calls landing in the
    /// same microsecond.
    fn next_version(&self) -> u64 {
        loop {
            let last = self.version_clock.load(Ordering::SeqCst);
            let candidate = std::cmp::max(last + 1, now_micros());
            if self
                .version_clock
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    /// `create()`: a fresh, globally unique record id, from a counter
    /// disjoint from the version clock (§4.5, §9 resolved open question).
    pub fn create(&self) -> PrimaryKey {
        PrimaryKey(self.record_seq.fetch_add(1, Ordering::SeqCst))
    }

    pub fn ping(&self) -> bool {
        true
    }

    fn fresh_holder(&self) -> u64 {
        self.holder_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn token(&self, key: &str, record: PrimaryKey) -> Token {
        Token::new(&(key, record.0))
    }

    fn resolve(&self, timestamp: Timestamp) -> u64 {
        match timestamp {
            Timestamp::Now => u64::MAX,
            Timestamp::At(v) => v,
        }
    }

    /// Merge the Buffer's still-unflushed primary revisions for `record`
    /// with whatever the Database already has on disk (§4.4: the Buffer
    /// holds only `PrimaryRevision`s, so this merge is primary-only — the
    /// secondary/search mirrors are written straight into the Database and
    /// stay consistent with it by construction).
    fn primary_view(&self, record: PrimaryKey, timestamp: Option<u64>) -> Result<Record<Text, Value>> {
        let mut revisions = self.buffer.seek(&record);
        revisions.extend(self.database.primary_revisions(&record, timestamp)?);
        if let Some(t) = timestamp {
            revisions.retain(|r| r.version() <= t);
        }
        Ok(Record::from_revisions(revisions.into_iter().map(|r| {
            let (_, key, value, version, action) = r.into_parts();
            (key, value, version, action)
        })))
    }

    /// A transaction's view of `record`: the committed snapshot as of
    /// `start_version`, with this transaction's own pending writes for
    /// `token` replayed on top in staging order (§4.7). Registers `token`
    /// into the transaction's read set.
    fn transaction_view(&self, id: TransactionId, key: &Text, record: PrimaryKey, token: Token) -> Result<Record<Text, Value>> {
        let start_version = self
            .transactions
            .with(id, |t| {
                t.record_read(token, key.clone(), record);
                t.start_version
            })
            .ok_or_else(|| Error::InvariantViolation(format!("unknown transaction {}", id)))?;
        let mut view = self.primary_view(record, Some(start_version))?;
        let pending: Vec<PendingWrite> = self
            .transactions
            .with(id, |t| t.pending_for(token).into_iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        for (i, write) in pending.into_iter().enumerate() {
            view.push(write.key, write.value, start_version + 1 + i as u64, write.action);
        }
        Ok(view)
    }

    /// Apply one (record, key, value, action) to the Buffer and Database
    /// under a fresh version — the single path shared by autocommit writes
    /// and transaction-commit replay (§4.5 `accept`, §3 invariant 5: every
    /// primary write mirrors into secondary, and into search if the value
    /// is a string).
    fn apply_write(&self, record: PrimaryKey, key: &Text, value: &Value, version: u64, action: Action) -> Result<()> {
        let value = value.without_version();
        let revision = crate::revision::PrimaryRevision::new(record, key.clone(), value.clone(), version, action);
        self.buffer.insert(revision)?;
        self.database.accept_secondary(key.clone(), value.clone(), record, version, action)?;
        if let Some(text) = value.as_text() {
            self.database.accept_search(key, text.as_str(), record, version, action)?;
        }
        self.buffer.transfer(|revisions| {
            for r in revisions {
                self.database.accept_primary(*r.locator(), r.key().clone(), r.value().clone(), r.version(), r.action())?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn apply_or_stage(
        &self,
        tx: Option<TransactionId>,
        token: Token,
        record: PrimaryKey,
        key: &Text,
        value: &Value,
        action: Action,
    ) -> Result<()> {
        match tx {
            None => {
                let version = self.next_version();
                self.apply_write(record, key, value, version, action)
            }
            Some(id) => {
                let write = PendingWrite { record, key: key.clone(), value: value.without_version(), action };
                self.transactions
                    .with(id, |t| t.record_write(token, write))
                    .ok_or_else(|| Error::InvariantViolation(format!("unknown transaction {}", id)))?;
                Ok(())
            }
        }
    }

    fn view_for(&self, tx: Option<TransactionId>, key: &Text, record: PrimaryKey, token: Token) -> Result<Record<Text, Value>> {
        match tx {
            None => self.primary_view(record, None),
            Some(id) => self.transaction_view(id, key, record, token),
        }
    }

    /// §4.5 `fetch`: every value currently live under `key` in `record`.
    pub fn fetch(&self, key: &str, record: PrimaryKey, timestamp: Timestamp, tx: Option<TransactionId>) -> Result<HashSet<Value>> {
        let key_text = Text::from(key);
        let token = self.token(key, record);
        let view = match tx {
            None => self.primary_view(record, Some(self.resolve(timestamp)))?,
            Some(id) => self.transaction_view(id, &key_text, record, token)?,
        };
        let ts = match tx {
            None => self.resolve(timestamp),
            Some(_) => u64::MAX,
        };
        Ok(view.live(ts).into_iter().filter(|(k, _)| k == &key_text).map(|(_, v)| v).collect())
    }

    /// §4.5 `get`: the single newest live value under `key`, if any.
    pub fn get(&self, key: &str, record: PrimaryKey, timestamp: Timestamp, tx: Option<TransactionId>) -> Result<Option<Value>> {
        let key_text = Text::from(key);
        let token = self.token(key, record);
        let view = match tx {
            None => self.primary_view(record, Some(self.resolve(timestamp)))?,
            Some(id) => self.transaction_view(id, &key_text, record, token)?,
        };
        let ts = match tx {
            None => self.resolve(timestamp),
            Some(_) => u64::MAX,
        };
        Ok(view
            .live_entries(ts)
            .into_iter()
            .filter(|(k, _, _)| k == &key_text)
            .max_by_key(|(_, _, version)| *version)
            .map(|(_, v, _)| v))
    }

    /// §4.5 `describe`: distinct keys with at least one live value.
    pub fn describe(&self, record: PrimaryKey, timestamp: Timestamp, tx: Option<TransactionId>) -> Result<HashSet<Text>> {
        match tx {
            None => {
                let view = self.primary_view(record, Some(self.resolve(timestamp)))?;
                Ok(view.describe(self.resolve(timestamp)))
            }
            Some(id) => {
                let known = self.known_keys(Some(id), record)?;
                let mut out = HashSet::new();
                for key in known {
                    let token = self.token(key.as_str(), record);
                    let view = self.transaction_view(id, &key, record, token)?;
                    if !view.live(u64::MAX).is_empty() {
                        out.insert(key);
                    }
                }
                Ok(out)
            }
        }
    }

    /// Every key this record has ever had a committed value under, plus (for
    /// a transaction) any key this transaction has already written to —
    /// used by `describe`/`clear` under a transaction, where a single
    /// whole-record token does not exist (§7: compound operations are
    /// decomposed into per-(key,record) atomics).
    fn known_keys(&self, tx: Option<TransactionId>, record: PrimaryKey) -> Result<HashSet<Text>> {
        let mut keys = self.primary_view(record, None)?.describe(u64::MAX);
        if let Some(id) = tx {
            let pending_keys = self
                .transactions
                .with(id, |t| {
                    t.writes().iter().filter(|(_, w)| w.record == record).map(|(_, w)| w.key.clone()).collect::<Vec<_>>()
                })
                .unwrap_or_default();
            keys.extend(pending_keys);
        }
        Ok(keys)
    }

    /// §4.5 `verify`: is `value` currently live under `key` in `record`?
    pub fn verify(&self, key: &str, value: Value, record: PrimaryKey, timestamp: Timestamp, tx: Option<TransactionId>) -> Result<bool> {
        let key_text = Text::from(key);
        let token = self.token(key, record);
        let value = value.without_version();
        let view = self.view_for(tx, &key_text, record, token)?;
        let ts = match tx {
            None => self.resolve(timestamp),
            Some(_) => u64::MAX,
        };
        Ok(view.live(ts).contains(&(key_text, value)))
    }

    /// §4.5 `add`: fails if `value` is already live under `key`.
    pub fn add(&self, key: &str, value: Value, record: PrimaryKey, tx: Option<TransactionId>) -> Result<bool> {
        let key_text = Text::from(key);
        let value = value.without_version();
        let token = self.token(key, record);
        let _guard = match tx {
            None => Some(self.locks.write(token, self.fresh_holder())),
            Some(_) => None,
        };
        let view = self.view_for(tx, &key_text, record, token)?;
        if view.live(u64::MAX).contains(&(key_text.clone(), value.clone())) {
            return Err(Error::InvariantViolation(format!(
                "add: {:?} already present under key {:?} in record {}",
                value, key, record.0
            )));
        }
        self.apply_or_stage(tx, token, record, &key_text, &value, Action::Add)?;
        Ok(true)
    }

    /// §4.5 `remove`: fails if `value` is not live under `key`.
    pub fn remove(&self, key: &str, value: Value, record: PrimaryKey, tx: Option<TransactionId>) -> Result<bool> {
        let key_text = Text::from(key);
        let value = value.without_version();
        let token = self.token(key, record);
        let _guard = match tx {
            None => Some(self.locks.write(token, self.fresh_holder())),
            Some(_) => None,
        };
        let view = self.view_for(tx, &key_text, record, token)?;
        if !view.live(u64::MAX).contains(&(key_text.clone(), value.clone())) {
            return Err(Error::InvariantViolation(format!(
                "remove: {:?} not present under key {:?} in record {}",
                value, key, record.0
            )));
        }
        self.apply_or_stage(tx, token, record, &key_text, &value, Action::Remove)?;
        Ok(true)
    }

    /// §4.5 `set`: replace every live value under `key` with exactly
    /// `value` (removes whatever else was live, adds `value` if it wasn't
    /// already).
    pub fn set(&self, key: &str, value: Value, record: PrimaryKey, tx: Option<TransactionId>) -> Result<()> {
        let key_text = Text::from(key);
        let value = value.without_version();
        let token = self.token(key, record);
        let _guard = match tx {
            None => Some(self.locks.write(token, self.fresh_holder())),
            Some(_) => None,
        };
        let view = self.view_for(tx, &key_text, record, token)?;
        let current: HashSet<Value> =
            view.live(u64::MAX).into_iter().filter(|(k, _)| k == &key_text).map(|(_, v)| v).collect();
        for v in &current {
            if v != &value {
                self.apply_or_stage(tx, token, record, &key_text, v, Action::Remove)?;
            }
        }
        if !current.contains(&value) {
            self.apply_or_stage(tx, token, record, &key_text, &value, Action::Add)?;
        }
        Ok(())
    }

    /// §4.5 `clear`: remove every live value under `key`.
    pub fn clear_key(&self, key: &str, record: PrimaryKey, tx: Option<TransactionId>) -> Result<()> {
        let key_text = Text::from(key);
        let token = self.token(key, record);
        let _guard = match tx {
            None => Some(self.locks.write(token, self.fresh_holder())),
            Some(_) => None,
        };
        let view = self.view_for(tx, &key_text, record, token)?;
        let current: HashSet<Value> =
            view.live(u64::MAX).into_iter().filter(|(k, _)| k == &key_text).map(|(_, v)| v).collect();
        for v in current {
            self.apply_or_stage(tx, token, record, &key_text, &v, Action::Remove)?;
        }
        Ok(())
    }

    /// §4.5 `clear` (whole record): decomposed into one `clear_key` per key
    /// the record has ever had (§7 — not one whole-record atomic unless the
    /// caller brackets this in a transaction itself).
    pub fn clear_record(&self, record: PrimaryKey, tx: Option<TransactionId>) -> Result<()> {
        for key in self.known_keys(tx, record)? {
            self.clear_key(key.as_str(), record, tx)?;
        }
        Ok(())
    }

    /// §4.5 `verify_and_swap`: CAS — if `expected` is live under `key`,
    /// atomically remove it and add `new_value`; otherwise a no-op
    /// returning `false`.
    pub fn verify_and_swap(
        &self,
        key: &str,
        expected: Value,
        new_value: Value,
        record: PrimaryKey,
        tx: Option<TransactionId>,
    ) -> Result<bool> {
        let key_text = Text::from(key);
        let expected = expected.without_version();
        let new_value = new_value.without_version();
        let token = self.token(key, record);
        let _guard = match tx {
            None => Some(self.locks.write(token, self.fresh_holder())),
            Some(_) => None,
        };
        let view = self.view_for(tx, &key_text, record, token)?;
        if !view.live(u64::MAX).contains(&(key_text.clone(), expected.clone())) {
            return Ok(false);
        }
        self.apply_or_stage(tx, token, record, &key_text, &expected, Action::Remove)?;
        self.apply_or_stage(tx, token, record, &key_text, &new_value, Action::Add)?;
        Ok(true)
    }

    /// §4.5 `audit`: full (version, action, value) history under `key` (or
    /// every key, if `None`) in `record`. Autocommit only.
    pub fn audit(&self, record: PrimaryKey, key: Option<&str>) -> Result<Vec<(u64, Action, Text, Value)>> {
        let key_text = key.map(Text::from);
        let view = self.primary_view(record, None)?;
        Ok(view.full_history(key_text.as_ref()))
    }

    /// §4.5 `revert`: restore `key` in `record` to whatever was live at
    /// `timestamp`, by adding/removing the difference against what's live
    /// now. Idempotent — a second call against the same `timestamp` is a
    /// no-op once the first has landed.
    pub fn revert(&self, key: &str, record: PrimaryKey, timestamp: u64) -> Result<()> {
        let key_text = Text::from(key);
        let token = self.token(key, record);
        let _guard = self.locks.write(token, self.fresh_holder());
        let target: HashSet<Value> = self
            .primary_view(record, Some(timestamp))?
            .live(timestamp)
            .into_iter()
            .filter(|(k, _)| k == &key_text)
            .map(|(_, v)| v)
            .collect();
        let current: HashSet<Value> = self
            .primary_view(record, None)?
            .live(u64::MAX)
            .into_iter()
            .filter(|(k, _)| k == &key_text)
            .map(|(_, v)| v)
            .collect();
        for v in current.difference(&target) {
            let version = self.next_version();
            self.apply_write(record, &key_text, v, version, Action::Remove)?;
        }
        for v in target.difference(&current) {
            let version = self.next_version();
            self.apply_write(record, &key_text, v, version, Action::Add)?;
        }
        Ok(())
    }

    /// §4.5 `find`: autocommit-only range/comparison query over the
    /// secondary index.
    pub fn find(&self, key: &str, operator: Operator, operands: &[Value], timestamp: Timestamp) -> Result<HashSet<PrimaryKey>> {
        let operands: Vec<Value> = operands.iter().map(Value::without_version).collect();
        self.database.find(&Text::from(key), operator, &operands, self.resolve(timestamp))
    }

    /// §4.5 `search`: autocommit-only full-text query over the search
    /// index, scoped to committed state (§9 resolved open question).
    pub fn search(&self, key: &str, query: &str) -> Result<HashSet<PrimaryKey>> {
        self.database.search(&Text::from(key), query)
    }

    /// §4.7 `stage`: open a new transaction, snapshotting the currently
    /// committed version as its isolation start point.
    pub fn stage(&self) -> TransactionId {
        self.transactions.stage(self.version_clock.load(Ordering::SeqCst))
    }

    /// §4.7 `commit`: lock every touched token in ascending hash order,
    /// validate no committed revision newer than the transaction's start
    /// touched a read-set token, then replay the write set under one
    /// strictly-increasing version per write.
    pub fn commit(&self, tx: TransactionId) -> Result<()> {
        let transaction = self
            .transactions
            .take(tx)
            .ok_or_else(|| Error::InvariantViolation(format!("unknown transaction {}", tx)))?;

        let mut touched = transaction.touched_pairs();
        touched.sort_by_key(|(token, _, _)| token.order_key());

        let holder = self.fresh_holder();
        let mut guards = Vec::with_capacity(touched.len());
        for (token, _, _) in &touched {
            guards.push(self.locks.write(*token, holder));
        }

        for (_, key, record) in &touched {
            if self.has_conflict(key, *record, transaction.start_version)? {
                drop(guards);
                return Err(Error::TransactionConflict(format!(
                    "transaction {}: key {:?} in record {} changed since staging",
                    tx, key, record.0
                )));
            }
        }

        for (_, write) in transaction.writes() {
            let version = self.next_version();
            self.apply_write(write.record, &write.key, &write.value, version, write.action)?;
        }
        drop(guards);
        Ok(())
    }

    /// §4.7 `abort`: discard the transaction's write set; no locks were
    /// ever held, so there is nothing else to undo.
    pub fn abort(&self, tx: TransactionId) -> Result<()> {
        self.transactions
            .take(tx)
            .map(|_| ())
            .ok_or_else(|| Error::InvariantViolation(format!("unknown transaction {}", tx)))
    }

    /// Has any revision under `(key, record)` landed with a version newer
    /// than `start_version`? Used by `commit` to detect a conflicting write
    /// that happened while the transaction was staging.
    fn has_conflict(&self, key: &Text, record: PrimaryKey, start_version: u64) -> Result<bool> {
        let view = self.primary_view(record, None)?;
        Ok(view.full_history(Some(key)).iter().any(|(version, _, _, _)| *version > start_version))
    }

    /// Flush every block set's mutable head — a clean shutdown checkpoint
    /// before a later `open()` (§4.8).
    pub fn flush(&self) -> Result<()> {
        self.database.flush_all()
    }
}

#[cfg(test)]
mod engine_test;
