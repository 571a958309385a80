//! [`Record`]: a pure, transient projection over the revisions for one
//! locator (§4.3). Presence is always derived from parity over the full
//! revision stream up to a timestamp — never cached as a separate flag,
//! and never computed by mutating/"rewinding" a copy of the history (see
//! the open-question resolution in SPEC_FULL.md §9).

use std::collections::{BTreeMap, HashSet};

use crate::revision::Action;

/// One (key, value) mutation recorded against a locator, independent of
/// which index flavor it came from.
#[derive(Clone, Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    version: u64,
    action: Action,
}

/// Projection over the revisions of one locator (e.g. one record in the
/// primary index). Built fresh from a revision stream on every query;
/// callers that want memoization keep the `Record` around and invalidate
/// it when a new revision lands for the same locator.
pub struct Record<K, V> {
    entries: Vec<Entry<K, V>>,
}

impl<K, V> Record<K, V>
where
    K: Clone + Ord,
    V: Clone + Ord,
{
    pub fn new() -> Record<K, V> {
        Record { entries: vec![] }
    }

    /// Build a Record from a version-ordered stream of (key, value,
    /// version, action) revisions for a single locator.
    pub fn from_revisions<I>(iter: I) -> Record<K, V>
    where
        I: IntoIterator<Item = (K, V, u64, Action)>,
    {
        let mut entries: Vec<Entry<K, V>> = iter
            .into_iter()
            .map(|(key, value, version, action)| Entry { key, value, version, action })
            .collect();
        entries.sort_by_key(|e| e.version);
        Record { entries }
    }

    pub fn push(&mut self, key: K, value: V, version: u64, action: Action) {
        // Keep the stream version-ordered: revisions normally arrive in
        // order already (buffer/block scans are sorted), but insertion
        // sort keeps the invariant even if a caller appends out of order.
        let pos = self
            .entries
            .iter()
            .position(|e| e.version > version)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, Entry { key, value, version, action });
    }

    /// Parity-snapshot: for each distinct (key, value) pair, count
    /// revisions with version ≤ `timestamp`; the pair is live iff that
    /// count is odd. Always recomputed from the full stream — never from
    /// a mutated/rewound copy.
    pub fn live(&self, timestamp: u64) -> HashSet<(K, V)>
    where
        K: std::hash::Hash,
        V: std::hash::Hash,
    {
        let mut counts: BTreeMap<(K, V), u64> = BTreeMap::new();
        for e in self.entries.iter().filter(|e| e.version <= timestamp) {
            *counts.entry((e.key.clone(), e.value.clone())).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .filter(|(_, n)| n % 2 == 1)
            .map(|(kv, _)| kv)
            .collect()
    }

    /// Keys with at least one live value at `timestamp`.
    pub fn describe(&self, timestamp: u64) -> HashSet<K>
    where
        K: std::hash::Hash,
        V: std::hash::Hash,
    {
        self.live(timestamp).into_iter().map(|(k, _)| k).collect()
    }

    /// Version-ordered (version → action) stream, optionally filtered to
    /// one key.
    pub fn history(&self, key: Option<&K>) -> Vec<(u64, Action)> {
        self.entries
            .iter()
            .filter(|e| key.map_or(true, |k| &e.key == k))
            .map(|e| (e.version, e.action))
            .collect()
    }

    /// Full version-ordered (version, action, key, value) stream,
    /// optionally filtered to one key (`audit`, §4.5/§6).
    pub fn full_history(&self, key: Option<&K>) -> Vec<(u64, Action, K, V)> {
        self.entries
            .iter()
            .filter(|e| key.map_or(true, |k| &e.key == k))
            .map(|e| (e.version, e.action, e.key.clone(), e.value.clone()))
            .collect()
    }

    /// Like [`Record::live`] but keeps, for each live (key, value) pair,
    /// the version of the revision that most recently toggled it live —
    /// used by `get` to pick "the newest" value when a key has more than
    /// one simultaneously-live value.
    pub fn live_entries(&self, timestamp: u64) -> Vec<(K, V, u64)>
    where
        K: std::hash::Hash,
        V: std::hash::Hash,
    {
        let mut counts: BTreeMap<(K, V), (u64, u64)> = BTreeMap::new();
        for e in self.entries.iter().filter(|e| e.version <= timestamp) {
            let slot = counts.entry((e.key.clone(), e.value.clone())).or_insert((0, 0));
            slot.0 += 1;
            slot.1 = slot.1.max(e.version);
        }
        counts
            .into_iter()
            .filter(|(_, (n, _))| n % 2 == 1)
            .map(|((k, v), (_, version))| (k, v, version))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for Record<K, V>
where
    K: Clone + Ord,
    V: Clone + Ord,
{
    fn default() -> Record<K, V> {
        Record::new()
    }
}

#[cfg(test)]
mod record_test;
