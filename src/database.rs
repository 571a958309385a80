//! [`Database`]: owner of the three parallel Block collections — primary
//! (locator = record, key = attribute, value = Value), secondary (locator =
//! attribute, key = Value, value = record) and search (one `BlockSet` per
//! attribute, locator = term substring, key = original term, value =
//! Position) — and the query surface built on top of them (§4.5).
//!
//! Grounded on `dgm.rs`'s multi-tier index composition (a mutable head plus
//! a set of immutable, on-disk tiers, routed to by probing each tier in
//! turn) and `shrobt.rs`'s sharded lookup-by-bloom-then-scan shape.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, info};

use crate::block::Block;
use crate::error::{Error, Result};
use crate::pool;
use crate::record::Record;
use crate::revision::Action;
use crate::value::{PrimaryKey, Position, Serialize, Text, Value};

/// Comparison operators for [`Database::find`] (§6 RPC verb list). `Eq`/
/// `LinksTo` take one operand and are bloom-gated; every other operator
/// scans the full attribute run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    Regex,
    NotRegex,
    LinksTo,
}

impl Operator {
    fn matches(&self, candidate: &Value, operands: &[Value]) -> Result<bool> {
        let ok = match self {
            Operator::Eq | Operator::LinksTo => {
                operands.len() == 1 && candidate == &operands[0]
            }
            Operator::Neq => operands.len() == 1 && candidate != &operands[0],
            Operator::Lt => operands.len() == 1 && candidate < &operands[0],
            Operator::Lte => operands.len() == 1 && candidate <= &operands[0],
            Operator::Gt => operands.len() == 1 && candidate > &operands[0],
            Operator::Gte => operands.len() == 1 && candidate >= &operands[0],
            Operator::Between => {
                operands.len() == 2 && candidate >= &operands[0] && candidate <= &operands[1]
            }
            Operator::Regex | Operator::NotRegex => {
                let pattern = operands
                    .get(0)
                    .and_then(Value::as_text)
                    .ok_or_else(|| Error::InvariantViolation("REGEX operand must be a string".into()))?;
                let haystack = candidate.as_text().map(|t| t.as_str()).unwrap_or("");
                let re = regex::Regex::new(pattern.as_str())
                    .map_err(|e| Error::InvariantViolation(format!("bad regex: {}", e)))?;
                let found = re.is_match(haystack);
                if matches!(self, Operator::Regex) { found } else { !found }
            }
        };
        Ok(ok)
    }
}

const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// One flavor's mutable-head-plus-immutable-tiers collection (§3 Block
/// lifecycle, §4.5 `accept`).
struct BlockSet<L, K, V> {
    dir: PathBuf,
    composite_index: bool,
    size_cap: usize,
    next_id: AtomicU64,
    current: RwLock<Arc<Block<L, K, V>>>,
    immutable: RwLock<Vec<Arc<Block<L, K, V>>>>,
    roll: std::sync::Mutex<()>,
}

impl<L, K, V> BlockSet<L, K, V>
where
    L: Clone + Ord + Serialize + Send + Sync + 'static,
    K: Clone + Ord + Serialize + Send + Sync + 'static,
    V: Clone + Ord + Serialize + Send + Sync + 'static,
{
    fn new(dir: impl Into<PathBuf>, composite_index: bool, size_cap: usize) -> BlockSet<L, K, V> {
        let dir = dir.into();
        let first: Block<L, K, V> = Block::new_mutable(0, &dir, composite_index);
        BlockSet {
            dir,
            composite_index,
            size_cap: if size_cap == 0 { DEFAULT_BLOCK_SIZE } else { size_cap },
            next_id: AtomicU64::new(1),
            current: RwLock::new(Arc::new(first)),
            immutable: RwLock::new(vec![]),
            roll: std::sync::Mutex::new(()),
        }
    }

    /// Reopen persisted immutable blocks (`{id}.blk`/`.bf`/`.idx` triples)
    /// from a previous process, if any, then start a fresh mutable head
    /// numbered past the highest block id found.
    fn open(dir: impl Into<PathBuf>, composite_index: bool, size_cap: usize) -> Result<BlockSet<L, K, V>> {
        let dir = dir.into();
        let mut ids = vec![];
        if dir.exists() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(stripped) = name.strip_suffix(".blk") {
                    if let Ok(id) = stripped.parse::<u64>() {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort_unstable();
        let mut immutable = vec![];
        for id in &ids {
            immutable.push(Arc::new(Block::open(*id, &dir, composite_index)?));
        }
        let next_id = ids.last().map(|id| id + 1).unwrap_or(0);
        let current: Block<L, K, V> = Block::new_mutable(next_id, &dir, composite_index);
        Ok(BlockSet {
            dir,
            composite_index,
            size_cap: if size_cap == 0 { DEFAULT_BLOCK_SIZE } else { size_cap },
            next_id: AtomicU64::new(next_id + 1),
            current: RwLock::new(Arc::new(current)),
            immutable: RwLock::new(immutable),
            roll: std::sync::Mutex::new(()),
        })
    }

    fn accept(&self, locator: L, key: K, value: V, version: u64, action: Action) -> Result<()> {
        let current = self.current.read().unwrap().clone();
        current.insert(locator, key, value, version, action)?;
        if current.mutable_len() >= self.size_cap {
            self.roll(&current)?;
        }
        Ok(())
    }

    /// Flush the current mutable block to immutable and swap in a fresh
    /// one. `expected` guards against two threads racing to roll the same
    /// block (only the one that still sees `current == expected` rolls).
    fn roll(&self, expected: &Arc<Block<L, K, V>>) -> Result<()> {
        let _guard = self.roll.lock().unwrap();
        let mut current = self.current.write().unwrap();
        if !Arc::ptr_eq(&*current, expected) {
            return Ok(()); // someone else already rolled it.
        }
        current.flush()?;
        self.immutable.write().unwrap().push(current.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        *current = Arc::new(Block::new_mutable(id, &self.dir, self.composite_index));
        debug!(target: "database", "rolled block set at {:?} to block {}", self.dir, id);
        Ok(())
    }

    /// Force-flush the current mutable block even under the size cap
    /// (used by maintenance/compaction paths and by tests).
    fn flush_current(&self) -> Result<()> {
        let current = self.current.read().unwrap().clone();
        if current.is_mutable() && current.mutable_len() > 0 {
            self.roll(&current)?;
        }
        Ok(())
    }

    fn seek_all(&self, locator: &L, key: Option<&K>, timestamp: Option<u64>) -> Result<Vec<crate::revision::Revision<L, K, V>>> {
        let mut out = self.current.read().unwrap().seek(locator, key, timestamp)?;
        for block in self.immutable.read().unwrap().iter() {
            if block.might_contain(locator, key) {
                out.extend(block.seek(locator, key, timestamp)?);
            }
        }
        Ok(out)
    }
}

const STOPWORDS: &[&str] = &["a", "an", "and", "the", "of", "in", "on", "to", "is", "it"];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Lowercase + whitespace-tokenize, preserving the original token index so
/// that stopword tokens still consume a position slot (§4.1 `Position` is
/// "token index in original text").
fn tokenize(text: &str) -> Vec<(u32, String)> {
    text.to_lowercase()
        .split_whitespace()
        .enumerate()
        .map(|(i, tok)| (i as u32, tok.to_string()))
        .collect()
}

/// Every non-empty contiguous substring of `token`, deduplicated.
fn substrings(token: &str) -> HashSet<String> {
    let chars: Vec<char> = token.chars().collect();
    let mut out = HashSet::new();
    for i in 0..chars.len() {
        for j in i + 1..=chars.len() {
            out.insert(chars[i..j].iter().collect());
        }
    }
    out
}

/// Owner of the primary/secondary/search Block sets and the query surface
/// built on top of them (§4.5).
pub struct Database {
    primary: BlockSet<PrimaryKey, Text, Value>,
    secondary: BlockSet<Text, Value, PrimaryKey>,
    search: RwLock<HashMap<Text, Arc<BlockSet<Text, Text, Position>>>>,
    dir: PathBuf,
    block_size: usize,
}

impl Database {
    pub fn new(dir: impl Into<PathBuf>, block_size: usize) -> Database {
        let dir = dir.into();
        Database {
            primary: BlockSet::new(dir.join("primary"), false, block_size),
            secondary: BlockSet::new(dir.join("secondary"), true, block_size),
            search: RwLock::new(HashMap::new()),
            dir,
            block_size,
        }
    }

    /// Reopen a database directory written by a previous process: primary
    /// and secondary block sets reload their persisted blocks directly;
    /// search block sets are discovered lazily by scanning `db/search/*`
    /// subdirectories (one per attribute, named by the attribute text).
    pub fn open(dir: impl Into<PathBuf>, block_size: usize) -> Result<Database> {
        let dir = dir.into();
        let primary = BlockSet::open(dir.join("primary"), false, block_size)?;
        let secondary = BlockSet::open(dir.join("secondary"), true, block_size)?;
        let mut search = HashMap::new();
        let search_root = dir.join("search");
        if search_root.exists() {
            for entry in std::fs::read_dir(&search_root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    let attribute = Text::from(entry.file_name().to_string_lossy().into_owned());
                    let blockset = BlockSet::open(entry.path(), false, block_size)?;
                    search.insert(attribute, Arc::new(blockset));
                }
            }
        }
        info!(target: "database", "reopened database at {:?}", dir);
        Ok(Database { primary, secondary, search: RwLock::new(search), dir, block_size })
    }

    fn search_blockset(&self, attribute: &Text) -> Arc<BlockSet<Text, Text, Position>> {
        if let Some(bs) = self.search.read().unwrap().get(attribute) {
            return bs.clone();
        }
        let mut search = self.search.write().unwrap();
        search
            .entry(attribute.clone())
            .or_insert_with(|| {
                let dir = self.dir.join("search").join(attribute.as_str());
                // Search blocks bloom-key on the substring locator alone
                // (§4.2) — unlike secondary blocks, which key on (locator,
                // key) — so the bloom actually filters a term lookup
                // instead of degrading to "always maybe present".
                Arc::new(BlockSet::new(dir, false, self.block_size))
            })
            .clone()
    }

    /// §4.5 `accept` for the primary index.
    pub fn accept_primary(&self, record: PrimaryKey, attribute: Text, value: Value, version: u64, action: Action) -> Result<()> {
        self.primary.accept(record, attribute, value, version, action)
    }

    /// §4.5 `accept` for the secondary index.
    pub fn accept_secondary(&self, attribute: Text, value: Value, record: PrimaryKey, version: u64, action: Action) -> Result<()> {
        self.secondary.accept(attribute, value, record, version, action)
    }

    /// §4.2 search-block specialization: tokenize, expand every token into
    /// its substrings (skipping stopwords), and fan the inserts out across
    /// the `"search-index"` pool. Blocks until every subtask has drained.
    pub fn accept_search(&self, attribute: &Text, text: &str, record: PrimaryKey, version: u64, action: Action) -> Result<()> {
        let blockset = self.search_blockset(attribute);
        let mut items = vec![];
        for (position, token) in tokenize(text) {
            if is_stopword(&token) {
                continue;
            }
            for substring in substrings(&token) {
                items.push((substring, token.clone(), position));
            }
        }
        let blockset = blockset.clone();
        let results = pool::fan_out(pool::SEARCH_INDEX, items, move |(substring, term, position)| {
            blockset.accept(
                Text::from(substring),
                Text::from(term),
                Position::new(record, position),
                version,
                action,
            )
        })?;
        for r in results {
            r?;
        }
        Ok(())
    }

    /// Raw primary revisions for `record` (current + immutable blocks
    /// only — the Engine merges these with any still-buffered revisions
    /// before building a [`Record`], since the Buffer is searchable ahead
    /// of `transfer()`, §4.4).
    pub fn primary_revisions(
        &self,
        record: &PrimaryKey,
        timestamp: Option<u64>,
    ) -> Result<Vec<crate::revision::Revision<PrimaryKey, Text, Value>>> {
        self.primary.seek_all(record, None, timestamp)
    }

    /// §4.5 `get`: assemble a [`Record`] for `record` from every revision
    /// at or before `timestamp` (primary + secondary stay consistent by
    /// construction, §3 invariant 5, so only the primary index is read
    /// here).
    pub fn get(&self, record: &PrimaryKey, timestamp: Option<u64>) -> Result<Record<Text, Value>> {
        let revisions = self.primary_revisions(record, timestamp)?;
        Ok(Record::from_revisions(
            revisions.into_iter().map(|r| {
                let (_, key, value, version, action) = r.into_parts();
                (key, value, version, action)
            }),
        ))
    }

    /// §4.5 `find`: equality/links-to probe the bloom-gated exact path;
    /// every other operator scans the full attribute run and filters.
    pub fn find(&self, attribute: &Text, operator: Operator, operands: &[Value], timestamp: u64) -> Result<HashSet<PrimaryKey>> {
        let revisions = match operator {
            Operator::Eq | Operator::LinksTo if operands.len() == 1 => {
                self.secondary.seek_all(attribute, Some(&operands[0]), Some(timestamp))?
            }
            _ => self.secondary.seek_all(attribute, None, Some(timestamp))?,
        };

        let mut counts: BTreeMap<(Value, PrimaryKey), u64> = BTreeMap::new();
        for r in revisions {
            *counts.entry((r.key().clone(), *r.value())).or_insert(0) += 1;
        }

        let mut out = HashSet::new();
        for ((value, record), n) in counts {
            if n % 2 == 1 && operator.matches(&value, operands)? {
                out.insert(record);
            }
        }
        Ok(out)
    }

    /// §4.5 `search`: tokenize the query the same way indexing does,
    /// intersect postings per query token, and require the matched
    /// positions to appear in increasing order within a record (preserving
    /// the query's relative term order).
    pub fn search(&self, attribute: &Text, query: &str) -> Result<HashSet<PrimaryKey>> {
        let blockset = match self.search.read().unwrap().get(attribute) {
            Some(bs) => bs.clone(),
            None => return Ok(HashSet::new()),
        };
        let query_tokens: Vec<String> = tokenize(query)
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| !is_stopword(t))
            .collect();
        if query_tokens.is_empty() {
            return Ok(HashSet::new());
        }

        // postings[i] = record -> sorted live positions for query token i.
        let mut postings: Vec<HashMap<PrimaryKey, Vec<u32>>> = vec![];
        for token in &query_tokens {
            let revisions = blockset.seek_all(&Text::from(token.as_str()), None, None)?;
            let mut counts: BTreeMap<(PrimaryKey, u32), u64> = BTreeMap::new();
            for r in revisions {
                let position = r.value();
                *counts.entry((position.record, position.index)).or_insert(0) += 1;
            }
            let mut by_record: HashMap<PrimaryKey, Vec<u32>> = HashMap::new();
            for ((record, index), n) in counts {
                if n % 2 == 1 {
                    by_record.entry(record).or_default().push(index);
                }
            }
            for positions in by_record.values_mut() {
                positions.sort_unstable();
            }
            postings.push(by_record);
        }

        let candidates: Vec<PrimaryKey> = postings[0].keys().cloned().collect();
        let mut out = HashSet::new();
        'records: for record in candidates {
            let mut floor: i64 = -1;
            for posting in &postings {
                let positions = match posting.get(&record) {
                    Some(p) => p,
                    None => continue 'records,
                };
                match positions.iter().find(|&&p| p as i64 > floor) {
                    Some(&p) => floor = p as i64,
                    None => continue 'records,
                }
            }
            out.insert(record);
        }
        Ok(out)
    }

    /// Flush every block set's current mutable head, regardless of size
    /// cap, concurrently on the `"block-flush"` pool (§4.8). Used by
    /// maintenance/compaction and by `Engine::open` before a clean
    /// shutdown-and-reopen round trip.
    pub fn flush_all(&self) -> Result<()> {
        let search_sets: Vec<Arc<BlockSet<Text, Text, Position>>> =
            self.search.read().unwrap().values().cloned().collect();
        let primary = &self.primary;
        let secondary = &self.secondary;
        std::thread::scope(|scope| -> Result<()> {
            let p = scope.spawn(|| primary.flush_current());
            let s = scope.spawn(|| secondary.flush_current());
            pool::named(pool::BLOCK_FLUSH)?.install(|| {
                use rayon::prelude::*;
                search_sets.par_iter().try_for_each(|bs| bs.flush_current())
            })?;
            p.join().expect("primary flush thread panicked")?;
            s.join().expect("secondary flush thread panicked")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod database_test;
