//! [`Block`]: an append-only, sorted-on-flush collection of revisions over
//! one (locator, key, value) schema (§4.2). Two lifecycle phases —
//! `Mutable` (in memory, accepts inserts, searchable by scan) and
//! `Immutable` (flushed, bloom-indexed, served by memory-mapped read) —
//! which a Block moves through exactly once (§3 invariant 4).
//!
//! File layout mirrors `robt.rs`'s doc-commented format, simplified to the
//! three sidecar files named in SPEC_FULL.md §6: `{id}.blk` (sorted,
//! length-prefixed revisions), `{id}.bf` (bloom filter), `{id}.idx`
//! (locator → byte range).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs2::FileExt;
use memmap2::Mmap;

use crate::bloom::BlockBloom;
use crate::error::{Error, Result};
use crate::revision::{Action, Revision};
use crate::value::Serialize;

const MAGIC: &[u8; 4] = b"CCBK";
const FORMAT_VERSION: u32 = 1;

/// Byte range `[start, end)` within a flushed `.blk` file covering every
/// revision for one locator (secondary blocks key this by (locator,key)
/// pair instead, see [`Block::composite_index`]).
#[derive(Clone, Copy, Debug)]
struct Span {
    start: u64,
    end: u64,
}

enum State<L, K, V> {
    Mutable { revisions: Vec<Revision<L, K, V>> },
    Immutable { mmap: Mmap, index: BTreeMap<Vec<u8>, Span>, bloom: BlockBloom },
    /// I/O or corruption error observed on this block; further reads fail
    /// fast instead of touching the file again (§7 IO/Corruption).
    Quarantined { reason: String },
}

/// A single flushed or in-progress segment of one index flavor.
pub struct Block<L, K, V> {
    id: u64,
    dir: PathBuf,
    /// Secondary blocks bloom-key on (locator,key); primary and search
    /// blocks bloom-key on locator alone (§4.2).
    composite_index: bool,
    state: RwLock<State<L, K, V>>,
}

fn blk_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:09}.blk", id))
}
fn bf_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:09}.bf", id))
}
fn idx_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:09}.idx", id))
}

impl<L, K, V> Block<L, K, V>
where
    L: Clone + Ord + Serialize,
    K: Clone + Ord + Serialize,
    V: Clone + Ord + Serialize,
{
    /// Create a new, empty, mutable block.
    pub fn new_mutable(id: u64, dir: impl Into<PathBuf>, composite_index: bool) -> Block<L, K, V> {
        Block {
            id,
            dir: dir.into(),
            composite_index,
            state: RwLock::new(State::Mutable { revisions: vec![] }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_mutable(&self) -> bool {
        matches!(*self.state.read().unwrap(), State::Mutable { .. })
    }

    /// Number of revisions accumulated so far, for the Database's
    /// roll-to-a-new-mutable-block size cap (§4.5 `accept`). Zero once the
    /// block has flushed (callers should already have rolled over before
    /// then).
    pub fn mutable_len(&self) -> usize {
        match &*self.state.read().unwrap() {
            State::Mutable { revisions } => revisions.len(),
            _ => 0,
        }
    }

    fn bloom_key(&self, locator: &L, key: Option<&K>) -> Vec<u8> {
        let mut buf = vec![];
        locator.encode(&mut buf);
        if self.composite_index {
            if let Some(key) = key {
                key.encode(&mut buf);
            }
        }
        buf
    }

    /// §4.2 `insert`. Fails if the block has already been flushed.
    pub fn insert(
        &self,
        locator: L,
        key: K,
        value: V,
        version: u64,
        action: Action,
    ) -> Result<Revision<L, K, V>> {
        let mut state = self.state.write().unwrap();
        match &mut *state {
            State::Mutable { revisions } => {
                let rev = Revision::new(locator, key, value, version, action);
                revisions.push(rev.clone());
                Ok(rev)
            }
            State::Immutable { .. } => Err(Error::InvariantViolation(
                "Block::insert on an immutable block".into(),
            )),
            State::Quarantined { reason } => Err(Error::Corruption(reason.clone())),
        }
    }

    /// §4.2 `mightContain`. For secondary-flavored blocks, `key` is
    /// required (the bloom was built on the composite (locator,key)).
    pub fn might_contain(&self, locator: &L, key: Option<&K>) -> bool {
        let state = self.state.read().unwrap();
        match &*state {
            State::Mutable { .. } => true, // no bloom yet; scan will settle it.
            State::Immutable { bloom, .. } => match (self.composite_index, key) {
                (true, Some(_)) => bloom.contains(&self.bloom_key(locator, key)),
                (true, None) => true, // can't probe without the key half.
                (false, _) => bloom.contains(&self.bloom_key(locator, None)),
            },
            State::Quarantined { .. } => false,
        }
    }

    /// §4.2 `seek`: revisions matching `locator` (and optionally `key`),
    /// at or before `timestamp` when given.
    pub fn seek(
        &self,
        locator: &L,
        key: Option<&K>,
        timestamp: Option<u64>,
    ) -> Result<Vec<Revision<L, K, V>>> {
        let state = self.state.read().unwrap();
        match &*state {
            State::Mutable { revisions } => Ok(revisions
                .iter()
                .filter(|r| r.locator() == locator)
                .filter(|r| key.map_or(true, |k| r.key() == k))
                .filter(|r| timestamp.map_or(true, |t| r.version() <= t))
                .cloned()
                .collect()),
            State::Immutable { mmap, index, bloom } => {
                let probe_key = self.bloom_key(locator, key);
                if self.composite_index && key.is_some() && !bloom.contains(&probe_key) {
                    return Ok(vec![]);
                }
                let mut out = vec![];
                // Locator-only index: scan every span whose stored key
                // prefix (the locator bytes) matches; composite-index
                // blocks look up the exact (locator,key) span instead.
                if self.composite_index {
                    if key.is_some() {
                        if let Some(span) = index.get(&probe_key) {
                            decode_span(mmap, *span, &mut out)?;
                        }
                    } else {
                        let mut prefix = vec![];
                        locator.encode(&mut prefix);
                        for (k, span) in index.range(prefix.clone()..) {
                            if !k.starts_with(&prefix) {
                                break;
                            }
                            decode_span(mmap, *span, &mut out)?;
                        }
                    }
                } else {
                    let mut prefix = vec![];
                    locator.encode(&mut prefix);
                    if let Some(span) = index.get(&prefix) {
                        decode_span(mmap, *span, &mut out)?;
                    }
                }
                out.retain(|r: &Revision<L, K, V>| {
                    r.locator() == locator
                        && key.map_or(true, |k| r.key() == k)
                        && timestamp.map_or(true, |t| r.version() <= t)
                });
                Ok(out)
            }
            State::Quarantined { reason } => Err(Error::Corruption(reason.clone())),
        }
    }

    /// Full scan, for range operators over the secondary index (§4.5
    /// `find`) where the locator (attribute name) is known but the value
    /// range is not a single bloom-probeable key.
    pub fn scan(&self) -> Result<Vec<Revision<L, K, V>>> {
        let state = self.state.read().unwrap();
        match &*state {
            State::Mutable { revisions } => Ok(revisions.clone()),
            State::Immutable { mmap, index, .. } => {
                let mut out = vec![];
                for span in index.values() {
                    decode_span(mmap, *span, &mut out)?;
                }
                Ok(out)
            }
            State::Quarantined { reason } => Err(Error::Corruption(reason.clone())),
        }
    }

    /// §4.2 `flush`: sort by (locator,key,value,version), write the sorted
    /// run plus bloom and locator-index sidecars, and transition to
    /// `Immutable`. No-op (returns immediately) if already flushed.
    pub fn flush(&self) -> Result<()> {
        let mut revisions = {
            let state = self.state.read().unwrap();
            match &*state {
                State::Mutable { revisions } => revisions.clone(),
                State::Immutable { .. } => return Ok(()),
                State::Quarantined { reason } => return Err(Error::Corruption(reason.clone())),
            }
        };
        revisions.sort_by(|a, b| {
            a.locator()
                .cmp(b.locator())
                .then_with(|| a.key().cmp(b.key()))
                .then_with(|| a.value().cmp(b.value()))
                .then_with(|| a.version().cmp(&b.version()))
        });

        fs::create_dir_all(&self.dir)?;
        let blk = blk_path(&self.dir, self.id);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&blk)?;
        file.lock_exclusive()?;

        let mut header = vec![];
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        header.extend_from_slice(&self.id.to_be_bytes());
        file.write_all(&header)?;

        let mut bloom = BlockBloom::new();
        let mut index: BTreeMap<Vec<u8>, Span> = BTreeMap::new();
        let mut offset = header.len() as u64;
        // contiguous group of revisions sharing the same bloom key.
        let mut group_key: Option<Vec<u8>> = None;
        let mut group_start = offset;

        for rev in &revisions {
            let key = self.bloom_key(rev.locator(), Some(rev.key()));
            if group_key.as_ref() != Some(&key) {
                if let Some(prev_key) = group_key.take() {
                    index.insert(prev_key, Span { start: group_start, end: offset });
                }
                bloom.add_key(&key);
                group_key = Some(key);
                group_start = offset;
            }
            let bytes = rev.to_bytes();
            file.write_all(&bytes)?;
            offset += bytes.len() as u64;
        }
        if let Some(prev_key) = group_key {
            index.insert(prev_key, Span { start: group_start, end: offset });
        }
        file.sync_all()?;
        file.unlock()?;

        bloom.build()?;
        let bloom_bytes = bloom.to_bytes()?;
        fs::write(bf_path(&self.dir, self.id), bloom_bytes)?;

        let mut idx_bytes = vec![];
        idx_bytes.extend_from_slice(&(index.len() as u32).to_be_bytes());
        for (key, span) in &index {
            idx_bytes.extend_from_slice(&(key.len() as u32).to_be_bytes());
            idx_bytes.extend_from_slice(key);
            idx_bytes.extend_from_slice(&span.start.to_be_bytes());
            idx_bytes.extend_from_slice(&span.end.to_be_bytes());
        }
        fs::write(idx_path(&self.dir, self.id), idx_bytes)?;

        let mmap = open_mmap(&blk)?;
        let mut state = self.state.write().unwrap();
        *state = State::Immutable { mmap, index, bloom };
        Ok(())
    }

    /// Reopen a previously-flushed block from its three sidecar files.
    pub fn open(id: u64, dir: impl Into<PathBuf>, composite_index: bool) -> Result<Block<L, K, V>> {
        let dir = dir.into();
        let bloom_bytes = fs::read(bf_path(&dir, id))
            .map_err(|e| Error::InvalidFile(format!("missing bloom for block {}: {}", id, e)))?;
        let bloom = BlockBloom::from_bytes(&bloom_bytes)?;

        let idx_bytes = fs::read(idx_path(&dir, id))
            .map_err(|e| Error::InvalidFile(format!("missing index for block {}: {}", id, e)))?;
        let index = decode_index(&idx_bytes)?;

        let mmap = open_mmap(&blk_path(&dir, id))?;
        Ok(Block {
            id,
            dir,
            composite_index,
            state: RwLock::new(State::Immutable { mmap, index, bloom }),
        })
    }

    /// Mark the block unreadable after an I/O or corruption error (§7).
    pub fn quarantine(&self, reason: String) {
        let mut state = self.state.write().unwrap();
        *state = State::Quarantined { reason };
    }
}

fn open_mmap(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: block files are append-only and never mutated in place once
    // written (§3 invariant 4); no other writer touches this path after
    // flush() releases its exclusive lock.
    unsafe { Mmap::map(&file).map_err(Error::from) }
}

fn decode_index(buf: &[u8]) -> Result<BTreeMap<Vec<u8>, Span>> {
    if buf.len() < 4 {
        return Err(Error::Corruption("block index: short header".into()));
    }
    let mut scratch = [0u8; 4];
    scratch.copy_from_slice(&buf[..4]);
    let count = u32::from_be_bytes(scratch) as usize;
    let mut pos = 4;
    let mut out = BTreeMap::new();
    for _ in 0..count {
        if buf.len() < pos + 4 {
            return Err(Error::Corruption("block index: truncated entry".into()));
        }
        scratch.copy_from_slice(&buf[pos..pos + 4]);
        let klen = u32::from_be_bytes(scratch) as usize;
        pos += 4;
        if buf.len() < pos + klen + 16 {
            return Err(Error::Corruption("block index: truncated entry".into()));
        }
        let key = buf[pos..pos + klen].to_vec();
        pos += klen;
        let mut s = [0u8; 8];
        s.copy_from_slice(&buf[pos..pos + 8]);
        let start = u64::from_be_bytes(s);
        pos += 8;
        s.copy_from_slice(&buf[pos..pos + 8]);
        let end = u64::from_be_bytes(s);
        pos += 8;
        out.insert(key, Span { start, end });
    }
    Ok(out)
}

fn decode_span<L, K, V>(mmap: &Mmap, span: Span, out: &mut Vec<Revision<L, K, V>>) -> Result<()>
where
    L: Clone + Ord + Serialize,
    K: Clone + Ord + Serialize,
    V: Clone + Ord + Serialize,
{
    let mut slice = &mmap[span.start as usize..span.end as usize];
    while !slice.is_empty() {
        let (rev, n) = Revision::from_bytes(slice)?;
        out.push(rev);
        slice = &slice[n..];
    }
    Ok(())
}


#[cfg(test)]
mod block_test;
