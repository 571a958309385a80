//! [`Buffer`]: a durable, paginated write-ahead log of incoming revisions
//! (§4.4). Unlike `wal.rs`'s multi-shard, actor-driven journal, a single
//! `Buffer` is page-oriented and synchronous: callers append directly under
//! a per-page lock, and `transfer` drains the oldest sealed page into the
//! Database. Kept deliberately simpler than `wal.rs` because Concourse has
//! exactly one writer role (the Engine under a token lock) rather than
//! `wal.rs`'s multi-shard replicated-log use case.
//!
//! Page file layout (§6): `{id:09}.page` — header (`magic`, format version,
//! page id) followed by length-prefixed canonical revision bytes; a sealed
//! page additionally carries a trailing CRC-style checksum so a reopened
//! buffer can detect a page truncated mid-fsync.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::hash::Hasher as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crc::crc32::{self, Hasher32};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::revision::PrimaryRevision;

const MAGIC: &[u8; 4] = b"CCBF";
const FORMAT_VERSION: u32 = 1;
const DEFAULT_PAGE_SIZE: usize = 8 * 1024 * 1024;

fn page_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:09}.page", id))
}

fn checksum(bytes: &[u8]) -> u32 {
    // Detects a page torn by a crash mid-fsync (§7 IO/Corruption); not
    // cryptographic.
    let mut digest = crc32::Digest::new(crc32::IEEE);
    digest.write(bytes);
    digest.sum32()
}

struct Page {
    id: u64,
    body: RwLock<Vec<u8>>,
    revisions: RwLock<Vec<PrimaryRevision>>,
    sealed: RwLock<bool>,
}

impl Page {
    fn new(id: u64) -> Page {
        Page {
            id,
            body: RwLock::new(vec![]),
            revisions: RwLock::new(vec![]),
            sealed: RwLock::new(false),
        }
    }

    fn byte_len(&self) -> usize {
        self.body.read().unwrap().len()
    }

    fn push(&self, revision: PrimaryRevision) {
        let bytes = revision.to_bytes();
        self.body.write().unwrap().extend_from_slice(&bytes);
        self.revisions.write().unwrap().push(revision);
    }

    fn seal(&self) {
        *self.sealed.write().unwrap() = true;
    }

    fn is_sealed(&self) -> bool {
        *self.sealed.read().unwrap()
    }

    fn write_to(&self, dir: &Path) -> Result<()> {
        let path = page_path(dir, self.id);
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
        let mut out = vec![];
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        out.extend_from_slice(&self.id.to_be_bytes());
        let body = self.body.read().unwrap();
        out.extend_from_slice(&body);
        if self.is_sealed() {
            out.extend_from_slice(&checksum(&body).to_be_bytes());
        }
        file.write_all(&out)?;
        file.sync_all()?;
        Ok(())
    }
}

/// A durable, paginated write-ahead log (§4.4).
///
/// The current (unsealed, still being appended to) page lives at the back
/// of `pages`; all others are sealed and awaiting transfer.
pub struct Buffer {
    dir: PathBuf,
    page_size: usize,
    next_id: AtomicU64,
    pages: RwLock<VecDeque<Page>>,
}

impl Buffer {
    pub fn new(dir: impl Into<PathBuf>, page_size: usize) -> Buffer {
        let page_size = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size };
        let buffer = Buffer {
            dir: dir.into(),
            page_size,
            next_id: AtomicU64::new(0),
            pages: RwLock::new(VecDeque::new()),
        };
        buffer.pages.write().unwrap().push_back(Page::new(0));
        buffer.next_id.store(1, Ordering::SeqCst);
        buffer
    }

    /// Reload a buffer directory written by a previous process (reload
    /// cycle, mirroring `wal.rs`'s `Wal::load`). Pages with a valid
    /// checksum are kept sealed; the highest-numbered page, if unsealed,
    /// becomes the new current page.
    pub fn open(dir: impl Into<PathBuf>, page_size: usize) -> Result<Buffer> {
        let dir = dir.into();
        let mut ids = vec![];
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(stripped) = name.strip_suffix(".page") {
                    if let Ok(id) = stripped.parse::<u64>() {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort_unstable();

        let mut pages = VecDeque::new();
        for id in &ids {
            let (revisions, sealed) = read_page(&dir, *id)?;
            let page = Page::new(*id);
            for rev in revisions {
                page.push(rev);
            }
            if sealed {
                page.seal();
            }
            pages.push_back(page);
        }
        let next_id = ids.last().map(|id| id + 1).unwrap_or(0);
        if pages.is_empty() || pages.back().unwrap().is_sealed() {
            pages.push_back(Page::new(next_id));
        }
        let buffer = Buffer {
            dir,
            page_size: if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size },
            next_id: AtomicU64::new(next_id + 1),
            pages: RwLock::new(pages),
        };
        Ok(buffer)
    }

    /// §4.4 `insert`: append to the current page under its write lock;
    /// roll to a new page when the size cap is exceeded.
    pub fn insert(&self, revision: PrimaryRevision) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut pages = self.pages.write().unwrap();
        let needs_new_page = pages.back().map_or(true, |p| p.byte_len() >= self.page_size);
        if needs_new_page {
            if let Some(last) = pages.back() {
                last.seal();
                last.write_to(&self.dir)?;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            pages.push_back(Page::new(id));
            debug!(target: "buffer", "rolled to new page {}", id);
        }
        let current = pages.back().unwrap();
        current.push(revision);
        current.write_to(&self.dir)?;
        Ok(())
    }

    /// §4.4 `seek`: linear scan over every page currently held (in-memory
    /// current page plus any sealed-but-not-transferred pages), oldest
    /// first.
    pub fn seek(&self, locator: &crate::value::PrimaryKey) -> Vec<PrimaryRevision> {
        let pages = self.pages.read().unwrap();
        let mut out = vec![];
        for page in pages.iter() {
            let revisions = page.revisions.read().unwrap();
            out.extend(revisions.iter().filter(|r| r.locator() == locator).cloned());
        }
        out
    }

    /// All revisions currently buffered (used by `Database::accept`'s
    /// caller, the `Engine`, and by transfer).
    pub fn scan(&self) -> Vec<PrimaryRevision> {
        let pages = self.pages.read().unwrap();
        let mut out = vec![];
        for page in pages.iter() {
            out.extend(page.revisions.read().unwrap().iter().cloned());
        }
        out
    }

    /// §4.4 `transfer`: pop the oldest sealed page out of the scannable set
    /// *before* handing its revisions to `sink`, so a reader racing with the
    /// handoff finds the revision in the Buffer or in the Database, never
    /// both (a page present in both would double-count its revisions and
    /// flip their parity, §3 invariant 1). On success the page's file is
    /// deleted; on failure the page is put back so it can be scanned and
    /// retried. Returns `Ok(None)` if there is no sealed page to transfer
    /// (the current page never transfers while still being written to).
    pub fn transfer<F>(&self, sink: F) -> Result<Option<u64>>
    where
        F: FnOnce(&[PrimaryRevision]) -> Result<()>,
    {
        let page = {
            let mut pages = self.pages.write().unwrap();
            let pos = match pages.iter().position(|p| p.is_sealed()) {
                Some(pos) => pos,
                None => return Ok(None),
            };
            pages.remove(pos).expect("position came from this deque")
        };
        let id = page.id;
        let revisions = page.revisions.read().unwrap().clone();

        if let Err(err) = sink(&revisions) {
            self.pages.write().unwrap().push_front(page);
            return Err(err);
        }

        let path = page_path(&self.dir, id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        debug!(target: "buffer", "transferred and removed page {}", id);
        Ok(Some(id))
    }

    pub fn page_count(&self) -> usize {
        self.pages.read().unwrap().len()
    }
}

fn read_page(dir: &Path, id: u64) -> Result<(Vec<PrimaryRevision>, bool)> {
    let path = page_path(dir, id);
    let bytes = fs::read(&path)?;
    if bytes.len() < 4 + 4 + 8 {
        return Err(Error::Corruption(format!("buffer page {}: short header", id)));
    }
    if &bytes[0..4] != MAGIC {
        return Err(Error::Corruption(format!("buffer page {}: bad magic", id)));
    }
    let mut pos = 12;
    let mut revisions = vec![];
    // A sealed page carries a trailing 4-byte checksum; try to parse it
    // off the tail first and fall back to "no checksum" (still-open page)
    // if the remaining bytes don't parse as a valid revision stream.
    let body = &bytes[pos..];
    let (sealed, body) = match body.len() >= 4 {
        true => {
            let tail = &body[body.len() - 4..];
            let mut scratch = [0u8; 4];
            scratch.copy_from_slice(tail);
            let want = u32::from_be_bytes(scratch);
            let candidate = &body[..body.len() - 4];
            if checksum(candidate) == want {
                (true, candidate)
            } else {
                (false, body)
            }
        }
        false => (false, body),
    };
    let mut slice = body;
    while !slice.is_empty() {
        match PrimaryRevision::from_bytes(slice) {
            Ok((rev, n)) => {
                revisions.push(rev);
                slice = &slice[n..];
                pos += n;
            }
            Err(_) if sealed => {
                return Err(Error::Corruption(format!("buffer page {}: truncated revision", id)));
            }
            Err(_) => {
                // Unsealed page, tail entry may be a torn write; stop here.
                warn!(target: "buffer", "page {}: stopped at possible torn write", id);
                break;
            }
        }
    }
    Ok((revisions, sealed))
}

#[cfg(test)]
mod buffer_test;
