//! Canonical typed leaves: [`Value`], [`Text`], [`Position`], [`PrimaryKey`].
//!
//! Every leaf has a total byte encoding (big-endian, per §6 of the on-disk
//! layout), a total order, and equality semantics that distinguish
//! `forStorage` values (carry a version, used for CAS-style comparisons)
//! from `notForStorage` values (query-only, version is absent).

use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Serialize types and values to/from their canonical binary form.
///
/// Mirrors the teacher's `core::Serialize` trait: `encode` appends to an
/// existing buffer and returns the number of bytes written; `decode`
/// consumes a prefix of `buf` and returns the number of bytes read.
pub trait Serialize: Sized {
    fn encode(&self, buf: &mut Vec<u8>) -> usize;
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;
}

/// A 64-bit record identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimaryKey(pub u64);

impl Serialize for PrimaryKey {
    fn encode(&self, buf: &mut Vec<u8>) -> usize {
        buf.extend_from_slice(&self.0.to_be_bytes());
        8
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 8 {
            return Err(Error::Corruption("PrimaryKey: short buffer".into()));
        }
        let mut scratch = [0u8; 8];
        scratch.copy_from_slice(&buf[..8]);
        Ok((PrimaryKey(u64::from_be_bytes(scratch)), 8))
    }
}

/// A UTF-8 byte sequence, ordered byte-lexicographically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Text(pub String);

impl Text {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Text {
        Text(s.to_string())
    }
}

impl From<String> for Text {
    fn from(s: String) -> Text {
        Text(s)
    }
}

impl Serialize for Text {
    fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let bytes = self.0.as_bytes();
        buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(bytes);
        4 + bytes.len()
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(Error::Corruption("Text: short length prefix".into()));
        }
        let mut scratch = [0u8; 4];
        scratch.copy_from_slice(&buf[..4]);
        let len = u32::from_be_bytes(scratch) as usize;
        if buf.len() < 4 + len {
            return Err(Error::Corruption("Text: short payload".into()));
        }
        let s = std::str::from_utf8(&buf[4..4 + len])
            .map_err(|e| Error::Corruption(format!("Text: invalid utf8: {}", e)))?
            .to_string();
        Ok((Text(s), 4 + len))
    }
}

/// `(record, token-index)` — identifies one occurrence of a term within a
/// STRING value's original text. Used only by the search index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub record: PrimaryKey,
    pub index: u32,
}

impl Position {
    pub fn new(record: PrimaryKey, index: u32) -> Position {
        Position { record, index }
    }
}

impl Serialize for Position {
    fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let n = self.record.encode(buf);
        buf.extend_from_slice(&self.index.to_be_bytes());
        n + 4
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (record, n) = PrimaryKey::decode(buf)?;
        if buf.len() < n + 4 {
            return Err(Error::Corruption("Position: short buffer".into()));
        }
        let mut scratch = [0u8; 4];
        scratch.copy_from_slice(&buf[n..n + 4]);
        let index = u32::from_be_bytes(scratch);
        Ok((Position { record, index }, n + 4))
    }
}

/// Type tags, in the total-order-determining sequence from §4.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
enum Tag {
    Boolean = 0,
    Integer = 1,
    Long = 2,
    Float = 3,
    Double = 4,
    Text = 5,
    Link = 6,
}

impl Tag {
    fn from_u8(b: u8) -> Result<Tag> {
        Ok(match b {
            0 => Tag::Boolean,
            1 => Tag::Integer,
            2 => Tag::Long,
            3 => Tag::Float,
            4 => Tag::Double,
            5 => Tag::Text,
            6 => Tag::Link,
            _ => return Err(Error::Corruption(format!("Value: unknown tag {}", b))),
        })
    }
}

/// A typed value payload, plus an optional storage version.
///
/// `version.is_some()` marks the value as `forStorage`: it was (or will be)
/// written as part of a [`crate::revision::Revision`] and equality takes
/// the version into account. `version.is_none()` marks a `notForStorage`
/// value built purely for a query (e.g. the right-hand side of a `find`).
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    payload: Payload,
    version: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
enum Payload {
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(u32), // bit pattern, for total ordering
    Double(u64),
    Text(Text),
    Link(PrimaryKey),
}

impl Payload {
    fn tag(&self) -> Tag {
        match self {
            Payload::Boolean(_) => Tag::Boolean,
            Payload::Integer(_) => Tag::Integer,
            Payload::Long(_) => Tag::Long,
            Payload::Float(_) => Tag::Float,
            Payload::Double(_) => Tag::Double,
            Payload::Text(_) => Tag::Text,
            Payload::Link(_) => Tag::Link,
        }
    }
}

impl Value {
    pub fn boolean(b: bool) -> Value {
        Value { payload: Payload::Boolean(b), version: None }
    }

    pub fn integer(n: i32) -> Value {
        Value { payload: Payload::Integer(n), version: None }
    }

    pub fn long(n: i64) -> Value {
        Value { payload: Payload::Long(n), version: None }
    }

    pub fn float(n: f32) -> Value {
        Value { payload: Payload::Float(n.to_bits()), version: None }
    }

    pub fn double(n: f64) -> Value {
        Value { payload: Payload::Double(n.to_bits()), version: None }
    }

    pub fn text<T: Into<Text>>(t: T) -> Value {
        Value { payload: Payload::Text(t.into()), version: None }
    }

    pub fn link(record: PrimaryKey) -> Value {
        Value { payload: Payload::Link(record), version: None }
    }

    /// Tag the value as `forStorage` with the given revision version.
    pub fn for_storage(mut self, version: u64) -> Value {
        self.version = Some(version);
        self
    }

    pub fn is_for_storage(&self) -> bool {
        self.version.is_some()
    }

    /// Strip any `forStorage` version tag, keeping only the payload.
    ///
    /// The engine stores this form in every revision's key/value slot:
    /// tagging a revision's own value with its own version would make an
    /// ADD at one version and a REMOVE of "the same" value at a later
    /// version compare unequal, breaking the parity count they're supposed
    /// to cancel in (§3, §9). `forStorage` tagging stays a client-facing
    /// CAS concept the engine itself never writes to disk.
    pub fn without_version(&self) -> Value {
        Value { payload: self.payload.clone(), version: None }
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn is_string(&self) -> bool {
        matches!(self.payload, Payload::Text(_))
    }

    pub fn as_text(&self) -> Option<&Text> {
        match &self.payload {
            Payload::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self.payload {
            Payload::Long(n) => Some(n),
            Payload::Integer(n) => Some(n as i64),
            _ => None,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.payload.tag().hash(state);
        match &self.payload {
            Payload::Boolean(b) => b.hash(state),
            Payload::Integer(n) => n.hash(state),
            Payload::Long(n) => n.hash(state),
            Payload::Float(bits) => bits.hash(state),
            Payload::Double(bits) => bits.hash(state),
            Payload::Text(t) => t.hash(state),
            Payload::Link(pk) => pk.hash(state),
        }
        self.version.hash(state);
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Value) -> Ordering {
        self.payload
            .tag()
            .cmp(&other.payload.tag())
            .then_with(|| match (&self.payload, &other.payload) {
                (Payload::Boolean(a), Payload::Boolean(b)) => a.cmp(b),
                (Payload::Integer(a), Payload::Integer(b)) => a.cmp(b),
                (Payload::Long(a), Payload::Long(b)) => a.cmp(b),
                (Payload::Float(a), Payload::Float(b)) => a.cmp(b),
                (Payload::Double(a), Payload::Double(b)) => a.cmp(b),
                (Payload::Text(a), Payload::Text(b)) => a.cmp(b),
                (Payload::Link(a), Payload::Link(b)) => a.cmp(b),
                _ => unreachable!("tag comparison already separated payload kinds"),
            })
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl Serialize for Value {
    fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        buf.push(self.payload.tag() as u8);
        match self.version {
            Some(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            None => buf.push(0),
        }
        match &self.payload {
            Payload::Boolean(b) => buf.push(*b as u8),
            Payload::Integer(n) => buf.extend_from_slice(&n.to_be_bytes()),
            Payload::Long(n) => buf.extend_from_slice(&n.to_be_bytes()),
            Payload::Float(bits) => buf.extend_from_slice(&bits.to_be_bytes()),
            Payload::Double(bits) => buf.extend_from_slice(&bits.to_be_bytes()),
            Payload::Text(t) => {
                t.encode(buf);
            }
            Payload::Link(pk) => {
                pk.encode(buf);
            }
        }
        buf.len() - start
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::Corruption("Value: short header".into()));
        }
        let tag = Tag::from_u8(buf[0])?;
        let mut pos = 1;
        let version = match buf[pos] {
            0 => {
                pos += 1;
                None
            }
            1 => {
                pos += 1;
                if buf.len() < pos + 8 {
                    return Err(Error::Corruption("Value: short version".into()));
                }
                let mut scratch = [0u8; 8];
                scratch.copy_from_slice(&buf[pos..pos + 8]);
                pos += 8;
                Some(u64::from_be_bytes(scratch))
            }
            b => return Err(Error::Corruption(format!("Value: bad forStorage flag {}", b))),
        };
        let (payload, n) = match tag {
            Tag::Boolean => {
                if buf.len() < pos + 1 {
                    return Err(Error::Corruption("Value: short bool".into()));
                }
                (Payload::Boolean(buf[pos] != 0), 1)
            }
            Tag::Integer => {
                if buf.len() < pos + 4 {
                    return Err(Error::Corruption("Value: short i32".into()));
                }
                let mut scratch = [0u8; 4];
                scratch.copy_from_slice(&buf[pos..pos + 4]);
                (Payload::Integer(i32::from_be_bytes(scratch)), 4)
            }
            Tag::Long => {
                if buf.len() < pos + 8 {
                    return Err(Error::Corruption("Value: short i64".into()));
                }
                let mut scratch = [0u8; 8];
                scratch.copy_from_slice(&buf[pos..pos + 8]);
                (Payload::Long(i64::from_be_bytes(scratch)), 8)
            }
            Tag::Float => {
                if buf.len() < pos + 4 {
                    return Err(Error::Corruption("Value: short f32".into()));
                }
                let mut scratch = [0u8; 4];
                scratch.copy_from_slice(&buf[pos..pos + 4]);
                (Payload::Float(u32::from_be_bytes(scratch)), 4)
            }
            Tag::Double => {
                if buf.len() < pos + 8 {
                    return Err(Error::Corruption("Value: short f64".into()));
                }
                let mut scratch = [0u8; 8];
                scratch.copy_from_slice(&buf[pos..pos + 8]);
                (Payload::Double(u64::from_be_bytes(scratch)), 8)
            }
            Tag::Text => {
                let (t, n) = Text::decode(&buf[pos..])?;
                (Payload::Text(t), n)
            }
            Tag::Link => {
                let (pk, n) = PrimaryKey::decode(&buf[pos..])?;
                (Payload::Link(pk), n)
            }
        };
        Ok((Value { payload, version }, pos + n))
    }
}

#[cfg(test)]
mod value_test;
