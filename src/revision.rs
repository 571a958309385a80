//! [`Revision`]: the only unit of writing. Immutable (locator, key, value,
//! version, action) quadruple, with three flavor aliases selecting the
//! (L,K,V) type triple bound to one index (§3, §4.1).

use crate::error::{Error, Result};
use crate::value::{PrimaryKey, Position, Serialize, Text, Value};

/// Whether a revision adds or removes presence of (locator,key,value).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
}

impl Action {
    fn to_u8(self) -> u8 {
        match self {
            Action::Add => 0,
            Action::Remove => 1,
        }
    }

    fn from_u8(b: u8) -> Result<Action> {
        match b {
            0 => Ok(Action::Add),
            1 => Ok(Action::Remove),
            _ => Err(Error::Corruption(format!("Revision: bad action byte {}", b))),
        }
    }
}

/// An immutable (locator, key, value, version, action) record.
///
/// `L`, `K`, `V` are bound differently per index flavor: see
/// [`PrimaryRevision`], [`SecondaryRevision`], [`SearchRevision`].
#[derive(Clone, Debug, PartialEq)]
pub struct Revision<L, K, V> {
    locator: L,
    key: K,
    value: V,
    version: u64,
    action: Action,
}

impl<L, K, V> Revision<L, K, V> {
    pub fn new(locator: L, key: K, value: V, version: u64, action: Action) -> Revision<L, K, V> {
        Revision { locator, key, value, version, action }
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn into_parts(self) -> (L, K, V, u64, Action) {
        (self.locator, self.key, self.value, self.version, self.action)
    }
}

impl<L, K, V> Revision<L, K, V>
where
    L: Serialize,
    K: Serialize,
    V: Serialize,
{
    /// Canonical byte form, prefixed by a `u32` total size (§4.1, §6).
    pub fn size(&self) -> usize {
        let mut scratch = vec![];
        self.encode_body(&mut scratch);
        4 + scratch.len()
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        self.locator.encode(buf);
        self.key.encode(buf);
        self.value.encode(buf);
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.push(self.action.to_u8());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = vec![];
        self.encode_body(&mut body);
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<(Revision<L, K, V>, usize)> {
        if buf.len() < 4 {
            return Err(Error::Corruption("Revision: short size prefix".into()));
        }
        let mut scratch = [0u8; 4];
        scratch.copy_from_slice(&buf[..4]);
        let body_len = u32::from_be_bytes(scratch) as usize;
        if buf.len() < 4 + body_len {
            return Err(Error::Corruption("Revision: truncated body".into()));
        }
        let body = &buf[4..4 + body_len];

        let mut pos = 0;
        let (locator, n) = L::decode(&body[pos..])?;
        pos += n;
        let (key, n) = K::decode(&body[pos..])?;
        pos += n;
        let (value, n) = V::decode(&body[pos..])?;
        pos += n;
        if body.len() < pos + 9 {
            return Err(Error::Corruption("Revision: short trailer".into()));
        }
        let mut vscratch = [0u8; 8];
        vscratch.copy_from_slice(&body[pos..pos + 8]);
        let version = u64::from_be_bytes(vscratch);
        let action = Action::from_u8(body[pos + 8])?;

        Ok((Revision { locator, key, value, version, action }, 4 + body_len))
    }
}

/// Flavor: locator = record id, key = attribute name, value = typed value.
pub type PrimaryRevision = Revision<PrimaryKey, Text, Value>;

/// Flavor: locator = attribute name, key = typed value, value = record id.
pub type SecondaryRevision = Revision<Text, Value, PrimaryKey>;

/// Flavor: locator = term substring, key = original term, value = position.
pub type SearchRevision = Revision<Text, Text, Position>;

#[cfg(test)]
mod revision_test;
