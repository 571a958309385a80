//! Block sidecar bloom filter (§4.2, §6): `mightContain(locator[, key])` in
//! O(1), false-positive rate tuned so overall fill stays ≤ 3% per §6.
//!
//! Two-phase, matching a Block's own mutable → immutable transition:
//! `add_key` during the mutable phase, a single `build()` call at flush
//! time, then read-only `contains` probes forever after.

use std::hash::Hash;

use cbordata::{Cbor, FromCbor, IntoCbor};
use xorfilter::Xor8;

use crate::error::{Error, Result};

/// Adaptor over [`xorfilter::Xor8`], the same bitmap backend the teacher
/// crate wires up in `bitmaps/xor8.rs`.
pub struct BlockBloom {
    filter: Xor8,
    built: bool,
}

impl Default for BlockBloom {
    fn default() -> BlockBloom {
        BlockBloom { filter: Xor8::new(), built: false }
    }
}

impl BlockBloom {
    pub fn new() -> BlockBloom {
        BlockBloom::default()
    }

    /// Stage a key for the next `build()`. No-op once built.
    pub fn add_key<Q: ?Sized + Hash>(&mut self, key: &Q) {
        debug_assert!(!self.built, "BlockBloom: add_key after build");
        self.filter.insert(key);
    }

    /// Finalize the filter. Called once, at flush time.
    pub fn build(&mut self) -> Result<()> {
        self.filter
            .build()
            .map_err(|e| Error::Corruption(format!("bloom build failed: {}", e)))?;
        self.built = true;
        Ok(())
    }

    /// Probe for possible membership. False positives are allowed, false
    /// negatives are not.
    pub fn contains<Q: ?Sized + Hash>(&self, key: &Q) -> bool {
        if !self.built {
            // Still accumulating: no readers should be probing yet, but
            // err on the side of "maybe present" rather than miss a key.
            return true;
        }
        self.filter.contains(key)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let cbor_val = self
            .filter
            .clone()
            .into_cbor()
            .map_err(|e| Error::Corruption(format!("bloom encode failed: {}", e)))?;
        let mut buf = vec![];
        cbor_val
            .encode(&mut buf)
            .map_err(|e| Error::Corruption(format!("bloom encode failed: {}", e)))?;
        Ok(buf)
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<BlockBloom> {
        let (cbor_val, _) = Cbor::decode(&mut buf)
            .map_err(|e| Error::Corruption(format!("bloom decode failed: {}", e)))?;
        let filter = Xor8::from_cbor(cbor_val)
            .map_err(|e| Error::Corruption(format!("bloom decode failed: {}", e)))?;
        Ok(BlockBloom { filter, built: true })
    }
}

#[cfg(test)]
mod bloom_test;
