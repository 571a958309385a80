//! Concourse: a schemaless, versioned document store.
//!
//! Every write is an immutable revision — add or remove of one
//! (record, attribute, value) triple — appended to an ever-growing history
//! rather than applied in place. Presence at any point in time is derived
//! by replaying that history's parity up to a timestamp, which is what
//! makes every read, current or historical, the same operation. Three
//! parallel indexes are kept over the revision stream: primary (by
//! record), secondary (by attribute/value, for range and comparison
//! queries) and search (by substring, for full-text queries), plus a
//! durable write-ahead buffer in front of them and a token-scoped lock
//! service mediating concurrent writers and transactions.
//!
//! [`engine::Engine`] is the single entry point: it owns one
//! [`buffer::Buffer`], one [`database::Database`] and one
//! [`lock::LockService`], and exposes the full read/write/query/transaction
//! surface on top of them.

mod block;
mod bloom;
mod buffer;
mod config;
mod database;
mod engine;
mod error;
mod lock;
mod pool;
mod record;
mod revision;
mod txn;
mod value;

pub use crate::config::Config;
pub use crate::database::Operator;
pub use crate::engine::{Engine, Timestamp};
pub use crate::error::{Error, Result};
pub use crate::lock::{HolderId, LockService, Token};
pub use crate::record::Record;
pub use crate::revision::{Action, PrimaryRevision, Revision, SearchRevision, SecondaryRevision};
pub use crate::txn::TransactionId;
pub use crate::value::{PrimaryKey, Position, Serialize, Text, Value};
