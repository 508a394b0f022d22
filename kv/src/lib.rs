//! Ordered byte-key/byte-value storage with named sub-databases and
//! single-writer scoped transactions, backed by an embedded sled store.
//!
//! Writers stage their changes privately until the outermost scope commits;
//! reads taken on the writing thread observe the staged state, reads on any
//! other thread observe the last committed snapshot.

pub mod env;
pub mod error;
pub mod tx;

pub use env::{KvEnv, SubDb};
pub use error::KvError;
pub use tx::{KvIterator, ReadTx, WriteTx};
