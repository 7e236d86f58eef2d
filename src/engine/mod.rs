//! This module provides the key/value storage engine: the [`KvsEngine`] trait, the [`KvStore`]
//! that implements it with a bounded in-memory cache, and the [`Backend`] the cache writes back to.
use crate::Result;

/// A trait for the basic functionality of a key/value storage engine.
///
/// Engines are cloned into every worker thread, so a clone must be a cheap handle onto the same
/// underlying store.
pub trait KvsEngine: Clone + Send + 'static {
    /// inserts a `key` and `value`
    ///
    /// If the given `key` already exists the previous `value` will be overwritten.
    ///
    /// # Errors
    /// Returns `KvsError::BackendFatal` if making room for the entry required a write-back that
    /// failed.
    fn insert(&self, key: String, value: Vec<u8>) -> Result<()>;

    /// Gets the value associated with the given `key`
    ///
    /// # Errors
    /// Returns `KvsError::NotFound` if the given `key` does not exist.
    fn lookup(&self, key: &str) -> Result<Vec<u8>>;

    /// Removes the given `key` (and associated value) from the store.
    ///
    /// Removing a key that does not exist is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Writes every cached entry to durable storage without evicting it.
    fn flush(&self) -> Result<()>;
}

pub mod backend;
mod kvs;
pub mod lru;

pub use self::backend::{Backend, FileBackend};
pub use self::kvs::KvStore;
