use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::backend::{Backend, FileBackend};
use super::lru::LruMap;
use super::KvsEngine;
use crate::error::{KvsError, Result};

/// The primary struct for working with a [`KvStore`].
///
/// It keeps up to `capacity` entries in memory, ordered by how recently they were touched.
/// When a new entry needs room, the least recently used entry is written to the [`Backend`]
/// and dropped from memory, so no data is lost to eviction. Lookups of keys that are not cached
/// fall through to the backend and bring the value back into the cache.
///
/// A capacity of 0 disables the cache: every operation goes straight to the backend.
///
/// Every operation, including a lookup that only reorders the cache, holds the store's single
/// lock for its whole duration.
///
/// Once a write to the backend fails, the store refuses every later operation with
/// `KvsError::BackendFatal`.
///
/// All cached entries are written back when the last handle to the store is dropped.
pub struct KvStore<B: Backend = FileBackend> {
    inner: Arc<Mutex<StoreState<B>>>,
}

impl<B: Backend> Clone for KvStore<B> {
    fn clone(&self) -> Self {
        KvStore {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CachedValue {
    value: Vec<u8>,
    // set when the value differs from what the backend holds
    dirty: bool,
}

struct StoreState<B: Backend> {
    cache: LruMap<CachedValue>,
    capacity: usize,
    backend: B,
    // set after a write-back failure; the store then serves nothing
    failed: bool,
}

impl<B: Backend> KvStore<B> {
    /// creates a [`KvStore`] caching up to `capacity` entries in front of `backend`
    pub fn new(backend: B, capacity: usize) -> KvStore<B> {
        info!(capacity, "opening key-value store");
        KvStore {
            inner: Arc::new(Mutex::new(StoreState {
                cache: LruMap::with_capacity(capacity),
                capacity,
                backend,
                failed: false,
            })),
        }
    }

    /// the maximum number of entries held in memory
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// the number of entries currently held in memory
    pub fn cache_len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    /// the keys currently held in memory, from least to most recently used
    pub fn cached_keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .cache
            .iter()
            .map(|(k, _)| k.to_string())
            .collect()
    }

    /// returns `true` once a backend write has failed and the store stopped serving
    pub fn has_failed(&self) -> bool {
        self.inner.lock().failed
    }
}

impl<B: Backend> KvsEngine for KvStore<B> {
    fn insert(&self, key: String, value: Vec<u8>) -> Result<()> {
        let mut state = self.inner.lock();
        state.ensure_healthy()?;

        if state.capacity == 0 {
            if let Err(source) = state.backend.write(&key, &value) {
                state.failed = true;
                return Err(fatal(key, source));
            }
            return Ok(());
        }

        if !state.cache.contains(&key) {
            state.make_room()?;
        }
        debug!(key = key.as_str(), len = value.len(), "caching value");
        state.cache.insert(key, CachedValue { value, dirty: true });
        Ok(())
    }

    fn lookup(&self, key: &str) -> Result<Vec<u8>> {
        let mut state = self.inner.lock();
        state.ensure_healthy()?;

        if let Some(entry) = state.cache.get(key) {
            return Ok(entry.value.clone());
        }

        let value = state
            .backend
            .read(key)?
            .ok_or_else(|| KvsError::NotFound(key.to_string()))?;

        if state.capacity > 0 {
            state.make_room()?;
            debug!(key, "loaded value from disk into the cache");
            state.cache.insert(
                key.to_string(),
                CachedValue {
                    value: value.clone(),
                    dirty: false,
                },
            );
        }
        Ok(value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.inner.lock();
        state.ensure_healthy()?;

        state.cache.remove(key);
        if let Err(source) = state.backend.delete(key) {
            state.failed = true;
            return Err(fatal(key.to_string(), source));
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.inner.lock();
        state.ensure_healthy()?;
        state.flush()
    }
}

impl<B: Backend> StoreState<B> {
    fn ensure_healthy(&self) -> Result<()> {
        if self.failed {
            return Err(KvsError::BackendFatal {
                key: String::new(),
                source: io::Error::new(
                    io::ErrorKind::Other,
                    "store stopped after an earlier write-back failure",
                ),
            });
        }
        Ok(())
    }

    /// evicts least recently used entries until one more entry fits
    fn make_room(&mut self) -> Result<()> {
        while self.cache.len() >= self.capacity {
            if let Some((key, entry)) = self.cache.peek_lru() {
                if entry.dirty {
                    if let Err(source) = self.backend.write(key, &entry.value) {
                        let key = key.to_string();
                        self.failed = true;
                        return Err(fatal(key, source));
                    }
                }
            }
            match self.cache.pop_lru() {
                Some((key, _)) => debug!(key = key.as_str(), "evicted from cache"),
                None => break,
            }
        }
        Ok(())
    }

    /// writes every dirty entry to the backend, returning the first failure
    fn flush(&mut self) -> Result<()> {
        let mut first_err = None;
        let mut written = 0_usize;
        for (key, entry) in self.cache.iter_mut() {
            if !entry.dirty {
                continue;
            }
            match self.backend.write(key, &entry.value) {
                Ok(()) => {
                    entry.dirty = false;
                    written += 1;
                }
                Err(source) => {
                    self.failed = true;
                    if first_err.is_none() {
                        first_err = Some(fatal(key.to_string(), source));
                    }
                }
            }
        }
        debug!(written, "flushed cache to disk");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<B: Backend> Drop for StoreState<B> {
    fn drop(&mut self) {
        let cached = self.cache.len();
        if self.failed {
            error!(cached, "key-value store closed after a write-back failure, cache abandoned");
            return;
        }
        match self.flush() {
            Ok(()) => info!(cached, "key-value store closed, cache written back to disk"),
            Err(e) => error!("could not write the cache back to disk on close: {}", e),
        }
    }
}

fn fatal(key: String, source: io::Error) -> KvsError {
    error!(key = key.as_str(), "write-back to disk failed: {}", source);
    KvsError::BackendFatal { key, source }
}
