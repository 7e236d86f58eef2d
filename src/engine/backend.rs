//! Durable storage underneath the cache: one file per key inside a storage directory.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

/// The persistence primitives a [`KvStore`] writes evicted and flushed entries to.
///
/// Implementations do no caching of their own; every call goes to durable storage.
///
/// [`KvStore`]: ../struct.KvStore.html
pub trait Backend: Send + 'static {
    /// reads the value stored for `key`, returning `Ok(None)` if there is none
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// creates or overwrites the value stored for `key`
    fn write(&self, key: &str, value: &[u8]) -> io::Result<()>;

    /// deletes the value stored for `key`. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> io::Result<()>;
}

/// A [`Backend`] that keeps every key in its own file.
///
/// File names are derived from keys by percent-encoding every byte outside `[A-Za-z0-9_-]`,
/// so any key maps to a single plain file directly inside the storage directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Prepares `dir` as an empty storage directory.
    ///
    /// The directory is created if it does not exist. If it already exists, everything inside it
    /// is deleted.
    ///
    /// # Errors
    /// fails if `dir` exists but is not a directory, or if it can be neither created nor cleared
    pub fn init(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                debug!("clearing existing storage directory {:?}", &dir);
                for entry in fs::read_dir(&dir)? {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        fs::remove_dir_all(entry.path())?;
                    } else {
                        fs::remove_file(entry.path())?;
                    }
                }
            }
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("storage path {:?} exists and is not a directory", &dir),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("creating storage directory {:?}", &dir);
                fs::create_dir_all(&dir)?;
            }
            Err(e) => return Err(e),
        }
        Ok(FileBackend { dir })
    }

    /// Uses `dir` as the storage directory, keeping whatever it already holds.
    /// The directory is created if it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileBackend { dir })
    }

    /// the storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// the path of the file holding `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(encode_key(key))
    }
}

impl Backend for FileBackend {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> io::Result<()> {
        trace!(key, len = value.len(), "writing value to disk");
        fs::write(self.path_for(key), value)
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// maps a key to the file name that holds it
fn encode_key(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            name.push(b as char);
        } else {
            name.push_str(&format!("%{:02X}", b));
        }
    }
    name
}
