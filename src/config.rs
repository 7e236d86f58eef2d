//! Runtime settings of the server process.
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::{KvsError, Result};

/// the port the server listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 10801;

/// the number of worker threads unless told otherwise
pub const DEFAULT_THREADS: u32 = 1;

/// the directory values are written to unless told otherwise
pub const DEFAULT_STORAGE_DIR: &str = "./storage";

/// the number of entries kept in memory unless told otherwise
pub const DEFAULT_CACHE_SIZE: usize = 128;

/// Everything needed to start a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// address the listener binds to
    pub addr: SocketAddr,
    /// number of worker threads serving connections
    pub threads: u32,
    /// directory holding one file per stored key. Cleared at startup.
    pub storage_dir: PathBuf,
    /// number of entries the store keeps in memory; 0 disables caching
    pub cache_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            threads: DEFAULT_THREADS,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl ServerConfig {
    /// checks that the settings describe a server that can run
    ///
    /// # Errors
    /// returns [`KvsError::StringErr`] when no worker threads are requested or the storage
    /// directory is empty
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(KvsError::StringErr(
                "at least one worker thread is required".to_string(),
            ));
        }
        if self.storage_dir.as_os_str().is_empty() {
            return Err(KvsError::StringErr(
                "the storage directory must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, "0.0.0.0:10801".parse().unwrap());
        assert_eq!(config.threads, 1);
        assert_eq!(config.storage_dir, PathBuf::from("./storage"));
        assert_eq!(config.cache_size, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_threads_is_rejected() {
        let config = ServerConfig {
            threads: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_cache_is_allowed() {
        let config = ServerConfig {
            cache_size: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_storage_dir_is_rejected() {
        let config = ServerConfig {
            storage_dir: PathBuf::new(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
