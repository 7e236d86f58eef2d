#![deny(missing_docs)]
//! A multithreaded, disk backed key-value store that maps [`String`] keys to byte values,
//! served over a small subset of HTTP/1.1.
//!
//! This crate provides the [`KvStore`] implementation itself, as well as a [`cachekv-server`]
//! and [`cachekv-client`] executable that can be used to interact with it.
//!
//! ## Supported Storage Operations
//! The store supports three operations, each mapped to an HTTP method:
//!
//! - `GET /<key>` looks up the value of a key
//! - `POST /<key>` with a body inserts or overwrites the value of a key
//! - `DELETE /<key>` removes a key
//!
//! Every request is answered with `200 OK` (with the value for a GET) or `404 Not found`.
//! See the [`protocol`] module for the exact format and the [`KvsEngine`] trait for the
//! operations themselves.
//!
//! ## KvStore
//! [`KvStore`] is the implementor of the [`KvsEngine`] trait. It keeps a bounded number of
//! entries in memory, ordered by how recently they were used, in front of a [`Backend`] that
//! holds one file per key:
//! - inserts only touch memory; a value reaches disk when it is evicted or flushed
//! - a lookup that misses memory reads the key's file and caches the value
//! - removals drop the key from memory and delete its file at once
//! - the least recently used entry is written back and evicted when a new entry needs room
//!
//! A failed write-back means memory and disk can no longer be reconciled. The store then refuses
//! all further operations and the server shuts down.
//!
//! ## Client / Server
//! [`KvsServer`] accepts connections and hands each one to a worker of a [`ThreadPool`]. The
//! worker serves every request on the connection, one after the other, until the client hangs
//! up. [`KvsClient`] is a blocking client for the same protocol.
//!
//! [`String`]: https://doc.rust-lang.org/std/string/struct.String.html
//! [`cachekv-server`]: ./cachekv-server.rs
//! [`cachekv-client`]: ./cachekv-client.rs

pub use client::KvsClient;
pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, Task};
pub use engine::{Backend, FileBackend, KvStore, KvsEngine};
pub use error::{KvsError, Result};
pub use server::{KvsServer, Shutdown};
pub use stats::{Stats, StatsReport};
pub use thread_pool::{SharedQueueThreadPool, TaskQueue, ThreadPool};

mod client;
pub mod config;
mod dispatcher;
pub mod engine;
mod error;
pub mod protocol;
mod server;
pub mod stats;
pub mod thread_pool;
