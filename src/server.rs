use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::dispatcher::{Dispatcher, Task};
use crate::stats::Stats;
use crate::thread_pool::ThreadPool;
use crate::{KvsEngine, KvsError, Result};

/// A TCP socket server over a key value storage engine.
///
/// It accepts connections on a [`SocketAddr`], wraps each one in a [`Task`] and hands it to a
/// worker of the [`ThreadPool`]. The worker serves every request on the connection against the
/// engine until the client hangs up.
///
/// The server runs until its [`Shutdown`] handle is triggered, either by the operator or by a
/// worker that hit a fatal storage error.
///
/// # Example
/// Serve a store of 128 cached entries, backed by `./storage`, with 4 worker threads
/// ```rust,no_run
/// use cachekv::{FileBackend, KvStore, KvsServer, SharedQueueThreadPool, ThreadPool};
/// # fn main() -> cachekv::Result<()> {
/// let engine = KvStore::new(FileBackend::init("./storage")?, 128);
/// let pool = SharedQueueThreadPool::new(4)?;
/// let server = KvsServer::new(engine, pool);
/// server.run("127.0.0.1:10801")?;
/// # Ok(())
/// # }
/// ```
pub struct KvsServer<E: KvsEngine, P: ThreadPool> {
    engine: E,
    pool: P,
    stats: Arc<Stats>,
    shutdown: Shutdown,
}

impl<E: KvsEngine, P: ThreadPool> KvsServer<E, P> {
    /// Create a new `KvsServer` using the given [`KvsEngine`] and [`ThreadPool`] implementation.
    pub fn new(engine: E, pool: P) -> Self {
        KvsServer {
            engine,
            pool,
            stats: Arc::new(Stats::new()),
            shutdown: Shutdown::new(),
        }
    }

    /// the statistics the server's workers record into
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// a handle that stops the server from another thread
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// binds to `addr` and serves connections until shut down
    ///
    /// # Errors
    /// returns [`KvsError`] if the address could not be bound, or if the server stopped because
    /// of a fatal storage error
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.run_on(listener)
    }

    /// Serves connections accepted on an already bound `listener` until shut down.
    ///
    /// After a normal shutdown every connection already accepted is served to completion before
    /// this returns. After a fatal storage error it returns at once, without waiting for workers.
    pub fn run_on(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!("Listening on {}", local);
        self.shutdown.watch(local);

        let dispatcher = Dispatcher::new(self.engine, Arc::clone(&self.stats), self.shutdown.clone());
        while self.shutdown.is_running() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if !self.shutdown.is_running() {
                        break;
                    }
                    debug!("Accepted connection from {}", peer);
                    let task = Task::new(stream);
                    let dispatcher = dispatcher.clone();
                    self.pool.spawn(move || dispatcher.serve(task));
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        drop(listener);

        if self.shutdown.is_fatal() {
            return Err(KvsError::StringErr(
                "server stopped after a fatal storage error".to_string(),
            ));
        }
        info!("No longer accepting connections, waiting for open connections to finish");
        self.pool.join();
        info!("Server stopped");
        Ok(())
    }
}

/// A cloneable handle that stops a running [`KvsServer`].
///
/// Triggering it makes the accept loop exit; a blocked `accept` is woken by a throwaway
/// connection to the listener.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownState>,
}

#[derive(Debug)]
struct ShutdownState {
    running: AtomicBool,
    fatal: AtomicBool,
    // address of the listener to poke awake, once the server runs
    listener: Mutex<Option<SocketAddr>>,
}

impl Default for ShutdownState {
    fn default() -> Self {
        ShutdownState {
            running: AtomicBool::new(true),
            fatal: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }
}

impl Shutdown {
    /// a handle in the running state
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` once the handle has been triggered
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// `true` if the shutdown was caused by a fatal storage error
    pub fn is_fatal(&self) -> bool {
        self.inner.fatal.load(Ordering::SeqCst)
    }

    /// requests an orderly shutdown
    pub fn trigger(&self) {
        info!("shutdown requested");
        self.stop();
    }

    /// requests an immediate shutdown after a fatal storage error
    pub fn trigger_fatal(&self) {
        self.inner.fatal.store(true, Ordering::SeqCst);
        self.stop();
    }

    fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let listener = *self.inner.listener.lock();
        if let Some(addr) = listener {
            if let Err(e) = TcpStream::connect(wake_addr(addr)) {
                debug!("could not wake the listener at {}: {}", addr, e);
            }
        }
    }

    // records where the accept loop listens; must happen before the loop checks `is_running`
    fn watch(&self, addr: SocketAddr) {
        *self.inner.listener.lock() = Some(addr);
    }
}

// a listener bound to a wildcard address is reached through loopback
fn wake_addr(mut addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        let loopback = match addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        addr.set_ip(loopback);
    }
    addr
}
