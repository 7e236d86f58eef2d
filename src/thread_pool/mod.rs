//! Thread pools that run the per-connection jobs of the server.
//!
//! [`SharedQueueThreadPool`] starts a fixed number of worker threads that all take their jobs
//! from a single [`TaskQueue`].
use crate::Result;

/// The interface every thread pool used by [`KvsServer`] implements.
///
/// [`KvsServer`]: ../struct.KvsServer.html
pub trait ThreadPool {
    /// Creates a new thread pool, immediately spawning the specified number of threads.
    ///
    /// # Errors
    /// Returns an error if any thread fails to spawn. All previously-spawned threads are
    /// terminated.
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Spawns a function into the thread pool.
    ///
    /// Spawning always succeeds, but if the function panics the thread pool continues to
    /// operate with the same number of threads.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;

    /// Lets every job spawned so far run to completion, then stops all threads.
    fn join(self)
    where
        Self: Sized;
}

mod shared_queue;
mod task_queue;

pub use self::shared_queue::SharedQueueThreadPool;
pub use self::task_queue::TaskQueue;
