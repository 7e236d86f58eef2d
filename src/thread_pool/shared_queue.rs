use std::sync::Arc;
use std::thread;

use crossbeam::sync::WaitGroup;
use tracing::{debug, error, instrument};

use super::{TaskQueue, ThreadPool};
use crate::{KvsError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Terminate,
}

/// A thread pool implemented with a shared [`TaskQueue`].
///
/// The pool itself is the producer and every worker thread is a consumer. Each worker runs one
/// job at a time to completion; for the server, a job is one client connection, so a connection
/// stays with the worker that dequeued it until it is closed.
///
/// If a spawned job panics, the old thread will be destroyed and a new one will be created.
/// It fails silently when a replacement thread cannot be created at the OS level, so the number
/// of threads in the pool can shrink.
///
/// Dropping the pool without calling [`ThreadPool::join`] leaves the workers waiting for jobs.
pub struct SharedQueueThreadPool {
    queue: Arc<TaskQueue<Message>>,
    threads: u32,
    // one clone per live worker
    workers: WaitGroup,
}

impl ThreadPool for SharedQueueThreadPool {
    /// create a new thread pool with the given number of `threads`.
    /// Every thread created will have a handle to the shared queue
    fn new(threads: u32) -> Result<Self> {
        if threads == 0 {
            return Err(KvsError::StringErr(
                "a thread pool needs at least one thread".to_string(),
            ));
        }
        let queue = Arc::new(TaskQueue::new());
        let workers = WaitGroup::new();
        let pool = SharedQueueThreadPool {
            queue,
            threads,
            workers,
        };
        for id in 0..threads {
            let task_rx = TaskReceiver {
                queue: Arc::clone(&pool.queue),
                _alive: pool.workers.clone(),
            };
            let spawned = thread::Builder::new()
                .name(format!("kv-worker-{}", id))
                .spawn(move || run_tasks(task_rx));
            if let Err(e) = spawned {
                // stop the workers that did start
                for _ in 0..id {
                    pool.queue.enqueue(Message::Terminate);
                }
                return Err(e.into());
            }
        }
        debug!("created thread pool with {} threads", threads);
        Ok(pool)
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.enqueue(Message::Run(Box::new(job)));
    }

    fn join(self) {
        for _ in 0..self.threads {
            self.queue.enqueue(Message::Terminate);
        }
        debug!("waiting for {} workers to finish", self.threads);
        self.workers.wait();
    }
}

/// A worker's handle on the shared queue.
/// Additionally, this type is responsible for restarting any threads that panicked
#[derive(Clone)]
struct TaskReceiver {
    queue: Arc<TaskQueue<Message>>,
    _alive: WaitGroup,
}

impl Drop for TaskReceiver {
    fn drop(&mut self) {
        if thread::panicking() {
            debug!("thread panicked, starting a new thread");
            let task_rx = self.clone();
            if let Err(e) = thread::Builder::new().spawn(move || run_tasks(task_rx)) {
                error!("Failed to spawn a thread: {}", e);
            }
        }
    }
}

/// this function waits for a job to arrive on the shared queue, and then runs it
#[instrument(skip(rx))]
fn run_tasks(rx: TaskReceiver) {
    loop {
        match rx.queue.dequeue() {
            Message::Run(job) => {
                debug!("received a new task");
                job();
            }
            Message::Terminate => {
                debug!("worker exiting because the thread pool was joined");
                break;
            }
        }
    }
}
