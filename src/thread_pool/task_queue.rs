use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// An unbounded multi-producer, multi-consumer FIFO queue.
///
/// The queue is a singly linked chain of nodes that always starts with a sentinel node, so the
/// queue is empty exactly when the head (the sentinel) and the tail are the same node.
/// Producers only take the `tail` lock and consumers only take the `head` lock, so an enqueue
/// never waits for a dequeue to finish and vice versa. A waiting consumer is woken by the
/// `available` condition, once per enqueued task.
///
/// [`TaskQueue::enqueue`] never blocks on a consumer, [`TaskQueue::dequeue`] blocks until a task
/// is available. Tasks are handed out in the order they were enqueued, each to exactly one
/// consumer.
pub struct TaskQueue<T> {
    // the sentinel; its successor holds the oldest task
    head: Mutex<Arc<Node<T>>>,
    // the newest node, or the sentinel if the queue is empty
    tail: Mutex<Arc<Node<T>>>,
    // guards the empty check of a waiting consumer against a concurrent enqueue
    signal: Mutex<()>,
    available: Condvar,
    len: AtomicUsize,
}

struct Node<T> {
    // taken by the consumer that turns this node into the new sentinel
    task: Mutex<Option<T>>,
    next: Mutex<Option<Arc<Node<T>>>>,
}

impl<T> Node<T> {
    fn new(task: Option<T>) -> Arc<Self> {
        Arc::new(Node {
            task: Mutex::new(task),
            next: Mutex::new(None),
        })
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    /// creates an empty queue
    pub fn new() -> Self {
        let sentinel = Node::new(None);
        TaskQueue {
            head: Mutex::new(Arc::clone(&sentinel)),
            tail: Mutex::new(sentinel),
            signal: Mutex::new(()),
            available: Condvar::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// appends `task` to the back of the queue and wakes one waiting consumer
    pub fn enqueue(&self, task: T) {
        let node = Node::new(Some(task));
        // counted before it is linked, so a racing dequeue can never take the count below zero
        self.len.fetch_add(1, Ordering::SeqCst);
        {
            let mut tail = self.tail.lock();
            *tail.next.lock() = Some(Arc::clone(&node));
            *tail = node;
        }

        let _signal = self.signal.lock();
        self.available.notify_one();
    }

    /// removes the oldest task, blocking the calling thread until one is available
    pub fn dequeue(&self) -> T {
        let mut head = self.head.lock();
        let next = {
            let mut signal = self.signal.lock();
            loop {
                if let Some(next) = head.next.lock().clone() {
                    break next;
                }
                self.available.wait(&mut signal);
            }
        };
        self.advance(&mut head, next)
    }

    /// removes the oldest task if there is one, without blocking
    pub fn try_dequeue(&self) -> Option<T> {
        let mut head = self.head.lock();
        let next = head.next.lock().clone()?;
        Some(self.advance(&mut head, next))
    }

    /// a snapshot of whether the queue currently holds no tasks
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// a snapshot of the number of queued tasks
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    // makes `next` the new sentinel and hands out the task it carried
    fn advance(&self, head: &mut Arc<Node<T>>, next: Arc<Node<T>>) -> T {
        let task = next
            .task
            .lock()
            .take()
            .expect("a node after the sentinel always carries a task");
        *head = next;
        self.len.fetch_sub(1, Ordering::SeqCst);
        task
    }
}

impl<T> Drop for TaskQueue<T> {
    fn drop(&mut self) {
        // unlink iteratively so a long queue cannot overflow the stack through nested drops
        let mut next = self.head.get_mut().next.lock().take();
        while let Some(node) = next {
            next = node.next.lock().take();
        }
    }
}
