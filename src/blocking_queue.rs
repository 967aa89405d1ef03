//! A bounded, multi-producer multi-consumer blocking queue.
//!
//! Producers block while the queue is full; consumers block while it's
//! empty. `close` wakes every waiter so the owning threads can shut down
//! without a separate poison-pill protocol.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// A bounded blocking FIFO queue shared between producer and consumer
/// threads.
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BlockingQueue<T> {
    /// Creates a queue that holds at most `capacity` items. `capacity` must
    /// be greater than zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BlockingQueue capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Pushes `item`, blocking while the queue is full. Returns `false` if
    /// the queue was closed before or while waiting.
    pub fn push(&self, item: T) -> bool {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.closed {
                return false;
            }
            if guard.queue.len() < self.capacity {
                break;
            }
            guard = self.not_full.wait(guard).unwrap();
        }
        guard.queue.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Pops an item, blocking while the queue is empty. Returns `None` if
    /// the queue was closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(item) = guard.queue.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if guard.closed {
                return None;
            }
            guard = self.not_empty.wait(guard).unwrap();
        }
    }

    /// Pops an item, blocking for at most `timeout`. Returns `None` on
    /// timeout or closure.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(item) = guard.queue.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if guard.closed {
                return None;
            }
            let (next, result) = self.not_empty.wait_timeout(guard, timeout).unwrap();
            guard = next;
            if result.timed_out() {
                return None;
            }
        }
    }

    /// Marks the queue closed and wakes every waiting thread. Items already
    /// queued remain poppable until drained.
    pub fn close(&self) {
        {
            let mut guard = self.inner.lock().unwrap();
            guard.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Wakes one waiting consumer without pushing anything.
    pub fn flush(&self) {
        self.not_empty.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_preserves_order() {
        let q = BlockingQueue::new(4);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn pop_on_empty_closed_queue_returns_none() {
        let q: BlockingQueue<i32> = BlockingQueue::new(2);
        q.close();
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn pop_timeout_returns_none_when_nothing_arrives() {
        let q: BlockingQueue<i32> = BlockingQueue::new(2);
        assert_eq!(q.pop_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn blocked_producer_is_released_by_close() {
        let q = Arc::new(BlockingQueue::new(1));
        q.push(1).then_some(()).unwrap();
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.push(2));
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(handle.join().unwrap(), false);
    }

    #[test]
    fn blocked_consumer_wakes_on_push() {
        let q = Arc::new(BlockingQueue::new(4));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(20));
        q.push(42);
        assert_eq!(handle.join().unwrap(), Some(42));
    }
}
