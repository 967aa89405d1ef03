//! Indexed binary min-heap of connection timeouts.
//!
//! Nodes are keyed by an opaque id (a connection's `mio::Token`, in
//! practice) so a connection's deadline can be found and adjusted in
//! `O(log n)` without scanning the heap.

use std::collections::HashMap;
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce() + Send>;

struct TimerNode {
    id: usize,
    expire: Instant,
    callback: Callback,
}

/// A min-heap of pending timeouts, ordered by expiry.
pub struct Timer {
    heap: Vec<TimerNode>,
    index: HashMap<usize, usize>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            heap: Vec::with_capacity(64),
            index: HashMap::new(),
        }
    }

    /// Resets `id`'s deadline to `now + timeout`. Panics if `id` is not in
    /// the heap.
    pub fn adjust(&mut self, id: usize, timeout: Duration) {
        let i = *self.index.get(&id).expect("adjust on unknown timer id");
        self.heap[i].expire = Instant::now() + timeout;
        self.sift_down(i);
    }

    /// Adds a new timer for `id`, or — if `id` is already present —
    /// overwrites its deadline and callback **without** re-sifting.
    ///
    /// That second case reproduces the upstream heap's own behavior: its
    /// `add()` mutates the node in place and returns, leaving the node
    /// exactly where the old deadline put it. A timer re-armed this way
    /// stays ordered by its *previous* deadline until something else in the
    /// heap shuffles it. See DESIGN.md for why this is kept rather than
    /// silently fixed.
    pub fn add(&mut self, id: usize, timeout: Duration, callback: Callback) {
        if let Some(&i) = self.index.get(&id) {
            self.heap[i].expire = Instant::now() + timeout;
            self.heap[i].callback = callback;
            return;
        }
        let i = self.heap.len();
        self.index.insert(id, i);
        self.heap.push(TimerNode {
            id,
            expire: Instant::now() + timeout,
            callback,
        });
        self.sift_up(i);
    }

    /// Removes `id` and invokes its callback immediately.
    pub fn do_work(&mut self, id: usize) {
        let Some(&i) = self.index.get(&id) else {
            return;
        };
        self.delete(i, true);
    }

    /// Removes `id` without invoking its callback, if present.
    pub fn cancel(&mut self, id: usize) {
        if let Some(&i) = self.index.get(&id) {
            self.delete(i, false);
        }
    }

    /// Fires and removes every timer whose deadline has passed, then
    /// returns the duration until the next one (zero if one is already
    /// due, `None` if the heap is empty).
    pub fn tick(&mut self) -> Option<Duration> {
        while let Some(node) = self.heap.first() {
            let now = Instant::now();
            if node.expire > now {
                break;
            }
            self.delete(0, true);
        }
        self.heap
            .first()
            .map(|node| node.expire.saturating_duration_since(Instant::now()))
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    fn delete(&mut self, i: usize, run_callback: bool) {
        let last = self.heap.len() - 1;
        self.swap(i, last);
        let node = self.heap.pop().expect("heap non-empty");
        self.index.remove(&node.id);
        if run_callback {
            (node.callback)();
        }
        if i < self.heap.len() {
            self.sift_up(i);
            self.sift_down(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expire <= self.heap[i].expire {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let mut smallest = i;
            let left = i * 2 + 1;
            let right = i * 2 + 2;
            if left < self.heap.len() && self.heap[left].expire < self.heap[smallest].expire {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].expire < self.heap[smallest].expire {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].id, i);
        self.index.insert(self.heap[j].id, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn recorder() -> (Arc<AtomicUsize>, Callback) {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let cb: Callback = Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        (fired, cb)
    }

    #[test]
    fn tick_fires_only_expired_timers() {
        let mut timer = Timer::new();
        let (fired_soon, cb_soon) = recorder();
        let (fired_later, cb_later) = recorder();
        timer.add(1, Duration::from_millis(0), cb_soon);
        timer.add(2, Duration::from_secs(60), cb_later);
        std::thread::sleep(Duration::from_millis(5));
        timer.tick();
        assert_eq!(fired_soon.load(Ordering::SeqCst), 1);
        assert_eq!(fired_later.load(Ordering::SeqCst), 0);
        assert_eq!(timer.len(), 1);
    }

    #[test]
    fn cancel_removes_without_firing() {
        let mut timer = Timer::new();
        let (fired, cb) = recorder();
        timer.add(1, Duration::from_millis(0), cb);
        timer.cancel(1);
        std::thread::sleep(Duration::from_millis(5));
        timer.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timer.is_empty());
    }

    #[test]
    fn do_work_fires_immediately_regardless_of_deadline() {
        let mut timer = Timer::new();
        let (fired, cb) = recorder();
        timer.add(1, Duration::from_secs(60), cb);
        timer.do_work(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timer.is_empty());
    }

    #[test]
    fn heap_invariant_holds_after_many_adds_and_deletes() {
        let mut timer = Timer::new();
        for id in 0..50 {
            let (_f, cb) = recorder();
            timer.add(id, Duration::from_millis((50 - id) as u64), cb);
        }
        for id in (0..50).step_by(2) {
            timer.cancel(id);
        }
        for i in 0..timer.heap.len() {
            let left = i * 2 + 1;
            let right = i * 2 + 2;
            if left < timer.heap.len() {
                assert!(timer.heap[i].expire <= timer.heap[left].expire);
            }
            if right < timer.heap.len() {
                assert!(timer.heap[i].expire <= timer.heap[right].expire);
            }
        }
    }

    #[test]
    fn add_on_known_id_overwrites_without_resifting() {
        let mut timer = Timer::new();
        let (_f1, cb1) = recorder();
        let (_f2, cb2) = recorder();
        timer.add(1, Duration::from_secs(10), cb1);
        let pos_before = timer.index[&1];
        timer.add(1, Duration::from_millis(0), cb2);
        let pos_after = timer.index[&1];
        assert_eq!(pos_before, pos_after);
    }
}
