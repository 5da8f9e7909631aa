//! Bounded distribution queues between frame producers and consumers.
//!
//! Producer pushes never block: on overflow the oldest element is discarded
//! so the queue always holds the most recent frames. Consumer pops never
//! block the control thread either; the writer drain loop uses the timed
//! variant to sleep between frames.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct BoundedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    cv: Condvar,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
                dropped: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Non-blocking push. On overflow the oldest element is discarded and
    /// counted; pushes to a closed queue are silently ignored.
    pub fn push(&self, item: T) {
        let mut g = self.inner.lock().expect("lock poisoned");
        if g.closed {
            return;
        }
        if g.items.len() >= g.capacity {
            g.items.pop_front();
            g.dropped = g.dropped.saturating_add(1);
        }
        g.items.push_back(item);
        self.cv.notify_one();
    }

    /// Non-blocking pop; `None` means empty, not closed.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().expect("lock poisoned").items.pop_front()
    }

    /// Pop, waiting up to `timeout` for an element. Returns `None` on
    /// timeout or when the queue is closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut g = self.inner.lock().expect("lock poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = g.items.pop_front() {
                return Some(item);
            }
            if g.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .expect("lock poisoned");
            g = ng;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("lock poisoned").dropped
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("lock poisoned").closed
    }

    /// Close the queue: further pushes are ignored, waiting poppers wake.
    /// Already-queued elements remain poppable.
    pub fn close(&self) {
        let mut g = self.inner.lock().expect("lock poisoned");
        g.closed = true;
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_keeps_most_recent_in_order() {
        let q = BoundedQueue::new(3);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped(), 2);
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), Some(4));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_pop_timeout_returns_none_when_empty() {
        let q: BoundedQueue<u8> = BoundedQueue::new(4);
        let start = Instant::now();
        assert_eq!(q.pop_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_close_ignores_pushes_and_drains_remainder() {
        let q = BoundedQueue::new(4);
        q.push(1);
        q.close();
        q.push(2);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), None);
        assert_eq!(q.pop_timeout(Duration::from_secs(5)), None); // no hang
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        use std::sync::Arc;
        let q = Arc::new(BoundedQueue::new(4));
        let q2 = Arc::clone(&q);
        let t = std::thread::spawn(move || q2.pop_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(10));
        q.push(7u8);
        assert_eq!(t.join().unwrap(), Some(7));
    }
}
