//! Lock-free multi-producer system message queue.
//!
//! Producers push from any thread; the single consumer drains whatever was
//! queued when it looked, so a batch never grows while it is processed.

use crossbeam_queue::SegQueue;

/// Unbounded FIFO drained in batches.
pub(crate) struct SystemQueue<T> {
    inner: SegQueue<T>,
}

impl<T> SystemQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// Push a value. Never blocks, never fails.
    pub(crate) fn push(&self, value: T) {
        self.inner.push(value);
    }

    /// Detach every value queued at entry, oldest first. Values pushed while
    /// draining are left for the next batch.
    pub(crate) fn take_all(&self) -> Vec<T> {
        let queued = self.inner.len();
        let mut values = Vec::with_capacity(queued);
        for _ in 0..queued {
            match self.inner.pop() {
                Some(value) => values.push(value),
                None => break,
            }
        }
        values
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_all_is_fifo() {
        let queue = SystemQueue::new();
        assert!(queue.is_empty());

        for i in 0..5 {
            queue.push(i);
        }
        assert!(!queue.is_empty());
        assert_eq!(queue.take_all(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
        assert!(queue.take_all().is_empty());
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let queue = Arc::new(SystemQueue::new());
        let producers = 8;
        let per_producer = 1000;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        queue.push((p, i));
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        while drained.len() < producers * per_producer {
            drained.extend(queue.take_all());
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(drained.len(), producers * per_producer);
        let mut next = vec![0; producers];
        for (p, i) in drained {
            assert_eq!(next[p], i, "producer {} out of order", p);
            next[p] += 1;
        }
    }

    #[test]
    fn test_drop_releases_pending_values() {
        let marker = Arc::new(());
        {
            let queue = SystemQueue::new();
            queue.push(Arc::clone(&marker));
            queue.push(Arc::clone(&marker));
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
