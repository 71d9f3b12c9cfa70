//! Bounded per-interface work queues and their worker threads.
//!
//! Producers on the receive path never block: an over-threshold enqueue is a
//! counted drop, because the delivery context may be interrupt-adjacent and
//! must not stall. The single consumer blocks cooperatively when empty.
//!
//! A forced stop clears the FIFO under the queue lock. A worker iteration that
//! was mid-flight either already popped its buffer or observes the now-empty
//! queue on its next acquire; no cancellation flag is polled.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::signal::SignalBuffer;
use crate::trace::{debug, warn};

struct Fifo {
    buffers: VecDeque<SignalBuffer>,
    open: bool,
}

/// Bounded FIFO of signal buffers owned by one interface.
pub struct WorkQueue {
    fifo: Mutex<Fifo>,
    ready: Condvar,
    capacity: usize,
}

impl WorkQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            fifo: Mutex::new(Fifo {
                buffers: VecDeque::new(),
                open: true,
            }),
            ready: Condvar::new(),
            capacity,
        })
    }

    /// Appends a buffer, waking the worker if it is idle.
    ///
    /// Returns the buffer back when the queue is full or closed so the caller
    /// can count the drop.
    pub fn push(&self, buf: SignalBuffer) -> Result<(), SignalBuffer> {
        let mut fifo = self.fifo.lock().expect("queue lock poisoned");
        if !fifo.open || fifo.buffers.len() >= self.capacity {
            return Err(buf);
        }
        fifo.buffers.push_back(buf);
        drop(fifo);
        self.ready.notify_one();
        Ok(())
    }

    /// Blocks until a buffer is available or the queue is closed.
    ///
    /// Returns `None` once closed; remaining buffers are dropped by
    /// [`close`](Self::close), not handed out.
    pub fn pop(&self) -> Option<SignalBuffer> {
        let mut fifo = self.fifo.lock().expect("queue lock poisoned");
        loop {
            if !fifo.open {
                return None;
            }
            if let Some(buf) = fifo.buffers.pop_front() {
                return Some(buf);
            }
            fifo = self.ready.wait(fifo).expect("queue lock poisoned");
        }
    }

    /// Drops every queued buffer, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut fifo = self.fifo.lock().expect("queue lock poisoned");
        let dropped = fifo.buffers.len();
        fifo.buffers.clear();
        dropped
    }

    /// Closes the queue and discards anything still queued. Wakes the worker
    /// so it can exit.
    pub fn close(&self) {
        {
            let mut fifo = self.fifo.lock().expect("queue lock poisoned");
            fifo.open = false;
            fifo.buffers.clear();
        }
        self.ready.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fifo.lock().expect("queue lock poisoned").buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named worker thread draining one [`WorkQueue`].
pub struct Worker {
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a worker that calls `drain` for every dequeued buffer and exits
    /// when the queue closes.
    ///
    /// # Panics
    ///
    /// Panics if thread spawning fails.
    pub fn spawn<F>(name: &str, queue: Arc<WorkQueue>, drain: F) -> Self
    where
        F: Fn(SignalBuffer) + Send + 'static,
    {
        let thread_name = name.to_owned();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(worker = %thread_name, "worker started");
                while let Some(buf) = queue.pop() {
                    drain(buf);
                }
                debug!(worker = %thread_name, "worker exiting");
            })
            .expect("failed to spawn work-queue worker");
        Self {
            handle: Some(handle),
        }
    }

    /// Waits for the worker to exit. The queue must be closed first.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("work-queue worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fapi;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sig() -> SignalBuffer {
        SignalBuffer::new(fapi::MA_UNITDATA_IND)
    }

    #[test]
    fn push_pop_fifo_order() {
        let q = WorkQueue::new(8);
        let mut a = sig();
        a.put_u16(1);
        let mut b = sig();
        b.put_u16(2);
        q.push(a).unwrap();
        q.push(b).unwrap();
        assert_eq!(q.pop().unwrap().u16_at(10), Some(1));
        assert_eq!(q.pop().unwrap().u16_at(10), Some(2));
    }

    #[test]
    fn over_threshold_enqueue_is_a_drop() {
        let q = WorkQueue::new(2);
        q.push(sig()).unwrap();
        q.push(sig()).unwrap();
        assert!(q.push(sig()).is_err());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn close_wakes_blocked_worker() {
        let q = WorkQueue::new(4);
        let drained = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&drained);
        let mut worker = Worker::spawn("test-worker", Arc::clone(&q), move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        q.push(sig()).unwrap();
        q.push(sig()).unwrap();
        // Give the worker a moment to drain before closing.
        thread::sleep(Duration::from_millis(50));
        q.close();
        worker.join();
        assert_eq!(drained.load(Ordering::SeqCst), 2);
        assert!(q.push(sig()).is_err());
    }

    #[test]
    fn clear_discards_pending_work() {
        let q = WorkQueue::new(8);
        q.push(sig()).unwrap();
        q.push(sig()).unwrap();
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
        // Still open for new work after a clear.
        q.push(sig()).unwrap();
        assert_eq!(q.len(), 1);
    }
}
