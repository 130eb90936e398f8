//! Fixed-size worker pool for indicator fan-out

use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads draining a FIFO task queue.
///
/// Tasks return nothing and there is no result handle. Dropping the pool
/// closes the queue; workers finish the tasks already queued and are joined.
/// Tasks submitted after shutdown began are discarded. No ordering holds
/// between tasks executed by different workers.
pub struct ThreadPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Pool with `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let workers = (0..num_threads.max(1))
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("engine-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("spawning pool worker")
            })
            .collect();
        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Pool sized to the host's available parallelism.
    pub fn with_default_size() -> Self {
        let n = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self::new(n)
    }

    /// Enqueue a task; FIFO per queue, dropped if the pool is shutting down.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(tx) = &self.tx {
            if tx.send(Box::new(task)).is_err() {
                debug!("task submitted after pool shutdown, dropped");
            }
        }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain the remaining queue and exit.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn executes_all_submitted_tasks() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        drop(pool); // joins workers, draining the queue
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn zero_threads_clamps_to_one() {
        let pool = ThreadPool::new(0);
        assert_eq!(pool.worker_count(), 1);
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        pool.submit(move || {
            d.fetch_add(1, Ordering::Relaxed);
        });
        drop(pool);
        assert_eq!(done.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let pool = ThreadPool::new(1);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = Arc::clone(&seen);
            pool.submit(move || {
                seen.lock().push(i);
                std::thread::sleep(Duration::from_millis(1));
            });
        }
        drop(pool);
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }
}
