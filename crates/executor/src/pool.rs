//! A fixed-size FIFO worker pool executing boxed closures.
//!
//! The coordinator needs only FIFO fairness between batch cycles, not the
//! priority scheduling a general background-task queue would carry, so
//! this is a plain `VecDeque` behind one condvar-guarded mutex: workers
//! block on `work_ready` when idle, `shutdown` wakes every worker and lets
//! it drain the queue before exiting.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

struct Inner {
    queue: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
}

/// A fixed-size pool of worker threads pulling boxed closures off a shared
/// FIFO queue.
pub struct ExecutorPool {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutorPool {
    /// Spawn `num_threads` workers named `settlement-exec-N`.
    pub fn new(num_threads: usize) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("settlement-exec-{i}"))
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn executor worker thread");
            workers.push(handle);
        }

        ExecutorPool {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Queue `work` for the next free worker.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) {
        let mut queue = self.inner.queue.lock();
        queue.push_back(Box::new(work));
        self.inner.work_ready.notify_one();
    }

    /// Signal every worker to exit once the queue drains, then join them.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            tracing::error!(
                "executor worker task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
