// src/executor.rs
//! Serializes every operation on a collection through one FIFO queue,
//! standing in for the single-threaded cooperative event loop the
//! original engine relied on for mutual exclusion (SPEC_FULL.md §5).
//!
//! A dedicated worker thread drains a `Mutex`/`Condvar`-guarded queue.
//! Before persistence replay finishes, ordinary jobs queue up behind a
//! closed gate; `loadDatabase` is submitted with `submit_bypass` so it can
//! run regardless of the gate and then open it, exactly mirroring the
//! original's executor, which buffers every operation until the initial
//! load completes except the load itself.

use std::collections::VecDeque;
use std::sync::{mpsc, Arc};

use parking_lot::{Condvar, Mutex};

use crate::log_trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<(Job, bool)>>,
    cond: Condvar,
    ready: Mutex<bool>,
    shutdown: Mutex<bool>,
}

/// Owns the worker thread. Dropping the executor signals shutdown and
/// joins the thread, so no job silently leaks past the collection it
/// belongs to.
pub struct Executor {
    shared: Arc<Shared>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Executor {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            ready: Mutex::new(false),
            shutdown: Mutex::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || worker_loop(worker_shared));

        Executor { shared, handle: Some(handle) }
    }

    pub fn is_ready(&self) -> bool {
        *self.shared.ready.lock()
    }

    /// Run `f` synchronously on the worker thread and return its result,
    /// blocking the caller until it completes. Subject to the ready gate.
    pub fn submit<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(f, false)
    }

    /// Like `submit`, but runs even while the gate is closed. Intended
    /// for exactly one kind of job: the initial `loadDatabase` call that
    /// opens the gate for everyone behind it.
    pub fn submit_bypass<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue(f, true)
    }

    fn enqueue<T, F>(&self, f: F, bypass: bool) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<T>();
        let job: Job = Box::new(move || {
            let result = f();
            let _ = tx.send(result);
        });
        {
            let mut queue = self.shared.queue.lock();
            queue.push_back((job, bypass));
        }
        self.shared.cond.notify_one();
        rx.recv().expect("worker thread dropped the result channel before replying")
    }

    /// Called exactly once, by the job that performs the initial
    /// persistence replay, to let every buffered job proceed.
    pub fn mark_ready(&self) {
        *self.shared.ready.lock() = true;
        self.shared.cond.notify_all();
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        *self.shared.shutdown.lock() = true;
        self.shared.cond.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if *shared.shutdown.lock() {
                    return;
                }
                let ready = *shared.ready.lock();
                let pos = queue.iter().position(|(_, bypass)| *bypass || ready);
                if let Some(pos) = pos {
                    break queue.remove(pos).map(|(job, _)| job);
                }
                shared.cond.wait(&mut queue);
            }
        };
        if let Some(job) = job {
            log_trace!("executor running one job");
            job();
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_and_return_results() {
        let exec = Executor::new();
        exec.mark_ready();
        let result = exec.submit(|| 1 + 1);
        assert_eq!(result, 2);
    }

    #[test]
    fn jobs_queue_until_ready() {
        let exec = Arc::new(Executor::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&counter);
        let e1 = Arc::clone(&exec);
        let handle = std::thread::spawn(move || {
            e1.submit(move || {
                c1.fetch_add(1, Ordering::SeqCst);
            });
        });

        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        exec.submit_bypass(|| {});
        exec.mark_ready();
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn serializes_concurrent_submitters() {
        let exec = Arc::new(Executor::new());
        exec.mark_ready();
        let counter = Arc::new(Mutex::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let e = Arc::clone(&exec);
            let c = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                e.submit(move || {
                    let mut guard = c.lock();
                    let seen = *guard;
                    *guard = seen + 1;
                });
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8);
    }
}
