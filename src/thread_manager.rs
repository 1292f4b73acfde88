use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{Result, StressError};

static THREAD_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Process-unique thread name, e.g. `hash-7`.
pub fn generate_thread_name(prefix: &str) -> String {
    let id = THREAD_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", prefix, id)
}

/// Spawns a named OS thread, mapping spawn failure into [`StressError::Spawn`].
pub fn spawn_named<F, T>(prefix: &str, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let name = generate_thread_name(prefix);
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| StressError::Spawn { name, source })
}

struct Worker {
    index: usize,
    name: String,
    handle: JoinHandle<()>,
    retire: Arc<AtomicBool>,
}

impl Worker {
    fn join(self) {
        if self.handle.join().is_err() {
            warn!(worker = %self.name, "worker thread panicked");
        }
    }
}

/// Ordered set of running workers, each with its own retire flag.
pub struct WorkerPool {
    prefix: &'static str,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            workers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Launches worker number `len()`. The closure receives that index and the
    /// worker's retire flag.
    pub fn spawn<F>(&mut self, work: F) -> Result<usize>
    where
        F: FnOnce(usize, Arc<AtomicBool>) + Send + 'static,
    {
        let index = self.workers.len();
        let retire = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&retire);
        let handle = spawn_named(self.prefix, move || work(index, flag))?;
        let name = handle.thread().name().unwrap_or(self.prefix).to_string();

        debug!(worker = %name, index, "worker spawned");
        self.workers.push(Worker {
            index,
            name,
            handle,
            retire,
        });
        Ok(index)
    }

    /// Signals the most recently added worker to finish and joins it.
    pub fn retire_last(&mut self) -> Option<usize> {
        let worker = self.workers.pop()?;
        worker.retire.store(true, Ordering::SeqCst);
        let index = worker.index;
        worker.join();
        debug!(index, "worker retired");
        Some(index)
    }

    #[cfg(test)]
    fn names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name.clone()).collect()
    }

    /// Joins every worker. Callers stop the workers first.
    pub fn join_all(&mut self) -> usize {
        let count = self.workers.len();
        for worker in self.workers.drain(..) {
            worker.join();
        }
        count
    }
}
