//! Worker pool for load-time pipeline creation
//!
//! Jobs are boxed closures sent over an `mpsc` channel to a fixed set of
//! worker threads. [`AsyncPool::join`] blocks until every submitted job has
//! finished, so a loading stage can fan out and then wait.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    done: Condvar,
}

impl Pending {
    fn finish_one(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.done.notify_all();
        }
    }
}

/// Fixed-size thread pool
pub struct AsyncPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
    pending: Arc<Pending>,
}

impl AsyncPool {
    /// Spawn `size` workers (at least one)
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(Pending::default());

        let workers = (0..size.max(1))
            .map(|id| Worker::new(id, Arc::clone(&receiver), Arc::clone(&pending)))
            .collect();

        log::debug!("Started async pool with {} workers", size.max(1));
        Self {
            workers,
            sender: Some(sender),
            pending,
        }
    }

    /// Queue a job
    ///
    /// If every worker has died the job runs on the calling thread.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.pending.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        let job: Job = Box::new(f);
        let rejected = match &self.sender {
            Some(sender) => sender.send(job).err().map(|e| e.0),
            None => Some(job),
        };
        if let Some(job) = rejected {
            log::warn!("Async pool is closed, running job inline");
            job();
            self.pending.finish_one();
        }
    }

    /// Block until every queued job has completed
    pub fn join(&self) {
        let mut count = self.pending.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = self.pending.done.wait(count).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for AsyncPool {
    fn drop(&mut self) {
        // Closing the channel ends each worker's receive loop
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Some(thread) = worker.thread {
                if thread.join().is_err() {
                    log::error!("Async pool worker {} panicked", worker.id);
                }
            }
        }
    }
}

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<Receiver<Job>>>, pending: Arc<Pending>) -> Self {
        let thread = thread::Builder::new()
            .name(format!("rsm-worker-{id}"))
            .spawn(move || loop {
                let job = {
                    let receiver = receiver.lock().unwrap_or_else(|e| e.into_inner());
                    receiver.recv()
                };
                match job {
                    Ok(job) => {
                        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                            log::error!("Async pool job panicked on worker {id}");
                        }
                        pending.finish_one();
                    }
                    Err(_) => break,
                }
            })
            .map_err(|e| log::error!("Failed to spawn async pool worker {id}: {e}"))
            .ok();

        Self { id, thread }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_join_waits_for_all_jobs() {
        let pool = AsyncPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join();

        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_zero_size_still_has_a_worker() {
        let pool = AsyncPool::new(0);
        assert_eq!(pool.worker_count(), 1);

        let (tx, rx) = channel();
        pool.execute(move || tx.send(7).unwrap());
        pool.join();
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn test_join_without_jobs_returns() {
        let pool = AsyncPool::new(2);
        pool.join();
    }
}
