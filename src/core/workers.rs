//! Background thread pool for frame fetches.
//!
//! Uses work-stealing deques:
//! - External jobs go through a global injector
//! - Idle workers steal from each other
//!
//! Each controller owns an [`Epoch`]. Jobs are tagged with the epoch value
//! current at enqueue time and skipped at execution time if it moved on,
//! which is how `stop_buffering()` cancels fetches that never started.

use crossbeam::deque::{Injector, Worker};
use log::trace;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared cancellation counter.
///
/// Cloning shares the counter. `advance()` invalidates every [`EpochToken`]
/// handed out before it.
#[derive(Debug, Clone, Default)]
pub struct Epoch {
    counter: Arc<AtomicU64>,
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Increment and return the new value.
    pub fn advance(&self) -> u64 {
        let next = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Epoch advanced: {}", next);
        next
    }

    /// Token bound to the current value.
    pub fn token(&self) -> EpochToken {
        EpochToken {
            counter: Arc::clone(&self.counter),
            epoch: self.current(),
        }
    }
}

/// Snapshot of an [`Epoch`] carried by a queued job.
#[derive(Debug, Clone)]
pub struct EpochToken {
    counter: Arc<AtomicU64>,
    epoch: u64,
}

impl EpochToken {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::Acquire) == self.epoch
    }
}

/// Abstract worker pool.
///
/// Lets the controller schedule fetches without knowing the concrete
/// executor; tests plug in a manual queue to control completion order.
pub trait WorkerPool: Send + Sync {
    fn execute(&self, job: Job);

    /// Execute `job` only if `token` is still current when it is picked up.
    fn execute_with_epoch(&self, token: EpochToken, job: Job) {
        self.execute(Box::new(move || {
            if token.is_current() {
                job();
            } else {
                trace!("Skipped stale job (epoch {})", token.epoch());
            }
        }));
    }
}

impl<T: WorkerPool + ?Sized> WorkerPool for Arc<T> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }

    fn execute_with_epoch(&self, token: EpochToken, job: Job) {
        (**self).execute_with_epoch(token, job)
    }
}

/// Worker pool with work-stealing.
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Spawn `num_threads` workers (at least one).
    ///
    /// Thread spawn failures are logged and the pool runs with whatever
    /// threads did start; with zero threads jobs run inline on `execute`.
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers_local: Vec<Worker<Job>> = Vec::with_capacity(num_threads);
        let mut stealers = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let worker: Worker<Job> = Worker::new_fifo();
            stealers.push(worker.stealer());
            workers_local.push(worker);
        }

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, worker) in workers_local.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let spawned = thread::Builder::new()
                .name(format!("framebuf-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);

                    loop {
                        if let Some(job) = worker.pop() {
                            job();
                            continue;
                        }

                        if let Some(job) = injector.steal_batch_and_pop(&worker).success() {
                            job();
                            continue;
                        }

                        let stolen = stealers
                            .iter()
                            .find_map(|stealer| stealer.steal().success());
                        if let Some(job) = stolen {
                            job();
                            continue;
                        }

                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }

                        // No work: short sleep instead of spinning
                        thread::sleep(Duration::from_millis(1));
                    }

                    trace!("Worker {} stopped", worker_id);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => log::error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        trace!("Workers initialized: {} threads", handles.len());

        Self {
            injector,
            handles,
            shutdown,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }
}

impl WorkerPool for Workers {
    fn execute(&self, job: Job) {
        if self.handles.is_empty() {
            job();
            return;
        }
        self.injector.push(job);
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.shutdown.store(true, Ordering::SeqCst);

        // Stale jobs are skipped by their epoch check, so threads drain fast.
        // The deadline keeps a stuck source from hanging teardown.
        let deadline = Instant::now() + Duration::from_millis(500);

        // Dropped from inside a job: this worker exits on its own once the job returns
        let current = thread::current().id();
        for handle in std::mem::take(&mut self.handles) {
            if handle.thread().id() == current {
                continue;
            }
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching remaining workers");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_epoch_advance_invalidates_tokens() {
        let epoch = Epoch::new();
        let token = epoch.token();
        assert!(token.is_current());

        assert_eq!(epoch.advance(), 1);
        assert!(!token.is_current());
        assert!(epoch.token().is_current());
    }

    #[test]
    fn test_workers_run_jobs() {
        let workers = Workers::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            workers.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(wait_for(|| counter.load(Ordering::SeqCst) == 16));
    }

    #[test]
    fn test_stale_epoch_job_skipped() {
        let workers = Workers::new(1);
        let epoch = Epoch::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let token = epoch.token();
        epoch.advance();

        let ran_clone = Arc::clone(&ran);
        workers.execute_with_epoch(
            token,
            Box::new(move || {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // A marker job queued after the stale one proves the queue drained
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = Arc::clone(&done);
        workers.execute(Box::new(move || done_clone.store(true, Ordering::SeqCst)));

        assert!(wait_for(|| done.load(Ordering::SeqCst)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_from_worker_thread_does_not_wait_on_itself() {
        let slot: Arc<Mutex<Option<Workers>>> = Arc::new(Mutex::new(Some(Workers::new(2))));
        let drop_ms = Arc::new(AtomicUsize::new(usize::MAX));

        let job_slot = Arc::clone(&slot);
        let job_ms = Arc::clone(&drop_ms);
        let job: Job = Box::new(move || {
            let workers = job_slot.lock().unwrap().take();
            let started = Instant::now();
            drop(workers);
            job_ms.store(started.elapsed().as_millis() as usize, Ordering::SeqCst);
        });
        if let Some(workers) = slot.lock().unwrap().as_ref() {
            workers.execute(job);
        }

        assert!(wait_for(|| drop_ms.load(Ordering::SeqCst) != usize::MAX));
        assert!(drop_ms.load(Ordering::SeqCst) < 400);
    }
}
