//! Two-phase job system.
//!
//! A job is an optional background closure (decode, import, parse) paired
//! with a completion that runs on the main thread. Workers never touch
//! main-thread state: their result travels back over a channel and the
//! completion is invoked from [`JobSystem::update`], which the owner pumps
//! once per frame with exclusive access to the main-thread context `C`.
//!
//! # Example
//!
//! ```
//! use umbra_core::jobs::JobSystem;
//!
//! let mut jobs = JobSystem::<Vec<u32>>::inline();
//! jobs.execute(|| 6 * 7, |answer, out: &mut Vec<u32>| out.push(answer));
//!
//! let mut out = Vec::new();
//! jobs.update(&mut out);
//! assert_eq!(out, vec![42]);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

type Work = Box<dyn FnOnce() + Send>;

/// A completion waiting to run on the main thread.
pub type Completion<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Work queue shared by the job system and its senders. `None` once the
/// pool has shut down or when running inline.
type WorkQueue = Arc<Mutex<Option<mpsc::Sender<Work>>>>;

/// Cloneable handle for submitting jobs and posting main-thread completions
/// from anywhere, including other threads.
pub struct JobSender<C> {
    work: WorkQueue,
    completions: mpsc::Sender<Completion<C>>,
    in_flight: Arc<AtomicUsize>,
}

impl<C> Clone for JobSender<C> {
    fn clone(&self) -> Self {
        Self {
            work: Arc::clone(&self.work),
            completions: self.completions.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<C: 'static> JobSender<C> {
    /// Submits a background closure and its main-thread completion.
    ///
    /// Without worker threads the background closure runs immediately on
    /// the calling thread; the completion still waits for
    /// [`JobSystem::update`].
    pub fn execute<T, B, F>(&self, background: B, completion: F)
    where
        T: Send + 'static,
        B: FnOnce() -> T + Send + 'static,
        F: FnOnce(T, &mut C) + Send + 'static,
    {
        let completions = self.completions.clone();
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::AcqRel);

        let job: Work = Box::new(move || {
            match catch_unwind(AssertUnwindSafe(background)) {
                Ok(value) => {
                    let completion: Completion<C> = Box::new(move |ctx: &mut C| completion(value, ctx));
                    let _ = completions.send(completion);
                }
                Err(_) => log::error!("JobSystem: background job panicked; completion skipped"),
            }
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });

        let rejected = match self.work.lock().as_ref() {
            Some(work) => work.send(job).err().map(|mpsc::SendError(job)| job),
            None => Some(job),
        };
        if let Some(job) = rejected {
            job();
        }
    }

    /// Queues `completion` for the next [`JobSystem::update`].
    ///
    /// Returns false if the job system has been dropped.
    pub fn post(&self, completion: impl FnOnce(&mut C) + Send + 'static) -> bool {
        self.completions.send(Box::new(completion)).is_ok()
    }
}

/// Worker pool plus the main-thread completion queue.
pub struct JobSystem<C> {
    sender: JobSender<C>,
    workers: Vec<JoinHandle<()>>,
    completion_rx: mpsc::Receiver<Completion<C>>,
}

impl<C: 'static> JobSystem<C> {
    /// Creates a job system with `threads` background workers.
    ///
    /// Zero threads selects [`inline`](Self::inline) execution.
    pub fn new(threads: usize) -> Self {
        let (completions, completion_rx) = mpsc::channel();
        let mut workers = Vec::new();
        let mut work = None;

        if threads > 0 {
            let (work_tx, work_rx) = mpsc::channel::<Work>();
            let work_rx = Arc::new(Mutex::new(work_rx));
            workers = (0..threads)
                .filter_map(|index| {
                    let rx = Arc::clone(&work_rx);
                    std::thread::Builder::new()
                        .name(format!("umbra-worker-{index}"))
                        .spawn(move || loop {
                            let job = rx.lock().recv();
                            match job {
                                Ok(job) => job(),
                                Err(_) => break,
                            }
                        })
                        .map_err(|err| log::error!("Failed to spawn job worker {index}: {err}"))
                        .ok()
                })
                .collect::<Vec<_>>();
            if !workers.is_empty() {
                work = Some(work_tx);
            }
            log::debug!("JobSystem: started {} worker threads", workers.len());
        }

        Self {
            sender: JobSender {
                work: Arc::new(Mutex::new(work)),
                completions,
                in_flight: Arc::new(AtomicUsize::new(0)),
            },
            workers,
            completion_rx,
        }
    }

    /// Creates a job system that runs background closures on the calling
    /// thread at submission time. Completions are still deferred to
    /// [`update`](Self::update).
    pub fn inline() -> Self {
        Self::new(0)
    }

    /// Creates a job system sized to the available CPU cores.
    pub fn with_available_parallelism() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Submits a background closure and its main-thread completion.
    pub fn execute<T, B, F>(&self, background: B, completion: F)
    where
        T: Send + 'static,
        B: FnOnce() -> T + Send + 'static,
        F: FnOnce(T, &mut C) + Send + 'static,
    {
        self.sender.execute(background, completion);
    }

    /// Queues a main-thread-only completion with no background phase.
    pub fn post(&self, completion: impl FnOnce(&mut C) + Send + 'static) {
        self.sender.post(completion);
    }

    /// Returns a sender other owners can keep to submit jobs.
    pub fn sender(&self) -> JobSender<C> {
        self.sender.clone()
    }

    /// Runs every completion whose background phase has finished.
    ///
    /// Returns the number of completions executed.
    pub fn update(&mut self, ctx: &mut C) -> usize {
        let mut executed = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            completion(ctx);
            executed += 1;
        }
        executed
    }

    /// Number of background closures still running or queued.
    pub fn in_flight(&self) -> usize {
        self.sender.in_flight.load(Ordering::Acquire)
    }

    /// Pumps [`update`](Self::update) until no background work remains or
    /// `timeout` elapses. Returns true if the system went idle.
    pub fn wait_idle(&mut self, ctx: &mut C, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.update(ctx);
            if self.in_flight() == 0 {
                self.update(ctx);
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl<C> Drop for JobSystem<C> {
    fn drop(&mut self) {
        // Closing the queue ends the worker loops even while senders live on.
        self.sender.work.lock().take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("JobSystem: worker thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::ThreadId;

    #[test]
    fn completion_runs_only_on_update() {
        let mut jobs = JobSystem::<Vec<u32>>::inline();
        jobs.execute(|| 1, |v, out| out.push(v));
        let mut out = Vec::new();
        assert!(out.is_empty());
        assert_eq!(jobs.update(&mut out), 1);
        assert_eq!(out, vec![1]);
    }

    #[test]
    fn background_runs_off_main_thread_and_completion_on_it() {
        let mut jobs = JobSystem::<Vec<(ThreadId, ThreadId)>>::new(2);
        let main = std::thread::current().id();
        jobs.execute(
            || std::thread::current().id(),
            |worker, out| out.push((worker, std::thread::current().id())),
        );

        let mut out = Vec::new();
        assert!(jobs.wait_idle(&mut out, Duration::from_secs(5)));
        assert_eq!(out.len(), 1);
        assert_ne!(out[0].0, main);
        assert_eq!(out[0].1, main);
    }

    #[test]
    fn sender_posts_from_other_threads() {
        let mut jobs = JobSystem::<u32>::inline();
        let sender = jobs.sender();
        std::thread::spawn(move || {
            sender.post(|n| *n += 5);
        })
        .join()
        .unwrap();

        let mut n = 0;
        jobs.update(&mut n);
        assert_eq!(n, 5);
    }

    #[test]
    fn panicking_job_is_contained() {
        let mut jobs = JobSystem::<u32>::new(1);
        jobs.execute(|| -> u32 { panic!("decode failed") }, |_, n| *n += 1);
        jobs.execute(|| 2u32, |v, n| *n += v);

        let mut n = 0;
        assert!(jobs.wait_idle(&mut n, Duration::from_secs(5)));
        assert_eq!(n, 2);
    }

    #[test]
    fn sender_executes_on_the_pool() {
        let mut jobs = JobSystem::<u32>::new(2);
        let sender = jobs.sender();
        sender.execute(|| 20u32, |v, n| *n += v);
        sender.execute(|| 22u32, |v, n| *n += v);

        let mut n = 0;
        assert!(jobs.wait_idle(&mut n, Duration::from_secs(5)));
        assert_eq!(n, 42);
    }

    #[test]
    fn drop_joins_workers_while_senders_survive() {
        let jobs = JobSystem::<u32>::new(2);
        let sender = jobs.sender();
        drop(jobs);
        // The pool is gone: work runs inline and the completion has nowhere to go.
        sender.execute(|| 1u32, |_, _| {});
        assert!(!sender.post(|_| {}));
    }

    #[test]
    fn many_jobs_complete() {
        let mut jobs = JobSystem::<u64>::new(4);
        for i in 0..64u64 {
            jobs.execute(move || i, |v, sum| *sum += v);
        }
        let mut sum = 0;
        assert!(jobs.wait_idle(&mut sum, Duration::from_secs(10)));
        assert_eq!(sum, (0..64).sum::<u64>());
    }
}
