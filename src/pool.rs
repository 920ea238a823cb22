//! Fixed-size worker pool for short rasterization tasks
//!
//! Tasks go through one shared channel; any idle worker claims the next
//! one, so each task runs at most once. An in-flight counter plus a condvar
//! gives callers a join point. A task that panics does not take its worker
//! down: the payload is kept and re-raised on the thread that joins.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::error::{RasterError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;
type PanicPayload = Box<dyn Any + Send + 'static>;

/// Default worker count.
pub const DEFAULT_THREADS: usize = 8;

struct Shared {
    in_flight: AtomicUsize,
    idle: Mutex<()>,
    idle_signal: Condvar,
    panic: Mutex<Option<PanicPayload>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Task panics are caught before they can poison anything we hold
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = lock(&self.idle);
            self.idle_signal.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut guard = lock(&self.idle);
        while self.in_flight.load(Ordering::Acquire) > 0 {
            guard = self.idle_signal.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn record_panic(&self, payload: PanicPayload) {
        let mut slot = lock(&self.panic);
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    fn take_panic(&self) -> Option<PanicPayload> {
        lock(&self.panic).take()
    }
}

/// A fixed set of worker threads created once and fed closures.
pub struct TaskPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl TaskPool {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(RasterError::InvalidThreadCount);
        }

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let shared = Arc::new(Shared {
            in_flight: AtomicUsize::new(0),
            idle: Mutex::new(()),
            idle_signal: Condvar::new(),
            panic: Mutex::new(None),
        });

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let receiver = receiver.clone();
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("raster-worker-{}", id))
                .spawn(move || worker_loop(id, receiver, shared))?;
            workers.push(handle);
        }

        log::info!("Task pool started with {} workers", threads);
        Ok(Self { sender: Some(sender), workers, shared })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Tasks queued or running.
    pub fn pending(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    fn submit(&self, job: Job) {
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let sent = self.sender.as_ref().map(|s| s.send(job));
        if !matches!(sent, Some(Ok(()))) {
            // Only reachable once every worker has exited
            log::error!("Task pool has no workers left, dropping task");
            self.shared.finish_one();
        }
    }

    /// Queue one task. With `join`, block until the queue drains.
    pub fn add_task<F>(&self, task: F, join: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(task));
        if join {
            self.join();
        }
    }

    /// Queue a batch of tasks. With `join`, block until the queue drains.
    pub fn add_tasks<I, F>(&self, tasks: I, join: bool)
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() + Send + 'static,
    {
        for task in tasks {
            self.submit(Box::new(task));
        }
        if join {
            self.join();
        }
    }

    /// Block until every queued task has finished.
    ///
    /// Re-raises the first task panic since the last join. Must not be
    /// called from inside a task.
    pub fn join(&self) {
        self.shared.wait_idle();
        if let Some(payload) = self.shared.take_panic() {
            panic::resume_unwind(payload);
        }
    }

    /// Run tasks that borrow from the caller's stack.
    ///
    /// Every task spawned on the scope has finished when this returns,
    /// including when `f` or a task panics.
    pub fn scope<'env, F, R>(&self, f: F) -> R
    where
        F: for<'scope> FnOnce(&'scope Scope<'scope, 'env>) -> R,
    {
        let scope = Scope { pool: self, _env: PhantomData };
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&scope)));

        self.shared.wait_idle();
        let task_panic = self.shared.take_panic();

        match result {
            Err(payload) => panic::resume_unwind(payload),
            Ok(value) => {
                if let Some(payload) = task_panic {
                    panic::resume_unwind(payload);
                }
                value
            }
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain what is queued, then exit
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        log::debug!("Task pool stopped");
    }
}

fn worker_loop(id: usize, receiver: Receiver<Job>, shared: Arc<Shared>) {
    while let Ok(job) = receiver.recv() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            log::error!("Task on worker {} panicked", id);
            shared.record_panic(payload);
        }
        shared.finish_one();
    }
}

/// Spawn handle passed to [`TaskPool::scope`].
pub struct Scope<'scope, 'env: 'scope> {
    pool: &'scope TaskPool,
    _env: PhantomData<&'env mut &'env ()>,
}

impl<'scope, 'env> Scope<'scope, 'env> {
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'env,
    {
        let job: Box<dyn FnOnce() + Send + 'env> = Box::new(task);
        // Safety: TaskPool::scope waits for every task before returning, so
        // nothing borrowed for 'env is used after 'env ends.
        let job: Job = unsafe { std::mem::transmute::<Box<dyn FnOnce() + Send + 'env>, Job>(job) };
        self.pool.submit(job);
    }

    pub fn threads(&self) -> usize {
        self.pool.threads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(TaskPool::new(0), Err(RasterError::InvalidThreadCount)));
    }

    #[test]
    fn test_add_tasks_and_join() {
        let pool = TaskPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let tasks = (0..100).map(|_| {
            let counter = Arc::clone(&counter);
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });
        pool.add_tasks(tasks, true);

        assert_eq!(counter.load(Ordering::Relaxed), 100);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_add_task_with_join_waits() {
        let pool = TaskPool::new(2).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        pool.add_task(
            move || {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::Release);
            },
            true,
        );
        assert!(done.load(Ordering::Acquire));
    }

    #[test]
    fn test_join_on_empty_pool_returns() {
        let pool = TaskPool::new(3).unwrap();
        pool.join();
        assert_eq!(pool.threads(), 3);
    }

    #[test]
    fn test_tasks_run_on_several_workers() {
        let pool = TaskPool::new(4).unwrap();
        let names = Arc::new(Mutex::new(std::collections::HashSet::new()));
        for _ in 0..32 {
            let names = Arc::clone(&names);
            pool.add_task(
                move || {
                    thread::sleep(Duration::from_millis(2));
                    let name = thread::current().name().map(str::to_string);
                    names.lock().unwrap().insert(name);
                },
                false,
            );
        }
        pool.join();
        assert!(names.lock().unwrap().len() > 1);
    }

    #[test]
    fn test_scope_borrows_stack_data() {
        let pool = TaskPool::new(4).unwrap();
        let mut data = vec![0u32; 1000];
        let offset = 7;

        pool.scope(|s| {
            for (i, chunk) in data.chunks_mut(100).enumerate() {
                s.spawn(move || {
                    for v in chunk.iter_mut() {
                        *v = i as u32 + offset;
                    }
                });
            }
        });

        assert_eq!(data[0], 7);
        assert_eq!(data[999], 16);
    }

    #[test]
    fn test_scope_returns_value() {
        let pool = TaskPool::new(2).unwrap();
        let total = AtomicUsize::new(0);
        let threads = pool.scope(|s| {
            for i in 1..=10 {
                let total = &total;
                s.spawn(move || {
                    total.fetch_add(i, Ordering::Relaxed);
                });
            }
            s.threads()
        });
        assert_eq!(threads, 2);
        assert_eq!(total.load(Ordering::Relaxed), 55);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn test_task_panic_reraised_on_join() {
        let pool = TaskPool::new(2).unwrap();
        pool.add_task(|| panic!("boom"), true);
    }

    #[test]
    fn test_pool_survives_task_panic() {
        let pool = TaskPool::new(2).unwrap();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.scope(|s| s.spawn(|| panic!("task failure")));
        }));
        assert!(result.is_err());

        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.add_task(
            move || {
                c.fetch_add(1, Ordering::Relaxed);
            },
            true,
        );
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drop_finishes_queued_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = TaskPool::new(2).unwrap();
            for _ in 0..20 {
                let counter = Arc::clone(&counter);
                pool.add_task(
                    move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    },
                    false,
                );
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 20);
    }
}
