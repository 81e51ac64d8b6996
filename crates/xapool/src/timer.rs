//! Timer services for idle eviction and pool housekeeping.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Work scheduled on a timer.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a scheduled task.
///
/// Cancelling after the task started running has no effect on that run.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Create a handle in the armed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

/// Runs callbacks after a delay on a thread other than the caller's.
pub trait TimerService: Send + Sync {
    /// Schedule `task` to run once after `delay`.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

impl<T: TimerService + ?Sized> TimerService for Arc<T> {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        (**self).schedule(delay, task)
    }
}

struct Scheduled {
    deadline: Instant,
    sequence: u64,
    handle: TimerHandle,
    task: TimerTask,
}

impl Eq for Scheduled {}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

// Earliest deadline first, then oldest submission first
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TimerInner {
    queue: Mutex<BinaryHeap<Scheduled>>,
    ready: Condvar,
    shutdown: AtomicBool,
    sequence: AtomicU64,
}

/// Timer service backed by one dedicated scheduler thread.
///
/// Callbacks run on the scheduler thread, one at a time, in deadline order.
/// Dropping the service stops the thread; pending tasks are discarded.
pub struct ThreadTimer {
    inner: Arc<TimerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTimer {
    /// Start a scheduler thread named `xapool-timer`.
    pub fn new() -> std::io::Result<Self> {
        let inner = Arc::new(TimerInner {
            queue: Mutex::new(BinaryHeap::new()),
            ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("xapool-timer".into())
            .spawn(move || timer_loop(&worker_inner))?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Number of tasks waiting for their deadline. Tasks cancelled since the
    /// last [`schedule`](TimerService::schedule) call are still counted.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.ready.notify_all();
        }

        if let Some(worker) = self.worker.lock().take() {
            // The last owner may be a callback running on the worker itself.
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl TimerService for ThreadTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let scheduled = Scheduled {
            deadline: Instant::now() + delay,
            sequence: self.inner.sequence.fetch_add(1, AtomicOrdering::Relaxed),
            handle: handle.clone(),
            task,
        };

        let mut queue = self.inner.queue.lock();
        queue.retain(|entry| !entry.handle.is_cancelled());
        queue.push(scheduled);
        self.inner.ready.notify_one();
        handle
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTimer")
            .field("pending", &self.pending())
            .finish()
    }
}

fn timer_loop(inner: &TimerInner) {
    loop {
        let due = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }

                let now = Instant::now();
                match queue.peek() {
                    None => inner.ready.wait(&mut queue),
                    Some(next) if next.deadline <= now => break queue.pop(),
                    Some(next) => {
                        let deadline = next.deadline;
                        inner.ready.wait_until(&mut queue, deadline);
                    }
                }
            }
        };

        if let Some(scheduled) = due {
            if scheduled.handle.is_cancelled() {
                continue;
            }
            tracing::trace!(sequence = scheduled.sequence, "running timer task");
            (scheduled.task)();
        }
    }
}

/// Timer service that schedules onto a tokio runtime.
///
/// Callbacks may block on the pool lock, so they run through
/// `spawn_blocking` once their delay has elapsed.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioTimer {
    /// Schedule onto the given runtime.
    #[must_use]
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }

    /// Schedule onto the runtime the caller is running in.
    pub fn try_current() -> Result<Self, tokio::runtime::TryCurrentError> {
        tokio::runtime::Handle::try_current().map(Self::new)
    }
}

#[cfg(feature = "tokio")]
impl TimerService for TokioTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let armed = handle.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if armed.is_cancelled() {
                return;
            }
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                tracing::warn!(error = %e, "timer task panicked");
            }
        });
        handle
    }
}
