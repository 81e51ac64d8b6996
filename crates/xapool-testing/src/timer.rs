//! Manually driven timer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use xapool::{TimerHandle, TimerService, TimerTask};

struct Entry {
    deadline: Duration,
    sequence: u64,
    handle: TimerHandle,
    task: TimerTask,
}

#[derive(Default)]
struct Clock {
    now: Duration,
    next_sequence: u64,
    entries: Vec<Entry>,
}

/// A timer whose clock only moves when [`advance`](Self::advance) is called.
///
/// Tasks run on the thread that advances the clock, in deadline order, with
/// no internal lock held, so they may schedule further tasks.
#[derive(Clone, Default)]
pub struct ManualTimer {
    clock: Arc<Mutex<Clock>>,
}

impl ManualTimer {
    /// Create a timer at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Scheduled tasks that have neither run nor been cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.clock
            .lock()
            .entries
            .iter()
            .filter(|entry| !entry.handle.is_cancelled())
            .count()
    }

    /// Move the clock forward, running every task that falls due. Returns
    /// the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.clock.lock().now + by;
        let mut ran = 0;

        loop {
            let due = {
                let mut clock = self.clock.lock();
                let next = clock
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.deadline <= target)
                    .min_by_key(|(_, entry)| (entry.deadline, entry.sequence))
                    .map(|(index, _)| index);
                match next {
                    Some(index) => {
                        let entry = clock.entries.swap_remove(index);
                        clock.now = clock.now.max(entry.deadline);
                        entry
                    }
                    None => {
                        clock.now = target;
                        break;
                    }
                }
            };

            if !due.handle.is_cancelled() {
                (due.task)();
                ran += 1;
            }
        }

        ran
    }
}

impl TimerService for ManualTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut clock = self.clock.lock();
        clock.entries.retain(|entry| !entry.handle.is_cancelled());
        let sequence = clock.next_sequence;
        clock.next_sequence += 1;
        let deadline = clock.now + delay;
        clock.entries.push(Entry {
            deadline,
            sequence,
            handle: handle.clone(),
            task,
        });
        handle
    }
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTimer")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_runs_due_tasks_in_order() {
        let timer = ManualTimer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (delay, label) in [(30, "c"), (10, "a"), (20, "b")] {
            let log = Arc::clone(&log);
            timer.schedule(
                Duration::from_secs(delay),
                Box::new(move || log.lock().push(label)),
            );
        }

        assert_eq!(timer.advance(Duration::from_secs(20)), 2);
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.now(), Duration::from_secs(20));
    }

    #[test]
    fn test_cancelled_tasks_do_not_run() {
        let timer = ManualTimer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = timer.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        handle.cancel();
        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.advance(Duration::from_secs(5)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tasks_may_reschedule() {
        let timer = ManualTimer::new();
        let count = Arc::new(AtomicUsize::new(0));

        let inner_timer = timer.clone();
        let counter = Arc::clone(&count);
        timer.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let counter = Arc::clone(&counter);
                inner_timer.schedule(
                    Duration::from_secs(1),
                    Box::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        assert_eq!(timer.advance(Duration::from_secs(3)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
