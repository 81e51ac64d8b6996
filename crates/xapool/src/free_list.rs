//! Idle connection bookkeeping.
//!
//! The free list is a LIFO stack: the most recently returned connection is
//! reused first, leaving older ones to age out. Each entry owns the timer
//! that will evict it; the timer is cancelled when the entry is taken for
//! reuse or discarded, and simply consumed when it fires.

use std::time::{Duration, Instant};

use crate::timer::TimerHandle;

/// One idle connection.
#[derive(Debug)]
pub(crate) struct FreeEntry<T> {
    id: u64,
    item: T,
    pooled_at: Instant,
    timer: TimerHandle,
}

impl<T> FreeEntry<T> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// How long the entry has been idle.
    pub(crate) fn idle(&self) -> Duration {
        self.pooled_at.elapsed()
    }

    /// Take the item for reuse, disarming the eviction timer.
    pub(crate) fn take(self) -> T {
        self.timer.cancel();
        self.item
    }

    /// Take the item after its eviction timer fired.
    pub(crate) fn expire(self) -> T {
        self.item
    }
}

/// Stack of idle items with per-entry eviction timers.
#[derive(Debug)]
pub(crate) struct FreeList<T> {
    entries: Vec<FreeEntry<T>>,
    next_id: u64,
}

impl<T> FreeList<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Push an item; `arm` receives the new entry id and schedules its
    /// eviction.
    pub(crate) fn push(&mut self, item: T, arm: impl FnOnce(u64) -> TimerHandle) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let timer = arm(id);
        self.entries.push(FreeEntry {
            id,
            item,
            pooled_at: Instant::now(),
            timer,
        });
        id
    }

    /// Pop the most recently pushed entry.
    pub(crate) fn pop(&mut self) -> Option<FreeEntry<T>> {
        self.entries.pop()
    }

    /// Remove a specific entry (used when its timer fires).
    pub(crate) fn remove(&mut self, id: u64) -> Option<FreeEntry<T>> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Remove every entry, disarming their timers.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..).rev().map(FreeEntry::take)
    }
}

impl<T> Default for FreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(list: &mut FreeList<&'static str>, item: &'static str) -> (u64, TimerHandle) {
        let handle = TimerHandle::new();
        let armed = handle.clone();
        let id = list.push(item, move |_| armed);
        (id, handle)
    }

    #[test]
    fn test_lifo_reuse_cancels_timer() {
        let mut list = FreeList::new();
        let (_, first_timer) = push(&mut list, "first");
        let (_, second_timer) = push(&mut list, "second");
        assert_eq!(list.len(), 2);

        let entry = list.pop().unwrap();
        assert_eq!(entry.take(), "second");
        assert!(second_timer.is_cancelled());
        assert!(!first_timer.is_cancelled());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_remove_by_id_leaves_timer_alone() {
        let mut list = FreeList::new();
        let (first, first_timer) = push(&mut list, "first");
        push(&mut list, "second");

        let entry = list.remove(first).unwrap();
        assert_eq!(entry.expire(), "first");
        assert!(!first_timer.is_cancelled());
        assert!(list.remove(first).is_none());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_drain_cancels_all() {
        let mut list = FreeList::new();
        let (_, a) = push(&mut list, "a");
        let (_, b) = push(&mut list, "b");

        let drained: Vec<_> = list.drain().collect();
        assert_eq!(drained, vec!["b", "a"]);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let mut list = FreeList::new();
        let (a, _) = push(&mut list, "a");
        list.pop();
        let (b, _) = push(&mut list, "b");
        assert_ne!(a, b);
    }
}
