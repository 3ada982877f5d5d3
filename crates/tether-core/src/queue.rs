//! Priority queue shared by the connection pool and the task scheduler
//!
//! # Ordering
//!
//! Entries are served by descending priority. An entry is placed after
//! every existing entry of equal or higher priority, so equal priorities
//! are served first-in, first-out. Entries pushed with
//! [`PriorityQueue::push_front`] bypass priority entirely and are served
//! before all normal entries, most recent first.
//!
//! The queue is a binary heap keyed by `(lane, priority, order)`, where
//! `order` is derived from a monotonically increasing sequence number.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Lane {
    Normal,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SlotKey {
    lane: Lane,
    priority: Priority,
    order: u64,
}

#[derive(Debug)]
struct Slot<T> {
    key: SlotKey,
    item: T,
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Max-priority queue with stable ordering among equal priorities
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: BinaryHeap<Slot<T>>,
    next_seq: u64,
}

impl<T> PriorityQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Insert by priority and return the 1-based position the item landed at
    pub fn push(&mut self, item: T, priority: Priority) -> usize {
        let seq = self.next_seq();
        let key = SlotKey {
            lane: Lane::Normal,
            priority,
            // Earlier pushes must compare greater so they pop first.
            order: u64::MAX - seq,
        };
        let position = self.heap.iter().filter(|slot| slot.key > key).count() + 1;
        self.heap.push(Slot { key, item });
        position
    }

    /// Insert ahead of every normal entry, regardless of priority
    pub fn push_front(&mut self, item: T) {
        let seq = self.next_seq();
        let key = SlotKey {
            lane: Lane::Front,
            priority: 0,
            order: seq,
        };
        self.heap.push(Slot { key, item });
    }

    /// Remove and return the next entry
    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|slot| slot.item)
    }

    /// Peek at the next entry without removing it
    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|slot| &slot.item)
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove the first entry (in service order) matching `pred`
    pub fn remove_first<F>(&mut self, mut pred: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let target = self
            .heap
            .iter()
            .filter(|slot| pred(&slot.item))
            .map(|slot| slot.key)
            .max()?;

        let mut removed = None;
        let slots = std::mem::take(&mut self.heap).into_vec();
        let mut kept = Vec::with_capacity(slots.len());
        for slot in slots {
            if removed.is_none() && slot.key == target {
                removed = Some(slot.item);
            } else {
                kept.push(slot);
            }
        }
        self.heap = BinaryHeap::from(kept);
        removed
    }

    /// Remove every entry matching `pred`, returned in service order
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let slots = std::mem::take(&mut self.heap).into_vec();
        let (mut removed, kept): (Vec<_>, Vec<_>) =
            slots.into_iter().partition(|slot| pred(&slot.item));
        self.heap = BinaryHeap::from(kept);
        removed.sort_by(|a, b| b.key.cmp(&a.key));
        removed.into_iter().map(|slot| slot.item).collect()
    }

    /// Remove everything, returned in service order
    pub fn clear(&mut self) -> Vec<T> {
        let mut slots = std::mem::take(&mut self.heap).into_vec();
        slots.sort_by(|a, b| b.key.cmp(&a.key));
        slots.into_iter().map(|slot| slot.item).collect()
    }

    /// Borrow every entry in service order
    pub fn ordered(&self) -> Vec<&T> {
        let mut slots: Vec<&Slot<T>> = self.heap.iter().collect();
        slots.sort_by(|a, b| b.key.cmp(&a.key));
        slots.into_iter().map(|slot| &slot.item).collect()
    }

    /// Iterate over entries in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.heap.iter().map(|slot| &slot.item)
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
