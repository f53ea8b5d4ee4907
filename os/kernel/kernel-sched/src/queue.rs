//! # Thread Table and Intrusive Queues
//!
//! Control blocks live boxed in a slot table; queues link them through their
//! own `prev`/`next` slot indices, so enqueue, dequeue and removal from the
//! middle are all O(1) and allocation free.

use crate::thread::{Slot, Thread, ThreadId};
use alloc::boxed::Box;
use alloc::vec::Vec;

#[derive(Default)]
pub(crate) struct ThreadTable {
    slots: Vec<Option<Box<Thread>>>,
}

impl ThreadTable {
    pub(crate) const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Store `thread` in the first free slot.
    pub(crate) fn insert(&mut self, thread: Box<Thread>) -> Slot {
        if let Some(slot) = self.slots.iter().position(Option::is_none) {
            self.slots[slot] = Some(thread);
            slot
        } else {
            self.slots.push(Some(thread));
            self.slots.len() - 1
        }
    }

    pub(crate) fn take(&mut self, slot: Slot) -> Option<Box<Thread>> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    #[inline]
    pub(crate) fn get(&self, slot: Slot) -> Option<&Thread> {
        self.slots.get(slot).and_then(|t| t.as_deref())
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, slot: Slot) -> Option<&mut Thread> {
        self.slots.get_mut(slot).and_then(|t| t.as_deref_mut())
    }

    pub(crate) fn find(&self, id: ThreadId) -> Option<Slot> {
        self.slots
            .iter()
            .position(|t| t.as_ref().is_some_and(|t| t.id == id))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Thread> + '_ {
        self.slots.iter().filter_map(|t| t.as_deref())
    }

    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }
}

/// FIFO of threads linked through their control blocks.
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct ThreadQueue {
    head: Option<Slot>,
    tail: Option<Slot>,
}

impl ThreadQueue {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    #[inline]
    pub(crate) const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push_back(&mut self, table: &mut ThreadTable, slot: Slot) {
        let tail = self.tail;
        if let Some(t) = table.get_mut(slot) {
            t.prev = tail;
            t.next = None;
        }
        match tail.and_then(|s| table.get_mut(s)) {
            Some(t) => t.next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    pub(crate) fn pop_front(&mut self, table: &mut ThreadTable) -> Option<Slot> {
        let head = self.head?;
        self.remove(table, head);
        Some(head)
    }

    /// Unlink `slot`, which must be on this queue.
    pub(crate) fn remove(&mut self, table: &mut ThreadTable, slot: Slot) {
        let (prev, next) = match table.get_mut(slot) {
            Some(t) => (t.prev.take(), t.next.take()),
            None => return,
        };
        match prev.and_then(|s| table.get_mut(s)) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match next.and_then(|s| table.get_mut(s)) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
    }

    /// Slots from head to tail.
    pub(crate) fn iter<'a>(&self, table: &'a ThreadTable) -> impl Iterator<Item = Slot> + 'a {
        core::iter::successors(self.head, move |&s| table.get(s).and_then(|t| t.next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Priority;

    fn table_with(n: u64) -> (ThreadTable, Vec<Slot>) {
        let mut table = ThreadTable::new();
        let slots = (0..n)
            .map(|i| table.insert(Box::new(Thread::new(ThreadId::new(i), Priority::Low, 0))))
            .collect();
        (table, slots)
    }

    fn ids(queue: &ThreadQueue, table: &ThreadTable) -> Vec<u64> {
        queue
            .iter(table)
            .map(|s| table.get(s).unwrap().id.as_u64())
            .collect()
    }

    #[test]
    fn fifo_order() {
        let (mut table, slots) = table_with(3);
        let mut q = ThreadQueue::new();
        for &s in &slots {
            q.push_back(&mut table, s);
        }
        assert_eq!(ids(&q, &table), [0, 1, 2]);
        assert_eq!(q.pop_front(&mut table), Some(slots[0]));
        assert_eq!(q.pop_front(&mut table), Some(slots[1]));
        q.push_back(&mut table, slots[0]);
        assert_eq!(ids(&q, &table), [2, 0]);
    }

    #[test]
    fn remove_anywhere() {
        let (mut table, slots) = table_with(4);
        let mut q = ThreadQueue::new();
        for &s in &slots {
            q.push_back(&mut table, s);
        }
        q.remove(&mut table, slots[1]);
        assert_eq!(ids(&q, &table), [0, 2, 3]);
        q.remove(&mut table, slots[3]);
        assert_eq!(ids(&q, &table), [0, 2]);
        q.remove(&mut table, slots[0]);
        assert_eq!(ids(&q, &table), [2]);
        q.remove(&mut table, slots[2]);
        assert!(q.is_empty());
        assert_eq!(q.pop_front(&mut table), None);

        q.push_back(&mut table, slots[3]);
        assert_eq!(ids(&q, &table), [3]);
    }

    #[test]
    fn slots_are_reused() {
        let (mut table, slots) = table_with(3);
        let t = table.take(slots[1]).unwrap();
        assert_eq!(t.id, ThreadId::new(1));
        assert_eq!(table.len(), 2);
        let s = table.insert(Box::new(Thread::new(ThreadId::new(7), Priority::High, 0)));
        assert_eq!(s, slots[1]);
        assert_eq!(table.find(ThreadId::new(7)), Some(s));
        assert_eq!(table.find(ThreadId::new(1)), None);
    }
}
