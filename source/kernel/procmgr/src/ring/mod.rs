// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Index-stable circular arena backing the task and process stores
//! OWNERS: @kernel-team
//! PUBLIC API: Ring<T>, SlotId, Iter
//! DEPENDS_ON: alloc::vec::Vec
//! INVARIANTS: Links form one cycle over all occupied slots; every traversal is bounded by len;
//!             a SlotId stays valid until its slot is removed and never aliases a reused slot
//!
//! Links are indices into the slot vector rather than pointers, so splicing a node in or
//! out is a handful of index writes performed under whatever lock owns the ring.

extern crate alloc;

use alloc::vec::Vec;

/// Stable reference to an occupied slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

struct Node<T> {
    value: T,
    prev: u32,
    next: u32,
}

struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Circular doubly-linked list stored in a slot arena with a free list.
pub struct Ring<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    head: Option<u32>,
    len: usize,
}

impl<T> Ring<T> {
    pub const fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Splices `value` in at the tail (just before the head) and returns its id.
    pub fn insert(&mut self, value: T) -> SlotId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot { generation: 0, node: None });
                (self.slots.len() - 1) as u32
            }
        };
        let (prev, next) = match self.head {
            None => (index, index),
            Some(head) => (self.node(head).prev, head),
        };
        self.slots[index as usize].node = Some(Node { value, prev, next });
        if self.head.is_none() {
            self.head = Some(index);
        } else {
            self.node_mut(prev).next = index;
            self.node_mut(next).prev = index;
        }
        self.len += 1;
        SlotId { index, generation: self.slots[index as usize].generation }
    }

    /// Unlinks the slot and returns its value; `None` for stale ids.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        let slot = &mut self.slots[id.index as usize];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        if self.len == 0 {
            self.head = None;
        } else {
            self.node_mut(node.prev).next = node.next;
            self.node_mut(node.next).prev = node.prev;
            if self.head == Some(id.index) {
                self.head = Some(node.next);
            }
        }
        self.free.push(id.index);
        Some(node.value)
    }

    /// Returns true while `id` names an occupied slot.
    pub fn contains(&self, id: SlotId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|slot| slot.generation == id.generation && slot.node.is_some())
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref().map(|node| &node.value)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut().map(|node| &mut node.value)
    }

    pub fn head(&self) -> Option<SlotId> {
        self.head.map(|index| self.id_of(index))
    }

    /// Successor of `id` in ring order (itself when it is the only element).
    pub fn next(&self, id: SlotId) -> Option<SlotId> {
        if !self.contains(id) {
            return None;
        }
        Some(self.id_of(self.node(id.index).next))
    }

    #[cfg(test)]
    pub(crate) fn prev(&self, id: SlotId) -> Option<SlotId> {
        if !self.contains(id) {
            return None;
        }
        Some(self.id_of(self.node(id.index).prev))
    }

    /// Visits every element once, starting at the head.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { ring: self, cursor: self.head, remaining: self.len }
    }

    /// Visits every element once, starting at `start`; empty for a stale id.
    pub fn cycle_from(&self, start: SlotId) -> Iter<'_, T> {
        if self.contains(start) {
            Iter { ring: self, cursor: Some(start.index), remaining: self.len }
        } else {
            Iter { ring: self, cursor: None, remaining: 0 }
        }
    }

    /// First element in ring order matching `pred`.
    pub fn find<F>(&self, mut pred: F) -> Option<SlotId>
    where
        F: FnMut(&T) -> bool,
    {
        self.iter().find(|(_, value)| pred(value)).map(|(id, _)| id)
    }

    fn id_of(&self, index: u32) -> SlotId {
        SlotId { index, generation: self.slots[index as usize].generation }
    }

    fn node(&self, index: u32) -> &Node<T> {
        match self.slots[index as usize].node.as_ref() {
            Some(node) => node,
            None => panic!("ring link points at vacant slot {index}"),
        }
    }

    fn node_mut(&mut self, index: u32) -> &mut Node<T> {
        match self.slots[index as usize].node.as_mut() {
            Some(node) => node,
            None => panic!("ring link points at vacant slot {index}"),
        }
    }
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded traversal; yields at most `len` elements.
pub struct Iter<'a, T> {
    ring: &'a Ring<T>,
    cursor: Option<u32>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (SlotId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.cursor?;
        let node = self.ring.node(index);
        self.remaining -= 1;
        self.cursor = Some(node.next);
        Some((self.ring.id_of(index), &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests_prop;
