//! Generic min-heap (C2): priority queue keyed by a mutable `u32` priority,
//! with an external handle that stays valid across sifts, decrease-key, and
//! increase-key.
//!
//! `std::collections::BinaryHeap` is a max-heap with no in-place
//! reprioritization. Following the reversed-`Ord` trick used to turn it into
//! a min-heap for LBA scheduling, entries additionally carry a generation
//! counter: `update` pushes a fresh entry and bumps the handle's current
//! generation, so any copies of the old entry still in the heap are stale
//! and are skipped (lazily deleted) when popped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;

/// Stable reference to an entry in a [`MinHeap`]. Remains valid across
/// `update` calls; invalidated only by `extract_min` or `remove`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(u64);

struct Entry<T> {
    priority: u32,
    handle: Handle,
    generation: u32,
    payload: T,
    /// Tie-break: insertion order, ties broken in favor of earlier inserts.
    seq: u64,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<T> Eq for Entry<T> {}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap (a max-heap) behaves as a min-heap.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap over `(priority, payload)` with stable handles.
pub struct MinHeap<T> {
    heap: BinaryHeap<Entry<T>>,
    /// current generation per live handle; entries popped with a
    /// mismatching generation are stale and are discarded.
    current_generation: HashMap<u64, u32>,
    next_handle: u64,
    next_seq: u64,
}

impl<T> Default for MinHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MinHeap<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            current_generation: HashMap::new(),
            next_handle: 0,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.current_generation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current_generation.is_empty()
    }

    /// Insert `payload` with `priority`, returning a stable handle.
    pub fn insert(&mut self, payload: T, priority: u32) -> Handle {
        let id = self.next_handle;
        self.next_handle += 1;
        let handle = Handle(id);
        self.current_generation.insert(id, 0);
        self.push(handle, 0, priority, payload);
        handle
    }

    fn push(&mut self, handle: Handle, generation: u32, priority: u32, payload: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            handle,
            generation,
            payload,
            seq,
        });
    }

    /// Pop and return the minimum-priority live entry, or `None` if empty.
    pub fn extract_min(&mut self) -> Option<(Handle, T)> {
        while let Some(entry) = self.heap.pop() {
            let Entry {
                handle,
                generation,
                payload,
                ..
            } = entry;
            if self.current_generation.get(&handle.0) == Some(&generation) {
                self.current_generation.remove(&handle.0);
                return Some((handle, payload));
            }
            // stale copy left behind by a prior update/remove; skip it.
        }
        None
    }

    /// Update `handle`'s priority. The payload is re-supplied because the
    /// live copy sits buried under the stale copies in the binary heap;
    /// callers that only change priority and keep the payload should clone
    /// it first.
    pub fn update(&mut self, handle: Handle, new_priority: u32, payload: T) {
        if let Some(gen) = self.current_generation.get_mut(&handle.0) {
            *gen += 1;
            let generation = *gen;
            self.push(handle, generation, new_priority, payload);
        }
    }

    /// Remove `handle` from the heap entirely (no replacement entry).
    pub fn remove(&mut self, handle: Handle) {
        self.current_generation.remove(&handle.0);
    }
}
