//! Chunk Queue (C5): LRU over individual chunks plus a min-heap of Full
//! zones keyed by `chunks_in_use`, feeding the chunk policy's evictor.
//! Grounded in `chunk_queue.h` and the LRU/heap interplay in
//! `eviction/chunk.c`.

use std::collections::HashMap;

use zcache_core::{ChunkOffset, Geometry, Location, ZoneId};

use crate::heap::{Handle as HeapHandle, MinHeap};

type NodeHandle = u64;

struct Node {
    loc: Location,
    prev: Option<NodeHandle>,
    next: Option<NodeHandle>,
}

/// Doubly-linked LRU over chunk locations with O(1) promotion, plus the
/// invalid-zone heap used to pick GC's next victim.
pub struct ChunkQueue {
    geometry: Geometry,
    nodes: HashMap<NodeHandle, Node>,
    /// (zone, chunk_offset) -> node handle, for `update_chunk_in_lru` and
    /// "no-op if deactivated between lookup and update".
    index: HashMap<(ZoneId, ChunkOffset), NodeHandle>,
    head: Option<NodeHandle>,
    tail: Option<NodeHandle>,
    next_handle: NodeHandle,
    invalid_heap: MinHeap<ZoneId>,
    zone_heap_handles: HashMap<ZoneId, HeapHandle>,
}

impl ChunkQueue {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            nodes: HashMap::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            next_handle: 0,
            invalid_heap: MinHeap::new(),
            zone_heap_handles: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether any Full zone is currently tracked for GC selection.
    pub fn invalid_heap_is_empty(&self) -> bool {
        self.invalid_heap.is_empty()
    }

    fn unlink(&mut self, handle: NodeHandle) {
        let (prev, next) = {
            let node = &self.nodes[&handle];
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes.get_mut(&p).unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes.get_mut(&n).unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_tail(&mut self, handle: NodeHandle) {
        let old_tail = self.tail;
        {
            let node = self.nodes.get_mut(&handle).unwrap();
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => self.nodes.get_mut(&t).unwrap().next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
    }

    /// Append to the LRU tail. When this fills the zone, register it in
    /// the invalid-zone heap.
    pub fn add_chunk_to_lru(&mut self, loc: Location, chunks_in_use: u32) {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.nodes.insert(
            handle,
            Node {
                loc,
                prev: None,
                next: None,
            },
        );
        self.index.insert((loc.zone, loc.chunk_offset), handle);
        self.push_tail(handle);

        if loc.chunk_offset + 1 == self.geometry.chunks_per_zone() {
            let heap_handle = self.invalid_heap.insert(loc.zone, chunks_in_use);
            self.zone_heap_handles.insert(loc.zone, heap_handle);
        }
    }

    /// Move a chunk to the tail (most-recently-used). A no-op if it was
    /// already removed (e.g. evicted) between lookup and this call.
    pub fn update_chunk_in_lru(&mut self, loc: Location) {
        if let Some(&handle) = self.index.get(&(loc.zone, loc.chunk_offset)) {
            self.unlink(handle);
            self.push_tail(handle);
        }
    }

    /// Pop the LRU head (least-recently-used chunk). Updates the zone's
    /// heap priority if that zone is Full and tracked.
    pub fn invalidate_latest_chunk(&mut self) -> Option<(Location, u32)> {
        let handle = self.head?;
        let loc = self.nodes[&handle].loc;
        self.unlink(handle);
        self.nodes.remove(&handle);
        self.index.remove(&(loc.zone, loc.chunk_offset));

        let new_in_use = self.refresh_zone_priority(loc.zone);
        Some((loc, new_in_use))
    }

    /// Recompute the heap priority for `zone` from the remaining live
    /// chunks still resident in this LRU and re-push it. Returns the new
    /// count (the caller is the source of truth for `chunks_in_use`, so
    /// this is advisory bookkeeping local to the queue's own handle).
    fn refresh_zone_priority(&mut self, zone: ZoneId) -> u32 {
        let remaining = self.index.keys().filter(|(z, _)| *z == zone).count() as u32;
        if let Some(&handle) = self.zone_heap_handles.get(&zone) {
            self.invalid_heap.update(handle, remaining, zone);
        }
        remaining
    }

    /// Extract the Full zone with fewest live chunks; remove all of its
    /// chunk handles from the LRU and index; return its still-valid
    /// chunks in whatever order they were stored (GC sorts separately
    /// when compacting in place).
    pub fn zone_dequeue(&mut self) -> Option<(ZoneId, Vec<Location>)> {
        let (_, zone) = self.invalid_heap.extract_min()?;
        self.zone_heap_handles.remove(&zone);

        let handles: Vec<NodeHandle> = self
            .index
            .iter()
            .filter(|((z, _), _)| *z == zone)
            .map(|(_, &h)| h)
            .collect();

        let mut valid = Vec::with_capacity(handles.len());
        for handle in handles {
            let loc = self.nodes[&handle].loc;
            self.unlink(handle);
            self.nodes.remove(&handle);
            self.index.remove(&(loc.zone, loc.chunk_offset));
            valid.push(loc);
        }

        Some((zone, valid))
    }
}
