//! Span node storage strategies.
//!
//! The free-list engine tracks free intervals in singly linked nodes. It
//! never creates nodes itself; it borrows them from a [`SpanStore`] and hands
//! them back when a span is absorbed or merged away. Two interchangeable
//! strategies satisfy the capability:
//!
//! - [`FixedPool`]: every node slot is allocated up front as one contiguous
//!   slab. The slot count covers worst-case fragmentation (alternating one
//!   granule allocated, one granule free), so a correctly sized pool can
//!   never run dry and the allocator performs no heap allocation after
//!   construction.
//! - [`HeapPool`]: slots are created lazily on first use and recycled on
//!   release. Memory returns to the heap only when the store is dropped.
//!
//! The strategy is chosen at compile time through the allocator's type
//! parameter; it changes the memory profile, not the observable behavior.
//!
//! Nodes are addressed by [`SpanId`], a typed index into the store's slab.
//! Free slots are threaded through the same `next` links the engine uses for
//! the span list, so a store needs no side table of its own.

use alloc::{boxed::Box, vec, vec::Vec};

/// Opaque handle to a node inside a [`SpanStore`].
///
/// Ids are only meaningful to the store that issued them and become dangling
/// once released back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(usize);

/// A single free-list node: one free interval plus its forward link.
#[derive(Debug, Clone, Copy)]
pub struct SpanNode {
    /// Inclusive low end of the free interval.
    pub base: usize,
    /// Interval length. Zero only while the node sits on a free-slot list.
    pub length: usize,
    /// Next node in address order, `None` at the tail.
    pub next: Option<SpanId>,
}

impl SpanNode {
    /// A node carrying no interval, used to fill fresh slots.
    pub const EMPTY: Self = Self {
        base: 0,
        length: 0,
        next: None,
    };

    /// Exclusive high end of the interval.
    #[must_use]
    pub fn end(&self) -> usize {
        self.base + self.length
    }
}

/// Provider of span nodes for the free-list engine.
///
/// `acquire` and `release` must be exact duals: a released id may be handed
/// out again by a later `acquire`, and every id obtained from `acquire` stays
/// valid until released. The engine calls `with_capacity` once, with the
/// worst-case node count for the region it manages; a strategy is free to
/// ignore the figure.
pub trait SpanStore {
    /// Creates a store able to hold `capacity` nodes at once.
    fn with_capacity(capacity: usize) -> Self;

    /// Takes a free node out of the store, or `None` if none is left.
    fn acquire(&mut self) -> Option<SpanId>;

    /// Returns a node to the store for reuse.
    fn release(&mut self, id: SpanId);

    /// Borrows the node behind `id`.
    fn node(&self, id: SpanId) -> &SpanNode;

    /// Mutably borrows the node behind `id`.
    fn node_mut(&mut self, id: SpanId) -> &mut SpanNode;
}

/// Bounded node store backed by a slab allocated at construction.
///
/// Free slots form a list threaded through the nodes' `next` links, so
/// `acquire` and `release` are a pop and a push. Exhaustion surfaces as
/// `None` from [`acquire`](SpanStore::acquire); with the worst-case capacity
/// the engine requests, that never happens.
#[derive(Debug)]
pub struct FixedPool {
    slots: Box<[SpanNode]>,
    free_head: Option<SpanId>,
}

impl SpanStore for FixedPool {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = vec![SpanNode::EMPTY; capacity].into_boxed_slice();
        for (index, slot) in slots.iter_mut().enumerate() {
            slot.next = (index + 1 < capacity).then(|| SpanId(index + 1));
        }
        Self {
            slots,
            free_head: (capacity > 0).then_some(SpanId(0)),
        }
    }

    fn acquire(&mut self) -> Option<SpanId> {
        let id = self.free_head?;
        self.free_head = self.slots[id.0].next;
        self.slots[id.0] = SpanNode::EMPTY;
        Some(id)
    }

    fn release(&mut self, id: SpanId) {
        self.slots[id.0].next = self.free_head;
        self.free_head = Some(id);
    }

    fn node(&self, id: SpanId) -> &SpanNode {
        &self.slots[id.0]
    }

    fn node_mut(&mut self, id: SpanId) -> &mut SpanNode {
        &mut self.slots[id.0]
    }
}

/// Unbounded node store that grows lazily and recycles released nodes.
///
/// A fresh store holds no nodes at all. `acquire` reuses a previously
/// released slot when one exists and extends the slab otherwise; the slab is
/// never shrunk, so released nodes keep their storage until the store is
/// dropped.
#[derive(Debug, Default)]
pub struct HeapPool {
    slots: Vec<SpanNode>,
    free_head: Option<SpanId>,
}

impl SpanStore for HeapPool {
    fn with_capacity(_capacity: usize) -> Self {
        Self::default()
    }

    fn acquire(&mut self) -> Option<SpanId> {
        if let Some(id) = self.free_head {
            self.free_head = self.slots[id.0].next;
            self.slots[id.0] = SpanNode::EMPTY;
            return Some(id);
        }
        let id = SpanId(self.slots.len());
        self.slots.push(SpanNode::EMPTY);
        Some(id)
    }

    fn release(&mut self, id: SpanId) {
        self.slots[id.0].next = self.free_head;
        self.free_head = Some(id);
    }

    fn node(&self, id: SpanId) -> &SpanNode {
        &self.slots[id.0]
    }

    fn node_mut(&mut self, id: SpanId) -> &mut SpanNode {
        &mut self.slots[id.0]
    }
}
