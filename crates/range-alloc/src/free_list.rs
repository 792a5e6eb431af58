//! Address-ordered free list of spans.
//!
//! The list holds the free intervals of the managed region, sorted strictly
//! increasing by base and strictly non-adjacent: whenever a released interval
//! touches a neighbor it is merged on the spot, so two consecutive spans
//! always leave a gap between them. Those two properties are what keep every
//! span maximal and the list length proportional to fragmentation.
//!
//! Allocation is first-fit: the list is scanned from the lowest address and
//! the first span satisfying the placement is carved. Within the chosen span
//! the placement picks the address that avoids creating a second fragment
//! where possible: [`Placement::Any`] and [`Placement::Below`] take the span
//! base and leave a single upper remainder, [`Placement::Above`] packs the
//! allocation against the span's top end and leaves a single lower remainder.
//! Only [`Placement::Exact`] can land in the middle of a span and force a
//! three-way split, which is the one carve that needs a fresh node.
//!
//! All addresses and lengths entering the engine are already normalized to
//! granularity multiples and verified to lie inside the managed region, so
//! span arithmetic cannot overflow. Hints are raw caller input and are
//! combined with checked arithmetic.

use core::ops::Range;

use crate::{
    Placement,
    store::{SpanId, SpanNode, SpanStore},
};

/// Why an allocation could not be carved out of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AllocFailure {
    /// No span satisfies the placement for the requested length.
    NoSpan,
    /// A mid-span carve needed a node the store could not provide.
    NodesExhausted,
}

pub(crate) struct FreeList<S> {
    store: S,
    head: Option<SpanId>,
}

impl<S: SpanStore> FreeList<S> {
    /// Builds a list over `store` holding the single span `[base, base + length)`.
    pub(crate) fn with_region(mut store: S, base: usize, length: usize) -> Self {
        let head = store.acquire().map(|id| {
            *store.node_mut(id) = SpanNode {
                base,
                length,
                next: None,
            };
            id
        });
        Self { store, head }
    }

    /// First-fit scan; carves and returns the placed address on success.
    pub(crate) fn allocate(
        &mut self,
        length: usize,
        placement: Placement,
    ) -> Result<usize, AllocFailure> {
        let mut prev: Option<SpanId> = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let span = *self.store.node(id);
            if let Some(addr) = placement_addr(&span, length, placement) {
                return self.carve(prev, id, addr, length);
            }
            prev = Some(id);
            cursor = span.next;
        }
        Err(AllocFailure::NoSpan)
    }

    /// Takes `[addr, addr + length)` out of the span behind `id`.
    fn carve(
        &mut self,
        prev: Option<SpanId>,
        id: SpanId,
        addr: usize,
        length: usize,
    ) -> Result<usize, AllocFailure> {
        let span = *self.store.node(id);
        let alloc_end = addr + length;

        if addr == span.base && length == span.length {
            self.unlink(prev, id);
        } else if addr == span.base {
            let node = self.store.node_mut(id);
            node.base += length;
            node.length -= length;
        } else if alloc_end == span.end() {
            self.store.node_mut(id).length -= length;
        } else {
            // Interior carve: the upper remainder needs its own node.
            // Acquire it before touching the span so exhaustion leaves the
            // list untouched.
            let upper = self
                .store
                .acquire()
                .ok_or(AllocFailure::NodesExhausted)?;
            *self.store.node_mut(upper) = SpanNode {
                base: alloc_end,
                length: span.end() - alloc_end,
                next: span.next,
            };
            let node = self.store.node_mut(id);
            node.length = addr - span.base;
            node.next = Some(upper);
        }

        Ok(addr)
    }

    /// Gives `[base, base + length)` back to the list, merging with any
    /// touching neighbor. A release that overlaps an existing span is
    /// dropped: the interval is at least partly free already, so honoring it
    /// would corrupt the accounting.
    pub(crate) fn release(&mut self, base: usize, length: usize) {
        let end = base + length;
        let mut prev: Option<SpanId> = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let span = *self.store.node(id);

            if end < span.base {
                // Strictly before this span: new disjoint hole.
                self.insert_between(prev, base, length, Some(id));
                return;
            }

            if end == span.base {
                // Touches the low side: grow the span downward. The previous
                // span cannot also touch `base`, otherwise the walk would
                // have merged there one iteration earlier.
                let node = self.store.node_mut(id);
                node.base = base;
                node.length += length;
                return;
            }

            if base < span.end() {
                // Overlaps free space: double free.
                return;
            }

            if base == span.end() {
                // Touches the high side. The released interval may also
                // reach the following span and close the gap entirely.
                if let Some(next_id) = span.next {
                    let next = *self.store.node(next_id);
                    if end > next.base {
                        return;
                    }
                    if end == next.base {
                        let node = self.store.node_mut(id);
                        node.length += length + next.length;
                        node.next = next.next;
                        self.store.release(next_id);
                        return;
                    }
                }
                self.store.node_mut(id).length += length;
                return;
            }

            prev = Some(id);
            cursor = span.next;
        }

        // Fully past every span.
        self.insert_between(prev, base, length, None);
    }

    /// Links a fresh span between `prev` and `next`.
    fn insert_between(
        &mut self,
        prev: Option<SpanId>,
        base: usize,
        length: usize,
        next: Option<SpanId>,
    ) {
        let Some(id) = self.store.acquire() else {
            // Only reachable when a bounded store was sized below the
            // worst-case span count; the interval is dropped rather than
            // corrupting the list.
            return;
        };
        *self.store.node_mut(id) = SpanNode { base, length, next };
        match prev {
            Some(prev_id) => self.store.node_mut(prev_id).next = Some(id),
            None => self.head = Some(id),
        }
    }

    /// Unlinks the span behind `id` and returns its node to the store.
    fn unlink(&mut self, prev: Option<SpanId>, id: SpanId) {
        let next = self.store.node(id).next;
        match prev {
            Some(prev_id) => self.store.node_mut(prev_id).next = next,
            None => self.head = next,
        }
        self.store.release(id);
    }

    pub(crate) fn iter(&self) -> Spans<'_, S> {
        Spans {
            list: self,
            cursor: self.head,
        }
    }
}

/// Chooses the address to place `length` units inside `span`, or `None` when
/// the span does not qualify under `placement`.
fn placement_addr(span: &SpanNode, length: usize, placement: Placement) -> Option<usize> {
    match placement {
        Placement::Any => (span.length >= length).then_some(span.base),
        Placement::Exact(hint) => {
            let fits = span.base <= hint
                && hint.checked_add(length).is_some_and(|end| end <= span.end());
            fits.then_some(hint)
        }
        Placement::Above(hint) => {
            let fits = if span.base >= hint {
                // Span lies entirely above the hint: any fit works.
                span.length >= length
            } else if span.end() >= hint {
                // Span straddles the hint: only the part above it counts.
                hint.checked_add(length).is_some_and(|end| span.end() >= end)
            } else {
                return None;
            };
            // Packing against the top keeps the remainder in one piece.
            fits.then(|| span.end() - length)
        }
        Placement::Below(hint) => {
            let fits = span.length >= length
                && span
                    .base
                    .checked_add(length)
                    .is_some_and(|end| end <= hint);
            fits.then_some(span.base)
        }
    }
}

/// Address-ordered iterator over the free spans, yielded as `base..end`.
pub struct Spans<'a, S> {
    list: &'a FreeList<S>,
    cursor: Option<SpanId>,
}

impl<S: SpanStore> Iterator for Spans<'_, S> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.list.store.node(id);
        self.cursor = node.next;
        Some(node.base..node.end())
    }
}
