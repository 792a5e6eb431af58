//! First-fit virtual address range allocator.
//!
//! This crate carves a contiguous numeric interval `[base, base + length)`
//! into disjoint sub-ranges on request and reclaims them on release. No
//! backing memory is touched; only intervals are tracked. That makes it the
//! bookkeeping piece behind address-space management: virtual-memory
//! regions, PCI BAR windows, I/O port ranges.
//!
//! # Algorithm
//!
//! Free space is kept as an address-ordered singly linked list of maximal
//! spans. Allocation scans the list from the lowest address and carves the
//! first span satisfying the requested [`Placement`]; release walks the same
//! list and merges the returned interval with any touching neighbor, so
//! fragmentation is undone as soon as it can be. Memory overhead is
//! proportional to fragmentation, not to the size of the managed region,
//! which is why a bitmap representation was rejected.
//!
//! Every allocation length is rounded up to a multiple of the allocator's
//! granularity, and every returned address is granularity-aligned.
//!
//! # Node storage
//!
//! List nodes come from a [`store::SpanStore`], chosen at compile time
//! through the allocator's type parameter:
//!
//! - [`store::FixedPool`] (the default) preallocates the worst-case node
//!   count and never touches the heap afterwards.
//! - [`store::HeapPool`] grows lazily and recycles nodes until drop.
//!
//! # Examples
//!
//! ```
//! use range_alloc::{Placement, RangeAllocator};
//!
//! let mut ra = RangeAllocator::new(0x1000, 4096, 64).unwrap();
//!
//! // 200 rounds up to 256, placed at the lowest free address.
//! let code = ra.allocate(200, Placement::Any).unwrap();
//! assert_eq!(code, 0x1000);
//!
//! // The whole range lands at or above the hint.
//! let stack = ra.allocate(1024, Placement::Above(0x1800)).unwrap();
//! assert!(stack >= 0x1800);
//!
//! ra.free(code, 200);
//! assert_eq!(ra.free_total(), 4096 - 1024);
//! ```
//!
//! # Performance
//!
//! Allocation and release are O(n) in the number of free spans; merging at
//! the release site is O(1). The first-fit scan is deliberate: address
//! ordering keeps allocations packed low and re-coalescing cheap.
//!
//! # Thread safety
//!
//! An allocator is a single mutable resource. All operations take
//! `&mut self`; embedding in a multi-threaded environment requires external
//! mutual exclusion around every call.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::fmt;

use snafu::{Location, Snafu, ensure};

use self::store::{FixedPool, SpanStore};
pub use self::free_list::Spans;
use self::free_list::{AllocFailure, FreeList};

mod free_list;
pub mod store;

/// Errors rejected by [`RangeAllocator::new`].
#[derive(Debug, Snafu)]
pub enum CreateError {
    #[snafu(display("base address must not be zero"))]
    ZeroBase {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("region length must not be zero"))]
    ZeroLength {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("granularity must not be zero"))]
    ZeroGranularity {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("granularity {granularity} exceeds region length {length}"))]
    GranularityExceedsLength {
        granularity: usize,
        length: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("base {base:#x} is not a multiple of granularity {granularity}"))]
    UnalignedBase {
        base: usize,
        granularity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("region end {base:#x} + {length:#x} overflows the address type"))]
    RegionOverflow {
        base: usize,
        length: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors returned by [`RangeAllocator::allocate`].
#[derive(Debug, Snafu)]
pub enum AllocError {
    #[snafu(display("allocation length must not be zero"))]
    ZeroLengthRequest {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "allocation length {requested:#x} exceeds usable region length {usable:#x}"
    ))]
    ExceedsRegion {
        requested: usize,
        usable: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("exact hint {hint:#x} is not a multiple of granularity {granularity}"))]
    UnalignedHint {
        hint: usize,
        granularity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no free span satisfies {placement:?} for length {requested:#x}"))]
    Unsatisfiable {
        requested: usize,
        placement: Placement,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("span node storage exhausted while splitting a span"))]
    NodesExhausted {
        requested: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Where an allocation is placed relative to the caller's hint.
///
/// Lengths are rounded to the allocator's granularity before any of these
/// are evaluated; hints are taken as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Anywhere: the lowest free address with room for the request.
    Any,
    /// Exactly at the given address, which must sit on the allocator's
    /// granularity grid.
    Exact(usize),
    /// The whole range at or above the given address. Within the chosen
    /// span the range is packed against the top end.
    Above(usize),
    /// The whole range ending at or below the given address, packed
    /// against the chosen span's base.
    Below(usize),
}

/// Allocator for one contiguous address region.
///
/// Construction validates the region and seeds the free list with a single
/// span covering all of it; [`allocate`](Self::allocate) and
/// [`free`](Self::free) carve and mend that list. Dropping the allocator
/// releases all bookkeeping; holders of allocated ranges are not notified,
/// as the allocator keeps no record of them.
pub struct RangeAllocator<S: SpanStore = FixedPool> {
    base: usize,
    length: usize,
    granularity: usize,
    free_list: FreeList<S>,
}

impl RangeAllocator<FixedPool> {
    /// Creates an allocator for `[base, base + length)` with the default
    /// preallocated node store.
    ///
    /// The usable length is `length` rounded down to a multiple of
    /// `granularity` and may be smaller than the value passed in.
    ///
    /// # Errors
    ///
    /// Fails if any parameter is zero, if `granularity > length`, if `base`
    /// is not a multiple of `granularity`, or if the region end does not fit
    /// in the address type.
    ///
    /// # Examples
    ///
    /// ```
    /// use range_alloc::RangeAllocator;
    ///
    /// // 100 rounds down to a single 64-unit granule.
    /// let ra = RangeAllocator::new(0x1000, 100, 64).unwrap();
    /// assert_eq!(ra.length(), 64);
    ///
    /// assert!(RangeAllocator::new(0x1000, 4096, 8192).is_err());
    /// ```
    pub fn new(base: usize, length: usize, granularity: usize) -> Result<Self, CreateError> {
        Self::with_store(base, length, granularity)
    }
}

impl<S: SpanStore> RangeAllocator<S> {
    /// Creates an allocator backed by the node store `S`.
    ///
    /// The store is built with the worst-case span count for the region,
    /// reached when allocated and free granules alternate. Bounded stores
    /// size themselves to that figure; lazy ones may ignore it.
    ///
    /// # Errors
    ///
    /// Same conditions as [`RangeAllocator::new`].
    ///
    /// # Examples
    ///
    /// ```
    /// use range_alloc::{Placement, RangeAllocator, store::HeapPool};
    ///
    /// let mut ra = RangeAllocator::<HeapPool>::with_store(0x4000_0000, 1 << 20, 4096).unwrap();
    /// assert_eq!(ra.allocate(1, Placement::Any).unwrap(), 0x4000_0000);
    /// ```
    pub fn with_store(base: usize, length: usize, granularity: usize) -> Result<Self, CreateError> {
        ensure!(base != 0, ZeroBaseSnafu);
        ensure!(length != 0, ZeroLengthSnafu);
        ensure!(granularity != 0, ZeroGranularitySnafu);
        ensure!(
            granularity <= length,
            GranularityExceedsLengthSnafu {
                granularity,
                length
            }
        );
        ensure!(
            base.is_multiple_of(granularity),
            UnalignedBaseSnafu { base, granularity }
        );

        let usable = length / granularity * granularity;
        ensure!(
            base.checked_add(usable).is_some(),
            RegionOverflowSnafu {
                base,
                length: usable
            }
        );

        let granules = usable / granularity;
        let store = S::with_capacity(granules.div_ceil(2));
        Ok(Self {
            base,
            length: usable,
            granularity,
            free_list: FreeList::with_region(store, base, usable),
        })
    }

    /// Allocates `length` units under the given placement and returns the
    /// base address of the carved range.
    ///
    /// `length` is rounded up to a multiple of the granularity. The free
    /// list is scanned from the lowest address; the first span satisfying
    /// the placement is used.
    ///
    /// # Errors
    ///
    /// Fails if `length` is zero or exceeds the usable region length, if a
    /// [`Placement::Exact`] hint is off the granularity grid, or if no free
    /// span satisfies the placement.
    ///
    /// # Examples
    ///
    /// ```
    /// use range_alloc::{Placement, RangeAllocator};
    ///
    /// let mut ra = RangeAllocator::new(0x1000, 4096, 64).unwrap();
    /// assert_eq!(ra.allocate(64, Placement::Exact(0x1800)).unwrap(), 0x1800);
    /// assert!(ra.allocate(64, Placement::Exact(0x1800)).is_err());
    /// ```
    pub fn allocate(&mut self, length: usize, placement: Placement) -> Result<usize, AllocError> {
        ensure!(length != 0, ZeroLengthRequestSnafu);
        ensure!(
            length <= self.length,
            ExceedsRegionSnafu {
                requested: length,
                usable: self.length
            }
        );
        // Cannot overflow: length is at most the usable length, itself a
        // granularity multiple.
        let rounded = length.next_multiple_of(self.granularity);

        // Exact is the one placement that returns the hint itself, so the
        // hint has to sit on a granularity boundary to keep every span
        // endpoint aligned.
        if let Placement::Exact(hint) = placement {
            ensure!(
                hint.is_multiple_of(self.granularity),
                UnalignedHintSnafu {
                    hint,
                    granularity: self.granularity
                }
            );
        }

        match self.free_list.allocate(rounded, placement) {
            Ok(addr) => Ok(addr),
            Err(AllocFailure::NoSpan) => UnsatisfiableSnafu {
                requested: rounded,
                placement,
            }
            .fail(),
            Err(AllocFailure::NodesExhausted) => NodesExhaustedSnafu {
                requested: rounded,
            }
            .fail(),
        }
    }

    /// Returns `[base, base + length)` to the free list.
    ///
    /// `base` is rounded down and `length` up to granularity multiples, so
    /// a range obtained from [`allocate`](Self::allocate) can be given back
    /// verbatim. Partial releases of a larger allocation are accepted.
    ///
    /// Invalid requests are ignored without effect: a zero `length`, a range
    /// reaching outside the managed region, or a range overlapping space
    /// that is already free (a double free). The allocator keeps no record
    /// of live allocations, so range and overlap checks are the only
    /// validation it can do.
    ///
    /// # Examples
    ///
    /// ```
    /// use range_alloc::{Placement, RangeAllocator};
    ///
    /// let mut ra = RangeAllocator::new(0x1000, 4096, 64).unwrap();
    /// let addr = ra.allocate(512, Placement::Any).unwrap();
    ///
    /// ra.free(addr, 512);
    /// assert_eq!(ra.free_total(), 4096);
    ///
    /// // Freeing the same range again is ignored.
    /// ra.free(addr, 512);
    /// assert_eq!(ra.free_total(), 4096);
    /// ```
    pub fn free(&mut self, base: usize, length: usize) {
        if length == 0 {
            return;
        }
        let aligned_base = base / self.granularity * self.granularity;
        let Some(rounded) = length.checked_next_multiple_of(self.granularity) else {
            return;
        };

        let region_end = self.base + self.length;
        if aligned_base < self.base || aligned_base >= region_end {
            return;
        }
        let Some(end) = aligned_base.checked_add(rounded) else {
            return;
        };
        if end > region_end {
            return;
        }

        self.free_list.release(aligned_base, rounded);
    }

    /// Base address of the managed region.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Usable region length: the constructed length rounded down to a
    /// granularity multiple.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Accounting unit for all addresses and lengths.
    #[must_use]
    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Address-ordered iterator over the free spans, as `base..end` ranges.
    ///
    /// # Examples
    ///
    /// ```
    /// use range_alloc::{Placement, RangeAllocator};
    ///
    /// let mut ra = RangeAllocator::new(0x1000, 4096, 64).unwrap();
    /// ra.allocate(1024, Placement::Exact(0x1800)).unwrap();
    ///
    /// let spans: Vec<_> = ra.spans().collect();
    /// assert_eq!(spans, [0x1000..0x1800, 0x1c00..0x2000]);
    /// ```
    pub fn spans(&self) -> Spans<'_, S> {
        self.free_list.iter()
    }

    /// Sum of all free span lengths.
    #[must_use]
    pub fn free_total(&self) -> usize {
        self.spans().map(|span| span.len()).sum()
    }
}

impl<S: SpanStore> fmt::Debug for RangeAllocator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct DebugSpans<'a, S: SpanStore>(&'a RangeAllocator<S>);
        impl<S: SpanStore> fmt::Debug for DebugSpans<'_, S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_list().entries(self.0.spans()).finish()
            }
        }

        f.debug_struct("RangeAllocator")
            .field("base", &self.base)
            .field("length", &self.length)
            .field("granularity", &self.granularity)
            .field("free", &DebugSpans(self))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_parameters() {
        assert!(matches!(
            RangeAllocator::new(0, 4096, 64),
            Err(CreateError::ZeroBase { .. })
        ));
        assert!(matches!(
            RangeAllocator::new(0x1000, 0, 64),
            Err(CreateError::ZeroLength { .. })
        ));
        assert!(matches!(
            RangeAllocator::new(0x1000, 4096, 0),
            Err(CreateError::ZeroGranularity { .. })
        ));
    }

    #[test]
    fn rejects_granularity_larger_than_length() {
        assert!(matches!(
            RangeAllocator::new(0x1000, 4096, 8192),
            Err(CreateError::GranularityExceedsLength { .. })
        ));
    }

    #[test]
    fn rejects_unaligned_base() {
        assert!(matches!(
            RangeAllocator::new(0x1010, 4096, 64),
            Err(CreateError::UnalignedBase { .. })
        ));
    }

    #[test]
    fn rejects_region_end_overflow() {
        assert!(matches!(
            RangeAllocator::new(usize::MAX - 0xfff, 0x2000, 0x1000),
            Err(CreateError::RegionOverflow { .. })
        ));
        let base = (usize::MAX >> 1) + 1;
        assert!(matches!(
            RangeAllocator::new(base, base, 0x1000),
            Err(CreateError::RegionOverflow { .. })
        ));
    }

    #[test]
    fn rounds_length_down_to_granularity() {
        let ra = RangeAllocator::new(0x1000, 1000, 64).unwrap();
        assert_eq!(ra.length(), 960);
        assert_eq!(ra.free_total(), 960);
        assert_eq!(ra.base(), 0x1000);
        assert_eq!(ra.granularity(), 64);
    }

    #[test]
    fn rounds_allocation_length_up_to_granularity() {
        let mut ra = RangeAllocator::new(0x1000, 4096, 64).unwrap();
        ra.allocate(1, Placement::Any).unwrap();
        assert_eq!(ra.allocate(1, Placement::Any).unwrap(), 0x1040);
    }

    #[test]
    fn works_with_non_power_of_two_granularity() {
        let mut ra = RangeAllocator::new(300, 1000, 100).unwrap();
        assert_eq!(ra.length(), 1000);
        assert_eq!(ra.allocate(150, Placement::Any).unwrap(), 300);
        assert_eq!(ra.allocate(1, Placement::Any).unwrap(), 500);
        ra.free(300, 200);
        assert_eq!(ra.allocate(200, Placement::Any).unwrap(), 300);
    }

    #[test]
    fn allocation_failures_name_the_reason() {
        let mut ra = RangeAllocator::new(0x1000, 4096, 64).unwrap();
        assert!(matches!(
            ra.allocate(0, Placement::Any),
            Err(AllocError::ZeroLengthRequest { .. })
        ));
        assert!(matches!(
            ra.allocate(4097, Placement::Any),
            Err(AllocError::ExceedsRegion { .. })
        ));
        assert!(matches!(
            ra.allocate(64, Placement::Below(0x1000)),
            Err(AllocError::Unsatisfiable { .. })
        ));
        assert!(matches!(
            ra.allocate(64, Placement::Exact(0x1801)),
            Err(AllocError::UnalignedHint { .. })
        ));
    }

    #[test]
    fn free_normalizes_base_and_length() {
        let mut ra = RangeAllocator::new(0x1000, 4096, 64).unwrap();
        let addr = ra.allocate(128, Placement::Any).unwrap();
        // Misaligned base rounds down, short length rounds up.
        ra.free(addr + 1, 127);
        assert_eq!(ra.free_total(), 4096);
    }

    #[test]
    fn free_outside_the_region_is_ignored() {
        let mut ra = RangeAllocator::new(0x1000, 4096, 64).unwrap();
        ra.allocate(4096, Placement::Any).unwrap();

        ra.free(0x1000, 0);
        ra.free(0x800, 64);
        ra.free(0x2000, 64);
        ra.free(0x1fc0, 128);
        ra.free(0x1000, usize::MAX);
        assert_eq!(ra.free_total(), 0);

        ra.free(0x1000, 4096);
        assert_eq!(ra.free_total(), 4096);
    }

    #[test]
    fn debug_output_lists_free_spans() {
        let mut ra = RangeAllocator::new(0x1000, 4096, 64).unwrap();
        ra.allocate(1024, Placement::Exact(0x1800)).unwrap();
        let dump = alloc::format!("{ra:?}");
        assert!(dump.contains("4096..6144"));
        assert!(dump.contains("7168..8192"));
    }
}
