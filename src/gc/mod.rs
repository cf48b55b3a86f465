//! The consumed collector interface: the GC and runtime surface this crate
//! relies on without owning.
//!
//! Everything in here is the *external collaborator*: a conservative,
//! mark-sweep garbage collector that hands out blocks tagged with attribute
//! bits. The rest of the crate only ever talks to collectors through the
//! [`Collector`] trait, generic over the backing allocator the way a
//! growable, GC-backed container would be generic over its allocator instead
//! of owning one outright.
//!
//! [`simple::SimpleCollector`] is the reference backend used by this crate's
//! own tests: one concrete, testable implementation behind the trait the
//! rest of the crate is written against.

pub mod simple;

use bitflags::bitflags;

bitflags! {
    /// Per-block attribute bits. Exactly these
    /// five; `ALL_BITS` is a mask, not an independent bit.
    pub struct BlkAttr: u32 {
        /// Block holds an object requiring finalizer invocation.
        const FINALIZE  = 0b0001;
        /// GC need not scan this block for interior pointers.
        const NO_SCAN   = 0b0010;
        /// Block is pinned and must not be moved.
        const NO_MOVE   = 0b0100;
        /// Block carries in-band array length metadata (Used-Length field).
        const APPENDABLE = 0b1000;
        /// Mask of all defined attribute bits.
        const ALL_BITS  = 0b1111;
    }
}

/// A value triple describing a live GC block.
///
/// `size` is the block's *total* byte capacity, which may exceed the
/// requested size due to size-class rounding; callers must not assume
/// `size` equals whatever they asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub base: *mut u8,
    pub size: usize,
    pub attrs: BlkAttr,
}

impl BlockDescriptor {
    /// The canonical "no block" descriptor: a null base with zero size.
    pub const NULL: BlockDescriptor = BlockDescriptor {
        base: std::ptr::null_mut(),
        size: 0,
        attrs: BlkAttr::empty(),
    };

    #[inline]
    pub fn is_null(&self) -> bool {
        self.base.is_null()
    }

    /// Whether `interior` falls within `[base, base + size)`.
    #[inline]
    pub fn contains(&self, interior: *const u8) -> bool {
        if self.base.is_null() {
            return false;
        }
        let start = self.base as usize;
        let end = start + self.size;
        let p = interior as usize;
        p >= start && p < end
    }
}

// SAFETY: `BlockDescriptor` is a plain value triple of an address, a size,
// and a bitset; it carries no borrow and is safe to hand across threads as
// long as the memory it describes is managed with the same discipline any
// raw pointer would require.
unsafe impl Send for BlockDescriptor {}
unsafe impl Sync for BlockDescriptor {}

/// The external collaborator: a conservative mark-sweep collector.
///
/// Method names (`gc_malloc`, `gc_qalloc`, ...) follow the C-runtime surface
/// this trait stands in for, with Rust casing. Implementations must be safe
/// to call from any user thread; they may suspend the calling thread to run
/// a collection cycle.
pub trait Collector {
    /// Allocate a block of at least `size` bytes tagged with `attrs`.
    /// Payload is left uninitialized. Returns null on failure instead of
    /// calling [`error::out_of_memory`](crate::error::out_of_memory) itself
    /// — callers decide whether a failure here is fatal.
    fn gc_malloc(&self, size: usize, attrs: BlkAttr) -> *mut u8;

    /// Like `gc_malloc`, but the payload is zeroed.
    fn gc_calloc(&self, size: usize, attrs: BlkAttr) -> *mut u8;

    /// Allocate and return the full descriptor in one call, avoiding a
    /// separate `gc_query` round trip right after allocation.
    fn gc_qalloc(&self, size: usize, attrs: BlkAttr) -> BlockDescriptor;

    /// Attempt to grow the block at `p` in place by at least `min_extra` and
    /// at most `max_extra` bytes. Returns the block's new total size, or the
    /// unchanged size if the extension could not be performed.
    fn gc_extend(&self, p: *mut u8, min_extra: usize, max_extra: usize) -> usize;

    /// Explicitly free the block at `p`. The core only calls this for
    /// `delete`-style explicit disposal paths.
    fn gc_free(&self, p: *mut u8);

    /// Resolve the block descriptor for any pointer into a live block,
    /// including interior pointers. Returns [`BlockDescriptor::NULL`] if `p`
    /// does not point into a block this collector manages.
    fn gc_query(&self, p: *const u8) -> BlockDescriptor;

    /// Convenience over `gc_query`: just the size.
    fn gc_size_of(&self, p: *const u8) -> usize {
        self.gc_query(p).size
    }

    /// Convenience over `gc_query`: the block's base address.
    fn gc_addr_of(&self, p: *const u8) -> *mut u8 {
        self.gc_query(p).base
    }

    fn gc_get_attr(&self, p: *const u8) -> BlkAttr {
        self.gc_query(p).attrs
    }

    /// Set bits in `attrs` on the block containing `p`; returns the previous
    /// attribute set.
    fn gc_set_attr(&self, p: *const u8, attrs: BlkAttr) -> BlkAttr;

    /// Clear bits in `attrs` on the block containing `p`; returns the
    /// previous attribute set.
    fn gc_clr_attr(&self, p: *const u8, attrs: BlkAttr) -> BlkAttr;

    /// Whether the block at `base` is about to be collected. Consumed by the
    /// block-info cache's sweep hook; collectors that
    /// never sweep (like [`simple::SimpleCollector`]) always answer `false`.
    fn gc_is_collecting(&self, base: *const u8) -> bool;
}
