//! A reference [`Collector`] backend.
//!
//! `SimpleCollector` never moves and never actually sweeps; it exists so the
//! rest of this crate — and its own test suite — has something real to
//! allocate against without pulling in (or reimplementing) an actual tracing
//! collector, which is explicitly out of scope for this crate. It is one
//! concrete backend behind [`Collector`], the trait the rest of this library
//! is written against.
//!
//! Blocks are tracked in a `BTreeMap` keyed by base address so `gc_query`
//! can resolve interior pointers by range lookup — the same lookup the
//! block-info cache exists to make unnecessary on the hot path. Small and
//! medium blocks are backed by the system allocator. Large blocks
//! (`>= PAGESIZE`) are backed by an over-reserved `mmap` region so
//! `gc_extend` can genuinely grow a block without moving it, the same way a
//! real large-object space reserves address space and commits pages into it
//! on demand.

use std::alloc::{alloc, alloc_zeroed, dealloc, realloc, Layout};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::layout::PAGESIZE;

use super::{BlkAttr, BlockDescriptor, Collector};

const BLOCK_ALIGN: usize = 16;

/// A large block reserves this much extra address space up front so
/// `gc_extend` has room to commit into without relocating the block.
const LARGE_SLACK: usize = 4 * PAGESIZE;

enum Backing {
    /// System-allocator-backed block; `layout.size()` is the live size.
    Heap { layout: Layout },
    /// `mmap`-reserved region; `reserved` bytes of address space exist,
    /// `committed` of which are currently accessible.
    #[cfg(unix)]
    Mapped { reserved: usize, committed: usize },
}

struct Entry {
    backing: Backing,
    attrs: BlkAttr,
}

impl Entry {
    fn live_size(&self) -> usize {
        match &self.backing {
            Backing::Heap { layout } => layout.size(),
            #[cfg(unix)]
            Backing::Mapped { committed, .. } => *committed,
        }
    }
}

/// Non-moving, non-collecting reference backend.
pub struct SimpleCollector {
    blocks: Mutex<BTreeMap<usize, Entry>>,
    collecting: AtomicBool,
}

impl SimpleCollector {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            collecting: AtomicBool::new(false),
        }
    }

    /// Test/diagnostic hook: flip the answer `gc_is_collecting` gives for
    /// every block, simulating the window a real collector's stop-the-world
    /// sweep phase runs in, so the block-info cache's sweep coupling
    /// (`cache::rt_process_gc_marks`) has something real to observe.
    pub fn simulate_collecting(&self, collecting: bool) {
        self.collecting.store(collecting, Ordering::SeqCst);
    }

    /// Real allocators hand back size-class-rounded blocks, not exactly what
    /// was asked for — a block's `size` may exceed the requested payload.
    /// Rounding up to the next power of two is the simplest stand-in that
    /// still gives small/medium arrays the slack that makes in-place append
    /// possible in practice.
    fn heap_layout(size: usize) -> Layout {
        let rounded = size.max(BLOCK_ALIGN).next_power_of_two();
        Layout::from_size_align(rounded, BLOCK_ALIGN).expect("block size/align overflow")
    }

    #[cfg(unix)]
    fn mmap_reserve(reserved: usize) -> *mut u8 {
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                reserved,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                std::ptr::null_mut()
            } else {
                ptr as *mut u8
            }
        }
    }

    #[cfg(unix)]
    fn mmap_commit(base: *mut u8, committed: usize) -> bool {
        if committed == 0 {
            return true;
        }
        unsafe {
            libc::mprotect(
                base as *mut libc::c_void,
                committed,
                libc::PROT_READ | libc::PROT_WRITE,
            ) == 0
        }
    }

    fn alloc_large(size: usize, attrs: BlkAttr) -> Option<(*mut u8, usize)> {
        #[cfg(unix)]
        {
            let reserved = size + LARGE_SLACK;
            let base = Self::mmap_reserve(reserved);
            if base.is_null() {
                return None;
            }
            if !Self::mmap_commit(base, size) {
                unsafe { libc::munmap(base as *mut libc::c_void, reserved) };
                return None;
            }
            let _ = attrs;
            return Some((base, reserved));
        }
        #[cfg(not(unix))]
        {
            let layout = Self::heap_layout(size);
            let base = unsafe { alloc(layout) };
            if base.is_null() {
                return None;
            }
            Some((base, layout.size()))
        }
    }
}

impl Default for SimpleCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SimpleCollector {
    fn gc_malloc(&self, size: usize, attrs: BlkAttr) -> *mut u8 {
        if size >= PAGESIZE {
            let (base, reserved) = match Self::alloc_large(size, attrs) {
                Some(v) => v,
                None => return std::ptr::null_mut(),
            };
            #[cfg(unix)]
            let backing = Backing::Mapped {
                reserved,
                committed: size,
            };
            #[cfg(not(unix))]
            let backing = Backing::Heap {
                layout: Self::heap_layout(reserved),
            };
            self.blocks
                .lock()
                .insert(base as usize, Entry { backing, attrs });
            return base;
        }
        let layout = Self::heap_layout(size);
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return std::ptr::null_mut();
        }
        self.blocks.lock().insert(
            ptr as usize,
            Entry {
                backing: Backing::Heap { layout },
                attrs,
            },
        );
        ptr
    }

    fn gc_calloc(&self, size: usize, attrs: BlkAttr) -> *mut u8 {
        if size >= PAGESIZE {
            // mmap'd pages already come back zeroed by the kernel.
            return self.gc_malloc(size, attrs);
        }
        let layout = Self::heap_layout(size);
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return std::ptr::null_mut();
        }
        self.blocks.lock().insert(
            ptr as usize,
            Entry {
                backing: Backing::Heap { layout },
                attrs,
            },
        );
        ptr
    }

    fn gc_qalloc(&self, size: usize, attrs: BlkAttr) -> BlockDescriptor {
        let ptr = self.gc_malloc(size, attrs);
        if ptr.is_null() {
            return BlockDescriptor::NULL;
        }
        let blocks = self.blocks.lock();
        let live_size = blocks.get(&(ptr as usize)).unwrap().live_size();
        BlockDescriptor {
            base: ptr,
            size: live_size,
            attrs,
        }
    }

    fn gc_extend(&self, p: *mut u8, min_extra: usize, max_extra: usize) -> usize {
        let mut blocks = self.blocks.lock();
        let entry = match blocks.get_mut(&(p as usize)) {
            Some(e) => e,
            None => return 0,
        };
        match &mut entry.backing {
            #[cfg(unix)]
            Backing::Mapped { reserved, committed } => {
                let room = *reserved - *committed;
                if room < min_extra {
                    return *committed;
                }
                let grow_by = max_extra.min(room).max(min_extra);
                let new_committed = *committed + grow_by;
                if Self::mmap_commit(p, new_committed) {
                    *committed = new_committed;
                }
                *committed
            }
            Backing::Heap { layout } => {
                // Small/medium blocks grow via the reallocation fallback,
                // not `gc_extend` (only large blocks try in-place extend);
                // report "no room" so callers take that path instead of
                // risking a moving realloc here.
                let _ = (min_extra, max_extra);
                layout.size()
            }
        }
    }

    fn gc_free(&self, p: *mut u8) {
        let mut blocks = self.blocks.lock();
        if let Some(entry) = blocks.remove(&(p as usize)) {
            match entry.backing {
                Backing::Heap { layout } => unsafe { dealloc(p, layout) },
                #[cfg(unix)]
                Backing::Mapped { reserved, .. } => unsafe {
                    libc::munmap(p as *mut libc::c_void, reserved);
                },
            }
        }
    }

    fn gc_query(&self, p: *const u8) -> BlockDescriptor {
        let blocks = self.blocks.lock();
        let addr = p as usize;
        if let Some((&base, entry)) = blocks.range(..=addr).next_back() {
            if addr < base + entry.live_size() {
                return BlockDescriptor {
                    base: base as *mut u8,
                    size: entry.live_size(),
                    attrs: entry.attrs,
                };
            }
        }
        BlockDescriptor::NULL
    }

    fn gc_set_attr(&self, p: *const u8, attrs: BlkAttr) -> BlkAttr {
        let mut blocks = self.blocks.lock();
        match blocks.get_mut(&(p as usize)) {
            Some(entry) => {
                let old = entry.attrs;
                entry.attrs |= attrs;
                old
            }
            None => BlkAttr::empty(),
        }
    }

    fn gc_clr_attr(&self, p: *const u8, attrs: BlkAttr) -> BlkAttr {
        let mut blocks = self.blocks.lock();
        match blocks.get_mut(&(p as usize)) {
            Some(entry) => {
                let old = entry.attrs;
                entry.attrs &= !attrs;
                old
            }
            None => BlkAttr::empty(),
        }
    }

    fn gc_is_collecting(&self, _base: *const u8) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }
}

impl Drop for SimpleCollector {
    fn drop(&mut self) {
        let mut blocks = self.blocks.lock();
        let bases: Vec<usize> = blocks.keys().copied().collect();
        for base in bases {
            if let Some(entry) = blocks.remove(&base) {
                match entry.backing {
                    Backing::Heap { layout } => unsafe { dealloc(base as *mut u8, layout) },
                    #[cfg(unix)]
                    Backing::Mapped { reserved, .. } => unsafe {
                        libc::munmap(base as *mut libc::c_void, reserved);
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_and_query_round_trip() {
        let gc = SimpleCollector::new();
        let p = gc.gc_malloc(64, BlkAttr::APPENDABLE);
        assert!(!p.is_null());
        let bd = gc.gc_query(p);
        assert_eq!(bd.base, p);
        assert!(bd.size >= 64);
        assert!(bd.attrs.contains(BlkAttr::APPENDABLE));
    }

    #[test]
    fn query_resolves_interior_pointers() {
        let gc = SimpleCollector::new();
        let p = gc.gc_malloc(64, BlkAttr::empty());
        let interior = unsafe { p.add(10) };
        let bd = gc.gc_query(interior);
        assert_eq!(bd.base, p);
    }

    #[test]
    fn query_on_unknown_pointer_is_null() {
        let gc = SimpleCollector::new();
        let bogus = 0x1000usize as *const u8;
        assert!(gc.gc_query(bogus).is_null());
    }

    #[test]
    fn extend_grows_large_block_without_moving() {
        let gc = SimpleCollector::new();
        let p = gc.gc_malloc(PAGESIZE * 2, BlkAttr::APPENDABLE);
        let new_size = gc.gc_extend(p, 16, 16);
        assert!(new_size >= PAGESIZE * 2 + 16);
        let bd = gc.gc_query(p);
        assert_eq!(bd.base, p);
        assert_eq!(bd.size, new_size);
    }

    #[test]
    fn extend_on_small_block_reports_no_room() {
        let gc = SimpleCollector::new();
        let p = gc.gc_malloc(16, BlkAttr::APPENDABLE);
        let reported = gc.gc_extend(p, 16, 16);
        assert_eq!(reported, 16);
    }

    #[test]
    fn attrs_set_and_clear() {
        let gc = SimpleCollector::new();
        let p = gc.gc_malloc(16, BlkAttr::empty());
        let old = gc.gc_set_attr(p, BlkAttr::NO_SCAN);
        assert!(old.is_empty());
        assert!(gc.gc_get_attr(p).contains(BlkAttr::NO_SCAN));
        gc.gc_clr_attr(p, BlkAttr::NO_SCAN);
        assert!(!gc.gc_get_attr(p).contains(BlkAttr::NO_SCAN));
    }

    #[test]
    fn free_removes_block() {
        let gc = SimpleCollector::new();
        let p = gc.gc_malloc(16, BlkAttr::empty());
        gc.gc_free(p);
        assert!(gc.gc_query(p).is_null());
    }

    #[test]
    fn is_collecting_reflects_simulation_toggle() {
        let gc = SimpleCollector::new();
        let p = gc.gc_malloc(16, BlkAttr::empty());
        assert!(!gc.gc_is_collecting(p));
        gc.simulate_collecting(true);
        assert!(gc.gc_is_collecting(p));
        gc.simulate_collecting(false);
    }
}
