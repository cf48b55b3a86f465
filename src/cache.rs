//! Block-Info Cache: a small, thread-local, associative cache
//! mapping an interior pointer to the GC block it belongs to, so the hot
//! append path doesn't have to round-trip through `gc_query` on every call.
//!
//! Design choice: rather than the source's TLS-offset trick — the collector
//! computes, once at process start, the byte offset of the cache pointer
//! within each thread's TLS block, then walks every thread's TLS during
//! sweep without a symbol reference — this crate uses a strictly cleaner
//! alternative for a language without implicit TLS layout guarantees: each
//! thread registers its cache with a process-wide registry on first use and
//! unregisters on thread exit, the usual `#[thread_local]`-plus-registry
//! pattern instead of a raw TLS offset.

use std::cell::UnsafeCell;
use std::sync::Mutex;

use crate::gc::{BlockDescriptor, Collector};

/// Number of cache slots. Must stay a power of two so lookups could use mask
/// arithmetic; kept small because the cache only needs to cover the handful
/// of arrays a thread is actively appending to.
pub const N_CACHE_BLOCKS: usize = 8;

struct Cache {
    entries: [BlockDescriptor; N_CACHE_BLOCKS],
    head: usize,
}

impl Cache {
    fn new() -> Self {
        Cache {
            entries: [BlockDescriptor::NULL; N_CACHE_BLOCKS],
            head: 0,
        }
    }

    /// Scan from the head cursor downward to zero, then from the top down to
    /// just above the head, biasing toward the most recently inserted entry.
    fn find(&self, interior: *const u8) -> Option<(usize, BlockDescriptor)> {
        for step in 0..N_CACHE_BLOCKS {
            let idx = (self.head + N_CACHE_BLOCKS - step) % N_CACHE_BLOCKS;
            let entry = self.entries[idx];
            if entry.contains(interior) {
                return Some((idx, entry));
            }
        }
        None
    }

    /// Insert `bi`, either refreshing an existing slot to most-recently-used
    /// or evicting the least-recently-used one.
    fn insert(&mut self, bi: BlockDescriptor, hit: Option<usize>) {
        match hit {
            Some(idx) if idx != self.head => {
                self.entries[idx] = self.entries[self.head];
                self.head = (self.head + 1) % N_CACHE_BLOCKS;
                self.entries[self.head] = bi;
            }
            Some(_) => {
                // Already at the head; nothing to reorder, just refresh.
                self.entries[self.head] = bi;
            }
            None => {
                self.head = (self.head + 1) % N_CACHE_BLOCKS;
                self.entries[self.head] = bi;
            }
        }
    }

    /// Sweep-phase invalidation: zero the `base` of
    /// every entry the collector reports as about to be collected.
    fn invalidate_collected(&mut self, gc: &dyn Collector) {
        for entry in &mut self.entries {
            if !entry.base.is_null() && gc.gc_is_collecting(entry.base) {
                log::debug!("block-info cache: invalidating swept block {:p}", entry.base);
                entry.base = std::ptr::null_mut();
            }
        }
    }
}

/// Registry of every live thread's cache, consulted by [`rt_process_gc_marks`]
/// during the collector's stop-the-world phase. No lock is required between
/// a thread's own cache use and the sweep hook beyond the collector's own
/// suspension discipline — this `Mutex` only
/// guards the registry's membership list, not the cache contents themselves.
static REGISTRY: Mutex<Vec<*mut Cache>> = Mutex::new(Vec::new());

/// Owns one thread's cache allocation and its registry membership. Freed
/// (and unregistered) when the owning thread exits.
struct CacheHandle {
    cache: UnsafeCell<Box<Cache>>,
}

impl CacheHandle {
    fn new() -> Self {
        let handle = CacheHandle {
            cache: UnsafeCell::new(Box::new(Cache::new())),
        };
        REGISTRY.lock().unwrap().push(handle.ptr());
        handle
    }

    fn ptr(&self) -> *mut Cache {
        // SAFETY: only ever used to obtain the address of the boxed
        // `Cache`; the registry holds this pointer purely to let the sweep
        // hook reach it and never deallocates through it.
        unsafe { &mut **self.cache.get() as *mut Cache }
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        let raw = self.ptr();
        REGISTRY.lock().unwrap().retain(|&p| p != raw);
    }
}

thread_local! {
    static CACHE: CacheHandle = CacheHandle::new();
}

/// Look up the block owning `interior` in this thread's cache, without
/// consulting the GC. `None` means a cache miss — callers fall back to
/// `gc_query` and then call [`cache_insert`] to populate the cache.
pub fn find_cached(interior: *const u8) -> Option<BlockDescriptor> {
    if interior.is_null() {
        return None;
    }
    CACHE.with(|h| {
        let cache = unsafe { &*h.ptr() };
        cache.find(interior).map(|(_, bd)| bd)
    })
}

/// Insert `bi` into this thread's cache, refreshing the matching slot to
/// most-recently-used if `bi.base` is already cached, otherwise evicting the
/// least-recently-used slot.
pub fn cache_insert(bi: BlockDescriptor) {
    if bi.is_null() {
        return;
    }
    CACHE.with(|h| {
        let cache = unsafe { &mut *h.ptr() };
        let hit = cache.find(bi.base).map(|(idx, _)| idx);
        cache.insert(bi, hit);
    });
}

/// The sweep hook:
/// called by the collector once per stop-the-world phase, after marking and
/// before sweep, so that cache entries pointing at about-to-be-collected
/// blocks are invalidated before any thread resumes and tries to use them.
///
/// # Safety
/// Must only be called while every other thread is suspended — the
/// collector's stop-the-world discipline is what makes mutating other
/// threads' caches from here sound.
pub unsafe fn rt_process_gc_marks(gc: &dyn Collector) {
    let registry = REGISTRY.lock().unwrap();
    for &ptr in registry.iter() {
        (*ptr).invalidate_collected(gc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::BlkAttr;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubCollector {
        collecting: AtomicBool,
    }

    impl Collector for StubCollector {
        fn gc_malloc(&self, _size: usize, _attrs: BlkAttr) -> *mut u8 {
            unimplemented!()
        }
        fn gc_calloc(&self, _size: usize, _attrs: BlkAttr) -> *mut u8 {
            unimplemented!()
        }
        fn gc_qalloc(&self, _size: usize, _attrs: BlkAttr) -> BlockDescriptor {
            unimplemented!()
        }
        fn gc_extend(&self, _p: *mut u8, _min_extra: usize, _max_extra: usize) -> usize {
            unimplemented!()
        }
        fn gc_free(&self, _p: *mut u8) {}
        fn gc_query(&self, _p: *const u8) -> BlockDescriptor {
            unimplemented!()
        }
        fn gc_set_attr(&self, _p: *const u8, _attrs: BlkAttr) -> BlkAttr {
            unimplemented!()
        }
        fn gc_clr_attr(&self, _p: *const u8, _attrs: BlkAttr) -> BlkAttr {
            unimplemented!()
        }
        fn gc_is_collecting(&self, _base: *const u8) -> bool {
            self.collecting.load(Ordering::SeqCst)
        }
    }

    fn descriptor(addr: usize, size: usize) -> BlockDescriptor {
        BlockDescriptor {
            base: addr as *mut u8,
            size,
            attrs: BlkAttr::APPENDABLE,
        }
    }

    #[test]
    fn miss_then_insert_then_hit() {
        let bd = descriptor(0x8000, 64);
        assert!(find_cached((0x8010) as *const u8).is_none());
        cache_insert(bd);
        let found = find_cached(0x8010 as *const u8).expect("should hit after insert");
        assert_eq!(found.base, bd.base);
    }

    #[test]
    fn insert_refreshes_existing_hit_to_most_recently_used() {
        let a = descriptor(0x9000, 64);
        let b = descriptor(0xa000, 64);
        cache_insert(a);
        cache_insert(b);
        // Re-insert `a`; it should stay findable.
        cache_insert(a);
        assert!(find_cached(0x9010 as *const u8).is_some());
        assert!(find_cached(0xa010 as *const u8).is_some());
    }

    #[test]
    fn lookup_on_unknown_pointer_misses() {
        assert!(find_cached(0xdead_beef as *const u8).is_none());
    }

    #[test]
    fn sweep_hook_zeroes_entries_the_collector_is_collecting() {
        let bd = descriptor(0xb000, 64);
        cache_insert(bd);
        assert!(find_cached(0xb010 as *const u8).is_some());

        let gc = StubCollector {
            collecting: AtomicBool::new(true),
        };
        unsafe { rt_process_gc_marks(&gc) };
        assert!(find_cached(0xb010 as *const u8).is_none());
    }
}
