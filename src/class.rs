//! Class Lifecycle: allocating class instances and running their finalizer
//! chain. Follows the common "one callback per type, invoked through an
//! opaque `*mut u8`" finalizer shape and a plain vtable/monitor slot layout,
//! without bitfield-packing either slot, since this core only ever
//! reads/writes two plain pointer-sized words.
//!
//! A class instance's first word is its vtable slot (identifies the leaf
//! `ClassInfo` and, transitively through [`ClassInfo::base`], its ancestor
//! chain); its second word is a monitor slot (external lock object, or
//! null). Everything past that is the class's own fields, laid out however
//! the template in [`ClassInfo::init`] describes them.

use std::panic::{self, AssertUnwindSafe};

use crate::error;
use crate::gc::{BlkAttr, Collector};

/// Bit 0: COM-like — allocate with the C allocator and manage lifetime by
/// external reference counting instead of GC. Bit 1: the class's fields
/// contain no GC pointers, so its block can be tagged `NO_SCAN`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassFlags(pub u32);

impl ClassFlags {
    pub const NONE: ClassFlags = ClassFlags(0);
    pub const COM_LIKE: ClassFlags = ClassFlags(0b01);
    pub const NO_SCAN: ClassFlags = ClassFlags(0b10);

    #[inline]
    pub fn contains(self, bit: ClassFlags) -> bool {
        self.0 & bit.0 == bit.0
    }
}

impl std::ops::BitOr for ClassFlags {
    type Output = ClassFlags;
    fn bitor(self, rhs: ClassFlags) -> ClassFlags {
        ClassFlags(self.0 | rhs.0)
    }
}

/// Offset, in words, of the vtable and monitor slots every class instance
/// carries ahead of its own fields.
const VTABLE_SLOT: usize = 0;
const MONITOR_SLOT: usize = 1;
pub const HEADER_WORDS: usize = 2;

/// Static description of one class in the chain. `base` points at the
/// parent class (the class this one `extends`), or `None` at the root.
/// `init` is the full object template, header slots included — slot 0 is
/// expected to already encode a pointer identifying this `ClassInfo` (the
/// crate's own bit-pattern for "this is a C instance" is opaque to this
/// module; it only ever copies `init` wholesale and treats slot 0 as
/// opaque non-null/null).
pub struct ClassInfo {
    pub name: &'static str,
    pub init: &'static [u8],
    pub flags: ClassFlags,
    pub destructor: Option<fn(*mut u8)>,
    pub base: Option<&'static ClassInfo>,
    /// Custom deallocator for [`delete_instance`]; when present, used
    /// instead of `gc_free`/the C allocator's `free`.
    pub custom_dealloc: Option<fn(*mut u8)>,
}

#[inline]
unsafe fn slot(p: *mut u8, word: usize) -> *mut usize {
    (p as *mut usize).add(word)
}

#[inline]
unsafe fn read_slot(p: *mut u8, word: usize) -> usize {
    *slot(p, word)
}

#[inline]
unsafe fn write_slot(p: *mut u8, word: usize, value: usize) {
    *slot(p, word) = value;
}

/// Allocate a new instance of `class` (Class Lifecycle "Allocate class
/// instance"). COM-like classes (`ClassFlags::COM_LIKE`) go through the C
/// allocator instead of the GC, on the understanding that their lifetime is
/// managed by external reference counting rather than tracing. Either way
/// the object's initializer template is copied in full, header slots
/// included, before the pointer is handed back.
pub fn allocate_instance(gc: &dyn Collector, class: &'static ClassInfo) -> *mut u8 {
    let size = class.init.len();
    if class.flags.contains(ClassFlags::COM_LIKE) {
        let p = unsafe { libc::malloc(size) } as *mut u8;
        if p.is_null() {
            error::out_of_memory();
        }
        unsafe { std::ptr::copy_nonoverlapping(class.init.as_ptr(), p, size) };
        return p;
    }

    let mut attrs = BlkAttr::FINALIZE;
    if class.flags.contains(ClassFlags::NO_SCAN) {
        attrs |= BlkAttr::NO_SCAN;
    }
    let p = gc.gc_malloc(size, attrs);
    if p.is_null() {
        error::out_of_memory();
    }
    unsafe { std::ptr::copy_nonoverlapping(class.init.as_ptr(), p, size) };
    p
}

/// Run `p`'s destructor chain and clear its vtable slot (Class Lifecycle
/// "Finalize"). `det` is `true` for a deterministic, caller-requested
/// delete; `false` for a GC-sweep-triggered finalization, which a global
/// collect handler may veto.
///
/// Does nothing if `p`'s vtable slot is already null — finalizing the same
/// object twice is a no-op, not a double-free.
///
/// # Safety
/// `p` must point at a live instance of `class` (or one of `class`'s
/// subclasses sharing this same leaf `ClassInfo`), at least
/// `class.init.len()` bytes.
pub unsafe fn rt_finalize(p: *mut u8, class: &'static ClassInfo, det: bool) {
    if read_slot(p, VTABLE_SLOT) == 0 {
        return;
    }

    // The vtable slot is always cleared on the way out, destructor panics
    // included, so a half-finalized object is never mistaken for live.
    struct ClearVtable(*mut u8);
    impl Drop for ClearVtable {
        fn drop(&mut self) {
            unsafe { write_slot(self.0, VTABLE_SLOT, 0) };
        }
    }
    let _clear = ClearVtable(p);

    let run_destructors = det
        || match error::rt_get_collect_handler() {
            Some(handler) => handler(det),
            None => true,
        };

    if run_destructors {
        let mut link = Some(class);
        while let Some(c) = link {
            if let Some(dtor) = c.destructor {
                let result = panic::catch_unwind(AssertUnwindSafe(|| dtor(p)));
                if let Err(payload) = result {
                    error::report_finalize_error(c.name, &DebugPanic(&payload));
                }
            }
            link = c.base;
        }
    }

    let monitor = read_slot(p, MONITOR_SLOT);
    if monitor != 0 {
        monitor_delete(monitor as *mut u8);
    }

    std::ptr::copy_nonoverlapping(class.init.as_ptr(), p, class.init.len());
    // `_clear` drops here, after the template copy, so the zeroed vtable
    // slot is the last thing written.
}

struct DebugPanic<'a>(&'a Box<dyn std::any::Any + Send>);

impl std::fmt::Debug for DebugPanic<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(s) = self.0.downcast_ref::<&str>() {
            write!(f, "{:?}", s)
        } else if let Some(s) = self.0.downcast_ref::<String>() {
            write!(f, "{:?}", s)
        } else {
            write!(f, "<non-string panic payload>")
        }
    }
}

/// Placeholder monitor-delete primitive: this core has no monitor
/// implementation of its own, so a non-null monitor slot is assumed to be a
/// `libc::malloc`-backed lock object and freed accordingly.
fn monitor_delete(monitor: *mut u8) {
    unsafe { libc::free(monitor as *mut libc::c_void) };
}

/// Explicit delete: finalize deterministically, then free the block — via
/// `class.custom_dealloc` if the class supplies one, otherwise `gc_free`
/// (or the C allocator's `free`, for a COM-like instance with no custom
/// deallocator).
///
/// # Safety
/// Same obligations as [`rt_finalize`]; `p` must not be used again after
/// this call returns.
pub unsafe fn delete_instance(gc: &dyn Collector, p: *mut u8, class: &'static ClassInfo) {
    rt_finalize(p, class, true);
    if let Some(dealloc) = class.custom_dealloc {
        dealloc(p);
    } else if class.flags.contains(ClassFlags::COM_LIKE) {
        libc::free(p as *mut libc::c_void);
    } else {
        gc.gc_free(p);
    }
}
