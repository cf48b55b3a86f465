//! Length Metadata Protocol: read and compare-and-set the
//! in-block Used-Length field, the mechanism that lets independent slices
//! sharing a block safely discover whether they may append in place.
//!
//! The field's width and position come from [`crate::layout::used_length_field`];
//! this module only does the atomic read/write once that's resolved. Reads
//! and writes go through `std::sync::atomic` views constructed over the
//! block's own bytes, the same "atomics over raw GC memory" shape a
//! byte-per-card dirty bitmap uses, generalized here from a single bit to a
//! size-class-dependent integer width.

use std::sync::atomic::{AtomicU16, AtomicU8, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::gc::BlockDescriptor;
use crate::layout::{self, UsedLengthField};

/// The single process-wide lock serializing Used-Length updates for blocks
/// of the "shared" element type. One lock for every shared-array metadata
/// update, matching the source's "keyed on a designated sentinel type"
/// design; a finer-grained lock would work too but isn't required for
/// correctness.
static SHARED_METADATA_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Read the Used-Length currently recorded for `block`.
///
/// # Safety
/// `block` must describe a live, `APPENDABLE` GC block.
pub unsafe fn read_used(block: &BlockDescriptor) -> usize {
    let field = layout::used_length_field(block.size);
    load(block.base, field)
}

/// Attempt to write `new_len` to `block`'s Used-Length field.
///
/// `expected_old` makes this an optional CAS: `Some(old)`
/// performs a real compare-and-set (fails silently on mismatch, returning
/// `false`); `None` is the unconditional initial write made at block
/// creation time, when there is no competing slice.
///
/// Returns `false` without writing when `new_len` would not fit before the
/// block's padding, or when the field's encoding cannot represent `new_len`
/// (small fields cap at 255, medium at 65535).
///
/// # Safety
/// `block` must describe a live, `APPENDABLE` GC block.
pub unsafe fn try_set_used(
    block: &BlockDescriptor,
    new_len: usize,
    is_shared: bool,
    expected_old: Option<usize>,
) -> bool {
    let field = layout::used_length_field(block.size);
    let class = layout::SizeClass::of_block_size(block.size);
    let pad = class.pad();
    if new_len + pad > block.size {
        return false;
    }
    match field.width {
        1 => debug_assert!(new_len <= u8::MAX as usize, "used-length overflows 1-byte field"),
        2 => debug_assert!(new_len <= u16::MAX as usize, "used-length overflows 2-byte field"),
        _ => {}
    }
    if field.width == 1 && new_len > u8::MAX as usize {
        return false;
    }
    if field.width == 2 && new_len > u16::MAX as usize {
        return false;
    }

    let _guard = is_shared.then(|| SHARED_METADATA_LOCK.lock());
    cas(block.base, field, new_len, expected_old)
}

unsafe fn load(base: *mut u8, field: UsedLengthField) -> usize {
    let ptr = base.add(field.offset);
    match field.width {
        1 => (&*(ptr as *const AtomicU8)).load(Ordering::Acquire) as usize,
        2 => (&*(ptr as *const AtomicU16)).load(Ordering::Acquire) as usize,
        _ => (&*(ptr as *const AtomicUsize)).load(Ordering::Acquire),
    }
}

unsafe fn cas(
    base: *mut u8,
    field: UsedLengthField,
    new_len: usize,
    expected_old: Option<usize>,
) -> bool {
    let ptr = base.add(field.offset);
    match field.width {
        1 => {
            let cell = &*(ptr as *const AtomicU8);
            match expected_old {
                None => {
                    cell.store(new_len as u8, Ordering::Release);
                    true
                }
                Some(old) => cell
                    .compare_exchange(
                        old as u8,
                        new_len as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok(),
            }
        }
        2 => {
            let cell = &*(ptr as *const AtomicU16);
            match expected_old {
                None => {
                    cell.store(new_len as u16, Ordering::Release);
                    true
                }
                Some(old) => cell
                    .compare_exchange(
                        old as u16,
                        new_len as u16,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok(),
            }
        }
        _ => {
            let cell = &*(ptr as *const AtomicUsize);
            match expected_old {
                None => {
                    cell.store(new_len, Ordering::Release);
                    true
                }
                Some(old) => cell
                    .compare_exchange(old, new_len, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::BlkAttr;

    fn fresh_block(size: usize) -> (Vec<u8>, BlockDescriptor) {
        let mut buf = vec![0u8; size];
        let base = buf.as_mut_ptr();
        (
            buf,
            BlockDescriptor {
                base,
                size,
                attrs: BlkAttr::APPENDABLE,
            },
        )
    }

    #[test]
    fn initial_set_is_unconditional() {
        let (_buf, block) = fresh_block(64);
        unsafe {
            assert!(try_set_used(&block, 10, false, None));
            assert_eq!(read_used(&block), 10);
        }
    }

    #[test]
    fn cas_fails_on_mismatch_and_leaves_value_unchanged() {
        let (_buf, block) = fresh_block(64);
        unsafe {
            assert!(try_set_used(&block, 10, false, None));
            assert!(!try_set_used(&block, 20, false, Some(5)));
            assert_eq!(read_used(&block), 10);
        }
    }

    #[test]
    fn cas_succeeds_when_expected_matches() {
        let (_buf, block) = fresh_block(64);
        unsafe {
            assert!(try_set_used(&block, 10, false, None));
            assert!(try_set_used(&block, 20, false, Some(10)));
            assert_eq!(read_used(&block), 20);
        }
    }

    #[test]
    fn refuses_write_that_would_overrun_padding() {
        let (_buf, block) = fresh_block(64);
        let class = layout::SizeClass::of_block_size(64);
        let pad = class.pad();
        unsafe {
            assert!(!try_set_used(&block, 64 - pad + 1, false, None));
        }
    }

    #[test]
    fn medium_field_uses_two_bytes() {
        let (_buf, block) = fresh_block(1000);
        unsafe {
            assert!(try_set_used(&block, 900, false, None));
            assert_eq!(read_used(&block), 900);
        }
    }

    #[test]
    fn shared_writes_serialize_through_global_lock() {
        let (_buf, block) = fresh_block(64);
        unsafe {
            assert!(try_set_used(&block, 1, true, None));
            assert!(try_set_used(&block, 2, true, Some(1)));
            assert_eq!(read_used(&block), 2);
        }
    }
}
