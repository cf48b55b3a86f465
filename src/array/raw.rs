//! Array Operations, the untyped entry points every typed API in
//! [`super::handle`] lowers to. This is where block layout, the Used-Length
//! protocol, the block-info cache, the capacity policy, and the GC
//! collaborator all come together, the same way a growable vector's
//! `push_back`/`realloc`/`reserve` coordinate an allocator and its own header
//! fields, generalized here to in-band, CAS-arbitrated shared metadata
//! instead of a dedicated capacity field per slice.
//!
//! Growing operations take `slice: &mut RawSlice` and mutate it in place,
//! reassigning `*slice` on reallocation rather than asking every caller to
//! remember to store a returned value.

use crate::capacity;
use crate::cache;
use crate::error;
use crate::gc::{BlkAttr, BlockDescriptor, Collector};
use crate::layout::{self, SizeClass};
use crate::length;
use crate::slice::RawSlice;
use crate::typeinfo::TypeInfo;

#[derive(Clone, Copy)]
enum Fill {
    /// Leave the new tail uninitialized; the caller writes it.
    Uninit,
    Zero,
    /// Repeat the type's initializer template.
    Pattern,
}

fn resolve_block(gc: &dyn Collector, ti: &TypeInfo, data: *const u8) -> BlockDescriptor {
    if data.is_null() {
        return BlockDescriptor::NULL;
    }
    if ti.shared {
        // Shared types bypass the per-thread cache entirely and always
        // resolve through a globally-locked metadata path instead.
        return gc.gc_query(data);
    }
    if let Some(bd) = cache::find_cached(data) {
        return bd;
    }
    let bd = gc.gc_query(data);
    if !bd.is_null() {
        cache::cache_insert(bd);
    }
    bd
}

fn allocate_block(gc: &dyn Collector, ti: &TypeInfo, payload_bytes: usize) -> BlockDescriptor {
    let pad = layout::pad_for(payload_bytes);
    let total = payload_bytes
        .checked_add(pad)
        .unwrap_or_else(|| error::out_of_memory());
    let mut attrs = BlkAttr::APPENDABLE;
    if !ti.contains_pointers() {
        attrs |= BlkAttr::NO_SCAN;
    }
    let block = gc.gc_qalloc(total, attrs);
    if block.is_null() {
        error::out_of_memory();
    }
    // SAFETY: `block` was just handed back live by the collector, and its
    // `size` already has `pad` folded in, so the sentinel offset is in
    // bounds.
    unsafe { write_large_sentinel(&block) };
    block
}

/// Write the zero sentinel byte one past a large block's live bytes
/// (Invariant 5), so a one-past-end pointer can never be mistaken for
/// pointing into the following block. No-op for small/medium blocks, which
/// carry no such byte.
///
/// # Safety
/// `block` must describe a live block this collector just handed back (or
/// just grew via `gc_extend`).
unsafe fn write_large_sentinel(block: &BlockDescriptor) {
    if SizeClass::of_block_size(block.size) == SizeClass::Large {
        *block.base.add(layout::large_sentinel_offset(block.size)) = 0;
    }
}

/// Repeat `pattern` across `dst[..byte_len]`. Optimizes the 1-byte and
/// 4-byte template cases explicitly; anything else is copied in
/// `pattern`-sized chunks.
///
/// # Safety
/// `dst` must point at `byte_len` writable bytes.
unsafe fn fill_pattern(dst: *mut u8, byte_len: usize, pattern: &[u8]) {
    if byte_len == 0 {
        return;
    }
    match pattern.len() {
        0 => std::ptr::write_bytes(dst, 0, byte_len),
        1 => std::ptr::write_bytes(dst, pattern[0], byte_len),
        4 if byte_len % 4 == 0 => {
            let word = u32::from_ne_bytes([pattern[0], pattern[1], pattern[2], pattern[3]]);
            let words = dst as *mut u32;
            for i in 0..byte_len / 4 {
                words.add(i).write_unaligned(word);
            }
        }
        _ => {
            let mut off = 0;
            while off < byte_len {
                let take = pattern.len().min(byte_len - off);
                std::ptr::copy_nonoverlapping(pattern.as_ptr(), dst.add(off), take);
                off += take;
            }
        }
    }
}

/// # Safety
/// `dst` must point at `byte_len` writable bytes.
unsafe fn fill_tail(dst: *mut u8, byte_len: usize, fill: Fill, ti: &TypeInfo) {
    match fill {
        Fill::Uninit => {}
        Fill::Zero => {
            if byte_len > 0 {
                std::ptr::write_bytes(dst, 0, byte_len);
            }
        }
        Fill::Pattern => fill_pattern(dst, byte_len, ti.init),
    }
}

/// Allocate a fresh block and return both the new slice and its backing
/// block descriptor. `reserve_bytes` is the physical payload size to
/// allocate (the capacity policy's over-allocation, or an explicit
/// `setCapacity` request); `new_len` is how many elements are actually
/// considered "used" — the rest of `reserve_bytes` stays unclaimed capacity.
fn reallocate(
    gc: &dyn Collector,
    ti: &TypeInfo,
    old: RawSlice,
    new_len: usize,
    fill: Fill,
    reserve_bytes: usize,
) -> (RawSlice, BlockDescriptor) {
    let new_payload_bytes = new_len
        .checked_mul(ti.elem_size)
        .unwrap_or_else(|| error::out_of_memory());
    let payload_bytes = reserve_bytes.max(new_payload_bytes);
    let block = allocate_block(gc, ti, payload_bytes);
    let start = layout::array_start(block.base, block.size);
    let old_payload_bytes = old.length * ti.elem_size;

    unsafe {
        if !old.is_null() && old_payload_bytes > 0 {
            std::ptr::copy_nonoverlapping(old.data, start, old_payload_bytes);
        }
        if new_payload_bytes > old_payload_bytes {
            fill_tail(
                start.add(old_payload_bytes),
                new_payload_bytes - old_payload_bytes,
                fill,
                ti,
            );
        }
        length::try_set_used(&block, new_payload_bytes, ti.shared, None);
    }
    if !ti.shared {
        cache::cache_insert(block);
    }
    log::trace!(
        "gcarray: reallocated {} -> {} payload bytes (new_len={})",
        old_payload_bytes,
        payload_bytes,
        new_len
    );
    (
        RawSlice {
            length: new_len,
            data: start,
        },
        block,
    )
}

/// Core growth skeleton: resolve the backing block,
/// try to grow in place if this slice owns the tail, fall back to
/// reallocating a fresh block otherwise.
fn grow(gc: &dyn Collector, ti: &TypeInfo, slice: &mut RawSlice, new_len: usize, fill: Fill) {
    if ti.elem_size == 0 {
        *slice = RawSlice::NULL;
        return;
    }
    if slice.is_null() {
        if new_len == 0 {
            return;
        }
        let reserve = capacity::new_capacity(new_len, ti.elem_size);
        let (grown, _) = reallocate(gc, ti, RawSlice::NULL, new_len, fill, reserve);
        *slice = grown;
        return;
    }
    debug_assert!(new_len >= slice.length, "grow() must not shrink a slice");
    if new_len == slice.length {
        return;
    }

    let block = resolve_block(gc, ti, slice.data);
    if !block.is_null() && block.attrs.contains(BlkAttr::APPENDABLE) {
        let array_start = layout::array_start(block.base, block.size);
        let elem_size = ti.elem_size;
        let old_end = slice.end_offset(array_start, elem_size);
        let new_end = slice.start_offset(array_start) + new_len * elem_size;
        let class = SizeClass::of_block_size(block.size);

        // SAFETY: `block` was just resolved as live and `APPENDABLE`.
        unsafe {
            let used = length::read_used(&block);
            if used == old_end {
                // This slice owns the tail: only it
                // may grow in place.
                if new_end + class.pad() <= block.size {
                    if length::try_set_used(&block, new_end, ti.shared, Some(used)) {
                        fill_tail(array_start.add(old_end), new_end - old_end, fill, ti);
                        slice.length = new_len;
                        return;
                    }
                } else if class == SizeClass::Large {
                    let need_extra = new_end + class.pad() - block.size;
                    let new_size = gc.gc_extend(block.base, need_extra, need_extra);
                    if new_size >= new_end + class.pad() {
                        let grown_block = BlockDescriptor {
                            base: block.base,
                            size: new_size,
                            attrs: block.attrs,
                        };
                        if length::try_set_used(&grown_block, new_end, ti.shared, Some(used)) {
                            write_large_sentinel(&grown_block);
                            if !ti.shared {
                                cache::cache_insert(grown_block);
                            }
                            fill_tail(array_start.add(old_end), new_end - old_end, fill, ti);
                            slice.length = new_len;
                            return;
                        }
                    }
                }
            }
        }
    }

    // Either not appendable, not the tail owner, or the in-place attempt
    // raced and lost: reallocate.
    let reserve = capacity::new_capacity(new_len, ti.elem_size);
    let (grown, _) = reallocate(gc, ti, *slice, new_len, fill, reserve);
    *slice = grown;
}

/// Allocate a zero-initialized array of `n` elements. Returns the null
/// slice if `n == 0` or the type has no element size.
pub fn new_array(gc: &dyn Collector, ti: &TypeInfo, n: usize) -> RawSlice {
    if n == 0 || ti.elem_size == 0 {
        return RawSlice::NULL;
    }
    let payload = n
        .checked_mul(ti.elem_size)
        .unwrap_or_else(|| error::out_of_memory());
    let block = allocate_block(gc, ti, payload);
    let start = layout::array_start(block.base, block.size);
    unsafe {
        std::ptr::write_bytes(start, 0, payload);
        length::try_set_used(&block, payload, ti.shared, None);
    }
    if !ti.shared {
        cache::cache_insert(block);
    }
    RawSlice {
        length: n,
        data: start,
    }
}

/// Like [`new_array`], but the payload is filled by repeating `ti.init`
///. Falls back to [`new_array`] when the type has
/// no initializer template (empty `init` means zero-init).
pub fn new_array_init(gc: &dyn Collector, ti: &TypeInfo, n: usize) -> RawSlice {
    if ti.init.is_empty() {
        return new_array(gc, ti, n);
    }
    if n == 0 || ti.elem_size == 0 {
        return RawSlice::NULL;
    }
    let payload = n
        .checked_mul(ti.elem_size)
        .unwrap_or_else(|| error::out_of_memory());
    let block = allocate_block(gc, ti, payload);
    let start = layout::array_start(block.base, block.size);
    unsafe {
        fill_pattern(start, payload, ti.init);
        length::try_set_used(&block, payload, ti.shared, None);
    }
    if !ti.shared {
        cache::cache_insert(block);
    }
    RawSlice {
        length: n,
        data: start,
    }
}

/// Build a nested array of shape `dims`. The
/// leaf dimension allocates real elements via [`new_array_init`]; every
/// outer dimension allocates an array of [`RawSlice`] headers and recurses.
/// `dims.len() == 0` returns the null slice.
pub fn new_array_multi(gc: &dyn Collector, ti: &TypeInfo, dims: &[usize]) -> RawSlice {
    match dims.len() {
        0 => RawSlice::NULL,
        1 => new_array_init(gc, ti, dims[0]),
        _ => {
            let n = dims[0];
            if n == 0 {
                return RawSlice::NULL;
            }
            let header_ti = TypeInfo::with_pointers(std::mem::size_of::<RawSlice>());
            let outer = new_array(gc, &header_ti, n);
            if outer.is_null() {
                return outer;
            }
            let headers = outer.data as *mut RawSlice;
            for i in 0..n {
                let child = new_array_multi(gc, ti, &dims[1..]);
                unsafe { headers.add(i).write(child) };
            }
            outer
        }
    }
}

/// Grow or shrink `slice` to `new_len` elements.
/// Shrinking only rewrites the slice header; the block's Used-Length is
/// untouched, so other slices sharing the tail are unaffected. Growing
/// zero-fills (or pattern-fills, if `pattern_init`) the new tail.
pub fn set_length(
    gc: &dyn Collector,
    ti: &TypeInfo,
    slice: &mut RawSlice,
    new_len: usize,
    pattern_init: bool,
) {
    if new_len <= slice.length {
        slice.length = new_len;
        if new_len == 0 {
            slice.data = std::ptr::null_mut();
        }
        return;
    }
    let fill = if pattern_init { Fill::Pattern } else { Fill::Zero };
    grow(gc, ti, slice, new_len, fill);
}

/// Ensure the backing block has room for at least `new_cap` elements past
/// `slice`'s base offset. Returns the capacity
/// actually available after the call, in elements. `new_cap == 0` just
/// queries the current capacity. Does not change `slice.length`; when a
/// reallocation is needed, `slice`'s data pointer moves but its visible
/// length and contents do not.
pub fn set_capacity(gc: &dyn Collector, ti: &TypeInfo, slice: &mut RawSlice, new_cap: usize) -> usize {
    if ti.elem_size == 0 {
        return 0;
    }
    if slice.is_null() {
        if new_cap == 0 {
            return 0;
        }
        let payload = new_cap
            .checked_mul(ti.elem_size)
            .unwrap_or_else(|| error::out_of_memory());
        let block = allocate_block(gc, ti, payload);
        let start = layout::array_start(block.base, block.size);
        unsafe { length::try_set_used(&block, 0, ti.shared, None) };
        if !ti.shared {
            cache::cache_insert(block);
        }
        *slice = RawSlice {
            length: 0,
            data: start,
        };
        let class = SizeClass::of_block_size(block.size);
        return (block.size - class.pad()) / ti.elem_size;
    }

    let block = resolve_block(gc, ti, slice.data);
    if block.is_null() || !block.attrs.contains(BlkAttr::APPENDABLE) {
        return slice.length;
    }
    let array_start = layout::array_start(block.base, block.size);
    let class = SizeClass::of_block_size(block.size);
    let base_off = slice.start_offset(array_start);
    let current_cap_elems = (block.size - class.pad() - base_off) / ti.elem_size;
    if new_cap == 0 || new_cap <= current_cap_elems {
        return current_cap_elems;
    }

    let want_bytes = base_off + new_cap * ti.elem_size;
    if class == SizeClass::Large {
        let need_extra = want_bytes + class.pad() - block.size;
        let new_size = gc.gc_extend(block.base, need_extra, need_extra);
        if new_size >= want_bytes + class.pad() {
            // SAFETY: `gc_extend` just grew this block in place to
            // `new_size`, so the sentinel's new offset is in bounds.
            unsafe {
                write_large_sentinel(&BlockDescriptor {
                    base: block.base,
                    size: new_size,
                    attrs: block.attrs,
                })
            };
            // The slice's data pointer and offset into the block are
            // unchanged by extending in place, so capacity is recomputed
            // against the grown size the same way the "already have room"
            // branch above does — keeps repeated calls idempotent.
            return (new_size - class.pad() - base_off) / ti.elem_size;
        }
    }

    let reserve_bytes = new_cap * ti.elem_size;
    let (grown, new_block) = reallocate(gc, ti, *slice, slice.length, Fill::Uninit, reserve_bytes);
    *slice = grown;
    let new_class = SizeClass::of_block_size(new_block.size);
    (new_block.size - new_class.pad()) / ti.elem_size
}

/// Set the block's Used-Length to match `slice`'s exact length, with no CAS
/// — the caller asserts no other slice is contending for the tail. `slice`'s
/// backing block must be `APPENDABLE`.
pub fn shrink_fit(gc: &dyn Collector, ti: &TypeInfo, slice: &RawSlice) {
    if slice.is_null() {
        return;
    }
    let block = resolve_block(gc, ti, slice.data);
    debug_assert!(
        !block.is_null() && block.attrs.contains(BlkAttr::APPENDABLE),
        "shrink_fit requires an appendable backing block"
    );
    if block.is_null() {
        return;
    }
    let array_start = layout::array_start(block.base, block.size);
    let exact_end = slice.end_offset(array_start, ti.elem_size);
    unsafe { length::try_set_used(&block, exact_end, ti.shared, None) };
}

/// Grow `slice` by `n_elems` uninitialized elements; the caller is
/// responsible for writing them.
pub fn append_x(gc: &dyn Collector, ti: &TypeInfo, slice: &mut RawSlice, n_elems: usize) {
    if n_elems == 0 {
        return;
    }
    let new_len = slice
        .length
        .checked_add(n_elems)
        .unwrap_or_else(|| error::out_of_memory());
    grow(gc, ti, slice, new_len, Fill::Uninit);
}

/// `append_x` followed by copying `rhs`'s contents into the new tail.
pub fn append(gc: &dyn Collector, ti: &TypeInfo, slice: &mut RawSlice, rhs: &RawSlice) {
    if rhs.is_null() || rhs.length == 0 {
        return;
    }
    let old_len = slice.length;
    append_x(gc, ti, slice, rhs.length);
    unsafe {
        std::ptr::copy_nonoverlapping(
            rhs.data,
            slice.data.add(old_len * ti.elem_size),
            rhs.length * ti.elem_size,
        );
    }
}

/// Encode `dchar` as 1-4 UTF-8 bytes and append them to `slice`, treated as
/// a shared byte array.
pub fn append_char(gc: &dyn Collector, slice: &mut RawSlice, dchar: char) {
    let mut buf = [0u8; 4];
    let encoded = dchar.encode_utf8(&mut buf);
    let bytes = encoded.as_bytes();
    let old_len = slice.length;
    append_x(gc, &crate::typeinfo::UTF8_BYTES, slice, bytes.len());
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), slice.data.add(old_len), bytes.len());
    }
}

/// Encode `dchar` as 1-2 UTF-16 code units (a surrogate pair above
/// `U+FFFF`) and append them to `slice`.
pub fn append_wchar(gc: &dyn Collector, slice: &mut RawSlice, dchar: char) {
    let mut buf = [0u16; 2];
    let units = dchar.encode_utf16(&mut buf);
    let n = units.len();
    let old_len = slice.length;
    append_x(gc, &crate::typeinfo::UTF16_UNITS, slice, n);
    unsafe {
        let dst = (slice.data as *mut u16).add(old_len);
        std::ptr::copy_nonoverlapping(units.as_ptr(), dst, n);
    }
}

/// Fresh block sized exactly `|x| + |y|`, with both payloads copied in.
pub fn concat(gc: &dyn Collector, ti: &TypeInfo, x: &RawSlice, y: &RawSlice) -> RawSlice {
    concat_n(gc, ti, &[*x, *y])
}

/// [`concat`] generalized to N inputs.
pub fn concat_n(gc: &dyn Collector, ti: &TypeInfo, slices: &[RawSlice]) -> RawSlice {
    let total_len = slices
        .iter()
        .try_fold(0usize, |acc, s| acc.checked_add(s.length))
        .unwrap_or_else(|| error::out_of_memory());
    if total_len == 0 || ti.elem_size == 0 {
        return RawSlice::NULL;
    }
    let payload = total_len
        .checked_mul(ti.elem_size)
        .unwrap_or_else(|| error::out_of_memory());
    let block = allocate_block(gc, ti, payload);
    let start = layout::array_start(block.base, block.size);
    let mut off = 0usize;
    for s in slices {
        if s.length == 0 {
            continue;
        }
        let bytes = s.length * ti.elem_size;
        unsafe { std::ptr::copy_nonoverlapping(s.data, start.add(off), bytes) };
        off += bytes;
    }
    unsafe { length::try_set_used(&block, payload, ti.shared, None) };
    if !ti.shared {
        cache::cache_insert(block);
    }
    RawSlice {
        length: total_len,
        data: start,
    }
}

/// Fresh block sized `|slice|`, contents copied; independent of the
/// original.
pub fn dup(gc: &dyn Collector, ti: &TypeInfo, slice: &RawSlice) -> RawSlice {
    if slice.is_null() {
        return RawSlice::NULL;
    }
    concat_n(gc, ti, std::slice::from_ref(slice))
}

/// Fresh block sized `n * elemSize`, Used-Length set to full; the caller
/// fills the payload.
pub fn array_literal_alloc(gc: &dyn Collector, ti: &TypeInfo, n: usize) -> RawSlice {
    if n == 0 || ti.elem_size == 0 {
        return RawSlice::NULL;
    }
    let payload = n
        .checked_mul(ti.elem_size)
        .unwrap_or_else(|| error::out_of_memory());
    let block = allocate_block(gc, ti, payload);
    let start = layout::array_start(block.base, block.size);
    unsafe { length::try_set_used(&block, payload, ti.shared, None) };
    if !ti.shared {
        cache::cache_insert(block);
    }
    RawSlice {
        length: n,
        data: start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::simple::SimpleCollector;
    use crate::typeinfo::TypeInfo;

    static INT: TypeInfo = TypeInfo::plain(std::mem::size_of::<i32>());
    static BYTE: TypeInfo = TypeInfo::plain(1);

    unsafe fn elems(slice: &RawSlice) -> &[i32] {
        std::slice::from_raw_parts(slice.data as *const i32, slice.length)
    }

    #[test]
    fn new_array_is_zeroed() {
        let gc = SimpleCollector::new();
        let s = new_array(&gc, &INT, 4);
        assert_eq!(s.length, 4);
        assert_eq!(unsafe { elems(&s) }, &[0, 0, 0, 0]);
    }

    #[test]
    fn zero_length_or_zero_elem_size_is_null() {
        let gc = SimpleCollector::new();
        assert!(new_array(&gc, &INT, 0).is_null());
        let zero_sized = TypeInfo::plain(0);
        assert!(new_array(&gc, &zero_sized, 4).is_null());
    }

    #[test]
    fn append_x_then_write_grows_in_place_when_owning_tail() {
        let gc = SimpleCollector::new();
        let mut s = new_array(&gc, &INT, 2);
        let original_data = s.data;
        append_x(&gc, &INT, &mut s, 1);
        assert_eq!(s.length, 3);
        // A fresh, unshared array should almost always still own its tail
        // and grow in place (small block, no competing slice).
        assert_eq!(s.data, original_data);
    }

    #[test]
    fn aliased_slice_append_is_stolen_via_reallocation() {
        let gc = SimpleCollector::new();
        let mut a = new_array(&gc, &INT, 3);
        unsafe {
            elems_mut(&a)[0] = 1;
            elems_mut(&a)[1] = 2;
            elems_mut(&a)[2] = 3;
        }
        // `b` is a[0..1]: same backing block, but does not own the tail
        // (it ends one element before the block's Used-Length).
        let mut b = RawSlice {
            length: 1,
            data: a.data,
        };
        append_x(&gc, &INT, &mut b, 1);
        unsafe { *(b.data as *mut i32).add(1) = 4 };

        assert_eq!(unsafe { elems(&a) }, &[1, 2, 3]);
        assert_eq!(unsafe { elems(&b) }, &[1, 4]);
        assert_ne!(a.data, b.data);
    }

    unsafe fn elems_mut(slice: &RawSlice) -> &mut [i32] {
        std::slice::from_raw_parts_mut(slice.data as *mut i32, slice.length)
    }

    #[test]
    fn concat_empty_is_identity() {
        let gc = SimpleCollector::new();
        let x = new_array(&gc, &INT, 2);
        let empty = RawSlice::NULL;
        let r = concat(&gc, &INT, &x, &empty);
        assert_eq!(r.length, x.length);
    }

    #[test]
    fn dup_is_independent_of_original() {
        let gc = SimpleCollector::new();
        let a = new_array(&gc, &INT, 2);
        unsafe { elems_mut(&a)[0] = 7 };
        let d = dup(&gc, &INT, &a);
        unsafe { elems_mut(&d)[0] = 9 };
        assert_eq!(unsafe { elems(&a) }[0], 7);
        assert_eq!(unsafe { elems(&d) }[0], 9);
    }

    #[test]
    fn shrink_fit_lets_owner_grow_back_in_place() {
        let gc = SimpleCollector::new();
        let mut a = new_array(&gc, &BYTE, 8);
        unsafe {
            for i in 0..8 {
                *a.data.add(i) = (i + 1) as u8;
            }
        }
        set_length(&gc, &BYTE, &mut a, 4, false);
        shrink_fit(&gc, &BYTE, &a);
        let original_data = a.data;
        append_x(&gc, &BYTE, &mut a, 1);
        unsafe { *a.data.add(4) = 0xAA };
        // Used-Length was set exactly to 4, so the only way this append
        // could have grown in place is by `a` owning the tail at offset 4 —
        // proving shrink_fit didn't leave the old length's worth claimed.
        assert_eq!(a.data, original_data);
        assert_eq!(unsafe { *a.data.add(4) }, 0xAA);
    }

    #[test]
    fn set_capacity_is_idempotent() {
        let gc = SimpleCollector::new();
        let mut a = new_array(&gc, &BYTE, 10);
        let first = set_capacity(&gc, &BYTE, &mut a, 20);
        let data_after_first = a.data;
        let second = set_capacity(&gc, &BYTE, &mut a, 20);
        assert_eq!(first, second);
        assert_eq!(a.data, data_after_first);
    }

    #[test]
    fn append_char_encodes_utf8() {
        let gc = SimpleCollector::new();
        let mut s = RawSlice::NULL;
        append_char(&gc, &mut s, '\u{1F600}');
        assert_eq!(s.length, 4);
        let bytes = unsafe { std::slice::from_raw_parts(s.data, 4) };
        assert_eq!(bytes, &[0xF0, 0x9F, 0x98, 0x80]);
    }

    #[test]
    fn append_wchar_encodes_surrogate_pair_above_bmp() {
        let gc = SimpleCollector::new();
        let mut s = RawSlice::NULL;
        append_wchar(&gc, &mut s, '\u{1F600}');
        assert_eq!(s.length, 2);
    }

    #[test]
    fn new_array_multi_shape_and_independence() {
        let gc = SimpleCollector::new();
        let outer = new_array_multi(&gc, &INT, &[2, 3, 4]);
        assert_eq!(outer.length, 2);
        let headers = outer.data as *const RawSlice;
        let dim1_a = unsafe { &*headers };
        let dim1_b = unsafe { &*headers.add(1) };
        assert_eq!(dim1_a.length, 3);
        let leaves_a = unsafe { &*(dim1_a.data as *const RawSlice) };
        let leaves_b = unsafe { &*(dim1_b.data as *const RawSlice) };
        assert_eq!(leaves_a.length, 4);
        assert_eq!(unsafe { elems(leaves_a) }, &[0, 0, 0, 0]);
        unsafe { elems_mut(leaves_a)[0] = 99 };
        assert_eq!(unsafe { elems(leaves_b) }[0], 0);
    }

    #[test]
    fn large_block_extend_is_tried_before_reallocating() {
        let gc = SimpleCollector::new();
        let mut a = new_array(&gc, &BYTE, layout::PAGESIZE * 2);
        let original_data = a.data;
        append_x(&gc, &BYTE, &mut a, 1);
        assert_eq!(a.data, original_data, "extend should avoid relocation");
    }

    #[test]
    fn large_block_sentinel_is_written_on_create_and_after_extend() {
        let gc = SimpleCollector::new();
        let mut a = new_array(&gc, &BYTE, layout::PAGESIZE * 2);
        let block = resolve_block(&gc, &BYTE, a.data);
        let sentinel = unsafe { *block.base.add(layout::large_sentinel_offset(block.size)) };
        assert_eq!(sentinel, 0);

        append_x(&gc, &BYTE, &mut a, 1);
        let grown = resolve_block(&gc, &BYTE, a.data);
        let sentinel_after_extend =
            unsafe { *grown.base.add(layout::large_sentinel_offset(grown.size)) };
        assert_eq!(sentinel_after_extend, 0);
    }
}
