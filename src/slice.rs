//! The wire slice header: two machine words,
//! length first then data pointer. Array-of-arrays nests these headers.
//! There is no dedicated capacity field here — capacity lives in the
//! block's Used-Length metadata, not in the slice.

use std::fmt;

/// A `(length, data)` pair viewing elements within a GC block. `data` is
/// null for the null slice: `n == 0` or `elemSize == 0` yields a null
/// slice rather than an allocation.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawSlice {
    pub length: usize,
    pub data: *mut u8,
}

impl RawSlice {
    /// The canonical empty/null slice.
    pub const NULL: RawSlice = RawSlice {
        length: 0,
        data: std::ptr::null_mut(),
    };

    #[inline]
    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// Byte offset of the element one past the slice's last element,
    /// relative to the block's array start. Used to test tail ownership
    /// and to compute new tail offsets on append.
    #[inline]
    pub fn end_offset(&self, array_start: *const u8, elem_size: usize) -> usize {
        let start_off = self.data as usize - array_start as usize;
        start_off + self.length * elem_size
    }

    #[inline]
    pub fn start_offset(&self, array_start: *const u8) -> usize {
        self.data as usize - array_start as usize
    }

    /// Byte view of this slice's contents, for `memcpy`-style operations.
    ///
    /// # Safety
    /// `data` must point at `length * elem_size` live, readable bytes.
    #[inline]
    pub unsafe fn as_bytes(&self, elem_size: usize) -> &[u8] {
        if self.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(self.data, self.length * elem_size)
    }
}

impl fmt::Debug for RawSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSlice")
            .field("length", &self.length)
            .field("data", &self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_slice_has_no_bytes() {
        let s = RawSlice::NULL;
        assert!(s.is_null());
        unsafe { assert!(s.as_bytes(4).is_empty()) };
    }

    #[test]
    fn end_offset_accounts_for_element_size() {
        let base = 0x1000 as *mut u8;
        let s = RawSlice {
            length: 3,
            data: unsafe { base.add(4) },
        };
        assert_eq!(s.start_offset(base), 4);
        assert_eq!(s.end_offset(base, 2), 4 + 6);
    }
}
