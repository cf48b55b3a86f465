//! Block Layout: where "used length" lives inside a block given
//! its size class, and the arithmetic for converting between a block's base
//! address and where its array payload actually starts.
//!
//! Three size classes, each with its own cutoff constant:
//! small (`<= 256`), medium (`< 4096`), large (`>= 4096` = page size).

use crate::util::align_down;

/// Largest byte size that still uses the 1-byte small encoding.
pub const MAX_SMALL: usize = 256;
/// Largest byte size that still uses the 2-byte medium encoding
/// (`PAGESIZE / 2 - 2`).
pub const MAX_MED: usize = 2046;
/// Page size; blocks at or above this are "large" and carry a word-sized,
/// 16-byte-aligned prefix instead of a trailing field.
pub const PAGESIZE: usize = 4096;

/// Size class of a block, determined by its total byte size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    /// Classify a block by its total size in bytes.
    #[inline]
    pub fn of_block_size(size: usize) -> SizeClass {
        if size >= PAGESIZE {
            SizeClass::Large
        } else if size > MAX_SMALL {
            SizeClass::Medium
        } else {
            SizeClass::Small
        }
    }

    /// Classify a *payload* (requested) size, i.e. before the block's
    /// padding overhead is added. Used by `padFor` to decide which overhead
    /// a fresh allocation request needs.
    #[inline]
    pub fn of_payload_size(requested: usize) -> SizeClass {
        if requested <= MAX_SMALL - 1 {
            SizeClass::Small
        } else if requested <= MAX_MED - 1 {
            SizeClass::Medium
        } else {
            SizeClass::Large
        }
    }

    /// Bytes of padding overhead this size class reserves: 1, 2, or 17.
    #[inline]
    pub fn pad(self) -> usize {
        match self {
            SizeClass::Small => 1,
            SizeClass::Medium => 2,
            SizeClass::Large => 17,
        }
    }
}

/// Overhead that must be added to a fresh allocation request, given the
/// *payload* size the caller wants (not an existing block's size).
#[inline]
pub fn pad_for(requested_bytes: usize) -> usize {
    SizeClass::of_payload_size(requested_bytes).pad()
}

/// Where the array payload starts within a block, given its base and total
/// size. Equals `base` for small/medium blocks, `base + 16` for large
/// blocks (which reserve a 16-byte prefix for alignment).
#[inline]
pub fn array_start(base: *mut u8, size: usize) -> *mut u8 {
    if rounds_to_large(size) {
        unsafe { base.add(16) }
    } else {
        base
    }
}

/// `~(PAGESIZE-1)` bitmask check: true iff `size`, masked down to a page
/// boundary, is non-zero (i.e. `size >= PAGESIZE`).
#[inline]
fn rounds_to_large(size: usize) -> bool {
    align_down(size, PAGESIZE) != 0
}

/// Byte offset, from a block's base, of the Used-Length field, together with
/// its on-the-wire width in bytes. Small/medium fields sit near the end of
/// the block; large blocks keep a word-sized field as a prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsedLengthField {
    pub offset: usize,
    pub width: usize,
}

/// Compute where (and how wide) the Used-Length field is for a block of the
/// given total `size`.
#[inline]
pub fn used_length_field(size: usize) -> UsedLengthField {
    match SizeClass::of_block_size(size) {
        SizeClass::Small => UsedLengthField {
            offset: size - 1,
            width: 1,
        },
        SizeClass::Medium => UsedLengthField {
            offset: size - 2,
            width: 2,
        },
        SizeClass::Large => UsedLengthField {
            offset: 0,
            width: std::mem::size_of::<usize>(),
        },
    }
}

/// Byte offset of the large-block sentinel byte:
/// always zero while the block is live, meant to stop a one-past-end
/// pointer from being mistaken for pointing into the next block.
#[inline]
pub fn large_sentinel_offset(size: usize) -> usize {
    debug_assert_eq!(SizeClass::of_block_size(size), SizeClass::Large);
    size - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_classification_matches_cutoffs() {
        assert_eq!(SizeClass::of_payload_size(0), SizeClass::Small);
        assert_eq!(SizeClass::of_payload_size(MAX_SMALL - 1), SizeClass::Small);
        assert_eq!(SizeClass::of_payload_size(MAX_SMALL), SizeClass::Medium);
        assert_eq!(SizeClass::of_payload_size(MAX_MED - 1), SizeClass::Medium);
        assert_eq!(SizeClass::of_payload_size(MAX_MED), SizeClass::Large);
    }

    #[test]
    fn pad_for_matches_size_class() {
        assert_eq!(pad_for(10), 1);
        assert_eq!(pad_for(300), 2);
        assert_eq!(pad_for(5000), 17);
    }

    #[test]
    fn array_start_offsets_large_blocks_only() {
        let base = 0x1000 as *mut u8;
        assert_eq!(array_start(base, 128), base);
        assert_eq!(array_start(base, 2000), base);
        assert_eq!(array_start(base, PAGESIZE), unsafe { base.add(16) });
    }

    #[test]
    fn block_size_256_is_small_not_medium() {
        assert_eq!(SizeClass::of_block_size(256), SizeClass::Small);
        assert_eq!(SizeClass::of_block_size(257), SizeClass::Medium);
        assert_eq!(
            used_length_field(256),
            UsedLengthField { offset: 255, width: 1 }
        );
    }

    #[test]
    fn used_length_field_positions() {
        let small = used_length_field(200);
        assert_eq!(small, UsedLengthField { offset: 199, width: 1 });

        let medium = used_length_field(1000);
        assert_eq!(medium, UsedLengthField { offset: 998, width: 2 });

        let large = used_length_field(PAGESIZE);
        assert_eq!(
            large,
            UsedLengthField {
                offset: 0,
                width: std::mem::size_of::<usize>()
            }
        );
    }

    #[test]
    fn pad_always_leaves_room_for_an_empty_array() {
        for size in [64usize, 1000, PAGESIZE, PAGESIZE * 4] {
            let class = SizeClass::of_block_size(size);
            let pad = class.pad();
            assert!(pad < size);
        }
    }
}
