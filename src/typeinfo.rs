//! The type descriptor contract: element size, an initializer template, a
//! "contains pointers" bit, and a flag identifying the designated "shared"
//! element type, all as a plain value type rather than a vtable, so every
//! array operation can take `&TypeInfo` by reference instead of dispatching
//! through a trait object.

use bitflags::bitflags;

bitflags! {
    /// Flags carried by a [`TypeInfo`]. Bit 0 marks element types that
    /// contain GC pointers, which disables `NO_SCAN` on blocks of this type.
    pub struct TypeFlags: u32 {
        /// Element type contains GC pointers; blocks must not be tagged
        /// `NO_SCAN`.
        const CONTAINS_POINTERS = 0b01;
    }
}

/// The type descriptor consumed by every array operation in `array::raw`.
///
/// `init` is the initializer template: empty means "zero-init", otherwise
/// its bytes are repeated across the payload. 1-byte and 4-byte templates
/// are the cases worth special-casing, since those are the patterns a
/// repeating-fill loop can turn into wide stores.
#[derive(Clone, Copy, Debug)]
pub struct TypeInfo {
    pub elem_size: usize,
    pub flags: TypeFlags,
    pub init: &'static [u8],
    /// Stands in for "classinfo identity equals the well-known shared
    /// sentinel": forces global-lock-mediated Used-Length updates and
    /// bypasses the per-thread block-info cache.
    pub shared: bool,
}

impl TypeInfo {
    /// A plain, non-pointer, zero-init type descriptor of the given element
    /// size. The common case for primitive element arrays.
    pub const fn plain(elem_size: usize) -> TypeInfo {
        TypeInfo {
            elem_size,
            flags: TypeFlags::empty(),
            init: &[],
            shared: false,
        }
    }

    /// Same as [`TypeInfo::plain`] but marked shared, forcing the global
    /// Used-Length lock and disabling the block-info cache for slices of
    /// this type.
    pub const fn shared(elem_size: usize) -> TypeInfo {
        TypeInfo {
            elem_size,
            flags: TypeFlags::empty(),
            init: &[],
            shared: true,
        }
    }

    /// A descriptor whose elements contain GC pointers, disabling `NO_SCAN`
    /// on any block allocated for it.
    pub const fn with_pointers(elem_size: usize) -> TypeInfo {
        TypeInfo {
            elem_size,
            flags: TypeFlags::CONTAINS_POINTERS,
            init: &[],
            shared: false,
        }
    }

    #[inline]
    pub fn contains_pointers(&self) -> bool {
        self.flags.contains(TypeFlags::CONTAINS_POINTERS)
    }
}

/// Element type used for `char[]`/UTF-8 byte arrays: a shared byte array,
/// matching the source's treatment of string-like arrays as a shared
/// element type so concurrent appends from multiple threads are serialized
/// through the global metadata lock.
pub static UTF8_BYTES: TypeInfo = TypeInfo::shared(1);

/// Element type used for `wchar[]`/UTF-16 arrays.
pub static UTF16_UNITS: TypeInfo = TypeInfo::shared(2);
