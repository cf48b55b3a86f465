//! A typed, ergonomic wrapper over [`super::raw`]'s untyped entry points,
//! generic over the GC collaborator the same way a growable-vector type
//! would be generic over its backing allocator. Every method here lowers to
//! exactly one `raw` call, so the CAS discipline has one implementation
//! regardless of which API a caller goes through.

use std::marker::PhantomData;

use crate::gc::Collector;
use crate::slice::RawSlice;
use crate::typeinfo::TypeInfo;

use super::raw;

/// A length-and-data view into a GC block, typed by `T` for ergonomic
/// element access. `ti.elem_size` must equal `size_of::<T>()`; debug builds
/// assert this at every construction point.
#[derive(Clone, Copy)]
pub struct ArrayHandle<T> {
    slice: RawSlice,
    ti: &'static TypeInfo,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArrayHandle<T> {
    fn check_elem_size(ti: &TypeInfo) {
        debug_assert_eq!(
            ti.elem_size,
            std::mem::size_of::<T>(),
            "ArrayHandle<T>'s TypeInfo must describe T's own size"
        );
    }

    /// Wrap an existing [`RawSlice`] without validating its contents,
    /// beyond the debug-only element-size check.
    pub fn from_raw(slice: RawSlice, ti: &'static TypeInfo) -> ArrayHandle<T> {
        Self::check_elem_size(ti);
        ArrayHandle {
            slice,
            ti,
            _marker: PhantomData,
        }
    }

    pub fn into_raw(self) -> RawSlice {
        self.slice
    }

    pub fn raw(&self) -> &RawSlice {
        &self.slice
    }

    pub fn len(&self) -> usize {
        self.slice.length
    }

    pub fn is_empty(&self) -> bool {
        self.slice.length == 0
    }

    pub fn is_null(&self) -> bool {
        self.slice.is_null()
    }

    /// # Safety
    /// No other thread may be concurrently writing through an alias of
    /// this slice's tail.
    pub unsafe fn as_slice(&self) -> &[T] {
        if self.slice.is_null() {
            return &[];
        }
        std::slice::from_raw_parts(self.slice.data as *const T, self.slice.length)
    }

    /// # Safety
    /// Same obligations as [`as_slice`](Self::as_slice), plus exclusive
    /// access for the duration of the borrow.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [T] {
        if self.slice.is_null() {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(self.slice.data as *mut T, self.slice.length)
    }

    /// Allocate a zero-initialized array of `n` elements.
    pub fn new(gc: &dyn Collector, ti: &'static TypeInfo, n: usize) -> ArrayHandle<T> {
        Self::check_elem_size(ti);
        ArrayHandle {
            slice: raw::new_array(gc, ti, n),
            ti,
            _marker: PhantomData,
        }
    }

    /// Allocate an array of `n` elements, each initialized from `ti.init`.
    pub fn new_init(gc: &dyn Collector, ti: &'static TypeInfo, n: usize) -> ArrayHandle<T> {
        Self::check_elem_size(ti);
        ArrayHandle {
            slice: raw::new_array_init(gc, ti, n),
            ti,
            _marker: PhantomData,
        }
    }

    /// Grow or shrink to `new_len` elements.
    pub fn set_length(&mut self, gc: &dyn Collector, new_len: usize, pattern_init: bool) {
        raw::set_length(gc, self.ti, &mut self.slice, new_len, pattern_init);
    }

    /// Ensure room for at least `new_cap` elements; returns the capacity
    /// actually available afterward.
    pub fn set_capacity(&mut self, gc: &dyn Collector, new_cap: usize) -> usize {
        raw::set_capacity(gc, self.ti, &mut self.slice, new_cap)
    }

    /// Clamp the backing block's Used-Length down to this handle's exact
    /// length. The caller asserts no other handle is contending for the
    /// tail.
    pub fn shrink_fit(&self, gc: &dyn Collector) {
        raw::shrink_fit(gc, self.ti, &self.slice);
    }

    /// Grow by `n` uninitialized elements; the caller is responsible for
    /// writing them via [`as_mut_slice`](Self::as_mut_slice).
    pub fn append_x(&mut self, gc: &dyn Collector, n: usize) {
        raw::append_x(gc, self.ti, &mut self.slice, n);
    }

    /// Append one element by value.
    pub fn push(&mut self, gc: &dyn Collector, value: T) {
        let old_len = self.slice.length;
        self.append_x(gc, 1);
        unsafe {
            (self.slice.data as *mut T).add(old_len).write(value);
        }
    }

    /// Append another handle's contents.
    pub fn append(&mut self, gc: &dyn Collector, rhs: &ArrayHandle<T>) {
        raw::append(gc, self.ti, &mut self.slice, &rhs.slice);
    }

    /// A fresh array holding `self` followed by `other`.
    pub fn concat(&self, gc: &dyn Collector, other: &ArrayHandle<T>) -> ArrayHandle<T> {
        ArrayHandle {
            slice: raw::concat(gc, self.ti, &self.slice, &other.slice),
            ti: self.ti,
            _marker: PhantomData,
        }
    }

    /// An independent copy of `self`.
    pub fn dup(&self, gc: &dyn Collector) -> ArrayHandle<T> {
        ArrayHandle {
            slice: raw::dup(gc, self.ti, &self.slice),
            ti: self.ti,
            _marker: PhantomData,
        }
    }
}
