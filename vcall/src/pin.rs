//! Call-scoped pinning.
//!
//! A pinned region is a stable first-element address over a caller
//! buffer, alive for exactly one native call frame. Rust memory does not
//! relocate, so pinning costs nothing at run time; the guard types exist
//! to keep the scoping discipline explicit in the type system: the
//! borrow ties the region to the enclosing call, the guard is confined
//! to the thread that created it, and no pinned address outlives the
//! guard. Thunks never retain pinned addresses past their own return.

use core::ffi::c_void;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::{mem, slice};

/// A pinned view over a caller buffer or single value.
///
/// Holds the address of the first element and the region's byte length.
/// The raw-pointer field makes the guard `!Send`/`!Sync`, which is load
/// bearing: pinned regions are strictly thread-confined to the call that
/// established them.
pub struct PinGuard<'a> {
    addr: *const u8,
    len: usize,
    _region: PhantomData<&'a [u8]>,
}

impl<'a> PinGuard<'a> {
    /// Pin a slice, yielding the address of its first element.
    pub fn slice<T: Copy>(data: &'a [T]) -> Self {
        Self {
            addr: data.as_ptr() as *const u8,
            len: mem::size_of_val(data),
            _region: PhantomData,
        }
    }

    /// Pin a single value.
    pub fn value<T: Copy>(data: &'a T) -> Self {
        Self {
            addr: data as *const T as *const u8,
            len: mem::size_of::<T>(),
            _region: PhantomData,
        }
    }

    /// Pin a raw byte view.
    pub fn bytes(data: &'a [u8]) -> Self {
        Self::slice(data)
    }

    /// Stable address of the region's first byte, valid until the guard
    /// drops.
    pub fn addr(&self) -> *const u8 {
        self.addr
    }

    /// Byte length of the pinned region.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Mutable counterpart of [`PinGuard`] for read-back destinations.
pub struct PinGuardMut<'a> {
    addr: *mut u8,
    len: usize,
    _region: PhantomData<&'a mut [u8]>,
}

impl<'a> PinGuardMut<'a> {
    pub fn slice<T: Copy>(data: &'a mut [T]) -> Self {
        Self {
            len: mem::size_of_val(data),
            addr: data.as_mut_ptr() as *mut u8,
            _region: PhantomData,
        }
    }

    pub fn value<T: Copy>(data: &'a mut T) -> Self {
        Self {
            addr: data as *mut T as *mut u8,
            len: mem::size_of::<T>(),
            _region: PhantomData,
        }
    }

    pub fn addr(&self) -> *mut u8 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Stack-local pinned cell for the out-handle pattern.
///
/// Creation-style interface methods receive a pointer to a cell the
/// native side fills with a freshly created handle. The thunk allocates
/// this cell in its own frame, passes [`addr`] to the call, and writes
/// the final cell value back to the caller-visible `out` slot when the
/// cell drops, unwinding included.
///
/// [`addr`]: OutCell::addr
pub struct OutCell<'a> {
    cell: UnsafeCell<*mut c_void>,
    target: &'a mut *mut c_void,
}

impl<'a> OutCell<'a> {
    pub fn new(target: &'a mut *mut c_void) -> Self {
        Self {
            cell: UnsafeCell::new(*target),
            target,
        }
    }

    /// Address of the local cell, valid until the cell drops. The native
    /// side writes through this pointer while the thunk holds `&self`,
    /// hence the interior mutability.
    pub fn addr(&self) -> *mut *mut c_void {
        self.cell.get()
    }
}

impl Drop for OutCell<'_> {
    fn drop(&mut self) {
        *self.target = *self.cell.get_mut();
    }
}

/// View a `Copy` slice as raw bytes. Used by the bulk-copy paths to
/// express byte offsets and counts over typed element storage.
pub(crate) fn as_bytes<T: Copy>(data: &[T]) -> &[u8] {
    unsafe {
        slice::from_raw_parts(
            data.as_ptr() as *const u8,
            mem::size_of_val(data),
        )
    }
}

pub(crate) fn as_bytes_mut<T: Copy>(data: &mut [T]) -> &mut [u8] {
    unsafe {
        slice::from_raw_parts_mut(
            data.as_mut_ptr() as *mut u8,
            mem::size_of_val(data),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_pin_addresses_first_element() {
        let data = [1u32, 2, 3, 4];
        let guard = PinGuard::slice(&data);
        assert_eq!(guard.addr(), data.as_ptr() as *const u8);
        assert_eq!(guard.len(), 16);
    }

    #[test]
    fn value_pin() {
        let v = 0xDEAD_BEEFu64;
        let guard = PinGuard::value(&v);
        assert_eq!(guard.addr(), &v as *const u64 as *const u8);
        assert_eq!(guard.len(), 8);
    }

    #[test]
    fn address_stable_across_reads() {
        let data = vec![0u8; 256];
        let guard = PinGuard::slice(&data);
        let first = guard.addr();
        for _ in 0..64 {
            assert_eq!(guard.addr(), first);
        }
    }

    #[test]
    fn out_cell_writes_back_on_drop() {
        let mut caller_slot: *mut c_void = core::ptr::null_mut();
        {
            let cell = OutCell::new(&mut caller_slot);
            // Simulate the native side writing a new handle through the
            // cell's address.
            unsafe { *cell.addr() = 0x4242 as *mut c_void };
        }
        assert_eq!(caller_slot, 0x4242 as *mut c_void);
    }

    #[test]
    fn out_cell_starts_from_caller_value() {
        let mut caller_slot = 0x1111 as *mut c_void;
        let cell = OutCell::new(&mut caller_slot);
        assert_eq!(unsafe { *cell.addr() }, 0x1111 as *mut c_void);
    }
}
