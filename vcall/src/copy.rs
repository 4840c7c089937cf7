//! Bulk memory copy thunks.
//!
//! The specialization of thunk synthesis that skips dispatch entirely:
//! pin the caller-side buffer, offset into it, and move a fixed byte
//! range directly between it and a raw native pointer. Used to populate
//! natively mapped memory regions (a buffer temporarily made directly
//! writable) without an intermediate marshaling copy, and to read such
//! regions back.
//!
//! Byte offsets and counts always apply to the pinned caller side; the
//! native pointer is taken as already positioned. Zero-length copies are
//! a legal no-op and never touch either pointer.

use core::ffi::c_void;
use std::{mem, ptr};

use crate::error::ThunkError;
use crate::pin::{PinGuard, PinGuardMut, as_bytes, as_bytes_mut};

fn check_range(
    offset: usize,
    byte_count: usize,
    len: usize,
) -> Result<(), ThunkError> {
    match offset.checked_add(byte_count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(ThunkError::CopyOutOfBounds {
            offset,
            byte_count,
            len,
        }),
    }
}

fn check_element<T>() -> Result<(), ThunkError> {
    if mem::size_of::<T>() == 0 {
        return Err(ThunkError::UnsupportedElementSize { size: 0 });
    }
    Ok(())
}

/// Copy `byte_count` bytes from `src[offset_bytes..]` into `dst`.
///
/// # Safety
///
/// `dst` must be valid for `byte_count` bytes of writes and must not
/// overlap the source region.
pub unsafe fn copy_in(
    dst: *mut c_void,
    src: &[u8],
    offset_bytes: usize,
    byte_count: usize,
) -> Result<(), ThunkError> {
    let guard = PinGuard::bytes(src);
    check_range(offset_bytes, byte_count, guard.len())?;
    if byte_count == 0 {
        return Ok(());
    }
    unsafe {
        ptr::copy_nonoverlapping(
            guard.addr().add(offset_bytes),
            dst as *mut u8,
            byte_count,
        );
    }
    Ok(())
}

/// Read-back direction: copy `byte_count` bytes from `src` into
/// `dst[offset_bytes..]`.
///
/// # Safety
///
/// `src` must be valid for `byte_count` bytes of reads and must not
/// overlap the destination region.
pub unsafe fn copy_out(
    dst: &mut [u8],
    src: *const c_void,
    offset_bytes: usize,
    byte_count: usize,
) -> Result<(), ThunkError> {
    let guard = PinGuardMut::slice(dst);
    check_range(offset_bytes, byte_count, guard.len())?;
    if byte_count == 0 {
        return Ok(());
    }
    unsafe {
        ptr::copy_nonoverlapping(
            src as *const u8,
            guard.addr().add(offset_bytes),
            byte_count,
        );
    }
    Ok(())
}

/// Typed-element form of [`copy_in`], mirroring per-element-type copy
/// routines bound once per value type by the graphics wrapper layer.
///
/// # Safety
///
/// Same contract as [`copy_in`].
pub unsafe fn copy_slice_in<T: Copy>(
    dst: *mut c_void,
    src: &[T],
    offset_bytes: usize,
    byte_count: usize,
) -> Result<(), ThunkError> {
    check_element::<T>()?;
    unsafe { copy_in(dst, as_bytes(src), offset_bytes, byte_count) }
}

/// Copy out of a single value, for constants and per-frame uniform data.
///
/// # Safety
///
/// Same contract as [`copy_in`].
pub unsafe fn copy_value_in<T: Copy>(
    dst: *mut c_void,
    src: &T,
    offset_bytes: usize,
    byte_count: usize,
) -> Result<(), ThunkError> {
    check_element::<T>()?;
    let bytes = unsafe {
        std::slice::from_raw_parts(
            src as *const T as *const u8,
            mem::size_of::<T>(),
        )
    };
    unsafe { copy_in(dst, bytes, offset_bytes, byte_count) }
}

/// Typed-element form of [`copy_out`].
///
/// # Safety
///
/// Same contract as [`copy_out`].
pub unsafe fn copy_slice_out<T: Copy>(
    dst: &mut [T],
    src: *const c_void,
    offset_bytes: usize,
    byte_count: usize,
) -> Result<(), ThunkError> {
    check_element::<T>()?;
    unsafe { copy_out(as_bytes_mut(dst), src, offset_bytes, byte_count) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_byte_counts() {
        let src: Vec<u8> = (0..=255u8).collect();
        // n over zero, one, a mid-size value, the full length.
        for n in [0usize, 1, 97, 256] {
            let mut dst = vec![0xEEu8; 256];
            unsafe {
                copy_in(dst.as_mut_ptr() as *mut c_void, &src, 0, n).unwrap()
            };
            assert_eq!(&dst[..n], &src[..n], "n = {n}");
            assert!(dst[n..].iter().all(|&b| b == 0xEE), "n = {n}");
        }
    }

    #[test]
    fn zero_length_never_touches_dst() {
        let src = [1u8, 2, 3];
        // A dangling destination is fine for a zero-length copy.
        unsafe {
            copy_in(core::ptr::NonNull::<u8>::dangling().as_ptr() as *mut c_void, &src, 0, 0)
                .unwrap()
        };
    }

    #[test]
    fn offset_applies_to_source() {
        let src: Vec<u8> = (0..32u8).collect();
        let mut dst = [0u8; 8];
        unsafe {
            copy_in(dst.as_mut_ptr() as *mut c_void, &src, 16, 8).unwrap()
        };
        assert_eq!(&dst, &src[16..24]);
    }

    #[test]
    fn out_of_bounds_rejected() {
        let src = [0u8; 16];
        let mut dst = [0u8; 64];
        let err = unsafe {
            copy_in(dst.as_mut_ptr() as *mut c_void, &src, 8, 9).unwrap_err()
        };
        assert_eq!(
            err,
            ThunkError::CopyOutOfBounds {
                offset: 8,
                byte_count: 9,
                len: 16
            }
        );

        // Offset + count overflow is out of bounds, not a wraparound.
        let err = unsafe {
            copy_in(dst.as_mut_ptr() as *mut c_void, &src, usize::MAX, 2)
                .unwrap_err()
        };
        assert!(matches!(err, ThunkError::CopyOutOfBounds { .. }));
    }

    #[test]
    fn typed_slice_copy() {
        let src = [0x11223344u32, 0x55667788, 0x99AABBCC];
        let mut dst = [0u32; 3];
        unsafe {
            copy_slice_in(
                dst.as_mut_ptr() as *mut c_void,
                &src,
                0,
                mem::size_of_val(&src),
            )
            .unwrap()
        };
        assert_eq!(dst, src);
    }

    #[test]
    fn value_copy_with_offset() {
        #[derive(Clone, Copy)]
        #[repr(C)]
        struct Uniform {
            a: u32,
            b: u32,
            c: u32,
        }
        let v = Uniform { a: 1, b: 2, c: 3 };
        let mut dst = [0u32; 2];
        // Skip field `a`.
        unsafe {
            copy_value_in(dst.as_mut_ptr() as *mut c_void, &v, 4, 8).unwrap()
        };
        assert_eq!(dst, [2, 3]);
    }

    #[test]
    fn read_back_round_trip() {
        let native = [9u8, 8, 7, 6, 5, 4, 3, 2];
        let mut dst = vec![0u8; 8];
        unsafe {
            copy_out(&mut dst, native.as_ptr() as *const c_void, 0, 8).unwrap()
        };
        assert_eq!(dst, native);

        let mut typed = [0u16; 2];
        unsafe {
            copy_slice_out(&mut typed, native.as_ptr() as *const c_void, 0, 4)
                .unwrap()
        };
        assert_eq!(typed, [u16::from_ne_bytes([9, 8]), u16::from_ne_bytes([7, 6])]);
    }

    #[test]
    fn zero_sized_elements_rejected() {
        let src = [(); 4];
        let mut dst = [0u8; 4];
        let err = unsafe {
            copy_slice_in(dst.as_mut_ptr() as *mut c_void, &src, 0, 0)
                .unwrap_err()
        };
        assert_eq!(err, ThunkError::UnsupportedElementSize { size: 0 });
    }
}
