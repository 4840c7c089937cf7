//! Vtable dispatch resolution.
//!
//! COM-style interface instances store a pointer to their vtable (an
//! array of function pointers) in the first machine word. Resolution is
//! two loads: the vtable base from the handle, then the entry at
//! `slot * size_of::<pointer>()`.

use core::ffi::c_void;

/// Compute the function pointer at `slot` in the vtable of `handle`.
///
/// Pure and side-effect free. Re-executed on every call through a thunk:
/// distinct objects implementing the same interface carry distinct
/// vtable addresses even though the slot index is fixed by the
/// interface's method order.
///
/// # Safety
///
/// `handle` must point to a live native object whose first machine word
/// is a valid vtable base, and `slot` must be within that vtable. An
/// invalid handle is a caller contract violation, not a recoverable
/// error.
#[inline]
pub unsafe fn resolve(handle: *mut c_void, slot: usize) -> *const c_void {
    let vtbl = unsafe { *(handle as *const *const *const c_void) };
    unsafe { *vtbl.add(slot) }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A fake interface instance: first word points at the vtable.
    #[repr(C)]
    struct FakeObject {
        vtbl: *const *const c_void,
    }

    #[test]
    fn slot_arithmetic_matches_table() {
        // Distinct sentinel "function pointers" at every slot.
        let sentinels: [usize; 8] =
            [0x1000, 0x2000, 0x3000, 0x4000, 0x5000, 0x6000, 0x7000, 0x8000];
        let table: Vec<*const c_void> =
            sentinels.iter().map(|&s| s as *const c_void).collect();
        let obj = FakeObject { vtbl: table.as_ptr() };
        let handle = &obj as *const FakeObject as *mut c_void;

        for (i, &expected) in table.iter().enumerate() {
            let got = unsafe { resolve(handle, i) };
            assert_eq!(got, expected, "slot {i}");
        }
    }

    #[test]
    fn distinct_objects_same_slot() {
        let table_a = [0xAAAAusize as *const c_void];
        let table_b = [0xBBBBusize as *const c_void];
        let a = FakeObject { vtbl: table_a.as_ptr() };
        let b = FakeObject { vtbl: table_b.as_ptr() };

        let ra = unsafe { resolve(&a as *const _ as *mut c_void, 0) };
        let rb = unsafe { resolve(&b as *const _ as *mut c_void, 0) };
        assert_eq!(ra, table_a[0]);
        assert_eq!(rb, table_b[0]);
        assert_ne!(ra, rb);
    }
}
