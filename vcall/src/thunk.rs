//! Thunk synthesis and the process-lifetime thunk cache.
//!
//! A [`Thunk`] binds one [`Signature`] to one dispatch target (a vtable
//! slot or a fixed native address) and owns a libffi call interface
//! prepared once at synthesis time. Invoking the thunk is then an
//! ordinary synchronous foreign call: pin what must be pinned, resolve
//! the target, push arguments in ABI order, issue the indirect call,
//! hand the native result back untouched.
//!
//! Thunks are cached for the process lifetime keyed by
//! `(signature, dispatch)`. Generation is expected once per distinct
//! shape, typically from one-time initialization paths; the cache makes
//! concurrent first use safe by building outside the lock and publishing
//! atomically, discarding the loser of a duplicate race.

use core::ffi::c_void;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use libffi::middle::{Arg, Builder, Cif, CodePtr};
use parking_lot::RwLock;

use crate::ctype::CType;
use crate::error::ThunkError;
use crate::pin::{OutCell, PinGuard};
use crate::signature::{ParamSpec, Passing, Signature};
use crate::vtable;

/// Where a thunk's calls land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dispatch {
    /// Indirect through the vtable of the signature's handle parameter,
    /// at this slot index. Resolved anew on every call.
    Slot(usize),
    /// A fixed native address, mainly for utility entry points that are
    /// not interface methods.
    Address(usize),
}

/// One caller-supplied argument for a thunk invocation.
///
/// The variant must match what the bound signature declares for that
/// position: plain values for `ByValue` parameters, `Ptr` for
/// `ByNativePointer` ones, `Pinned` for the bulk-data parameter and
/// `OutHandle` for the out-handle receiver.
#[derive(Debug)]
pub enum CallArg<'a> {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(*mut c_void),
    /// Bulk data; pinned for the duration of the call, address of the
    /// first byte passed to the native side.
    Pinned(&'a [u8]),
    /// Out-handle receiver; the thunk passes the address of a private
    /// pinned cell and writes its final value back here on return.
    OutHandle(&'a mut *mut c_void),
}

impl CallArg<'_> {
    fn kind_name(&self) -> &'static str {
        match self {
            CallArg::I8(_) => "i8",
            CallArg::U8(_) => "u8",
            CallArg::I16(_) => "i16",
            CallArg::U16(_) => "u16",
            CallArg::I32(_) => "i32",
            CallArg::U32(_) => "u32",
            CallArg::I64(_) => "i64",
            CallArg::U64(_) => "u64",
            CallArg::F32(_) => "f32",
            CallArg::F64(_) => "f64",
            CallArg::Ptr(_) => "pointer",
            CallArg::Pinned(_) => "pinned buffer",
            CallArg::OutHandle(_) => "out handle",
        }
    }
}

/// The native return value, verbatim. Commonly `U32(0)` for success on
/// COM-style interfaces; this crate never interprets it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallValue {
    Void,
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(*mut c_void),
}

impl CallValue {
    pub fn as_u32(self) -> Option<u32> {
        match self {
            CallValue::U32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ptr(self) -> Option<*mut c_void> {
        match self {
            CallValue::Ptr(p) => Some(p),
            _ => None,
        }
    }
}

// Marshaled argument storage. Values live here, stable for the duration
// of the call, while the libffi arg vector holds references into it.
enum FfiSlot {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(*mut c_void),
}

/// A synthesized, directly invocable native-call routine.
///
/// Created once per distinct `(signature, dispatch)` pair, immutable
/// afterwards. Prefer [`get_or_synthesize`] which routes through the
/// process-wide cache.
pub struct Thunk {
    sig: Signature,
    dispatch: Dispatch,
    cif: Cif,
}

// The prepared CIF is immutable after synthesis and only read by
// ffi_call during invocations; sharing a Thunk across threads is sound.
unsafe impl Send for Thunk {}
unsafe impl Sync for Thunk {}

impl fmt::Debug for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thunk")
            .field("sig", &self.sig)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

impl Thunk {
    /// Build a thunk for `sig` dispatching via `dispatch`.
    ///
    /// All shape errors surface here; a `Thunk` that exists can only
    /// fail at call time in ways the native function itself signals.
    pub fn synthesize(
        sig: Signature,
        dispatch: Dispatch,
    ) -> Result<Self, ThunkError> {
        if matches!(dispatch, Dispatch::Slot(_)) && sig.handle_param().is_none()
        {
            return Err(ThunkError::MissingHandleParam);
        }

        let native = sig.native_param_types();
        let mut builder = Builder::new();
        for t in &native {
            builder = builder.arg(t.ffi_type());
        }
        builder = builder.res(sig.ret().ffi_type());
        // COM virtual dispatch is stdcall on 32-bit x86 Windows; the
        // default C convention is identical everywhere else.
        #[cfg(all(windows, target_arch = "x86"))]
        {
            builder = builder.abi(libffi::raw::ffi_abi_FFI_STDCALL);
        }
        let cif = builder.into_cif();

        log::debug!(
            "synthesized thunk: {} native params, ret {:?}, dispatch {:?}",
            native.len(),
            sig.ret(),
            dispatch
        );
        Ok(Self { sig, dispatch, cif })
    }

    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// Invoke the native target with `args`.
    ///
    /// Pins what the signature marks for pinning, resolves the vtable
    /// target (every call, never cached), pushes arguments in native ABI
    /// order and issues the indirect call. The native return value comes
    /// back verbatim; checking a status code is the caller's job.
    ///
    /// Argument arity or kind mismatches against the bound signature are
    /// caller bugs and reported as errors before anything native runs.
    ///
    /// # Safety
    ///
    /// The handle argument (for vtable dispatch) must be a live native
    /// object with a valid vtable containing the bound slot, the fixed
    /// address (if any) must be a function of exactly the bound native
    /// signature, and every `Ptr` argument must satisfy whatever the
    /// native function requires of it.
    pub unsafe fn call(
        &self,
        args: &mut [CallArg<'_>],
    ) -> Result<CallValue, ThunkError> {
        let params = self.sig.params();
        if args.len() != params.len() {
            return Err(ThunkError::ArityMismatch {
                expected: params.len(),
                got: args.len(),
            });
        }

        // Pinned locals live in this frame and drop when it returns;
        // their addresses never escape the call.
        let mut pin_guard: Option<PinGuard<'_>> = None;
        let mut out_cell: Option<OutCell<'_>> = None;
        let skip_pinned_arg = self.sig.pin_store_param().is_some();

        let mut storage: Vec<FfiSlot> = Vec::with_capacity(params.len());
        for (i, arg) in args.iter_mut().enumerate() {
            if Some(i) == self.sig.pinned_param() {
                let bytes = match arg {
                    CallArg::Pinned(b) => *b,
                    other => {
                        return Err(ThunkError::ArgumentMismatch {
                            index: i,
                            expected: "pinned buffer",
                            got: other.kind_name(),
                        });
                    }
                };
                let guard = PinGuard::bytes(bytes);
                let addr = guard.addr() as *mut c_void;
                pin_guard = Some(guard);
                if !skip_pinned_arg {
                    storage.push(FfiSlot::Ptr(addr));
                }
                continue;
            }
            if Some(i) == self.sig.out_handle_param() {
                let target = match arg {
                    CallArg::OutHandle(t) => &mut **t,
                    other => {
                        return Err(ThunkError::ArgumentMismatch {
                            index: i,
                            expected: "out handle",
                            got: other.kind_name(),
                        });
                    }
                };
                out_cell = Some(OutCell::new(target));
                let addr =
                    out_cell.as_ref().unwrap().addr() as *mut c_void;
                storage.push(FfiSlot::Ptr(addr));
                continue;
            }
            storage.push(marshal(i, &params[i], arg)?);
        }

        // CreateBuffer-style shapes: store the pinned address through the
        // designated pointer argument before the call goes out.
        if let (Some(store), Some(guard)) =
            (self.sig.pin_store_param(), &pin_guard)
        {
            if let FfiSlot::Ptr(p) = storage[store] {
                unsafe { *(p as *mut *const u8) = guard.addr() };
            }
        }

        let target = match self.dispatch {
            Dispatch::Address(addr) => addr as *mut c_void,
            Dispatch::Slot(slot) => {
                // Checked at synthesis time.
                let hidx = self.sig.handle_param().unwrap();
                let handle = match storage[hidx] {
                    FfiSlot::Ptr(p) => p,
                    _ => unreachable!("handle parameter is pointer-typed"),
                };
                unsafe { vtable::resolve(handle, slot) as *mut c_void }
            }
        };

        let mut ffi_args = Vec::with_capacity(storage.len());
        for slot in &storage {
            let arg = match slot {
                FfiSlot::I8(v) => Arg::new(v),
                FfiSlot::U8(v) => Arg::new(v),
                FfiSlot::I16(v) => Arg::new(v),
                FfiSlot::U16(v) => Arg::new(v),
                FfiSlot::I32(v) => Arg::new(v),
                FfiSlot::U32(v) => Arg::new(v),
                FfiSlot::I64(v) => Arg::new(v),
                FfiSlot::U64(v) => Arg::new(v),
                FfiSlot::F32(v) => Arg::new(v),
                FfiSlot::F64(v) => Arg::new(v),
                FfiSlot::Ptr(v) => Arg::new(v),
            };
            ffi_args.push(arg);
        }

        let code = CodePtr(target);
        let ret = match self.sig.ret() {
            CType::Void => {
                unsafe { self.cif.call::<()>(code, &ffi_args) };
                CallValue::Void
            }
            CType::I8 => {
                CallValue::I8(unsafe { self.cif.call::<i8>(code, &ffi_args) })
            }
            CType::U8 => {
                CallValue::U8(unsafe { self.cif.call::<u8>(code, &ffi_args) })
            }
            CType::I16 => CallValue::I16(unsafe {
                self.cif.call::<i16>(code, &ffi_args)
            }),
            CType::U16 => CallValue::U16(unsafe {
                self.cif.call::<u16>(code, &ffi_args)
            }),
            CType::I32 => CallValue::I32(unsafe {
                self.cif.call::<i32>(code, &ffi_args)
            }),
            CType::U32 => CallValue::U32(unsafe {
                self.cif.call::<u32>(code, &ffi_args)
            }),
            CType::I64 => CallValue::I64(unsafe {
                self.cif.call::<i64>(code, &ffi_args)
            }),
            CType::U64 => CallValue::U64(unsafe {
                self.cif.call::<u64>(code, &ffi_args)
            }),
            CType::F32 => CallValue::F32(unsafe {
                self.cif.call::<f32>(code, &ffi_args)
            }),
            CType::F64 => CallValue::F64(unsafe {
                self.cif.call::<f64>(code, &ffi_args)
            }),
            CType::Pointer => CallValue::Ptr(unsafe {
                self.cif.call::<usize>(code, &ffi_args)
            } as *mut c_void),
        };

        // ffi_args and storage drop here; pin_guard and out_cell after,
        // out_cell writing the received handle back to the caller's slot.
        Ok(ret)
    }
}

fn marshal(
    index: usize,
    spec: &ParamSpec,
    arg: &CallArg<'_>,
) -> Result<FfiSlot, ThunkError> {
    // By-reference parameters travel as the referent's address; the
    // declared element type only describes what the native side reads
    // through it.
    if spec.passing == Passing::ByNativePointer {
        return match arg {
            CallArg::Ptr(v) => Ok(FfiSlot::Ptr(*v)),
            other => Err(ThunkError::ArgumentMismatch {
                index,
                expected: "pointer",
                got: other.kind_name(),
            }),
        };
    }
    let slot = match (spec.ctype, arg) {
        (CType::I8, CallArg::I8(v)) => FfiSlot::I8(*v),
        (CType::U8, CallArg::U8(v)) => FfiSlot::U8(*v),
        (CType::I16, CallArg::I16(v)) => FfiSlot::I16(*v),
        (CType::U16, CallArg::U16(v)) => FfiSlot::U16(*v),
        (CType::I32, CallArg::I32(v)) => FfiSlot::I32(*v),
        (CType::U32, CallArg::U32(v)) => FfiSlot::U32(*v),
        (CType::I64, CallArg::I64(v)) => FfiSlot::I64(*v),
        (CType::U64, CallArg::U64(v)) => FfiSlot::U64(*v),
        (CType::F32, CallArg::F32(v)) => FfiSlot::F32(*v),
        (CType::F64, CallArg::F64(v)) => FfiSlot::F64(*v),
        (CType::Pointer, CallArg::Ptr(v)) => FfiSlot::Ptr(*v),
        (expected, got) => {
            return Err(ThunkError::ArgumentMismatch {
                index,
                expected: match expected {
                    CType::Void => "void",
                    CType::I8 => "i8",
                    CType::U8 => "u8",
                    CType::I16 => "i16",
                    CType::U16 => "u16",
                    CType::I32 => "i32",
                    CType::U32 => "u32",
                    CType::I64 => "i64",
                    CType::U64 => "u64",
                    CType::F32 => "f32",
                    CType::F64 => "f64",
                    CType::Pointer => "pointer",
                },
                got: got.kind_name(),
            });
        }
    };
    Ok(slot)
}

// ── Process-lifetime thunk cache ──────────────────────────────────────

type ThunkKey = (Signature, Dispatch);

static CACHE: OnceLock<RwLock<HashMap<ThunkKey, Arc<Thunk>>>> =
    OnceLock::new();

fn cache() -> &'static RwLock<HashMap<ThunkKey, Arc<Thunk>>> {
    CACHE.get_or_init(Default::default)
}

/// Fetch the cached thunk for `(sig, dispatch)`, synthesizing it on
/// first request.
///
/// Concurrent first use may synthesize twice; the thunks are
/// functionally identical, the publish is atomic and the loser is
/// dropped. A failed synthesis never populates the cache, so a later
/// request with a corrected shape starts clean.
pub fn get_or_synthesize(
    sig: &Signature,
    dispatch: Dispatch,
) -> Result<Arc<Thunk>, ThunkError> {
    let key = (sig.clone(), dispatch);
    if let Some(t) = cache().read().get(&key) {
        return Ok(Arc::clone(t));
    }
    let built = Arc::new(Thunk::synthesize(sig.clone(), dispatch)?);
    let mut table = cache().write();
    Ok(Arc::clone(table.entry(key).or_insert(built)))
}

#[cfg(test)]
fn cache_contains(sig: &Signature, dispatch: Dispatch) -> bool {
    cache().read().contains_key(&(sig.clone(), dispatch))
}
