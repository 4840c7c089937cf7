//! Runtime thunk generation for COM-style vtable dispatch.
//!
//! Given a call-shape description ([`Signature`]) and a slot index in a
//! native interface's virtual dispatch table, this crate synthesizes at
//! run time a cached, directly invocable routine ([`Thunk`]) that
//! performs the foreign call with the platform's interface calling
//! convention, correct argument layout, and zero-copy handling of bulk
//! data: buffers marked for pinning are handed to the native side as a
//! stable first-element address instead of being marshaled through an
//! intermediate copy.
//!
//! The pieces, leaves first:
//! - [`ctype`]: the native machine types a parameter or return can carry.
//! - [`signature`]: call-shape descriptors with build-time validation;
//!   by-reference parameters are rewritten to native pointers, one
//!   parameter may be designated as pinned bulk data, and a trailing
//!   out-pointer receiving a freshly created handle is tracked so the
//!   thunk can pin it as a local.
//! - [`vtable`]: two-load dispatch resolution, re-executed every call.
//! - [`pin`]: call-scoped pin guards; no pinned address outlives the
//!   call frame that established it.
//! - [`thunk`]: synthesis, invocation, and the process-lifetime cache
//!   keyed by `(signature, dispatch)`.
//! - [`copy`]: the dispatch-free specialization moving raw byte ranges
//!   between pinned caller buffers and natively mapped memory.
//!
//! Generation happens once per distinct shape and fails fast on
//! malformed descriptors; invocation is a plain synchronous foreign
//! call whose status code comes back verbatim for the caller to check.

pub mod copy;
pub mod ctype;
pub mod error;
pub mod pin;
pub mod signature;
pub mod thunk;
pub mod vtable;

pub use ctype::CType;
pub use error::ThunkError;
pub use pin::{OutCell, PinGuard, PinGuardMut};
pub use signature::{ParamSpec, Passing, Signature, SignatureBuilder};
pub use thunk::{CallArg, CallValue, Dispatch, Thunk, get_or_synthesize};
