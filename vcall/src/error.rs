use thiserror::Error;

use crate::ctype::CType;

/// Errors raised by signature validation and thunk synthesis, plus
/// caller contract violations detected when an already-built thunk is
/// invoked with arguments that do not match its bound signature.
///
/// Native status codes are never represented here: whatever the foreign
/// function returns comes back verbatim as the call's result value, and
/// interpreting it is the caller's job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThunkError {
    #[error("parameter {index} requests pinning but parameter {existing} is already pinned")]
    ConflictingPin { index: usize, existing: usize },

    #[error("parameter index {index} out of range for {arity} parameters")]
    BadParamIndex { index: usize, arity: usize },

    #[error("{role} parameter {index} must be pointer-typed, got {got:?}")]
    NotPointerTyped {
        role: &'static str,
        index: usize,
        got: CType,
    },

    #[error("void is only valid as a return type (parameter {index})")]
    VoidParam { index: usize },

    #[error("pinned parameter {index} must be the last parameter when a store target is set")]
    PinnedNotLast { index: usize },

    #[error("parameter {index} is designated as both {a} and {b}")]
    RoleConflict {
        a: &'static str,
        b: &'static str,
        index: usize,
    },

    #[error("vtable dispatch requires a designated handle parameter")]
    MissingHandleParam,

    #[error("unsupported element size {size}")]
    UnsupportedElementSize { size: usize },

    #[error("thunk expects {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("argument {index}: expected {expected}, got {got}")]
    ArgumentMismatch {
        index: usize,
        expected: &'static str,
        got: &'static str,
    },

    #[error("copy of {byte_count} bytes at offset {offset} exceeds source length {len}")]
    CopyOutOfBounds {
        offset: usize,
        byte_count: usize,
        len: usize,
    },
}
