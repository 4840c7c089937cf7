use std::mem;

use libffi::middle::Type;

/// Native machine types a thunk parameter or return value can carry.
///
/// `Void` is only meaningful as a return type; signature validation
/// rejects it in parameter position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CType {
    Void,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
}

impl CType {
    /// Size of the type in bytes. `Void` has size 0.
    pub fn size(self) -> usize {
        match self {
            CType::Void => 0,
            CType::I8 | CType::U8 => 1,
            CType::I16 | CType::U16 => 2,
            CType::I32 | CType::U32 | CType::F32 => 4,
            CType::I64 | CType::U64 | CType::F64 => 8,
            CType::Pointer => mem::size_of::<*const ()>(),
        }
    }

    /// The libffi type descriptor used when preparing the call interface.
    pub(crate) fn ffi_type(self) -> Type {
        match self {
            CType::Void => Type::void(),
            CType::I8 => Type::i8(),
            CType::U8 => Type::u8(),
            CType::I16 => Type::i16(),
            CType::U16 => Type::u16(),
            CType::I32 => Type::i32(),
            CType::U32 => Type::u32(),
            CType::I64 => Type::i64(),
            CType::U64 => Type::u64(),
            CType::F32 => Type::f32(),
            CType::F64 => Type::f64(),
            CType::Pointer => Type::pointer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(CType::Void.size(), 0);
        assert_eq!(CType::I8.size(), 1);
        assert_eq!(CType::U16.size(), 2);
        assert_eq!(CType::F32.size(), 4);
        assert_eq!(CType::U64.size(), 8);
        assert_eq!(CType::Pointer.size(), mem::size_of::<usize>());
    }
}
