//! Call-shape descriptors.
//!
//! A [`Signature`] records the caller-visible parameter list of a foreign
//! call together with the roles the thunk synthesizer needs: which
//! parameter is the dispatch handle, which one is pinned bulk data, which
//! one receives a freshly created native handle. All validation happens
//! here, at build time; a [`Signature`] that exists is well-formed and a
//! thunk built from it cannot fail for shape reasons at call time.

use crate::ctype::CType;
use crate::error::ThunkError;

/// How a caller-visible parameter is handed to the native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Passing {
    /// Passed as-is, in a register or stack slot per the ABI.
    ByValue,
    /// Caller supplies a pointer-sized value that the native side
    /// dereferences. Rewritten to `Pointer` on the native parameter list.
    ByNativePointer,
    /// Caller supplies a bulk buffer; the thunk pins it and passes the
    /// address of its first element. At most one per signature.
    PinFirstElement,
}

/// One caller-visible parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamSpec {
    pub ctype: CType,
    pub passing: Passing,
}

impl ParamSpec {
    pub const fn new(ctype: CType, passing: Passing) -> Self {
        Self { ctype, passing }
    }

    pub const fn by_value(ctype: CType) -> Self {
        Self::new(ctype, Passing::ByValue)
    }
}

/// Immutable call-shape descriptor. Built once per distinct shape via
/// [`SignatureBuilder`], then used as (part of) the thunk cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    params: Vec<ParamSpec>,
    ret: CType,
    handle_param: Option<usize>,
    pinned_param: Option<usize>,
    out_handle_param: Option<usize>,
    pin_store_param: Option<usize>,
}

impl Signature {
    pub fn builder() -> SignatureBuilder {
        SignatureBuilder::new()
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn ret(&self) -> CType {
        self.ret
    }

    pub fn handle_param(&self) -> Option<usize> {
        self.handle_param
    }

    pub fn pinned_param(&self) -> Option<usize> {
        self.pinned_param
    }

    pub fn out_handle_param(&self) -> Option<usize> {
        self.out_handle_param
    }

    pub fn pin_store_param(&self) -> Option<usize> {
        self.pin_store_param
    }

    /// The parameter types of the actual foreign call, in ABI order.
    ///
    /// `ByNativePointer` and pinned parameters become `Pointer`. When a
    /// pin-store target is set, the pinned parameter is dropped from the
    /// native list entirely: its address travels through the store target
    /// instead, written before the call is issued.
    pub fn native_param_types(&self) -> Vec<CType> {
        let mut types = Vec::with_capacity(self.params.len());
        for (i, p) in self.params.iter().enumerate() {
            if self.pin_store_param.is_some() && Some(i) == self.pinned_param {
                continue;
            }
            let ctype = match p.passing {
                Passing::ByValue => p.ctype,
                Passing::ByNativePointer | Passing::PinFirstElement => {
                    CType::Pointer
                }
            };
            types.push(ctype);
        }
        types
    }
}

/// Builder for [`Signature`]. All shape errors surface from [`build`],
/// never later.
///
/// [`build`]: SignatureBuilder::build
#[derive(Debug)]
pub struct SignatureBuilder {
    params: Vec<ParamSpec>,
    ret: CType,
    handle_param: Option<usize>,
    out_handle_param: Option<usize>,
    pin_store_param: Option<usize>,
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureBuilder {
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            ret: CType::I32,
            handle_param: None,
            out_handle_param: None,
            pin_store_param: None,
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn by_value(self, ctype: CType) -> Self {
        self.param(ParamSpec::by_value(ctype))
    }

    pub fn by_native_pointer(self, ctype: CType) -> Self {
        self.param(ParamSpec::new(ctype, Passing::ByNativePointer))
    }

    pub fn pinned(self) -> Self {
        self.param(ParamSpec::new(CType::Pointer, Passing::PinFirstElement))
    }

    pub fn returns(mut self, ctype: CType) -> Self {
        self.ret = ctype;
        self
    }

    /// Designate the dispatch ("this") parameter. Conventionally index 0.
    pub fn handle(mut self, index: usize) -> Self {
        self.handle_param = Some(index);
        self
    }

    /// Designate the parameter that receives a freshly created native
    /// handle. If never called, the last `ByNativePointer` parameter of
    /// pointer type is detected automatically, matching the out-handle
    /// convention of creation-style interface methods.
    pub fn out_handle(mut self, index: usize) -> Self {
        self.out_handle_param = Some(index);
        self
    }

    /// Designate a pointer parameter through which the pinned buffer's
    /// address is stored before the call is issued. Requires the pinned
    /// parameter to be the last parameter; the pinned parameter is then
    /// excluded from the native argument list.
    pub fn pin_store(mut self, index: usize) -> Self {
        self.pin_store_param = Some(index);
        self
    }

    pub fn build(self) -> Result<Signature, ThunkError> {
        let arity = self.params.len();

        let mut pinned_param = None;
        for (i, p) in self.params.iter().enumerate() {
            if p.ctype == CType::Void {
                return Err(ThunkError::VoidParam { index: i });
            }
            if p.passing == Passing::PinFirstElement {
                if let Some(existing) = pinned_param {
                    return Err(ThunkError::ConflictingPin {
                        index: i,
                        existing,
                    });
                }
                pinned_param = Some(i);
            }
        }

        let check_index = |index: Option<usize>| -> Result<(), ThunkError> {
            match index {
                Some(i) if i >= arity => {
                    Err(ThunkError::BadParamIndex { index: i, arity })
                }
                _ => Ok(()),
            }
        };
        check_index(self.handle_param)?;
        check_index(self.out_handle_param)?;
        check_index(self.pin_store_param)?;

        let check_pointer =
            |index: Option<usize>, role: &'static str| -> Result<(), ThunkError> {
                if let Some(i) = index {
                    let got = self.params[i].ctype;
                    if got != CType::Pointer {
                        return Err(ThunkError::NotPointerTyped {
                            role,
                            index: i,
                            got,
                        });
                    }
                }
                Ok(())
            };
        check_pointer(self.handle_param, "handle")?;
        check_pointer(self.out_handle_param, "out-handle")?;
        check_pointer(self.pin_store_param, "pin-store")?;

        // Each designated role must sit on its own parameter; one index
        // serving two roles would corrupt the call layout.
        let roles = [
            ("handle", self.handle_param),
            ("out-handle", self.out_handle_param),
            ("pin-store", self.pin_store_param),
            ("pinned", pinned_param),
        ];
        for (n, &(a, a_idx)) in roles.iter().enumerate() {
            for &(b, b_idx) in &roles[n + 1..] {
                if let (Some(i), Some(j)) = (a_idx, b_idx) {
                    if i == j {
                        return Err(ThunkError::RoleConflict {
                            a,
                            b,
                            index: i,
                        });
                    }
                }
            }
        }

        if let Some(store) = self.pin_store_param {
            let pinned = match pinned_param {
                Some(p) => p,
                // A store target without anything pinned is a shape error;
                // report it against the store index.
                None => {
                    return Err(ThunkError::BadParamIndex {
                        index: store,
                        arity,
                    });
                }
            };
            if pinned != arity - 1 {
                return Err(ThunkError::PinnedNotLast { index: pinned });
            }
        }

        // Auto-detect a trailing out-handle receiver: the last pointer
        // parameter passed by native pointer, unless the requester named
        // one explicitly. Parameters already serving the handle or
        // pin-store role are not candidates.
        let out_handle_param = self.out_handle_param.or_else(|| {
            self.params.iter().enumerate().rev().find_map(|(i, p)| {
                (p.passing == Passing::ByNativePointer
                    && p.ctype == CType::Pointer
                    && Some(i) != self.handle_param
                    && Some(i) != self.pin_store_param)
                    .then_some(i)
            })
        });

        Ok(Signature {
            params: self.params,
            ret: self.ret,
            handle_param: self.handle_param,
            pinned_param,
            out_handle_param,
            pin_store_param: self.pin_store_param,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn com_method() -> SignatureBuilder {
        Signature::builder()
            .by_value(CType::Pointer)
            .handle(0)
            .returns(CType::U32)
    }

    #[test]
    fn native_types_rewrite_references() {
        let sig = com_method()
            .by_value(CType::U32)
            .by_native_pointer(CType::U64)
            .build()
            .unwrap();
        assert_eq!(
            sig.native_param_types(),
            vec![CType::Pointer, CType::U32, CType::Pointer]
        );
    }

    #[test]
    fn conflicting_pins_rejected() {
        let err = com_method().pinned().pinned().build().unwrap_err();
        assert_eq!(
            err,
            ThunkError::ConflictingPin {
                index: 2,
                existing: 1
            }
        );
    }

    #[test]
    fn void_parameter_rejected() {
        let err = com_method().by_value(CType::Void).build().unwrap_err();
        assert_eq!(err, ThunkError::VoidParam { index: 1 });
    }

    #[test]
    fn handle_index_out_of_range() {
        let err = Signature::builder()
            .by_value(CType::Pointer)
            .handle(3)
            .build()
            .unwrap_err();
        assert_eq!(err, ThunkError::BadParamIndex { index: 3, arity: 1 });
    }

    #[test]
    fn handle_must_be_pointer() {
        let err = Signature::builder()
            .by_value(CType::U32)
            .handle(0)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ThunkError::NotPointerTyped {
                role: "handle",
                index: 0,
                got: CType::U32
            }
        );
    }

    #[test]
    fn trailing_out_handle_detected() {
        let sig = com_method()
            .by_value(CType::U32)
            .by_native_pointer(CType::Pointer)
            .build()
            .unwrap();
        assert_eq!(sig.out_handle_param(), Some(2));
    }

    #[test]
    fn role_on_pinned_parameter_rejected() {
        let err = com_method()
            .pinned()
            .pin_store(1)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ThunkError::RoleConflict {
                a: "pin-store",
                b: "pinned",
                index: 1
            }
        );
    }

    #[test]
    fn overlapping_roles_rejected() {
        let err = Signature::builder()
            .by_native_pointer(CType::Pointer)
            .handle(0)
            .out_handle(0)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ThunkError::RoleConflict {
                a: "handle",
                b: "out-handle",
                index: 0
            }
        );
    }

    #[test]
    fn auto_detection_never_lands_on_the_handle() {
        // A lone by-ref pointer parameter that is also the dispatch
        // handle must not become the out-handle receiver.
        let sig = Signature::builder()
            .by_native_pointer(CType::Pointer)
            .handle(0)
            .build()
            .unwrap();
        assert_eq!(sig.out_handle_param(), None);
    }

    #[test]
    fn auto_detection_skips_the_pin_store_target() {
        let sig = com_method()
            .by_native_pointer(CType::Pointer)
            .pinned()
            .pin_store(1)
            .build()
            .unwrap();
        assert_eq!(sig.out_handle_param(), None);
    }

    #[test]
    fn pin_store_requires_trailing_pinned() {
        let err = com_method()
            .pinned()
            .by_value(CType::U32)
            .pin_store(0)
            .build()
            .unwrap_err();
        assert_eq!(err, ThunkError::PinnedNotLast { index: 1 });
    }

    #[test]
    fn pin_store_drops_pinned_from_native_list() {
        let sig = com_method()
            .by_value(CType::Pointer)
            .pinned()
            .pin_store(1)
            .build()
            .unwrap();
        assert_eq!(
            sig.native_param_types(),
            vec![CType::Pointer, CType::Pointer]
        );
    }
}
