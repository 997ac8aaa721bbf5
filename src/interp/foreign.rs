//! Foreign call signature table and thunks (`spec.md` §4.5, §6).
//!
//! A foreign function is looked up once per `(name, signature)` pair; the
//! resolved `libloading::Symbol` is cached in a flyweight map and replayed
//! on every subsequent call, matching `spec.md` §5's "Foreign symbol cache:
//! write-once per `(name, signature)` entry".

use hashbrown::HashMap;

use crate::error::EvaluationFailure;
use crate::interp::value::RuntimeValue;
use crate::types::{Kind, Primitive, Type};

/// One of the pre-enumerated foreign call shapes from `spec.md` §6. Each
/// variant names its host-ABI argument/return types directly rather than
/// going through a generic `libffi`-style call interface — the set is
/// closed, so an exhaustive match is simpler and cannot silently accept an
/// unsupported shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signature {
    NullaryI64,
    I64ToI64,
    I64ToUnit,
    F64ToF64,
    F32ToF32,
    U8ToI64,
    PtrToI64,
    PtrPtrToPtr,
    I64PtrToI64,
    I64ToPtr,
    U64ToPtr,
    PtrToUnit,
}

impl Signature {
    /// Matches the argument shape and declared return type actually being
    /// called against one of the closed set of supported signatures.
    /// Returns `None` (to be turned into `ForeignSignatureUnsupported`) for
    /// anything else, per §6's "Any other signature raises
    /// ForeignSignatureUnsupported".
    ///
    /// `return_ty` must be the callee's declared return type, not merely
    /// "does it have an output register": `(I64) -> I64` and `(I64) ->
    /// Ptr` share an argument shape and both produce a value, so the
    /// pointer-vs-integer distinction can only come from the return type
    /// itself.
    pub fn classify(args: &[RuntimeValue], return_ty: Type) -> Option<Signature> {
        use RuntimeValue::*;
        let returns_ptr = matches!(return_ty.kind(), Kind::Pointer | Kind::BufferPointer);
        let returns_unit = return_ty.as_primitive() == Some(Primitive::Unit);
        match (args, returns_ptr, returns_unit) {
            ([], false, false) => Some(Signature::NullaryI64),
            ([I64(_)], true, false) => Some(Signature::I64ToPtr),
            ([I64(_)], false, false) => Some(Signature::I64ToI64),
            ([I64(_)], false, true) => Some(Signature::I64ToUnit),
            ([F64(_)], false, false) => Some(Signature::F64ToF64),
            ([F32(_)], false, false) => Some(Signature::F32ToF32),
            ([U8(_)], false, false) => Some(Signature::U8ToI64),
            ([Address(_)], false, false) => Some(Signature::PtrToI64),
            ([Address(_), Address(_)], true, false) => Some(Signature::PtrPtrToPtr),
            ([I64(_), Address(_)], false, false) => Some(Signature::I64PtrToI64),
            ([U64(_)], true, false) => Some(Signature::U64ToPtr),
            ([Address(_)], false, true) => Some(Signature::PtrToUnit),
            _ => None,
        }
    }
}

/// A resolved foreign symbol, cached by `(name, Signature)`.
struct CachedSymbol {
    library: libloading::Library,
}

/// The write-once foreign-symbol cache plumbed into the [`crate::interp::Interpreter`].
#[derive(Default)]
pub struct ForeignCache {
    resolved: HashMap<(String, Signature), CachedSymbol>,
}

impl ForeignCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `name` against the process's own symbol table (the host
    /// dynamic linker, per `spec.md` §4.5) and invokes it with `args`,
    /// marshaled into the host ABI per `signature`. On first resolution for
    /// a given `(name, signature)` the symbol handle is cached; subsequent
    /// calls reuse it.
    ///
    /// # Safety contract
    ///
    /// This calls into arbitrary host code through a raw function pointer
    /// obtained via `dlsym`-equivalent lookup. The caller (the
    /// interpreter) is trusted to have validated `signature` via
    /// [`Signature::classify`] before reaching here; mismatching the
    /// actual C signature of `name` is undefined behavior, identical to
    /// any other raw FFI call.
    pub fn call(
        &mut self,
        name: &str,
        signature: Signature,
        args: &[RuntimeValue],
    ) -> Result<RuntimeValue, EvaluationFailure> {
        let key = (name.to_string(), signature);
        if !self.resolved.contains_key(&key) {
            // SAFETY: `Library::this()` opens a handle to the running
            // process image itself, used only to resolve symbols already
            // linked into the host binary (e.g. libc's `strlen`).
            let library = unsafe { libloading::Library::this() };
            self.resolved.insert(key.clone(), CachedSymbol { library });
        }
        let entry = &self.resolved[&key];
        // SAFETY: see the `call` doc comment: signature correctness is the
        // caller's contract, not something this function can check.
        unsafe { invoke(&entry.library, name, signature, args) }
    }
}

unsafe fn invoke(
    library: &libloading::Library,
    name: &str,
    signature: Signature,
    args: &[RuntimeValue],
) -> Result<RuntimeValue, EvaluationFailure> {
    use RuntimeValue::*;
    macro_rules! sym {
        ($ty:ty) => {
            library
                .get::<$ty>(name.as_bytes())
                .map_err(|_| EvaluationFailure::ForeignSignatureUnsupported)?
        };
    }
    match (signature, args) {
        (Signature::NullaryI64, []) => {
            let f = sym!(unsafe extern "C" fn() -> i64);
            Ok(I64(f()))
        }
        (Signature::I64ToI64, [I64(a)]) => {
            let f = sym!(unsafe extern "C" fn(i64) -> i64);
            Ok(I64(f(*a)))
        }
        (Signature::I64ToUnit, [I64(a)]) => {
            let f = sym!(unsafe extern "C" fn(i64));
            f(*a);
            Ok(Unit)
        }
        (Signature::F64ToF64, [F64(a)]) => {
            let f = sym!(unsafe extern "C" fn(f64) -> f64);
            Ok(F64(f(*a)))
        }
        (Signature::F32ToF32, [F32(a)]) => {
            let f = sym!(unsafe extern "C" fn(f32) -> f32);
            Ok(F32(f(*a)))
        }
        (Signature::U8ToI64, [U8(a)]) => {
            let f = sym!(unsafe extern "C" fn(u8) -> i64);
            Ok(I64(f(*a)))
        }
        (Signature::PtrToI64, [Address(a)]) => {
            let f = sym!(unsafe extern "C" fn(*const u8) -> i64);
            Ok(I64(f(a.offset as *const u8)))
        }
        (Signature::PtrPtrToPtr, [Address(a), Address(b)]) => {
            let f = sym!(unsafe extern "C" fn(*const u8, *const u8) -> *const u8);
            let result = f(a.offset as *const u8, b.offset as *const u8);
            Ok(Address(crate::ir::Address::heap(result as u64)))
        }
        (Signature::I64PtrToI64, [I64(a), Address(b)]) => {
            let f = sym!(unsafe extern "C" fn(i64, *const u8) -> i64);
            Ok(I64(f(*a, b.offset as *const u8)))
        }
        (Signature::I64ToPtr, [I64(a)]) => {
            let f = sym!(unsafe extern "C" fn(i64) -> *const u8);
            Ok(Address(crate::ir::Address::heap(f(*a) as u64)))
        }
        (Signature::U64ToPtr, [U64(a)]) => {
            let f = sym!(unsafe extern "C" fn(u64) -> *const u8);
            Ok(Address(crate::ir::Address::heap(f(*a) as u64)))
        }
        (Signature::PtrToUnit, [Address(a)]) => {
            let f = sym!(unsafe extern "C" fn(*const u8));
            f(a.offset as *const u8);
            Ok(Unit)
        }
        _ => Err(EvaluationFailure::ForeignSignatureUnsupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_enumerated_shapes() {
        let i64_ty = Type::from_primitive(Primitive::I64);
        assert_eq!(Signature::classify(&[], i64_ty), Some(Signature::NullaryI64));
        assert_eq!(
            Signature::classify(&[RuntimeValue::I64(1)], i64_ty),
            Some(Signature::I64ToI64)
        );
        assert_eq!(
            Signature::classify(&[RuntimeValue::Bool(true)], i64_ty),
            None,
            "unsupported shapes must not classify"
        );
    }

    #[test]
    fn classify_distinguishes_pointer_from_integer_return() {
        let i64_ty = Type::from_primitive(Primitive::I64);
        let mut registry = crate::types::TypeRegistry::new();
        let ptr_ty = registry.intern_pointer(i64_ty);
        assert_eq!(
            Signature::classify(&[RuntimeValue::I64(4)], i64_ty),
            Some(Signature::I64ToI64),
            "(I64) -> I64 must not be confused with (I64) -> Ptr"
        );
        assert_eq!(
            Signature::classify(&[RuntimeValue::I64(4)], ptr_ty),
            Some(Signature::I64ToPtr)
        );
    }
}
