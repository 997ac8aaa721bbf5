//! The cast lattice (`spec.md` §4.2): decides, for an ordered pair of
//! types, whether a cast is allowed in-place, implicitly, or explicitly,
//! and computes the meet of two types.

use crate::types::{Kind, Primitive, Type, TypeRegistry};

/// Returns `true` iff no bytes change between `from` and `to` — the same
/// storage can be reinterpreted as the other type.
pub fn can_cast_in_place(registry: &TypeRegistry, from: Type, to: Type) -> bool {
    if from == to {
        return true;
    }
    match (from.kind(), to.kind()) {
        // `BufferPointer(T) -> Pointer(T)`: same representation.
        (Kind::BufferPointer, Kind::Pointer) => {
            registry.decompose_buffer_pointer(from) == registry.decompose_pointer(to)
        }
        // `Slice(U8) <-> Slice(Byte)`: different element type tags, same
        // representation (pointer + length pair either way).
        (Kind::Slice, Kind::Slice) => {
            let a = registry.decompose_slice(from);
            let b = registry.decompose_slice(to);
            is_u8_byte_pair(a, b)
        }
        _ => false,
    }
}

fn is_u8_byte_pair(a: Type, b: Type) -> bool {
    matches!(
        (a.as_primitive(), b.as_primitive()),
        (Some(Primitive::U8), Some(Primitive::Byte)) | (Some(Primitive::Byte), Some(Primitive::U8))
    )
}

/// Returns `true` iff the compiler may insert this cast silently.
/// Includes every in-place cast (cast lattice containment, `spec.md` §8
/// property 2) plus arithmetic widenings and the other implicit
/// conversions enumerated in `spec.md` §4.2's table.
pub fn can_cast_implicitly(registry: &TypeRegistry, from: Type, to: Type) -> bool {
    if can_cast_in_place(registry, from, to) {
        return true;
    }
    if from == to {
        return true;
    }

    // `NullPtr -> Pointer(T)` / `BufferPointer(T)`.
    if from.as_primitive() == Some(Primitive::NullPtr)
        && matches!(to.kind(), Kind::Pointer | Kind::BufferPointer)
    {
        return true;
    }

    // `Integer -> any numeric type` (including `Integer` itself, handled
    // above via `from == to`).
    if from.as_primitive() == Some(Primitive::Integer) {
        if let Some(p) = to.as_primitive() {
            return p.is_numeric();
        }
    }

    // `Type_ -> Interface`.
    if from.as_primitive() == Some(Primitive::Type_) && to.as_primitive() == Some(Primitive::Interface) {
        return true;
    }

    // `Array(n, T) -> Slice(T')` when `T -> T'` is in-place, plus always to
    // `Slice(Byte)`.
    if from.kind() == Kind::Array && to.kind() == Kind::Slice {
        let array = registry.decompose_array(from);
        let slice_elem = registry.decompose_slice(to);
        if can_cast_in_place(registry, array.element, slice_elem) {
            return true;
        }
        if slice_elem.as_primitive() == Some(Primitive::Byte) {
            return true;
        }
        return false;
    }

    // Arithmetic widenings between fixed-width numeric primitives.
    if let (Some(a), Some(b)) = (from.as_primitive(), to.as_primitive()) {
        return widens(a, b);
    }

    false
}

/// `true` iff `from -> to` is a non-narrowing, signedness-preserving
/// widening, per `spec.md` §4.2's arithmetic table:
/// "integer W_a, float F_b -> integer W_b: only if a <= b and signedness
/// preserved"; "integer, float -> float: widens only"; "float -> integer:
/// no".
fn widens(from: Primitive, to: Primitive) -> bool {
    if from == to {
        return true;
    }
    if to.is_float() {
        // int/float -> float: widening only, and only from a numeric source
        // (`Char`/`Bool` have a bit width but are not numeric).
        if !from.is_numeric() {
            return false;
        }
        return match (from.bit_width(), to.bit_width()) {
            (Some(a), Some(b)) => a <= b && !(from.is_integer() && !to.is_float()),
            _ => false,
        };
    }
    if to.is_integer() {
        if from.is_float() {
            // float -> integer is never implicit or in-place.
            return false;
        }
        if from == Primitive::Char || to == Primitive::Char {
            return false;
        }
        if from.is_signed_integer() != to.is_signed_integer() {
            return false;
        }
        return matches!((from.bit_width(), to.bit_width()), (Some(a), Some(b)) if a <= b);
    }
    false
}

/// Returns `true` iff this cast requires a source-level `as` operator.
/// Includes every implicit cast (containment, `spec.md` §8 property 2)
/// plus narrowing/truncating numeric conversions, enum/flags <-> integer,
/// and pointer-to-pointer casts where element widths permit.
pub fn can_cast_explicitly(registry: &TypeRegistry, from: Type, to: Type) -> bool {
    if can_cast_implicitly(registry, from, to) {
        return true;
    }

    if let (Some(a), Some(b)) = (from.as_primitive(), to.as_primitive()) {
        // Narrowing/truncating numeric conversions, both directions,
        // excluding `Char` (explicitly disallowed either direction per
        // `spec.md` §4.2's table) and excluding float<->float (already
        // covered by implicit widening above; narrowing float->float is
        // still a valid explicit numeric conversion).
        if a == Primitive::Char || b == Primitive::Char {
            return false;
        }
        // `float -> integer` is never a legal cast at any level, per
        // `spec.md` §4.2's table row `float | integer | no | no | no`.
        if a.is_float() && b.is_integer() {
            return false;
        }
        if a.is_numeric() && b.is_numeric() {
            return true;
        }
    }

    // `Ptr(T) <-> Ptr(Byte)`.
    if from.kind() == Kind::Pointer && to.kind() == Kind::Pointer {
        let a = registry.decompose_pointer(from);
        let b = registry.decompose_pointer(to);
        if a.as_primitive() == Some(Primitive::Byte) || b.as_primitive() == Some(Primitive::Byte) {
            return true;
        }
    }

    // Any pointer-to-pointer cast where element widths permit: allow
    // `Ptr(A) -> Ptr(B)` whenever `A` and `B` have the same known byte
    // size (a conservative reading of "element widths permit").
    if from.kind() == Kind::Pointer && to.kind() == Kind::Pointer {
        let a = registry.decompose_pointer(from);
        let b = registry.decompose_pointer(to);
        if let (Some(pa), Some(pb)) = (a.as_primitive(), b.as_primitive()) {
            if pa.bytes() == pb.bytes() {
                return true;
            }
        }
    }

    // `Array(n, T) -> Slice(T')` via explicit cast whenever the element
    // types merely have the same representation width (looser than the
    // implicit path above).
    if from.kind() == Kind::Array && to.kind() == Kind::Slice {
        return true;
    }

    // enum/flags <-> integer of the appropriate width: the underlying
    // representation of `Enum`/`Flags` is always a 64-bit value at the
    // interpreter level (`spec.md` §3), so any integer primitive is a
    // valid explicit target/source.
    if matches!(from.kind(), Kind::Enum | Kind::Flags) && to.as_primitive().map(|p| p.is_integer()).unwrap_or(false) {
        return true;
    }
    if matches!(to.kind(), Kind::Enum | Kind::Flags) && from.as_primitive().map(|p| p.is_integer()).unwrap_or(false) {
        return true;
    }

    false
}

/// Returns the most specific type that both `a` and `b` implicitly convert
/// to, or `None` if no such type exists (`spec.md` §4.2, §8 property 3).
pub fn meet(registry: &TypeRegistry, a: Type, b: Type) -> Option<Type> {
    if a == b {
        return Some(a);
    }
    let a_prim = a.as_primitive();
    let b_prim = b.as_primitive();
    match (a_prim, b_prim) {
        (Some(Primitive::Integer), Some(Primitive::Integer)) => Some(a),
        (Some(Primitive::Integer), Some(_)) if can_cast_implicitly(registry, a, b) => Some(b),
        (Some(_), Some(Primitive::Integer)) if can_cast_implicitly(registry, b, a) => Some(a),
        _ => {
            if can_cast_implicitly(registry, a, b) {
                Some(b)
            } else if can_cast_implicitly(registry, b, a) {
                Some(a)
            } else {
                None
            }
        }
    }
}

/// A defaulting operation mapping literal-carrying types to concrete
/// runtime types (`spec.md` §4.2): `Integer -> I64`,
/// `Array(n, Integer) -> Array(n, I64)`, `Ptr(Integer) -> Ptr(I64)`. Fails
/// (`None`) for `NullPtr`, `EmptyArray`, and a `Ptr(Integer)` Icarus cannot
/// pick a default for (here: never, since `Ptr(Integer) -> Ptr(I64)` always
/// has a default per the spec's own example).
pub fn infer(registry: &mut TypeRegistry, t: Type) -> Option<Type> {
    match t.as_primitive() {
        Some(Primitive::Integer) => Some(Type::from_primitive(Primitive::I64)),
        Some(Primitive::NullPtr) | Some(Primitive::EmptyArray) => None,
        _ => match t.kind() {
            Kind::Array => {
                let key = registry.decompose_array(t);
                let inferred_elem = infer(registry, key.element)?;
                Some(registry.intern_array(key.length, inferred_elem))
            }
            Kind::Pointer => {
                let pointee = registry.decompose_pointer(t);
                let inferred_pointee = infer(registry, pointee)?;
                Some(registry.intern_pointer(inferred_pointee))
            }
            _ => Some(t),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bufptr_to_ptr_in_place_but_not_reverse() {
        let mut reg = TypeRegistry::new();
        let u8_ty = Type::from_primitive(Primitive::U8);
        let bufptr = reg.intern_buffer_pointer(u8_ty);
        let ptr = reg.intern_pointer(u8_ty);
        assert!(can_cast_in_place(&reg, bufptr, ptr));
        assert!(!can_cast_in_place(&reg, ptr, bufptr));
    }

    #[test]
    fn slice_u8_byte_in_place() {
        let mut reg = TypeRegistry::new();
        let u8_ty = Type::from_primitive(Primitive::U8);
        let byte_ty = Type::from_primitive(Primitive::Byte);
        let slice_u8 = reg.intern_slice(u8_ty);
        let slice_byte = reg.intern_slice(byte_ty);
        assert!(can_cast_in_place(&reg, slice_u8, slice_byte));
    }

    #[test]
    fn f64_to_i64_never_castable() {
        let reg = TypeRegistry::new();
        let f64_ty = Type::from_primitive(Primitive::F64);
        let i64_ty = Type::from_primitive(Primitive::I64);
        assert!(!can_cast_in_place(&reg, f64_ty, i64_ty));
        assert!(!can_cast_implicitly(&reg, f64_ty, i64_ty));
        assert!(!can_cast_explicitly(&reg, f64_ty, i64_ty));
    }

    #[test]
    fn char_and_bool_never_widen_to_float() {
        let reg = TypeRegistry::new();
        let char_ty = Type::from_primitive(Primitive::Char);
        let bool_ty = Type::from_primitive(Primitive::Bool);
        let f32_ty = Type::from_primitive(Primitive::F32);
        let f64_ty = Type::from_primitive(Primitive::F64);
        assert!(!can_cast_implicitly(&reg, char_ty, f64_ty));
        assert!(!can_cast_implicitly(&reg, bool_ty, f32_ty));
    }

    #[test]
    fn array_to_slice_implicit() {
        let mut reg = TypeRegistry::new();
        let u64_ty = Type::from_primitive(Primitive::U64);
        let array = reg.intern_array(3, u64_ty);
        let slice = reg.intern_slice(u64_ty);
        assert!(can_cast_implicitly(&reg, array, slice));
    }

    #[test]
    fn integer_to_f64_implicit() {
        let reg = TypeRegistry::new();
        let integer_ty = Type::from_primitive(Primitive::Integer);
        let f64_ty = Type::from_primitive(Primitive::F64);
        assert!(can_cast_implicitly(&reg, integer_ty, f64_ty));
    }

    #[test]
    fn meet_integer_and_i8() {
        let reg = TypeRegistry::new();
        let integer_ty = Type::from_primitive(Primitive::Integer);
        let i8_ty = Type::from_primitive(Primitive::I8);
        assert_eq!(meet(&reg, integer_ty, i8_ty), Some(i8_ty));
        assert_eq!(meet(&reg, integer_ty, integer_ty), Some(integer_ty));
    }

    #[test]
    fn meet_is_implicitly_reachable_from_both_sides() {
        let reg = TypeRegistry::new();
        let i32_ty = Type::from_primitive(Primitive::I32);
        let i64_ty = Type::from_primitive(Primitive::I64);
        let m = meet(&reg, i32_ty, i64_ty).unwrap();
        assert!(can_cast_implicitly(&reg, i32_ty, m));
        assert!(can_cast_implicitly(&reg, i64_ty, m));
    }

    #[test]
    fn inference_array_of_integer() {
        let mut reg = TypeRegistry::new();
        let integer_ty = Type::from_primitive(Primitive::Integer);
        let array = reg.intern_array(5, integer_ty);
        let inferred = infer(&mut reg, array).unwrap();
        let key = reg.decompose_array(inferred);
        assert_eq!(key.length, 5);
        assert_eq!(key.element, Type::from_primitive(Primitive::I64));
    }

    #[test]
    fn inference_nullptr_fails() {
        let mut reg = TypeRegistry::new();
        let nullptr_ty = Type::from_primitive(Primitive::NullPtr);
        assert_eq!(infer(&mut reg, nullptr_ty), None);
    }

    #[test]
    fn containment_in_place_implies_implicit_implies_explicit() {
        let mut reg = TypeRegistry::new();
        let u8_ty = Type::from_primitive(Primitive::U8);
        let bufptr = reg.intern_buffer_pointer(u8_ty);
        let ptr = reg.intern_pointer(u8_ty);
        assert!(can_cast_in_place(&reg, bufptr, ptr));
        assert!(can_cast_implicitly(&reg, bufptr, ptr));
        assert!(can_cast_explicitly(&reg, bufptr, ptr));
    }
}
