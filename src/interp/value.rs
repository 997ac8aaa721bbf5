//! [`RuntimeValue`]: the register-slot payload the interpreter moves
//! between instructions, modeled after `cranelift-codegen`'s `DataValue`
//! (`data_value.rs`) — a tagged union over the host numeric types plus the
//! core's own `Type`, `Address`, and `Unit` kinds.

use std::fmt;

use crate::ir::{Address, FunctionRef};
use crate::types::Type;

/// A value living in one interpreter register slot, or (for "big" types,
/// per `TypeRegistry::is_big`) spread across several contiguous slots'
/// worth of bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeValue {
    Bool(bool),
    Char(char),
    Byte(u8),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Type(Type),
    FunctionRef(FunctionRef),
    Address(Address),
    Unit,
}

/// Builds the four numeric-kind dispatch helpers (`add`, `sub`, ...) over
/// every arithmetic `RuntimeValue` variant from one macro invocation,
/// mirroring `data_value.rs`'s `build_conversion_impl!` pattern: one body,
/// instantiated per host type, rather than hand duplicated per type.
macro_rules! arith_dispatch {
    ($name:ident, $checked:ident, $wrapping:ident) => {
        /// Applies the named arithmetic operator to two `RuntimeValue`s of
        /// matching numeric variant. Signed overflow traps (returns
        /// `None`); unsigned overflow wraps, per `spec.md` §4.3.
        pub fn $name(self, rhs: RuntimeValue) -> Option<RuntimeValue> {
            use RuntimeValue::*;
            match (self, rhs) {
                (I8(a), I8(b)) => a.$checked(b).map(I8),
                (I16(a), I16(b)) => a.$checked(b).map(I16),
                (I32(a), I32(b)) => a.$checked(b).map(I32),
                (I64(a), I64(b)) => a.$checked(b).map(I64),
                (U8(a), U8(b)) => Some(U8(a.$wrapping(b))),
                (U16(a), U16(b)) => Some(U16(a.$wrapping(b))),
                (U32(a), U32(b)) => Some(U32(a.$wrapping(b))),
                (U64(a), U64(b)) => Some(U64(a.$wrapping(b))),
                (Byte(a), Byte(b)) => Some(Byte(a.$wrapping(b))),
                (F32(a), F32(b)) => Some(F32(arith_float!($name, a, b))),
                (F64(a), F64(b)) => Some(F64(arith_float!($name, a, b))),
                _ => None,
            }
        }
    };
}

macro_rules! arith_float {
    (add, $a:expr, $b:expr) => {
        $a + $b
    };
    (sub, $a:expr, $b:expr) => {
        $a - $b
    };
    (mul, $a:expr, $b:expr) => {
        $a * $b
    };
    (div, $a:expr, $b:expr) => {
        $a / $b
    };
    (rem, $a:expr, $b:expr) => {
        $a % $b
    };
}

impl RuntimeValue {
    arith_dispatch!(add, checked_add, wrapping_add);
    arith_dispatch!(sub, checked_sub, wrapping_sub);
    arith_dispatch!(mul, checked_mul, wrapping_mul);

    /// Division. `None` on divide-by-zero for integers (the caller
    /// converts that into `EvaluationFailure::DivideByZero`) and on
    /// checked-overflow (`I64::MIN / -1`, etc).
    pub fn div(self, rhs: RuntimeValue) -> Option<RuntimeValue> {
        use RuntimeValue::*;
        match (self, rhs) {
            (I8(a), I8(b)) => (b != 0).then(|| a.checked_div(b)).flatten().map(I8),
            (I16(a), I16(b)) => (b != 0).then(|| a.checked_div(b)).flatten().map(I16),
            (I32(a), I32(b)) => (b != 0).then(|| a.checked_div(b)).flatten().map(I32),
            (I64(a), I64(b)) => (b != 0).then(|| a.checked_div(b)).flatten().map(I64),
            (U8(a), U8(b)) => (b != 0).then(|| U8(a / b)),
            (U16(a), U16(b)) => (b != 0).then(|| U16(a / b)),
            (U32(a), U32(b)) => (b != 0).then(|| U32(a / b)),
            (U64(a), U64(b)) => (b != 0).then(|| U64(a / b)),
            (Byte(a), Byte(b)) => (b != 0).then(|| Byte(a / b)),
            (F32(a), F32(b)) => Some(F32(a / b)),
            (F64(a), F64(b)) => Some(F64(a / b)),
            _ => None,
        }
    }

    /// Remainder. Same zero-check discipline as [`Self::div`].
    pub fn rem(self, rhs: RuntimeValue) -> Option<RuntimeValue> {
        use RuntimeValue::*;
        match (self, rhs) {
            (I8(a), I8(b)) => (b != 0).then(|| a.checked_rem(b)).flatten().map(I8),
            (I16(a), I16(b)) => (b != 0).then(|| a.checked_rem(b)).flatten().map(I16),
            (I32(a), I32(b)) => (b != 0).then(|| a.checked_rem(b)).flatten().map(I32),
            (I64(a), I64(b)) => (b != 0).then(|| a.checked_rem(b)).flatten().map(I64),
            (U8(a), U8(b)) => (b != 0).then(|| U8(a % b)),
            (U16(a), U16(b)) => (b != 0).then(|| U16(a % b)),
            (U32(a), U32(b)) => (b != 0).then(|| U32(a % b)),
            (U64(a), U64(b)) => (b != 0).then(|| U64(a % b)),
            (Byte(a), Byte(b)) => (b != 0).then(|| Byte(a % b)),
            (F32(a), F32(b)) => Some(F32(a % b)),
            (F64(a), F64(b)) => Some(F64(a % b)),
            _ => None,
        }
    }

    /// Total ordering over two values of matching numeric/`Char` variant,
    /// used to implement `Eq/Ne/Lt/Le` (`Gt/Ge` are swapped `Lt/Le` at the
    /// emitter, per `spec.md` §4.3).
    pub fn partial_cmp(self, rhs: RuntimeValue) -> Option<std::cmp::Ordering> {
        use RuntimeValue::*;
        match (self, rhs) {
            (Bool(a), Bool(b)) => a.partial_cmp(&b),
            (Char(a), Char(b)) => a.partial_cmp(&b),
            (Byte(a), Byte(b)) => a.partial_cmp(&b),
            (I8(a), I8(b)) => a.partial_cmp(&b),
            (I16(a), I16(b)) => a.partial_cmp(&b),
            (I32(a), I32(b)) => a.partial_cmp(&b),
            (I64(a), I64(b)) => a.partial_cmp(&b),
            (U8(a), U8(b)) => a.partial_cmp(&b),
            (U16(a), U16(b)) => a.partial_cmp(&b),
            (U32(a), U32(b)) => a.partial_cmp(&b),
            (U64(a), U64(b)) => a.partial_cmp(&b),
            (F32(a), F32(b)) => a.partial_cmp(&b),
            (F64(a), F64(b)) => a.partial_cmp(&b),
            _ => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            RuntimeValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Widens any integer variant to `i64`, for index/offset arithmetic
    /// (`PtrIncr`, `ArrayOf`) that is always computed in `i64` regardless
    /// of the source register's declared width.
    pub fn as_i64_like(self) -> i64 {
        match self {
            RuntimeValue::I8(v) => v as i64,
            RuntimeValue::I16(v) => v as i64,
            RuntimeValue::I32(v) => v as i64,
            RuntimeValue::I64(v) => v,
            RuntimeValue::U8(v) | RuntimeValue::Byte(v) => v as i64,
            RuntimeValue::U16(v) => v as i64,
            RuntimeValue::U32(v) => v as i64,
            RuntimeValue::U64(v) => v as i64,
            _ => 0,
        }
    }

    pub fn as_address(self) -> Option<Address> {
        match self {
            RuntimeValue::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_type(self) -> Option<Type> {
        match self {
            RuntimeValue::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function_ref(self) -> Option<FunctionRef> {
        match self {
            RuntimeValue::FunctionRef(f) => Some(f),
            _ => None,
        }
    }

    /// Little-endian byte encoding of this value into `out`, used by
    /// `Interpreter::store` / the `Memory` backing buffers. `out` must be
    /// at least as long as the value's `type_byte_size`.
    pub fn encode_into(self, out: &mut [u8]) {
        match self {
            RuntimeValue::Bool(b) => out[0] = b as u8,
            RuntimeValue::Byte(b) | RuntimeValue::U8(b) => out[0] = b,
            RuntimeValue::I8(v) => out[0] = v as u8,
            RuntimeValue::Char(c) => out[..4].copy_from_slice(&(c as u32).to_le_bytes()),
            RuntimeValue::I16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            RuntimeValue::U16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            RuntimeValue::I32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            RuntimeValue::U32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            RuntimeValue::F32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            RuntimeValue::I64(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
            RuntimeValue::U64(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
            RuntimeValue::F64(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
            RuntimeValue::Type(t) => out[..8].copy_from_slice(&t.representation().to_le_bytes()),
            RuntimeValue::FunctionRef(f) => out[..4].copy_from_slice(&f.as_u32().to_le_bytes()),
            RuntimeValue::Address(a) => {
                let tag: u8 = match a.region {
                    crate::ir::Region::Stack => 0,
                    crate::ir::Region::Heap => 1,
                    crate::ir::Region::ReadOnly => 2,
                };
                out[0] = tag;
                out[8..16].copy_from_slice(&a.offset.to_le_bytes());
            }
            RuntimeValue::Unit => {}
        }
    }

    /// Decodes a value of `ty` out of `bytes`, the inverse of
    /// [`Self::encode_into`].
    pub fn decode(ty: Type, bytes: &[u8]) -> RuntimeValue {
        use crate::types::Primitive as P;
        match ty.as_primitive() {
            Some(P::Bool) => RuntimeValue::Bool(bytes[0] != 0),
            Some(P::Byte) => RuntimeValue::Byte(bytes[0]),
            Some(P::U8) => RuntimeValue::U8(bytes[0]),
            Some(P::I8) => RuntimeValue::I8(bytes[0] as i8),
            Some(P::Char) => {
                let bits = u32::from_le_bytes(bytes[..4].try_into().unwrap());
                RuntimeValue::Char(char::from_u32(bits).unwrap_or('\u{fffd}'))
            }
            Some(P::I16) => RuntimeValue::I16(i16::from_le_bytes(bytes[..2].try_into().unwrap())),
            Some(P::U16) => RuntimeValue::U16(u16::from_le_bytes(bytes[..2].try_into().unwrap())),
            Some(P::I32) => RuntimeValue::I32(i32::from_le_bytes(bytes[..4].try_into().unwrap())),
            Some(P::U32) => RuntimeValue::U32(u32::from_le_bytes(bytes[..4].try_into().unwrap())),
            Some(P::F32) => RuntimeValue::F32(f32::from_le_bytes(bytes[..4].try_into().unwrap())),
            Some(P::I64) | Some(P::Integer) => {
                RuntimeValue::I64(i64::from_le_bytes(bytes[..8].try_into().unwrap()))
            }
            Some(P::U64) => RuntimeValue::U64(u64::from_le_bytes(bytes[..8].try_into().unwrap())),
            Some(P::F64) => RuntimeValue::F64(f64::from_le_bytes(bytes[..8].try_into().unwrap())),
            Some(P::Type_) => {
                RuntimeValue::Type(Type::from_representation(u64::from_le_bytes(bytes[..8].try_into().unwrap())))
            }
            Some(P::NullPtr) => RuntimeValue::Address(Address::new(crate::ir::Region::Heap, 0)),
            Some(P::Unit) | Some(P::EmptyArray) | Some(P::Bottom) | Some(P::Error) => {
                RuntimeValue::Unit
            }
            Some(P::Module) | Some(P::Interface) => RuntimeValue::Unit,
            None => match ty.kind() {
                crate::types::Kind::Pointer
                | crate::types::Kind::BufferPointer => {
                    let region = match bytes[0] {
                        0 => crate::ir::Region::Stack,
                        1 => crate::ir::Region::Heap,
                        _ => crate::ir::Region::ReadOnly,
                    };
                    let offset = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
                    RuntimeValue::Address(Address::new(region, offset))
                }
                crate::types::Kind::Function | crate::types::Kind::GenericFunction => {
                    RuntimeValue::FunctionRef(FunctionRef::from_u32(u32::from_le_bytes(
                        bytes[..4].try_into().unwrap(),
                    )))
                }
                _ => RuntimeValue::Unit,
            },
        }
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Bool(v) => write!(f, "{v}"),
            RuntimeValue::Char(v) => write!(f, "{v:?}"),
            RuntimeValue::Byte(v) => write!(f, "{v}"),
            RuntimeValue::I8(v) => write!(f, "{v}"),
            RuntimeValue::I16(v) => write!(f, "{v}"),
            RuntimeValue::I32(v) => write!(f, "{v}"),
            RuntimeValue::I64(v) => write!(f, "{v}"),
            RuntimeValue::U8(v) => write!(f, "{v}"),
            RuntimeValue::U16(v) => write!(f, "{v}"),
            RuntimeValue::U32(v) => write!(f, "{v}"),
            RuntimeValue::U64(v) => write!(f, "{v}"),
            RuntimeValue::F32(v) => write!(f, "{v}"),
            RuntimeValue::F64(v) => write!(f, "{v}"),
            RuntimeValue::Type(t) => write!(f, "{t}"),
            RuntimeValue::FunctionRef(r) => write!(f, "{r}"),
            RuntimeValue::Address(a) => write!(f, "{a:?}"),
            RuntimeValue::Unit => write!(f, "()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_wraps_unsigned_and_traps_signed() {
        assert_eq!(RuntimeValue::U8(250).add(RuntimeValue::U8(10)), Some(RuntimeValue::U8(4)));
        assert_eq!(RuntimeValue::I8(120).add(RuntimeValue::I8(10)), None);
    }

    #[test]
    fn division_by_zero_is_none() {
        assert_eq!(RuntimeValue::I64(10).div(RuntimeValue::I64(0)), None);
        assert_eq!(RuntimeValue::I64(10).div(RuntimeValue::I64(2)), Some(RuntimeValue::I64(5)));
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut buf = [0u8; 8];
        RuntimeValue::I64(-42).encode_into(&mut buf);
        let back = RuntimeValue::decode(Type::from_primitive(crate::types::Primitive::I64), &buf);
        assert_eq!(back, RuntimeValue::I64(-42));
    }
}
