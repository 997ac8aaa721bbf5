//! The flyweight-interned type algebra (`spec.md` §3, §4.1).
//!
//! A [`Type`] is an 8-byte opaque handle: a `Kind` tag plus a payload that is
//! either a primitive discriminant or a flyweight index into a
//! category-specific table owned by a [`TypeRegistry`]. Two `Type`s compare
//! equal iff their `u64` representations are equal — the representation
//! *is* the identity, mirroring `examples/original_source/core/type_system/
//! type_system.h`'s `Type::representation()` (there: 56-bit value / 8-bit
//! category; here: 56-bit payload / 8-bit kind, same split, values in the
//! low bits so a `Type` sorts first by kind).
//!
//! The interning machinery itself is `crate::entity::FlyweightSet`, the same
//! shape as `cranelift_entity::PrimaryMap` plus a reverse index.

pub mod nominal;

use std::fmt;

use crate::entity::{entity_impl, EntityRef, FlyweightSet};
pub use nominal::{
    Completeness, Enum, EnumId, Flags, FlagsId, NominalId, Opaque, OpaqueId, SpecialMembers,
    Struct, StructId, StructField,
};

/// The kind tag occupying the low 8 bits of a [`Type`]'s representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    Primitive = 0,
    Pointer = 1,
    BufferPointer = 2,
    Slice = 3,
    Array = 4,
    Parameters = 5,
    Function = 6,
    GenericFunction = 7,
    Pattern = 8,
    Enum = 9,
    Flags = 10,
    Struct = 11,
    Opaque = 12,
}

impl Kind {
    const ALL: [Kind; 13] = [
        Kind::Primitive,
        Kind::Pointer,
        Kind::BufferPointer,
        Kind::Slice,
        Kind::Array,
        Kind::Parameters,
        Kind::Function,
        Kind::GenericFunction,
        Kind::Pattern,
        Kind::Enum,
        Kind::Flags,
        Kind::Struct,
        Kind::Opaque,
    ];

    fn from_u8(tag: u8) -> Kind {
        Self::ALL
            .into_iter()
            .find(|k| *k as u8 == tag)
            .expect("unrecognized Type kind tag")
    }
}

/// The fixed set of primitive types. Payload of a `Primitive`-kinded `Type`
/// is this enum's discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Primitive {
    Bool,
    Char,
    Byte,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Arbitrary-precision literal type; compile-time only (invariant 4).
    Integer,
    /// `Type_`, the type of types.
    Type_,
    Module,
    Error,
    NullPtr,
    EmptyArray,
    Interface,
    Bottom,
    Unit,
}

impl Primitive {
    const ALL: [Primitive; 22] = [
        Primitive::Bool,
        Primitive::Char,
        Primitive::Byte,
        Primitive::I8,
        Primitive::I16,
        Primitive::I32,
        Primitive::I64,
        Primitive::U8,
        Primitive::U16,
        Primitive::U32,
        Primitive::U64,
        Primitive::F32,
        Primitive::F64,
        Primitive::Integer,
        Primitive::Type_,
        Primitive::Module,
        Primitive::Error,
        Primitive::NullPtr,
        Primitive::EmptyArray,
        Primitive::Interface,
        Primitive::Bottom,
        Primitive::Unit,
    ];

    fn from_u64(payload: u64) -> Primitive {
        Self::ALL
            .into_iter()
            .find(|p| *p as u64 == payload)
            .expect("unrecognized primitive payload")
    }

    /// `true` for the signed integer kinds.
    pub fn is_signed_integer(self) -> bool {
        matches!(self, Primitive::I8 | Primitive::I16 | Primitive::I32 | Primitive::I64)
    }

    /// `true` for the unsigned integer kinds (including `Byte`, which is an
    /// 8-bit unsigned quantity distinct from `U8` only in its cast rules).
    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            Primitive::Byte | Primitive::U8 | Primitive::U16 | Primitive::U32 | Primitive::U64
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float() || self == Primitive::Integer
    }

    /// Width in bits for fixed-width numeric primitives; `None` for
    /// non-numeric or arbitrary-precision primitives.
    pub fn bit_width(self) -> Option<u32> {
        match self {
            Primitive::Bool | Primitive::I8 | Primitive::U8 | Primitive::Byte => Some(8),
            Primitive::I16 | Primitive::U16 => Some(16),
            Primitive::I32 | Primitive::U32 | Primitive::F32 | Primitive::Char => Some(32),
            Primitive::I64 | Primitive::U64 | Primitive::F64 => Some(64),
            _ => None,
        }
    }

    pub fn alignment(self) -> u32 {
        match self {
            Primitive::Unit | Primitive::EmptyArray => 1,
            _ => self.bytes().max(1),
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            Primitive::Bool | Primitive::Byte | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::I32 | Primitive::U32 | Primitive::F32 | Primitive::Char => 4,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
            Primitive::Type_ => 8,
            Primitive::NullPtr => 8,
            Primitive::Unit | Primitive::EmptyArray | Primitive::Bottom | Primitive::Error => 0,
            Primitive::Integer | Primitive::Module | Primitive::Interface => 0,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Primitive::Bool => "bool",
            Primitive::Char => "char",
            Primitive::Byte => "byte",
            Primitive::I8 => "i8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::Integer => "{integer}",
            Primitive::Type_ => "type",
            Primitive::Module => "module",
            Primitive::Error => "<error>",
            Primitive::NullPtr => "nullptr",
            Primitive::EmptyArray => "[0]",
            Primitive::Interface => "interface",
            Primitive::Bottom => "bottom",
            Primitive::Unit => "()",
        };
        f.write_str(s)
    }
}

/// An evaluation-time requirement on a `Function`'s invocation, per
/// `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Evaluation {
    RequiredAtCompileTime,
    PreferAtCompileTime,
    PreferRuntime,
}

/// An 8-byte opaque, `Copy`, flyweight type handle. See the module docs for
/// the representation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(u64);

const KIND_BITS: u32 = 8;
const KIND_MASK: u64 = (1 << KIND_BITS) - 1;

impl Type {
    fn pack(kind: Kind, payload: u64) -> Type {
        debug_assert!(payload <= (u64::MAX >> KIND_BITS));
        Type((payload << KIND_BITS) | (kind as u64 & KIND_MASK))
    }

    pub fn kind(self) -> Kind {
        Kind::from_u8((self.0 & KIND_MASK) as u8)
    }

    fn payload(self) -> u64 {
        self.0 >> KIND_BITS
    }

    pub fn from_primitive(p: Primitive) -> Type {
        Type::pack(Kind::Primitive, p as u64)
    }

    pub fn as_primitive(self) -> Option<Primitive> {
        (self.kind() == Kind::Primitive).then(|| Primitive::from_u64(self.payload()))
    }

    /// The raw 64-bit representation; two `Type`s are equal iff these are
    /// equal (invariant 1, `spec.md` §3).
    pub fn representation(self) -> u64 {
        self.0
    }

    pub fn from_representation(bits: u64) -> Type {
        Type(bits)
    }

    pub fn is_error(self) -> bool {
        self.as_primitive() == Some(Primitive::Error)
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({:#018x})", self.0)
    }
}

// --- Flyweight category keys -------------------------------------------------

macro_rules! flyweight_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);
        entity_impl!($name, stringify!($name));
    };
}

flyweight_id!(PointerId);
flyweight_id!(BufferPointerId);
flyweight_id!(SliceId);
flyweight_id!(ArrayId);
flyweight_id!(ParametersId);
flyweight_id!(FunctionId);
flyweight_id!(GenericFunctionId);
flyweight_id!(PatternId);

/// `n` contiguous `T`; `n` is part of the interned key (invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayKey {
    pub length: u64,
    pub element: Type,
}

/// One `(name?, Type)` pair inside a `Parameters` list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub name: Option<String>,
    pub ty: Type,
}

/// An ordered, interned list of [`Parameter`]s.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParametersKey(pub Vec<Parameter>);

/// `Function(params, returns, evaluation)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionKey {
    pub params: ParametersId,
    pub returns: Vec<Type>,
    pub evaluation: EvaluationKey,
}

/// `Evaluation` needs `Eq`/`Hash` to live inside an interned key; `Evaluation`
/// itself already derives them, this alias just documents the role.
pub type EvaluationKey = Evaluation;

impl std::hash::Hash for Evaluation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state)
    }
}

/// `GenericFunction(evaluation, body-id)`: `body` names an emitter-owned
/// dependent-term body the `EvalBridge` partially evaluates on
/// instantiation (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericFunctionKey {
    pub evaluation: Evaluation,
    pub body: crate::ir::function::DependentBodyId,
}

/// `Pattern(T)`: the type of match patterns against `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternKey(pub Type);

/// The flyweight interner for every type category, plus the nominal arena.
///
/// Per `spec.md` §4.1, a single `TypeRegistry` is meant to be used from one
/// semantic-analysis thread; it carries no internal locking (like
/// `cranelift_entity`'s maps), matching the single-threaded core described
/// in `spec.md` §5.
pub struct TypeRegistry {
    pointers: FlyweightSet<PointerId, Type>,
    buffer_pointers: FlyweightSet<BufferPointerId, Type>,
    slices: FlyweightSet<SliceId, Type>,
    arrays: FlyweightSet<ArrayId, ArrayKey>,
    parameters: FlyweightSet<ParametersId, ParametersKey>,
    functions: FlyweightSet<FunctionId, FunctionKey>,
    generic_functions: FlyweightSet<GenericFunctionId, GenericFunctionKey>,
    patterns: FlyweightSet<PatternId, PatternKey>,
    nominal: nominal::NominalArena,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            pointers: FlyweightSet::new(),
            buffer_pointers: FlyweightSet::new(),
            slices: FlyweightSet::new(),
            arrays: FlyweightSet::new(),
            parameters: FlyweightSet::new(),
            functions: FlyweightSet::new(),
            generic_functions: FlyweightSet::new(),
            patterns: FlyweightSet::new(),
            nominal: nominal::NominalArena::new(),
        }
    }

    pub fn intern_pointer(&mut self, pointee: Type) -> Type {
        Type::pack(Kind::Pointer, self.pointers.intern(pointee).as_u32() as u64)
    }

    pub fn decompose_pointer(&self, t: Type) -> Type {
        assert_eq!(t.kind(), Kind::Pointer);
        *self.pointers.decompose(PointerId::from_u32(t.payload() as u32))
    }

    pub fn intern_buffer_pointer(&mut self, pointee: Type) -> Type {
        Type::pack(
            Kind::BufferPointer,
            self.buffer_pointers.intern(pointee).as_u32() as u64,
        )
    }

    pub fn decompose_buffer_pointer(&self, t: Type) -> Type {
        assert_eq!(t.kind(), Kind::BufferPointer);
        *self
            .buffer_pointers
            .decompose(BufferPointerId::from_u32(t.payload() as u32))
    }

    pub fn intern_slice(&mut self, element: Type) -> Type {
        Type::pack(Kind::Slice, self.slices.intern(element).as_u32() as u64)
    }

    pub fn decompose_slice(&self, t: Type) -> Type {
        assert_eq!(t.kind(), Kind::Slice);
        *self.slices.decompose(SliceId::from_u32(t.payload() as u32))
    }

    pub fn intern_array(&mut self, length: u64, element: Type) -> Type {
        let key = ArrayKey { length, element };
        Type::pack(Kind::Array, self.arrays.intern(key).as_u32() as u64)
    }

    pub fn decompose_array(&self, t: Type) -> ArrayKey {
        assert_eq!(t.kind(), Kind::Array);
        self.arrays.decompose(ArrayId::from_u32(t.payload() as u32)).clone()
    }

    pub fn intern_parameters(&mut self, params: Vec<Parameter>) -> ParametersId {
        self.parameters.intern(ParametersKey(params))
    }

    pub fn decompose_parameters(&self, id: ParametersId) -> &[Parameter] {
        &self.parameters.decompose(id).0
    }

    pub fn intern_function(
        &mut self,
        params: ParametersId,
        returns: Vec<Type>,
        evaluation: Evaluation,
    ) -> Type {
        let key = FunctionKey { params, returns, evaluation };
        Type::pack(Kind::Function, self.functions.intern(key).as_u32() as u64)
    }

    pub fn decompose_function(&self, t: Type) -> &FunctionKey {
        assert_eq!(t.kind(), Kind::Function);
        self.functions.decompose(FunctionId::from_u32(t.payload() as u32))
    }

    pub fn intern_generic_function(
        &mut self,
        evaluation: Evaluation,
        body: crate::ir::function::DependentBodyId,
    ) -> Type {
        let key = GenericFunctionKey { evaluation, body };
        Type::pack(
            Kind::GenericFunction,
            self.generic_functions.intern(key).as_u32() as u64,
        )
    }

    pub fn decompose_generic_function(&self, t: Type) -> &GenericFunctionKey {
        assert_eq!(t.kind(), Kind::GenericFunction);
        self.generic_functions
            .decompose(GenericFunctionId::from_u32(t.payload() as u32))
    }

    pub fn intern_pattern(&mut self, scrutinee: Type) -> Type {
        let key = PatternKey(scrutinee);
        Type::pack(Kind::Pattern, self.patterns.intern(key).as_u32() as u64)
    }

    pub fn decompose_pattern(&self, t: Type) -> Type {
        assert_eq!(t.kind(), Kind::Pattern);
        self.patterns.decompose(PatternId::from_u32(t.payload() as u32)).0
    }

    // --- Nominal categories --------------------------------------------

    /// Allocates a fresh, `Incomplete` enum. Corresponds to the IR's
    /// `Create<Enum>` instruction (`spec.md` §4.3).
    pub fn create_enum(&mut self, module: nominal::ModuleId) -> Type {
        let id = self.nominal.create_enum(module);
        Type::pack(Kind::Enum, id.as_u32() as u64)
    }

    pub fn enum_data(&self, t: Type) -> &Enum {
        assert_eq!(t.kind(), Kind::Enum);
        self.nominal.enum_data(EnumId::from_u32(t.payload() as u32))
    }

    pub fn enum_data_mut(&mut self, t: Type) -> &mut Enum {
        assert_eq!(t.kind(), Kind::Enum);
        self.nominal.enum_data_mut(EnumId::from_u32(t.payload() as u32))
    }

    pub fn create_flags(&mut self, module: nominal::ModuleId) -> Type {
        let id = self.nominal.create_flags(module);
        Type::pack(Kind::Flags, id.as_u32() as u64)
    }

    pub fn flags_data(&self, t: Type) -> &Flags {
        assert_eq!(t.kind(), Kind::Flags);
        self.nominal.flags_data(FlagsId::from_u32(t.payload() as u32))
    }

    pub fn flags_data_mut(&mut self, t: Type) -> &mut Flags {
        assert_eq!(t.kind(), Kind::Flags);
        self.nominal.flags_data_mut(FlagsId::from_u32(t.payload() as u32))
    }

    pub fn create_struct(&mut self, module: nominal::ModuleId) -> Type {
        let id = self.nominal.create_struct(module);
        Type::pack(Kind::Struct, id.as_u32() as u64)
    }

    pub fn struct_data(&self, t: Type) -> &Struct {
        assert_eq!(t.kind(), Kind::Struct);
        self.nominal.struct_data(StructId::from_u32(t.payload() as u32))
    }

    pub fn struct_data_mut(&mut self, t: Type) -> &mut Struct {
        assert_eq!(t.kind(), Kind::Struct);
        self.nominal.struct_data_mut(StructId::from_u32(t.payload() as u32))
    }

    pub fn create_opaque(&mut self, module: nominal::ModuleId) -> Type {
        let id = self.nominal.create_opaque(module);
        Type::pack(Kind::Opaque, id.as_u32() as u64)
    }

    pub fn opaque_data(&self, t: Type) -> &Opaque {
        assert_eq!(t.kind(), Kind::Opaque);
        self.nominal.opaque_data(OpaqueId::from_u32(t.payload() as u32))
    }

    /// Size of a value of `t` in interpreter register-slots
    /// (`TypeRegistry::jasmin_size`, `spec.md` §4.1; named after the
    /// original implementation's `jasmin` bytecode VM library).
    pub fn jasmin_size(&self, t: Type) -> u32 {
        match t.kind() {
            Kind::Primitive => 1,
            Kind::Pointer | Kind::BufferPointer => 1,
            Kind::Slice => 2,
            Kind::Array => {
                let ArrayKey { length, element } = self.decompose_array(t);
                let elem_size = self.jasmin_size(element);
                (length as u32).saturating_mul(elem_size).max(1)
            }
            Kind::Parameters => panic!("Parameters is not a value-bearing type"),
            Kind::Function | Kind::GenericFunction => 1,
            Kind::Pattern => 1,
            Kind::Enum => 1,
            Kind::Flags => 1,
            Kind::Struct => {
                let data = self.struct_data(t);
                data.fields
                    .iter()
                    .map(|f| self.jasmin_size(f.ty))
                    .sum::<u32>()
                    .max(1)
            }
            Kind::Opaque => panic!("Opaque type's size is unknown (`spec.md` invariant 5)"),
        }
    }

    /// A type is "big" iff a value of it does not fit in a single
    /// interpreter register slot (invariant 2, `spec.md` §3).
    pub fn is_big(&self, t: Type) -> bool {
        match t.kind() {
            Kind::Slice => true,
            Kind::Array => self.jasmin_size(t) > 1,
            Kind::Struct => self.jasmin_size(t) > 1,
            _ => false,
        }
    }

    pub fn nominal(&self) -> &nominal::NominalArena {
        &self.nominal
    }

    pub fn nominal_mut(&mut self) -> &mut nominal::NominalArena {
        &mut self.nominal
    }

    // --- Bulk iteration, for `crate::module`'s image serializer ----------
    //
    // Each flyweight table's natural iteration order is its allocation
    // order (`FlyweightSet`/`PrimaryMap` never reorder), so replaying
    // `intern_<K>` calls in this order on an empty registry reproduces
    // identical `Type` handles (`spec.md` §8 property 1).

    pub fn iter_pointers(&self) -> impl Iterator<Item = (PointerId, Type)> + '_ {
        self.pointers.iter().map(|(k, v)| (k, *v))
    }

    pub fn iter_buffer_pointers(&self) -> impl Iterator<Item = (BufferPointerId, Type)> + '_ {
        self.buffer_pointers.iter().map(|(k, v)| (k, *v))
    }

    pub fn iter_slices(&self) -> impl Iterator<Item = (SliceId, Type)> + '_ {
        self.slices.iter().map(|(k, v)| (k, *v))
    }

    pub fn iter_arrays(&self) -> impl Iterator<Item = (ArrayId, &ArrayKey)> + '_ {
        self.arrays.iter()
    }

    pub fn iter_parameters(&self) -> impl Iterator<Item = (ParametersId, &[Parameter])> + '_ {
        self.parameters.iter().map(|(k, v)| (k, v.0.as_slice()))
    }

    pub fn iter_functions(&self) -> impl Iterator<Item = (FunctionId, &FunctionKey)> + '_ {
        self.functions.iter()
    }

    pub fn iter_generic_functions(&self) -> impl Iterator<Item = (GenericFunctionId, &GenericFunctionKey)> + '_ {
        self.generic_functions.iter()
    }

    pub fn iter_patterns(&self) -> impl Iterator<Item = (PatternId, Type)> + '_ {
        self.patterns.iter().map(|(k, v)| (k, v.0))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Best-effort rendering that never needs a `TypeRegistry`: primitives
        // print their keyword, every other kind prints a tag plus its
        // flyweight index, matching cranelift's IR entity `Display` impls
        // which likewise never need the owning `Function` to print.
        match self.as_primitive() {
            Some(p) => write!(f, "{p}"),
            None => write!(f, "{:?}#{}", self.kind(), self.payload()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flyweight_equality_pointer() {
        let mut reg = TypeRegistry::new();
        let i64_ty = Type::from_primitive(Primitive::I64);
        let i32_ty = Type::from_primitive(Primitive::I32);
        let p1 = reg.intern_pointer(i64_ty);
        let p2 = reg.intern_pointer(i64_ty);
        let p3 = reg.intern_pointer(i32_ty);
        assert_eq!(p1, p2);
        assert_ne!(p1, p3);
        assert_eq!(reg.decompose_pointer(p1), i64_ty);
    }

    #[test]
    fn flyweight_equality_array_keys_length() {
        let mut reg = TypeRegistry::new();
        let u64_ty = Type::from_primitive(Primitive::U64);
        let a3 = reg.intern_array(3, u64_ty);
        let a3b = reg.intern_array(3, u64_ty);
        let a4 = reg.intern_array(4, u64_ty);
        assert_eq!(a3, a3b);
        assert_ne!(a3, a4);
    }

    #[test]
    fn alignment_and_bytes() {
        assert_eq!(Primitive::Bool.alignment(), 1);
        assert_eq!(Primitive::I64.alignment(), 8);
        assert_eq!(Primitive::Bool.bytes(), 1);
        assert_eq!(Primitive::I64.bytes(), 8);
    }

    #[test]
    fn bigness() {
        let mut reg = TypeRegistry::new();
        let u8_ty = Type::from_primitive(Primitive::U8);
        let slice = reg.intern_slice(u8_ty);
        assert!(reg.is_big(slice));
        assert!(!reg.is_big(u8_ty));
        let ptr = reg.intern_pointer(u8_ty);
        assert!(!reg.is_big(ptr));
    }

    #[test]
    fn primitive_round_trip_through_representation() {
        let ty = Type::from_primitive(Primitive::F64);
        let bits = ty.representation();
        let back = Type::from_representation(bits);
        assert_eq!(ty, back);
        assert_eq!(back.as_primitive(), Some(Primitive::F64));
    }
}
