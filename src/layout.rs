//! Shared size/alignment computations over [`crate::types::Type`], used by
//! both function finalization (`CompiledFunction::finalize`) and the
//! interpreter's in-memory value encoding, so the two never disagree about
//! a type's footprint.

use crate::types::{Kind, Type, TypeRegistry};

pub fn align_up(value: u32, align: u32) -> u32 {
    let align = align.max(1);
    (value + align - 1) / align * align
}

pub fn type_alignment(registry: &TypeRegistry, ty: Type) -> u32 {
    match ty.as_primitive() {
        Some(p) => p.alignment(),
        None => match ty.kind() {
            Kind::Struct => registry
                .struct_data(ty)
                .fields
                .iter()
                .map(|f| type_alignment(registry, f.ty))
                .max()
                .unwrap_or(1),
            Kind::Array => type_alignment(registry, registry.decompose_array(ty).element),
            Kind::Slice => 8,
            _ => 8,
        },
    }
}

pub fn type_byte_size(registry: &TypeRegistry, ty: Type) -> u32 {
    match ty.as_primitive() {
        Some(p) => p.bytes(),
        None => match ty.kind() {
            Kind::Array => {
                let key = registry.decompose_array(ty);
                (key.length as u32) * type_byte_size(registry, key.element)
            }
            Kind::Struct => {
                let raw = registry.struct_data(ty).fields.iter().fold(0u32, |offset, f| {
                    let align = type_alignment(registry, f.ty);
                    align_up(offset, align) + type_byte_size(registry, f.ty)
                });
                align_up(raw, type_alignment(registry, ty))
            }
            Kind::Slice => 16, // BufferPointer (8) + length (8)
            Kind::Pointer | Kind::BufferPointer => 8,
            _ => 8,
        },
    }
}

/// Byte offset of field `index` within a struct of type `ty`.
pub fn struct_field_offset(registry: &TypeRegistry, ty: Type, index: usize) -> u32 {
    let data = registry.struct_data(ty);
    let mut offset = 0u32;
    for field in &data.fields[..index] {
        let align = type_alignment(registry, field.ty);
        offset = align_up(offset, align) + type_byte_size(registry, field.ty);
    }
    align_up(offset, type_alignment(registry, data.fields[index].ty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::nominal::{ModuleId, StructField};
    use crate::types::Primitive;

    /// `spec.md` §8 "Builtin `alignment` / `bytes`" scenario.
    #[test]
    fn primitive_alignment_and_bytes() {
        let registry = TypeRegistry::new();
        let bool_ty = Type::from_primitive(Primitive::Bool);
        let i64_ty = Type::from_primitive(Primitive::I64);
        assert_eq!(type_alignment(&registry, bool_ty), 1);
        assert_eq!(type_alignment(&registry, i64_ty), 8);
        assert_eq!(type_byte_size(&registry, bool_ty), 1);
        assert_eq!(type_byte_size(&registry, i64_ty), 8);
    }

    #[test]
    fn struct_size_rounds_up_to_own_alignment() {
        let mut registry = TypeRegistry::new();
        let module = ModuleId::from_u32(0);
        let ty = registry.create_struct(module);
        {
            let data = registry.struct_data_mut(ty);
            data.add_field(StructField {
                name: "flag".to_string(),
                ty: Type::from_primitive(Primitive::Bool),
                exported: true,
            });
            data.add_field(StructField {
                name: "value".to_string(),
                ty: Type::from_primitive(Primitive::I64),
                exported: true,
            });
        }

        // `bool` at offset 0 (1 byte), `i64` at offset 8 (aligned up from 1),
        // then the whole struct is padded to its own 8-byte alignment.
        assert_eq!(struct_field_offset(&registry, ty, 0), 0);
        assert_eq!(struct_field_offset(&registry, ty, 1), 8);
        assert_eq!(type_alignment(&registry, ty), 8);
        assert_eq!(type_byte_size(&registry, ty), 16);
    }
}
