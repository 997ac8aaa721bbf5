//! `Module`: owns one compilation unit's `TypeRegistry`, `FunctionTable`,
//! and `DependentBodyArena`, plus the table of symbols it exports
//! (`spec.md` §6's "compiled module format").
//!
//! Grounded on `cranelift-module`'s `Module` trait (the thing that owns a
//! `DataContext`/function table and knows how to finalize definitions into
//! an object), narrowed here to a single translation unit with no linking
//! step. The on-disk image (behind the `module-image` feature) is this
//! crate's own compact format, not an attempt at ABI compatibility with
//! anything external — `spec.md` §6 states the wire format has no
//! compatibility requirements beyond internal self-consistency.

use crate::emitter::Emitter;
use crate::eval_bridge::EvalBridge;
use crate::interp::FunctionTable;
use crate::ir::DependentBodyArena;
use crate::types::nominal::ModuleId;
use crate::types::{Type, TypeRegistry};

/// One exported binding: a name, its static type, and its value encoded the
/// way [`crate::interp::value::RuntimeValue::encode_into`] would lay it out.
#[derive(Debug, Clone)]
pub struct ExportedSymbol {
    pub name: String,
    pub ty: Type,
    pub value: Vec<u8>,
}

/// A single compilation unit. Everything the emitter and compile-time
/// evaluator need to build and run functions against lives here; a host
/// driver owns one `Module` per translation unit and feeds its functions to
/// an [`crate::interp::Interpreter`] as needed.
pub struct Module {
    id: ModuleId,
    registry: TypeRegistry,
    functions: FunctionTable,
    bodies: DependentBodyArena,
    bridge: EvalBridge,
    exports: Vec<ExportedSymbol>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            id: ModuleId::from_u32(0),
            registry: TypeRegistry::new(),
            functions: FunctionTable::new(),
            bodies: DependentBodyArena::new(),
            bridge: EvalBridge::new(),
            exports: Vec::new(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionTable {
        &mut self.functions
    }

    pub fn bodies_mut(&mut self) -> &mut DependentBodyArena {
        &mut self.bodies
    }

    pub fn bridge_mut(&mut self) -> &mut EvalBridge {
        &mut self.bridge
    }

    /// An `Emitter` scoped to this module's registry/function table.
    pub fn emitter(&mut self) -> Emitter<'_> {
        Emitter::new(&mut self.registry, &mut self.functions, self.id)
    }

    pub fn export(&mut self, name: impl Into<String>, ty: Type, value: Vec<u8>) {
        self.exports.push(ExportedSymbol { name: name.into(), ty, value });
    }

    pub fn exports(&self) -> &[ExportedSymbol] {
        &self.exports
    }

    pub fn lookup_export(&self, name: &str) -> Option<&ExportedSymbol> {
        self.exports.iter().find(|e| e.name == name)
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "module-image")]
pub mod image {
    //! The on-disk/`bincode` encoding of a [`super::Module`]'s type system
    //! and exported symbol table.
    //!
    //! Every compound type category is replayed into a fresh `TypeRegistry`
    //! by calling the exact same `intern_*`/`create_*` sequence the
    //! original registry saw, in the same per-category order: each
    //! category's `FlyweightSet` assigns ids purely by call count, so
    //! replaying `n` entries in original order reproduces the same `n`
    //! ids regardless of what happens in any other category. Dependency
    //! `Type`s are carried as their raw `representation()` `u64` rather
    //! than recursively resolved, which is sound for exactly that reason.
    //!
    //! `CompiledFunction` bodies are represented here by their calling
    //! convention metadata (name, `Function` type, frame sizes) rather
    //! than full instruction-level encoding: serializing every `Instruction`
    //! variant would need `serde` derives threaded through the entire IR
    //! module for no consumer this crate has yet. See `DESIGN.md`.

    use serde::{Deserialize, Serialize};

    use super::Module;
    use crate::types::nominal::ModuleId;
    use crate::types::{Evaluation, Parameter, Type, TypeRegistry};

    #[derive(Serialize, Deserialize)]
    struct ArrayEntry {
        length: u64,
        element: u64,
    }

    #[derive(Serialize, Deserialize)]
    struct ParameterEntry {
        name: Option<String>,
        ty: u64,
    }

    #[derive(Serialize, Deserialize)]
    struct FunctionEntry {
        params: u32,
        returns: Vec<u64>,
        evaluation: u8,
    }

    #[derive(Serialize, Deserialize)]
    struct EnumEntry {
        module: u32,
        members: Vec<(String, u64)>,
        complete: bool,
    }

    #[derive(Serialize, Deserialize)]
    struct FlagsEntry {
        module: u32,
        members: Vec<(String, u64)>,
        complete: bool,
    }

    #[derive(Serialize, Deserialize)]
    struct StructFieldEntry {
        name: String,
        ty: u64,
        exported: bool,
    }

    #[derive(Serialize, Deserialize)]
    struct StructEntry {
        module: u32,
        fields: Vec<StructFieldEntry>,
        complete: bool,
    }

    #[derive(Serialize, Deserialize)]
    struct FunctionAbiEntry {
        name: String,
        function_type: u64,
        frame_register_bytes: u32,
        frame_stack_bytes: u32,
    }

    #[derive(Serialize, Deserialize)]
    struct ExportedSymbolEntry {
        name: String,
        ty: u64,
        value: Vec<u8>,
    }

    /// The self-contained, versioned wire format for one [`Module`].
    #[derive(Serialize, Deserialize)]
    pub struct ModuleImage {
        pointers: Vec<u64>,
        buffer_pointers: Vec<u64>,
        slices: Vec<u64>,
        arrays: Vec<ArrayEntry>,
        parameter_lists: Vec<Vec<ParameterEntry>>,
        functions: Vec<FunctionEntry>,
        patterns: Vec<u64>,
        enums: Vec<EnumEntry>,
        flags: Vec<FlagsEntry>,
        structs: Vec<StructEntry>,
        opaques: Vec<u32>,
        function_abi: Vec<FunctionAbiEntry>,
        exports: Vec<ExportedSymbolEntry>,
    }

    fn evaluation_tag(e: Evaluation) -> u8 {
        match e {
            Evaluation::RequiredAtCompileTime => 0,
            Evaluation::PreferAtCompileTime => 1,
            Evaluation::PreferRuntime => 2,
        }
    }

    fn evaluation_from_tag(tag: u8) -> Evaluation {
        match tag {
            0 => Evaluation::RequiredAtCompileTime,
            1 => Evaluation::PreferAtCompileTime,
            _ => Evaluation::PreferRuntime,
        }
    }

    impl ModuleImage {
        pub fn capture(module: &Module) -> Self {
            let registry = &module.registry;

            let pointers = registry.iter_pointers().map(|(_, ty)| ty.representation()).collect();
            let buffer_pointers =
                registry.iter_buffer_pointers().map(|(_, ty)| ty.representation()).collect();
            let slices = registry.iter_slices().map(|(_, ty)| ty.representation()).collect();
            let arrays = registry
                .iter_arrays()
                .map(|(_, key)| ArrayEntry { length: key.length, element: key.element.representation() })
                .collect();
            let parameter_lists = registry
                .iter_parameters()
                .map(|(_, params)| {
                    params
                        .iter()
                        .map(|p| ParameterEntry { name: p.name.clone(), ty: p.ty.representation() })
                        .collect()
                })
                .collect();
            let functions = registry
                .iter_functions()
                .map(|(_, key)| FunctionEntry {
                    params: key.params.as_u32(),
                    returns: key.returns.iter().map(|t| t.representation()).collect(),
                    evaluation: evaluation_tag(key.evaluation),
                })
                .collect();
            let patterns = registry.iter_patterns().map(|(_, ty)| ty.representation()).collect();

            let nominal = registry.nominal();
            let enums = nominal
                .iter_enums()
                .map(|(_, e)| EnumEntry {
                    module: e.module.as_u32(),
                    members: e.members().map(|(n, v)| (n.to_string(), v)).collect(),
                    complete: e.completeness() == crate::types::nominal::Completeness::Complete,
                })
                .collect();
            let flags = nominal
                .iter_flags()
                .map(|(_, f)| FlagsEntry {
                    module: f.module.as_u32(),
                    members: f.members().map(|(n, v)| (n.to_string(), v)).collect(),
                    complete: f.completeness() == crate::types::nominal::Completeness::Complete,
                })
                .collect();
            let structs = nominal
                .iter_structs()
                .map(|(_, s)| StructEntry {
                    module: s.module.as_u32(),
                    fields: s
                        .fields
                        .iter()
                        .map(|f| StructFieldEntry {
                            name: f.name.clone(),
                            ty: f.ty.representation(),
                            exported: f.exported,
                        })
                        .collect(),
                    complete: s.completeness() == crate::types::nominal::Completeness::Complete,
                })
                .collect();
            let opaques = nominal.iter_opaques().map(|(_, o)| o.module.as_u32()).collect();

            let function_abi = module
                .functions
                .values()
                .map(|f| FunctionAbiEntry {
                    name: f.name().to_string(),
                    function_type: f.function_type().representation(),
                    frame_register_bytes: f.frame_register_bytes(),
                    frame_stack_bytes: f.frame_stack_bytes(),
                })
                .collect();

            let exports = module
                .exports
                .iter()
                .map(|e| ExportedSymbolEntry { name: e.name.clone(), ty: e.ty.representation(), value: e.value.clone() })
                .collect();

            Self {
                pointers,
                buffer_pointers,
                slices,
                arrays,
                parameter_lists,
                functions,
                patterns,
                enums,
                flags,
                structs,
                opaques,
                function_abi,
                exports,
            }
        }

        /// Rebuilds a fresh [`TypeRegistry`] whose flyweight ids exactly
        /// match the registry this image was captured from, plus the
        /// exported symbol table. Function bodies are not reconstructed
        /// (see the module-level docs); `function_abi` is exposed for a
        /// caller that only needs calling-convention metadata.
        pub fn restore(&self) -> (TypeRegistry, Vec<super::ExportedSymbol>) {
            let mut registry = TypeRegistry::new();

            for &raw in &self.pointers {
                registry.intern_pointer(Type::from_representation(raw));
            }
            for &raw in &self.buffer_pointers {
                registry.intern_buffer_pointer(Type::from_representation(raw));
            }
            for &raw in &self.slices {
                registry.intern_slice(Type::from_representation(raw));
            }
            for entry in &self.arrays {
                registry.intern_array(entry.length, Type::from_representation(entry.element));
            }
            for list in &self.parameter_lists {
                let params = list
                    .iter()
                    .map(|p| Parameter { name: p.name.clone(), ty: Type::from_representation(p.ty) })
                    .collect();
                registry.intern_parameters(params);
            }
            for entry in &self.functions {
                let params_id = crate::types::ParametersId::from_u32(entry.params);
                let returns = entry.returns.iter().map(|&r| Type::from_representation(r)).collect();
                registry.intern_function(params_id, returns, evaluation_from_tag(entry.evaluation));
            }
            for &raw in &self.patterns {
                registry.intern_pattern(Type::from_representation(raw));
            }
            for entry in &self.enums {
                let module = ModuleId::from_u32(entry.module);
                let ty = registry.create_enum(module);
                for (name, value) in &entry.members {
                    registry.enum_data_mut(ty).add_member_with_value(name.clone(), *value);
                }
                if entry.complete {
                    registry.enum_data_mut(ty).complete();
                }
            }
            for entry in &self.flags {
                let module = ModuleId::from_u32(entry.module);
                let ty = registry.create_flags(module);
                for (name, _value) in &entry.members {
                    registry.flags_data_mut(ty).add_member(name.clone());
                }
                if entry.complete {
                    registry.flags_data_mut(ty).complete();
                }
            }
            for entry in &self.structs {
                let module = ModuleId::from_u32(entry.module);
                let ty = registry.create_struct(module);
                for field in &entry.fields {
                    registry.struct_data_mut(ty).add_field(crate::types::nominal::StructField {
                        name: field.name.clone(),
                        ty: Type::from_representation(field.ty),
                        exported: field.exported,
                    });
                }
                if entry.complete {
                    registry.struct_data_mut(ty).complete();
                }
            }
            for &module in &self.opaques {
                registry.create_opaque(ModuleId::from_u32(module));
            }

            let exports = self
                .exports
                .iter()
                .map(|e| super::ExportedSymbol {
                    name: e.name.clone(),
                    ty: Type::from_representation(e.ty),
                    value: e.value.clone(),
                })
                .collect();

            (registry, exports)
        }

        pub fn to_bincode(&self) -> Result<Vec<u8>, bincode::Error> {
            bincode::serialize(self)
        }

        pub fn from_bincode(bytes: &[u8]) -> Result<Self, bincode::Error> {
            bincode::deserialize(bytes)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::types::Primitive;

        #[test]
        fn round_trips_a_pointer_and_a_struct() {
            let mut module = Module::new();
            let i64_ty = Type::from_primitive(Primitive::I64);
            let ptr_ty = module.registry_mut().intern_pointer(i64_ty);

            let struct_ty = module.registry_mut().create_struct(module.id());
            module.registry_mut().struct_data_mut(struct_ty).add_field(crate::types::nominal::StructField {
                name: "value".into(),
                ty: ptr_ty,
                exported: true,
            });
            module.registry_mut().struct_data_mut(struct_ty).complete();
            module.export("the_struct", struct_ty, vec![0; 8]);

            let image = ModuleImage::capture(&module);
            let bytes = image.to_bincode().unwrap();
            let restored = ModuleImage::from_bincode(&bytes).unwrap();
            let (registry, exports) = restored.restore();

            assert_eq!(exports.len(), 1);
            assert_eq!(exports[0].name, "the_struct");
            let restored_struct = exports[0].ty;
            assert_eq!(registry.struct_data(restored_struct).fields.len(), 1);
            assert_eq!(registry.struct_data(restored_struct).fields[0].name, "value");
            let restored_ptr = registry.struct_data(restored_struct).fields[0].ty;
            assert_eq!(registry.decompose_pointer(restored_ptr), i64_ty);
        }
    }
}
