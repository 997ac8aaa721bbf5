//! Storage for `GenericFunction` bodies (`spec.md` §4.6): the dependent
//! term a `GenericFunctionKey` refers to by `DependentBodyId` rather than
//! embedding inline (keeping the flyweight key `Copy` and small, same
//! reasoning as `Struct`'s fields living in `NominalArena` rather than in
//! its flyweight key).

use hashbrown::HashMap;

use crate::ast::{Expr, Param, TypeExpr};
use crate::entity::PrimaryMap;
use crate::ir::entities::DependentBodyId;

/// A generic function's executable template: value parameters and a return
/// type that may reference `type_params` by name (`TypeExpr::Param`), plus
/// the body to emit once those names are bound to concrete `Type`s.
#[derive(Debug, Clone)]
pub struct DependentBody {
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub return_ty: Option<TypeExpr>,
    pub body: Expr,
}

/// Owns every [`DependentBody`] declared against one [`TypeRegistry`]
/// (`crate::types::TypeRegistry`), indexed by the same [`DependentBodyId`]
/// a `GenericFunctionKey` carries.
#[derive(Default)]
pub struct DependentBodyArena {
    bodies: PrimaryMap<DependentBodyId, DependentBody>,
}

impl DependentBodyArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, body: DependentBody) -> DependentBodyId {
        self.bodies.push(body)
    }

    pub fn get(&self, id: DependentBodyId) -> &DependentBody {
        &self.bodies[id]
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Evaluation, Primitive};

    #[test]
    fn declare_and_fetch_round_trips() {
        let mut arena = DependentBodyArena::new();
        let id = arena.declare(DependentBody {
            type_params: vec!["T".into()],
            params: vec![],
            return_ty: Some(TypeExpr::Param("T".into())),
            body: Expr::TypeValue(crate::types::Type::from_primitive(Primitive::I64)),
        });
        assert_eq!(arena.get(id).type_params, vec!["T".to_string()]);
        let _ = Evaluation::PreferRuntime;
    }
}
