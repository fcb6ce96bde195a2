use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::ast::LocalId;
use crate::module::{FunctionId, Module, PrimitiveClass, PrimitiveKind, TypeId, TypeLayout};
use crate::number::NumberType;
use crate::value::{FuncRef, Operand, PhiRef, TypeRef, VarId};

bitflags::bitflags! {
    pub struct VariableFlags: u8 {
        /// The variable holds an address: it must be loaded and stored
        /// through, never moved.
        const REFERENCE = 1 << 0;
        /// The value does not fit the by-value ABI and is always passed by
        /// address.
        const LARGE_OBJECT = 1 << 1;
    }
}

impl Default for VariableFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Shape summary of a function-local type: enough for the interpreter and
/// the serialized form to stand alone, without the module graph.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TypeShape {
    pub kind: PrimitiveKind,
    pub class: PrimitiveClass,
    pub rows: u32,
    pub columns: u32,
}

impl TypeShape {
    pub fn of(module: &Module, ty: TypeId) -> Self {
        match &module.types[ty] {
            TypeLayout::Primitive(p) => Self {
                kind: p.kind,
                class: p.class,
                rows: p.rows,
                columns: p.columns,
            },
            _ => Self::default(),
        }
    }
}

/// One entry of the function-local type table.
#[derive(Debug, Clone, Default)]
pub struct TypeEntry {
    pub name: String,
    pub shape: TypeShape,
    /// Back-reference into the module layout. Present when the table was
    /// built from an AST; absent after deserialization until re-linked.
    pub layout: Option<TypeId>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Variable {
    pub id: VarId,
    pub ty: TypeRef,
    pub flags: VariableFlags,
}

impl Variable {
    pub fn is_reference(&self) -> bool {
        self.flags.contains(VariableFlags::REFERENCE)
    }

    pub fn is_large_object(&self) -> bool {
        self.flags.contains(VariableFlags::LARGE_OBJECT)
    }

    pub fn as_operand(&self) -> Operand {
        Operand::Var(self.id)
    }
}

/// Where a call-target table entry points.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FuncTarget {
    /// Resolved against the module layout.
    Layout(FunctionId),
    /// A serialized record id awaiting the reader's fixup pass.
    Record(u64),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FuncEntry {
    pub target: FuncTarget,
}

/// A phi's merge state: the renamed result and one parameter slot per
/// predecessor of the owning block, in predecessor order.
#[derive(Debug, Clone, Default)]
pub struct PhiData {
    pub result: VarId,
    pub params: SmallVec<[VarId; 2]>,
}

/// Per-function registries mapping declarations to stable, dense IR ids:
/// types, variables (user and temporary pools), call targets and phis.
#[derive(Debug, Default)]
pub struct Metadata {
    pub types: Vec<TypeEntry>,
    type_map: FxHashMap<TypeId, TypeRef>,
    pub variables: Vec<Variable>,
    var_map: FxHashMap<LocalId, VarId>,
    pub temps: Vec<Variable>,
    pub functions: Vec<FuncEntry>,
    func_map: FxHashMap<FunctionId, FuncRef>,
    pub phis: Vec<PhiData>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `ty` into the local type table.
    pub fn reg_type(&mut self, module: &Module, ty: TypeId) -> TypeRef {
        if let Some(existing) = self.type_map.get(&ty) {
            return *existing;
        }
        let id = TypeRef::from_u32(self.types.len() as u32);
        self.types.push(TypeEntry {
            name: module.types[ty].name().to_string(),
            shape: TypeShape::of(module, ty),
            layout: Some(ty),
        });
        self.type_map.insert(ty, id);
        id
    }

    /// Registers (or finds) the variable bound to a local declaration.
    pub fn reg_var(&mut self, module: &Module, ty: TypeId, local: LocalId) -> Variable {
        if let Some(existing) = self.var_map.get(&local) {
            return self.var(*existing).expect("mapped variable exists");
        }
        let type_ref = self.reg_type(module, ty);
        let id = VarId::new(self.variables.len() as u32);
        let var = Variable {
            id,
            ty: type_ref,
            flags: module.var_type_flags(ty),
        };
        self.variables.push(var);
        self.var_map.insert(local, id);
        var
    }

    /// Allocates a fresh temporary of the given type.
    pub fn reg_temp(&mut self, module: &Module, ty: TypeId) -> Variable {
        let type_ref = self.reg_type(module, ty);
        let id = VarId::temp(self.temps.len() as u32);
        let var = Variable {
            id,
            ty: type_ref,
            flags: module.var_type_flags(ty),
        };
        self.temps.push(var);
        var
    }

    pub fn find_var(&self, local: LocalId) -> Option<Variable> {
        self.var_map.get(&local).and_then(|id| self.var(*id))
    }

    /// Looks up a variable by id, version-insensitively.
    pub fn var(&self, id: VarId) -> Option<Variable> {
        if !id.is_valid() {
            return None;
        }
        let index = id.index() as usize;
        if id.is_temp() {
            self.temps.get(index).copied()
        } else {
            self.variables.get(index).copied()
        }
    }

    pub fn reg_func(&mut self, func: FunctionId) -> FuncRef {
        if let Some(existing) = self.func_map.get(&func) {
            return *existing;
        }
        let id = FuncRef::from_u32(self.functions.len() as u32);
        self.functions.push(FuncEntry {
            target: FuncTarget::Layout(func),
        });
        self.func_map.insert(func, id);
        id
    }

    pub fn func(&self, id: FuncRef) -> Option<FuncEntry> {
        self.functions.get(id.as_u32() as usize).copied()
    }

    /// Removes a call target and renumbers every subsequent entry in
    /// place. Outstanding [FuncRef]s held by instructions go stale, so
    /// this is a post-link-time-only operation.
    pub fn remove_func(&mut self, func: FunctionId) {
        let Some(removed) = self.func_map.remove(&func) else {
            return;
        };
        let index = removed.as_u32() as usize;
        self.functions.remove(index);
        for slot in self.func_map.values_mut() {
            if slot.as_u32() as usize > index {
                *slot = FuncRef::from_u32(slot.as_u32() - 1);
            }
        }
    }

    pub fn make_phi(&mut self, result: VarId, param_count: usize) -> PhiRef {
        let id = PhiRef::from_u32(self.phis.len() as u32);
        self.phis.push(PhiData {
            result,
            params: SmallVec::from_elem(VarId::INVALID, param_count),
        });
        id
    }

    pub fn phi(&self, id: PhiRef) -> &PhiData {
        &self.phis[id.as_u32() as usize]
    }

    pub fn phi_mut(&mut self, id: PhiRef) -> &mut PhiData {
        &mut self.phis[id.as_u32() as usize]
    }

    pub fn type_entry(&self, id: TypeRef) -> Option<&TypeEntry> {
        self.types.get(id.as_u32() as usize)
    }

    pub fn type_name(&self, id: TypeRef) -> &str {
        self.type_entry(id).map(|e| e.name.as_str()).unwrap_or("?")
    }

    /// The scalar kind a variable's declared type stores, if it has one.
    pub fn var_number_type(&self, id: VarId) -> Option<NumberType> {
        let var = self.var(id)?;
        self.type_entry(var.ty)?.shape.kind.number_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleBuilder, PrimitiveKind};

    #[test]
    fn type_interning_is_idempotent() {
        let mut builder = ModuleBuilder::new();
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let module = builder.build();

        let mut meta = Metadata::new();
        let a = meta.reg_type(&module, int);
        let b = meta.reg_type(&module, int);
        assert_eq!(a, b);
        assert_eq!(meta.types.len(), 1);
        assert_eq!(meta.type_name(a), "int");
    }

    #[test]
    fn temps_live_in_their_own_pool() {
        let mut builder = ModuleBuilder::new();
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let module = builder.build();

        let mut meta = Metadata::new();
        let t0 = meta.reg_temp(&module, int);
        let t1 = meta.reg_temp(&module, int);
        assert!(t0.id.is_temp());
        assert_eq!(t0.id.index(), 0);
        assert_eq!(t1.id.index(), 1);
        assert_eq!(meta.variables.len(), 0);
        assert_eq!(meta.var(t1.id), Some(t1));
    }

    #[test]
    fn remove_func_renumbers_later_entries() {
        let mut builder = ModuleBuilder::new();
        let ns = builder.namespace("demo");
        let f0 = builder.function(ns, "a", None);
        let f1 = builder.function(ns, "b", None);
        let f2 = builder.function(ns, "c", None);
        let module = builder.build();

        let mut meta = Metadata::new();
        meta.reg_func(f0);
        meta.reg_func(f1);
        meta.reg_func(f2);
        meta.remove_func(f1);

        assert_eq!(meta.functions.len(), 2);
        assert_eq!(meta.reg_func(f2).as_u32(), 1);
        let _ = module;
    }
}
