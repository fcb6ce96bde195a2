use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;

use crate::blob::CodeBlob;
use crate::metadata::VariableFlags;
use crate::number::NumberType;

/// A handle to a namespace record.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespaceId(u32);
entity_impl!(NamespaceId, "ns");

/// A handle to a type record (primitive, pointer, or struct).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u32);
entity_impl!(TypeId, "ty");

/// A handle to a function, operator, or constructor record.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(u32);
entity_impl!(FunctionId, "func");

/// A handle to a field record.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(u32);
entity_impl!(FieldId, "field");

/// A handle to a parameter record.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamId(u32);
entity_impl!(ParamId, "param");

macro_rules! define_u8_enum {
    ($(#[$attr:meta])* $name:ident { $($variant:ident = $value:literal,)* }) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value,)*
        }

        impl $name {
            pub fn from_u8(raw: u8) -> Option<Self> {
                match raw {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

define_u8_enum! {
    AccessModifier {
        Private = 0,
        Protected = 1,
        Internal = 2,
        Public = 3,
    }
}

impl Default for AccessModifier {
    fn default() -> Self {
        Self::Private
    }
}

define_u8_enum! {
    StorageClass {
        None = 0,
        Static = 1,
        Const = 2,
        Uniform = 3,
        Shared = 4,
        GroupShared = 5,
    }
}

impl Default for StorageClass {
    fn default() -> Self {
        Self::None
    }
}

define_u8_enum! {
    InterpolationModifier {
        None = 0,
        Linear = 1,
        Centroid = 2,
        NoInterpolation = 3,
        NoPerspective = 4,
        Sample = 5,
    }
}

impl Default for InterpolationModifier {
    fn default() -> Self {
        Self::None
    }
}

define_u8_enum! {
    /// Scalar element kind of a primitive type.
    PrimitiveKind {
        Void = 0,
        Bool = 1,
        Int8 = 2,
        UInt8 = 3,
        Int16 = 4,
        UInt16 = 5,
        Int32 = 6,
        UInt32 = 7,
        Int64 = 8,
        UInt64 = 9,
        Half = 10,
        Float = 11,
        Double = 12,
        Min8Float = 13,
        Min10Float = 14,
        Min16Float = 15,
        Min12Int = 16,
        Min16Int = 17,
        Min16UInt = 18,
    }
}

impl Default for PrimitiveKind {
    fn default() -> Self {
        Self::Void
    }
}

impl PrimitiveKind {
    /// The interpreter-facing number kind, when one exists. Minimum
    /// precision kinds have no portable storage and map to nothing.
    pub fn number_type(&self) -> Option<NumberType> {
        match self {
            Self::Bool => Some(NumberType::U8),
            Self::Int8 => Some(NumberType::I8),
            Self::UInt8 => Some(NumberType::U8),
            Self::Int16 => Some(NumberType::I16),
            Self::UInt16 => Some(NumberType::U16),
            Self::Int32 => Some(NumberType::I32),
            Self::UInt32 => Some(NumberType::U32),
            Self::Int64 => Some(NumberType::I64),
            Self::UInt64 => Some(NumberType::U64),
            Self::Half => Some(NumberType::F16),
            Self::Float => Some(NumberType::F32),
            Self::Double => Some(NumberType::F64),
            _ => None,
        }
    }
}

define_u8_enum! {
    PrimitiveClass {
        Scalar = 0,
        Vector = 1,
        Matrix = 2,
    }
}

impl Default for PrimitiveClass {
    fn default() -> Self {
        Self::Scalar
    }
}

define_u8_enum! {
    /// Source-level operator identities for operator overload records.
    OperatorSym {
        Add = 0,
        Subtract = 1,
        Multiply = 2,
        Divide = 3,
        Modulus = 4,
        BitwiseShiftLeft = 5,
        BitwiseShiftRight = 6,
        AndAnd = 7,
        OrOr = 8,
        BitwiseAnd = 9,
        BitwiseOr = 10,
        BitwiseXor = 11,
        LessThan = 12,
        LessThanOrEqual = 13,
        GreaterThan = 14,
        GreaterThanOrEqual = 15,
        Equal = 16,
        NotEqual = 17,
        Increment = 18,
        Decrement = 19,
        LogicalNot = 20,
        BitwiseNot = 21,
        Negate = 22,
        Cast = 23,
    }
}

bitflags::bitflags! {
    pub struct FunctionFlags: u16 {
        const INLINE = 1 << 0;
        const INTRINSIC = 1 << 1;
        const EXPLICIT_CAST = 1 << 2;
        const IMPLICIT_CAST = 1 << 3;
    }
}

impl Default for FunctionFlags {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags::bitflags! {
    pub struct StructFlags: u8 {
        const INTRINSIC = 1 << 0;
    }
}

impl Default for StructFlags {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags::bitflags! {
    pub struct OperatorFlags: u8 {
        const INTRINSIC = 1 << 0;
        const EXPLICIT = 1 << 1;
        const IMPLICIT = 1 << 2;
    }
}

impl Default for OperatorFlags {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags::bitflags! {
    pub struct ParameterFlags: u8 {
        const IN = 1 << 0;
        const OUT = 1 << 1;
        const UNIFORM = 1 << 2;
    }
}

impl Default for ParameterFlags {
    fn default() -> Self {
        Self::IN
    }
}

/// A scalar/vector/matrix built-in type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Primitive {
    pub name: String,
    pub access: AccessModifier,
    pub kind: PrimitiveKind,
    pub class: PrimitiveClass,
    pub rows: u32,
    pub columns: u32,
}

/// An address-of wrapper marking "this variable holds a reference".
#[derive(Debug, Clone, PartialEq)]
pub struct Pointer {
    pub name: String,
    pub access: AccessModifier,
    pub element: TypeId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Struct {
    pub name: String,
    pub access: AccessModifier,
    pub flags: StructFlags,
    /// Field offset equals position in this list.
    pub fields: Vec<FieldId>,
    pub functions: Vec<FunctionId>,
    pub operators: Vec<FunctionId>,
    pub constructors: Vec<FunctionId>,
    pub nested: Vec<TypeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeLayout {
    Primitive(Primitive),
    Pointer(Pointer),
    Struct(Struct),
}

impl Default for TypeLayout {
    fn default() -> Self {
        Self::Primitive(Primitive::default())
    }
}

impl TypeLayout {
    pub fn name(&self) -> &str {
        match self {
            Self::Primitive(p) => &p.name,
            Self::Pointer(p) => &p.name,
            Self::Struct(s) => &s.name,
        }
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Self::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            Self::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            Self::Struct(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Field {
    pub name: String,
    pub semantic: String,
    pub ty: Option<TypeId>,
    pub access: AccessModifier,
    pub storage: StorageClass,
    pub interpolation: InterpolationModifier,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub semantic: String,
    pub ty: Option<TypeId>,
    pub storage: StorageClass,
    pub interpolation: InterpolationModifier,
    pub flags: ParameterFlags,
}

/// Distinguishes the three callable record flavors. They share one layout
/// struct; the serializer picks the record tag from this.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionKind {
    Plain,
    Operator {
        op: OperatorSym,
        flags: OperatorFlags,
    },
    Constructor,
}

impl Default for FunctionKind {
    fn default() -> Self {
        Self::Plain
    }
}

#[derive(Debug, Default)]
pub struct FunctionLayout {
    pub name: String,
    pub kind: FunctionKind,
    pub return_type: Option<TypeId>,
    pub access: AccessModifier,
    pub storage: StorageClass,
    pub flags: FunctionFlags,
    pub params: Vec<ParamId>,
    /// The IR body. An intrinsic or unlowered function has an empty blob.
    pub blob: CodeBlob,
}

impl FunctionLayout {
    pub fn has_body(&self) -> bool {
        !self.blob.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespace {
    pub name: String,
    pub structs: Vec<TypeId>,
    pub functions: Vec<FunctionId>,
    pub fields: Vec<FieldId>,
    pub nested: Vec<NamespaceId>,
}

/// The declarative half of a compilation unit: every layout entity lives in
/// one of these dense tables, and all cross references are entity ids.
///
/// A module outlives every function body it owns; each body's instructions
/// live in that body's own arena.
#[derive(Default)]
pub struct Module {
    pub namespaces: PrimaryMap<NamespaceId, Namespace>,
    pub types: PrimaryMap<TypeId, TypeLayout>,
    pub functions: PrimaryMap<FunctionId, FunctionLayout>,
    pub fields: PrimaryMap<FieldId, Field>,
    pub params: PrimaryMap<ParamId, Parameter>,
    /// Top-level namespaces, in declaration order.
    pub root: Vec<NamespaceId>,
    /// Every function in the module, flat, in declaration (or read) order.
    pub function_index: Vec<FunctionId>,
    pointer_cache: FxHashMap<TypeId, TypeId>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_name(&self, ty: TypeId) -> &str {
        self.types[ty].name()
    }

    /// Interns the address-of wrapper for `element`.
    pub fn pointer_to(&mut self, element: TypeId) -> TypeId {
        if let Some(existing) = self.pointer_cache.get(&element) {
            return *existing;
        }
        let name = format!("{}*", self.types[element].name());
        let ptr = self.types.push(TypeLayout::Pointer(Pointer {
            name,
            access: AccessModifier::Internal,
            element,
        }));
        self.pointer_cache.insert(element, ptr);
        ptr
    }

    /// Re-primes the pointer intern cache from the type table. The module
    /// reader calls this so later lowering reuses deserialized wrappers.
    pub(crate) fn rebuild_pointer_cache(&mut self) {
        self.pointer_cache.clear();
        for (id, ty) in self.types.iter() {
            if let TypeLayout::Pointer(p) = ty {
                self.pointer_cache.insert(p.element, id);
            }
        }
    }

    /// Variable flags implied by a declared type: matrices and structs are
    /// large objects, pointers and matrices are references.
    pub fn var_type_flags(&self, ty: TypeId) -> VariableFlags {
        match &self.types[ty] {
            TypeLayout::Primitive(p) => {
                if p.class == PrimitiveClass::Matrix {
                    VariableFlags::LARGE_OBJECT | VariableFlags::REFERENCE
                } else {
                    VariableFlags::empty()
                }
            }
            TypeLayout::Pointer(_) => VariableFlags::REFERENCE,
            TypeLayout::Struct(_) => VariableFlags::LARGE_OBJECT,
        }
    }
}

/// Imperative construction surface for a [Module]; what the frontend's
/// declaration pass drives, and what tests use to assemble fixtures.
#[derive(Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(&mut self, name: impl Into<String>) -> NamespaceId {
        let id = self.module.namespaces.push(Namespace {
            name: name.into(),
            ..Namespace::default()
        });
        self.module.root.push(id);
        id
    }

    pub fn nested_namespace(
        &mut self,
        parent: NamespaceId,
        name: impl Into<String>,
    ) -> NamespaceId {
        let id = self.module.namespaces.push(Namespace {
            name: name.into(),
            ..Namespace::default()
        });
        self.module.namespaces[parent].nested.push(id);
        id
    }

    pub fn primitive(
        &mut self,
        name: impl Into<String>,
        kind: PrimitiveKind,
        class: PrimitiveClass,
        rows: u32,
        columns: u32,
    ) -> TypeId {
        self.module.types.push(TypeLayout::Primitive(Primitive {
            name: name.into(),
            access: AccessModifier::Public,
            kind,
            class,
            rows,
            columns,
        }))
    }

    pub fn scalar(&mut self, name: impl Into<String>, kind: PrimitiveKind) -> TypeId {
        self.primitive(name, kind, PrimitiveClass::Scalar, 1, 1)
    }

    pub fn struct_type(
        &mut self,
        ns: NamespaceId,
        name: impl Into<String>,
        access: AccessModifier,
    ) -> TypeId {
        let id = self.module.types.push(TypeLayout::Struct(Struct {
            name: name.into(),
            access,
            ..Struct::default()
        }));
        self.module.namespaces[ns].structs.push(id);
        id
    }

    pub fn struct_field(
        &mut self,
        owner: TypeId,
        name: impl Into<String>,
        ty: TypeId,
    ) -> FieldId {
        let field = self.module.fields.push(Field {
            name: name.into(),
            ty: Some(ty),
            access: AccessModifier::Public,
            ..Field::default()
        });
        match &mut self.module.types[owner] {
            TypeLayout::Struct(s) => s.fields.push(field),
            _ => debug_assert!(false, "fields can only be added to structs"),
        }
        field
    }

    pub fn global_field(
        &mut self,
        ns: NamespaceId,
        name: impl Into<String>,
        ty: TypeId,
        storage: StorageClass,
    ) -> FieldId {
        let field = self.module.fields.push(Field {
            name: name.into(),
            ty: Some(ty),
            access: AccessModifier::Public,
            storage,
            ..Field::default()
        });
        self.module.namespaces[ns].fields.push(field);
        field
    }

    pub fn function(
        &mut self,
        ns: NamespaceId,
        name: impl Into<String>,
        return_type: Option<TypeId>,
    ) -> FunctionId {
        let id = self.module.functions.push(FunctionLayout {
            name: name.into(),
            return_type,
            access: AccessModifier::Public,
            ..FunctionLayout::default()
        });
        self.module.namespaces[ns].functions.push(id);
        self.module.function_index.push(id);
        id
    }

    pub fn method(
        &mut self,
        owner: TypeId,
        name: impl Into<String>,
        return_type: Option<TypeId>,
    ) -> FunctionId {
        let id = self.module.functions.push(FunctionLayout {
            name: name.into(),
            return_type,
            access: AccessModifier::Public,
            ..FunctionLayout::default()
        });
        match &mut self.module.types[owner] {
            TypeLayout::Struct(s) => s.functions.push(id),
            _ => debug_assert!(false, "methods can only be added to structs"),
        }
        self.module.function_index.push(id);
        id
    }

    pub fn operator(
        &mut self,
        owner: TypeId,
        op: OperatorSym,
        flags: OperatorFlags,
        return_type: Option<TypeId>,
    ) -> FunctionId {
        let id = self.module.functions.push(FunctionLayout {
            name: format!("operator#{}", op as u8),
            kind: FunctionKind::Operator { op, flags },
            return_type,
            access: AccessModifier::Public,
            ..FunctionLayout::default()
        });
        match &mut self.module.types[owner] {
            TypeLayout::Struct(s) => s.operators.push(id),
            _ => debug_assert!(false, "operators can only be added to structs"),
        }
        self.module.function_index.push(id);
        id
    }

    pub fn constructor(&mut self, owner: TypeId) -> FunctionId {
        let id = self.module.functions.push(FunctionLayout {
            name: "ctor".to_string(),
            kind: FunctionKind::Constructor,
            access: AccessModifier::Public,
            ..FunctionLayout::default()
        });
        match &mut self.module.types[owner] {
            TypeLayout::Struct(s) => s.constructors.push(id),
            _ => debug_assert!(false, "constructors can only be added to structs"),
        }
        self.module.function_index.push(id);
        id
    }

    pub fn parameter(&mut self, func: FunctionId, name: impl Into<String>, ty: TypeId) -> ParamId {
        let param = self.module.params.push(Parameter {
            name: name.into(),
            ty: Some(ty),
            ..Parameter::default()
        });
        self.module.functions[func].params.push(param);
        param
    }

    pub fn set_body(&mut self, func: FunctionId, blob: CodeBlob) {
        self.module.functions[func].blob = blob;
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    pub fn build(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_types_are_interned() {
        let mut builder = ModuleBuilder::new();
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let module = builder.module_mut();
        let a = module.pointer_to(int);
        let b = module.pointer_to(int);
        assert_eq!(a, b);
        assert_eq!(module.type_name(a), "int*");
    }

    #[test]
    fn var_type_flags_follow_the_shape() {
        let mut builder = ModuleBuilder::new();
        let ns = builder.namespace("demo");
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let mat = builder.primitive(
            "float4x4",
            PrimitiveKind::Float,
            PrimitiveClass::Matrix,
            4,
            4,
        );
        let strct = builder.struct_type(ns, "P", AccessModifier::Public);
        let module = builder.module_mut();
        let ptr = module.pointer_to(strct);

        assert!(module.var_type_flags(int).is_empty());
        assert_eq!(
            module.var_type_flags(mat),
            VariableFlags::LARGE_OBJECT | VariableFlags::REFERENCE
        );
        assert_eq!(module.var_type_flags(strct), VariableFlags::LARGE_OBJECT);
        assert_eq!(module.var_type_flags(ptr), VariableFlags::REFERENCE);
    }
}
