//! Deterministic binary round-trip of the module graph.
//!
//! Writing is two-step: a topological walk over the layout entities
//! assigns each one a record id in post-order (children before parents),
//! then records are emitted in id order. Cross-references are record ids,
//! never offsets. Reading is symmetric and three-phase: every record body
//! is decoded into raw form first, then one entity is pre-allocated per
//! record (so cycles resolve), then bodies are filled through the id map.

mod encode;

use std::io::{Read, Write};

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::blob::CodeBlob;
use crate::errors::{ReadError, WriteError};
use crate::metadata::FuncTarget;
use crate::module::{
    AccessModifier, Field, FieldId, FunctionFlags, FunctionId, FunctionKind, FunctionLayout,
    InterpolationModifier, Module, Namespace, NamespaceId, OperatorFlags, OperatorSym, ParamId,
    Parameter, ParameterFlags, Pointer, Primitive, PrimitiveClass, PrimitiveKind, StorageClass,
    Struct, StructFlags, TypeId, TypeLayout,
};

use self::encode::{
    read_blob, read_string, read_u16, read_u32, read_u64, read_u8, write_blob, write_string,
    write_u16, write_u32, write_u64, write_u8,
};

const TAG_MODULE: u8 = 1;
const TAG_NAMESPACE: u8 = 2;
const TAG_STRUCT: u8 = 3;
const TAG_FUNCTION: u8 = 4;
const TAG_OPERATOR: u8 = 5;
const TAG_CONSTRUCTOR: u8 = 6;
const TAG_PARAMETER: u8 = 7;
const TAG_FIELD: u8 = 8;
const TAG_POINTER: u8 = 9;
const TAG_PRIMITIVE: u8 = 10;

/// `recordId == 0` is the null reference.
const NULL_RECORD: u64 = 0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum LayoutRef {
    Module,
    Namespace(NamespaceId),
    Type(TypeId),
    Function(FunctionId),
    Field(FieldId),
    Param(ParamId),
}

/// Writes `module` to `w` in the binary module format.
pub fn write_module<W: Write>(w: &mut W, module: &Module) -> Result<(), WriteError> {
    ModuleWriter {
        records: FxHashMap::default(),
    }
    .write(w, module)
}

struct ModuleWriter {
    records: FxHashMap<LayoutRef, u64>,
}

impl ModuleWriter {
    fn write<W: Write>(&mut self, w: &mut W, module: &Module) -> Result<(), WriteError> {
        let sorted = self.assign_ids(module);
        log::debug!("writing module: {} records", sorted.len());

        write_u64(w, sorted.len() as u64)?;
        for layout in sorted {
            match layout {
                LayoutRef::Module => self.write_module_record(w, module)?,
                LayoutRef::Namespace(id) => self.write_namespace(w, module, id)?,
                LayoutRef::Type(id) => match &module.types[id] {
                    TypeLayout::Primitive(p) => self.write_primitive(w, layout, p)?,
                    TypeLayout::Pointer(p) => self.write_pointer(w, layout, p)?,
                    TypeLayout::Struct(s) => self.write_struct(w, layout, s)?,
                },
                LayoutRef::Function(id) => self.write_function(w, module, id)?,
                LayoutRef::Field(id) => self.write_field(w, module, id)?,
                LayoutRef::Param(id) => self.write_parameter(w, module, id)?,
            }
        }
        Ok(())
    }

    /// Post-order walk assigning record ids, children first. Duplicate
    /// visits are cut by the visited set; the only cycles in the graph
    /// (types reaching themselves through member functions) resolve as
    /// forward references on the reader side.
    fn assign_ids(&mut self, module: &Module) -> Vec<LayoutRef> {
        let mut stack: Vec<(LayoutRef, bool)> = vec![(LayoutRef::Module, false)];
        let mut visited: FxHashSet<LayoutRef> = FxHashSet::default();
        let mut sorted: Vec<LayoutRef> = Vec::new();
        let mut counter: u64 = 1;

        while let Some((layout, closing)) = stack.pop() {
            if closing {
                self.records.insert(layout, counter);
                counter += 1;
                sorted.push(layout);
                continue;
            }
            if !visited.insert(layout) {
                continue;
            }
            stack.push((layout, true));
            for child in children(module, layout) {
                stack.push((child, false));
            }
        }
        sorted
    }

    fn record_ref(&self, layout: LayoutRef) -> u64 {
        match self.records.get(&layout) {
            Some(id) => *id,
            None => {
                debug_assert!(false, "reference to a record outside the layout graph");
                NULL_RECORD
            }
        }
    }

    fn opt_type_ref(&self, ty: Option<TypeId>) -> u64 {
        ty.map(|t| self.record_ref(LayoutRef::Type(t)))
            .unwrap_or(NULL_RECORD)
    }

    fn write_header<W: Write>(&self, w: &mut W, tag: u8, layout: LayoutRef) -> Result<(), WriteError> {
        write_u8(w, tag)?;
        write_u64(w, self.record_ref(layout))
    }

    fn write_ref_list<W: Write>(
        &self,
        w: &mut W,
        refs: impl ExactSizeIterator<Item = LayoutRef>,
    ) -> Result<(), WriteError> {
        write_u32(w, refs.len() as u32)?;
        for layout in refs {
            write_u64(w, self.record_ref(layout))?;
        }
        Ok(())
    }

    fn write_module_record<W: Write>(&self, w: &mut W, module: &Module) -> Result<(), WriteError> {
        self.write_header(w, TAG_MODULE, LayoutRef::Module)?;
        self.write_ref_list(w, module.root.iter().map(|n| LayoutRef::Namespace(*n)))
    }

    fn write_namespace<W: Write>(
        &self,
        w: &mut W,
        module: &Module,
        id: NamespaceId,
    ) -> Result<(), WriteError> {
        let ns = &module.namespaces[id];
        self.write_header(w, TAG_NAMESPACE, LayoutRef::Namespace(id))?;
        write_string(w, &ns.name)?;
        self.write_ref_list(w, ns.structs.iter().map(|t| LayoutRef::Type(*t)))?;
        self.write_ref_list(w, ns.functions.iter().map(|f| LayoutRef::Function(*f)))?;
        self.write_ref_list(w, ns.fields.iter().map(|f| LayoutRef::Field(*f)))?;
        self.write_ref_list(w, ns.nested.iter().map(|n| LayoutRef::Namespace(*n)))
    }

    fn write_struct<W: Write>(
        &self,
        w: &mut W,
        layout: LayoutRef,
        s: &Struct,
    ) -> Result<(), WriteError> {
        self.write_header(w, TAG_STRUCT, layout)?;
        write_string(w, &s.name)?;
        write_u8(w, s.access as u8)?;
        write_u8(w, s.flags.bits())?;
        self.write_ref_list(w, s.fields.iter().map(|f| LayoutRef::Field(*f)))?;
        self.write_ref_list(w, s.functions.iter().map(|f| LayoutRef::Function(*f)))?;
        self.write_ref_list(w, s.operators.iter().map(|f| LayoutRef::Function(*f)))?;
        self.write_ref_list(w, s.constructors.iter().map(|f| LayoutRef::Function(*f)))?;
        self.write_ref_list(w, s.nested.iter().map(|t| LayoutRef::Type(*t)))
    }

    fn write_function<W: Write>(
        &self,
        w: &mut W,
        module: &Module,
        id: FunctionId,
    ) -> Result<(), WriteError> {
        let func = &module.functions[id];
        match &func.kind {
            FunctionKind::Plain => {
                self.write_header(w, TAG_FUNCTION, LayoutRef::Function(id))?;
                write_string(w, &func.name)?;
                write_u64(w, self.opt_type_ref(func.return_type))?;
            }
            FunctionKind::Operator { op, flags } => {
                self.write_header(w, TAG_OPERATOR, LayoutRef::Function(id))?;
                write_u8(w, *op as u8)?;
                write_u8(w, flags.bits())?;
                write_u64(w, self.opt_type_ref(func.return_type))?;
            }
            FunctionKind::Constructor => {
                self.write_header(w, TAG_CONSTRUCTOR, LayoutRef::Function(id))?;
            }
        }
        write_u8(w, func.access as u8)?;
        write_u8(w, func.storage as u8)?;
        write_u16(w, func.flags.bits())?;
        self.write_ref_list(w, func.params.iter().map(|p| LayoutRef::Param(*p)))?;
        write_blob(w, &func.blob, &|callee| {
            self.record_ref(LayoutRef::Function(callee))
        })
    }

    fn write_parameter<W: Write>(
        &self,
        w: &mut W,
        module: &Module,
        id: ParamId,
    ) -> Result<(), WriteError> {
        let param = &module.params[id];
        self.write_header(w, TAG_PARAMETER, LayoutRef::Param(id))?;
        write_string(w, &param.name)?;
        write_string(w, &param.semantic)?;
        write_u64(w, self.opt_type_ref(param.ty))?;
        write_u8(w, param.storage as u8)?;
        write_u8(w, param.interpolation as u8)?;
        write_u8(w, param.flags.bits())
    }

    fn write_field<W: Write>(
        &self,
        w: &mut W,
        module: &Module,
        id: FieldId,
    ) -> Result<(), WriteError> {
        let field = &module.fields[id];
        self.write_header(w, TAG_FIELD, LayoutRef::Field(id))?;
        write_string(w, &field.name)?;
        write_string(w, &field.semantic)?;
        write_u64(w, self.opt_type_ref(field.ty))?;
        write_u8(w, field.access as u8)?;
        write_u8(w, field.storage as u8)?;
        write_u8(w, field.interpolation as u8)
    }

    fn write_pointer<W: Write>(
        &self,
        w: &mut W,
        layout: LayoutRef,
        ptr: &Pointer,
    ) -> Result<(), WriteError> {
        self.write_header(w, TAG_POINTER, layout)?;
        write_string(w, &ptr.name)?;
        write_u8(w, ptr.access as u8)?;
        write_u64(w, self.record_ref(LayoutRef::Type(ptr.element)))
    }

    fn write_primitive<W: Write>(
        &self,
        w: &mut W,
        layout: LayoutRef,
        prim: &Primitive,
    ) -> Result<(), WriteError> {
        self.write_header(w, TAG_PRIMITIVE, layout)?;
        write_string(w, &prim.name)?;
        write_u8(w, prim.access as u8)?;
        write_u8(w, prim.kind as u8)?;
        write_u8(w, prim.class as u8)?;
        write_u32(w, prim.rows)?;
        write_u32(w, prim.columns)
    }
}

fn children(module: &Module, layout: LayoutRef) -> SmallVec<[LayoutRef; 8]> {
    let mut out: SmallVec<[LayoutRef; 8]> = SmallVec::new();
    match layout {
        LayoutRef::Module => {
            out.extend(module.root.iter().map(|n| LayoutRef::Namespace(*n)));
        }
        LayoutRef::Namespace(id) => {
            let ns = &module.namespaces[id];
            out.extend(ns.structs.iter().map(|t| LayoutRef::Type(*t)));
            out.extend(ns.functions.iter().map(|f| LayoutRef::Function(*f)));
            out.extend(ns.fields.iter().map(|f| LayoutRef::Field(*f)));
            out.extend(ns.nested.iter().map(|n| LayoutRef::Namespace(*n)));
        }
        LayoutRef::Type(id) => match &module.types[id] {
            TypeLayout::Primitive(_) => {}
            TypeLayout::Pointer(p) => out.push(LayoutRef::Type(p.element)),
            TypeLayout::Struct(s) => {
                out.extend(s.fields.iter().map(|f| LayoutRef::Field(*f)));
                out.extend(s.functions.iter().map(|f| LayoutRef::Function(*f)));
                out.extend(s.operators.iter().map(|f| LayoutRef::Function(*f)));
                out.extend(s.constructors.iter().map(|f| LayoutRef::Function(*f)));
                out.extend(s.nested.iter().map(|t| LayoutRef::Type(*t)));
            }
        },
        LayoutRef::Function(id) => {
            let func = &module.functions[id];
            if let Some(ret) = func.return_type {
                out.push(LayoutRef::Type(ret));
            }
            out.extend(func.params.iter().map(|p| LayoutRef::Param(*p)));
        }
        LayoutRef::Field(id) => {
            if let Some(ty) = module.fields[id].ty {
                out.push(LayoutRef::Type(ty));
            }
        }
        LayoutRef::Param(id) => {
            if let Some(ty) = module.params[id].ty {
                out.push(LayoutRef::Type(ty));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum RawBody {
    Module {
        namespaces: Vec<u64>,
    },
    Namespace {
        name: String,
        structs: Vec<u64>,
        functions: Vec<u64>,
        fields: Vec<u64>,
        nested: Vec<u64>,
    },
    Struct {
        name: String,
        access: AccessModifier,
        flags: StructFlags,
        fields: Vec<u64>,
        functions: Vec<u64>,
        operators: Vec<u64>,
        constructors: Vec<u64>,
        nested: Vec<u64>,
    },
    Function {
        name: String,
        kind: FunctionKind,
        return_type: u64,
        access: AccessModifier,
        storage: StorageClass,
        flags: FunctionFlags,
        params: Vec<u64>,
        blob: CodeBlob,
    },
    Parameter {
        name: String,
        semantic: String,
        ty: u64,
        storage: StorageClass,
        interpolation: InterpolationModifier,
        flags: ParameterFlags,
    },
    Field {
        name: String,
        semantic: String,
        ty: u64,
        access: AccessModifier,
        storage: StorageClass,
        interpolation: InterpolationModifier,
    },
    Pointer {
        name: String,
        access: AccessModifier,
        element: u64,
    },
    Primitive(Primitive),
}

struct RawRecord {
    id: u64,
    body: RawBody,
}

/// Reads a module from `r`.
pub fn read_module<R: Read>(r: &mut R) -> Result<Module, ReadError> {
    let record_count = read_u64(r)?;
    let mut raws: Vec<RawRecord> = Vec::with_capacity(record_count as usize);
    for _ in 0..record_count {
        raws.push(read_record(r)?);
    }

    // Pre-allocate one entity per record so that forward and cyclic
    // references resolve through the id map.
    let mut module = Module::new();
    let mut map: FxHashMap<u64, LayoutRef> = FxHashMap::default();
    let mut saw_module = false;
    for raw in raws.iter() {
        let layout = match &raw.body {
            RawBody::Module { .. } => {
                if saw_module {
                    return Err(ReadError::InvalidModule("more than one module record"));
                }
                saw_module = true;
                LayoutRef::Module
            }
            RawBody::Namespace { .. } => {
                LayoutRef::Namespace(module.namespaces.push(Namespace::default()))
            }
            RawBody::Struct { .. } => {
                LayoutRef::Type(module.types.push(TypeLayout::Struct(Struct::default())))
            }
            RawBody::Function { .. } => {
                LayoutRef::Function(module.functions.push(FunctionLayout::default()))
            }
            RawBody::Parameter { .. } => LayoutRef::Param(module.params.push(Parameter::default())),
            RawBody::Field { .. } => LayoutRef::Field(module.fields.push(Field::default())),
            RawBody::Pointer { .. } => LayoutRef::Type(module.types.push(TypeLayout::default())),
            RawBody::Primitive(_) => LayoutRef::Type(module.types.push(TypeLayout::default())),
        };
        if raw.id == NULL_RECORD {
            return Err(ReadError::InvalidModule("record uses the null id"));
        }
        if map.insert(raw.id, layout).is_some() {
            return Err(ReadError::InvalidModule("duplicate record id"));
        }
    }
    if !saw_module {
        return Err(ReadError::InvalidModule("missing module record"));
    }

    // Fill bodies, resolving references through the map. Functions also
    // accumulate into the flat index in read order.
    for raw in raws {
        fill_record(&mut module, &map, raw)?;
    }

    module.rebuild_pointer_cache();
    Ok(module)
}

fn read_record<R: Read>(r: &mut R) -> Result<RawRecord, ReadError> {
    let tag = read_u8(r)?;
    let id = read_u64(r)?;
    let body = match tag {
        TAG_MODULE => RawBody::Module {
            namespaces: read_ref_list(r)?,
        },
        TAG_NAMESPACE => RawBody::Namespace {
            name: read_string(r)?,
            structs: read_ref_list(r)?,
            functions: read_ref_list(r)?,
            fields: read_ref_list(r)?,
            nested: read_ref_list(r)?,
        },
        TAG_STRUCT => RawBody::Struct {
            name: read_string(r)?,
            access: read_access(r)?,
            flags: StructFlags::from_bits_truncate(read_u8(r)?),
            fields: read_ref_list(r)?,
            functions: read_ref_list(r)?,
            operators: read_ref_list(r)?,
            constructors: read_ref_list(r)?,
            nested: read_ref_list(r)?,
        },
        TAG_FUNCTION => {
            let name = read_string(r)?;
            let return_type = read_u64(r)?;
            let (access, storage, flags) = read_callable_flags(r)?;
            RawBody::Function {
                name,
                kind: FunctionKind::Plain,
                return_type,
                access,
                storage,
                flags,
                params: read_ref_list(r)?,
                blob: read_blob(r)?,
            }
        }
        TAG_OPERATOR => {
            let raw_op = read_u8(r)?;
            let op = OperatorSym::from_u8(raw_op)
                .ok_or(ReadError::InvalidModule("unknown operator symbol"))?;
            let op_flags = OperatorFlags::from_bits_truncate(read_u8(r)?);
            let return_type = read_u64(r)?;
            let (access, storage, flags) = read_callable_flags(r)?;
            RawBody::Function {
                name: format!("operator#{}", raw_op),
                kind: FunctionKind::Operator { op, flags: op_flags },
                return_type,
                access,
                storage,
                flags,
                params: read_ref_list(r)?,
                blob: read_blob(r)?,
            }
        }
        TAG_CONSTRUCTOR => {
            let (access, storage, flags) = read_callable_flags(r)?;
            RawBody::Function {
                name: "ctor".to_string(),
                kind: FunctionKind::Constructor,
                return_type: NULL_RECORD,
                access,
                storage,
                flags,
                params: read_ref_list(r)?,
                blob: read_blob(r)?,
            }
        }
        TAG_PARAMETER => RawBody::Parameter {
            name: read_string(r)?,
            semantic: read_string(r)?,
            ty: read_u64(r)?,
            storage: read_storage(r)?,
            interpolation: read_interpolation(r)?,
            flags: ParameterFlags::from_bits_truncate(read_u8(r)?),
        },
        TAG_FIELD => RawBody::Field {
            name: read_string(r)?,
            semantic: read_string(r)?,
            ty: read_u64(r)?,
            access: read_access(r)?,
            storage: read_storage(r)?,
            interpolation: read_interpolation(r)?,
        },
        TAG_POINTER => RawBody::Pointer {
            name: read_string(r)?,
            access: read_access(r)?,
            element: read_u64(r)?,
        },
        TAG_PRIMITIVE => {
            let name = read_string(r)?;
            let access = read_access(r)?;
            let raw_kind = read_u8(r)?;
            let kind = PrimitiveKind::from_u8(raw_kind)
                .ok_or(ReadError::InvalidModule("unknown primitive kind"))?;
            let raw_class = read_u8(r)?;
            let class = PrimitiveClass::from_u8(raw_class)
                .ok_or(ReadError::InvalidModule("unknown primitive class"))?;
            RawBody::Primitive(Primitive {
                name,
                access,
                kind,
                class,
                rows: read_u32(r)?,
                columns: read_u32(r)?,
            })
        }
        other => return Err(ReadError::UnknownTypeTag(other)),
    };
    Ok(RawRecord { id, body })
}

fn read_ref_list<R: Read>(r: &mut R) -> Result<Vec<u64>, ReadError> {
    let count = read_u32(r)? as usize;
    let mut refs = Vec::with_capacity(count);
    for _ in 0..count {
        refs.push(read_u64(r)?);
    }
    Ok(refs)
}

fn read_access<R: Read>(r: &mut R) -> Result<AccessModifier, ReadError> {
    let raw = read_u8(r)?;
    AccessModifier::from_u8(raw).ok_or(ReadError::InvalidModule("unknown access modifier"))
}

fn read_storage<R: Read>(r: &mut R) -> Result<StorageClass, ReadError> {
    let raw = read_u8(r)?;
    StorageClass::from_u8(raw).ok_or(ReadError::InvalidModule("unknown storage class"))
}

fn read_interpolation<R: Read>(r: &mut R) -> Result<InterpolationModifier, ReadError> {
    let raw = read_u8(r)?;
    InterpolationModifier::from_u8(raw)
        .ok_or(ReadError::InvalidModule("unknown interpolation modifier"))
}

fn read_callable_flags<R: Read>(
    r: &mut R,
) -> Result<(AccessModifier, StorageClass, FunctionFlags), ReadError> {
    let access = read_access(r)?;
    let storage = read_storage(r)?;
    let flags = FunctionFlags::from_bits_truncate(read_u16(r)?);
    Ok((access, storage, flags))
}

fn resolve(map: &FxHashMap<u64, LayoutRef>, id: u64) -> Result<LayoutRef, ReadError> {
    map.get(&id).copied().ok_or(ReadError::UnresolvedRecord(id))
}

fn resolve_type(map: &FxHashMap<u64, LayoutRef>, id: u64) -> Result<TypeId, ReadError> {
    match resolve(map, id)? {
        LayoutRef::Type(t) => Ok(t),
        _ => Err(ReadError::RecordKindMismatch(id)),
    }
}

fn resolve_opt_type(
    map: &FxHashMap<u64, LayoutRef>,
    id: u64,
) -> Result<Option<TypeId>, ReadError> {
    if id == NULL_RECORD {
        return Ok(None);
    }
    resolve_type(map, id).map(Some)
}

fn resolve_namespace(map: &FxHashMap<u64, LayoutRef>, id: u64) -> Result<NamespaceId, ReadError> {
    match resolve(map, id)? {
        LayoutRef::Namespace(n) => Ok(n),
        _ => Err(ReadError::RecordKindMismatch(id)),
    }
}

fn resolve_function(map: &FxHashMap<u64, LayoutRef>, id: u64) -> Result<FunctionId, ReadError> {
    match resolve(map, id)? {
        LayoutRef::Function(f) => Ok(f),
        _ => Err(ReadError::RecordKindMismatch(id)),
    }
}

fn resolve_field(map: &FxHashMap<u64, LayoutRef>, id: u64) -> Result<FieldId, ReadError> {
    match resolve(map, id)? {
        LayoutRef::Field(f) => Ok(f),
        _ => Err(ReadError::RecordKindMismatch(id)),
    }
}

fn resolve_param(map: &FxHashMap<u64, LayoutRef>, id: u64) -> Result<ParamId, ReadError> {
    match resolve(map, id)? {
        LayoutRef::Param(p) => Ok(p),
        _ => Err(ReadError::RecordKindMismatch(id)),
    }
}

fn resolve_all<T>(
    refs: &[u64],
    f: impl Fn(u64) -> Result<T, ReadError>,
) -> Result<Vec<T>, ReadError> {
    refs.iter().map(|id| f(*id)).collect()
}

fn fill_record(
    module: &mut Module,
    map: &FxHashMap<u64, LayoutRef>,
    raw: RawRecord,
) -> Result<(), ReadError> {
    let layout = map
        .get(&raw.id)
        .copied()
        .unwrap_or(LayoutRef::Module);
    match raw.body {
        RawBody::Module { namespaces } => {
            module.root = resolve_all(&namespaces, |id| resolve_namespace(map, id))?;
        }
        RawBody::Namespace {
            name,
            structs,
            functions,
            fields,
            nested,
        } => {
            let LayoutRef::Namespace(id) = layout else {
                return Err(ReadError::RecordKindMismatch(raw.id));
            };
            module.namespaces[id] = Namespace {
                name,
                structs: resolve_all(&structs, |r| resolve_type(map, r))?,
                functions: resolve_all(&functions, |r| resolve_function(map, r))?,
                fields: resolve_all(&fields, |r| resolve_field(map, r))?,
                nested: resolve_all(&nested, |r| resolve_namespace(map, r))?,
            };
        }
        RawBody::Struct {
            name,
            access,
            flags,
            fields,
            functions,
            operators,
            constructors,
            nested,
        } => {
            let LayoutRef::Type(id) = layout else {
                return Err(ReadError::RecordKindMismatch(raw.id));
            };
            module.types[id] = TypeLayout::Struct(Struct {
                name,
                access,
                flags,
                fields: resolve_all(&fields, |r| resolve_field(map, r))?,
                functions: resolve_all(&functions, |r| resolve_function(map, r))?,
                operators: resolve_all(&operators, |r| resolve_function(map, r))?,
                constructors: resolve_all(&constructors, |r| resolve_function(map, r))?,
                nested: resolve_all(&nested, |r| resolve_type(map, r))?,
            });
        }
        RawBody::Function {
            name,
            kind,
            return_type,
            access,
            storage,
            flags,
            params,
            mut blob,
        } => {
            let LayoutRef::Function(id) = layout else {
                return Err(ReadError::RecordKindMismatch(raw.id));
            };
            // Call targets were written as record ids; resolve them now
            // that every record has an entity.
            for entry in blob.metadata.functions.iter_mut() {
                if let FuncTarget::Record(record) = entry.target {
                    entry.target = FuncTarget::Layout(resolve_function(map, record)?);
                }
            }
            module.functions[id] = FunctionLayout {
                name,
                kind,
                return_type: resolve_opt_type(map, return_type)?,
                access,
                storage,
                flags,
                params: resolve_all(&params, |r| resolve_param(map, r))?,
                blob,
            };
            module.function_index.push(id);
        }
        RawBody::Parameter {
            name,
            semantic,
            ty,
            storage,
            interpolation,
            flags,
        } => {
            let LayoutRef::Param(id) = layout else {
                return Err(ReadError::RecordKindMismatch(raw.id));
            };
            module.params[id] = Parameter {
                name,
                semantic,
                ty: resolve_opt_type(map, ty)?,
                storage,
                interpolation,
                flags,
            };
        }
        RawBody::Field {
            name,
            semantic,
            ty,
            access,
            storage,
            interpolation,
        } => {
            let LayoutRef::Field(id) = layout else {
                return Err(ReadError::RecordKindMismatch(raw.id));
            };
            module.fields[id] = Field {
                name,
                semantic,
                ty: resolve_opt_type(map, ty)?,
                access,
                storage,
                interpolation,
            };
        }
        RawBody::Pointer {
            name,
            access,
            element,
        } => {
            let LayoutRef::Type(id) = layout else {
                return Err(ReadError::RecordKindMismatch(raw.id));
            };
            module.types[id] = TypeLayout::Pointer(Pointer {
                name,
                access,
                element: resolve_type(map, element)?,
            });
        }
        RawBody::Primitive(prim) => {
            let LayoutRef::Type(id) = layout else {
                return Err(ReadError::RecordKindMismatch(raw.id));
            };
            module.types[id] = TypeLayout::Primitive(prim);
        }
    }
    Ok(())
}
