//! Module serialization round-trip coverage: the written byte stream must
//! reconstruct the same annotated graph, and re-writing the reconstruction
//! must be bit-identical.
//!
//! Entities the layout graph never reaches (scratch pointer wrappers the
//! builder interned for temporaries) are not records, so graph equality is
//! checked on the serialized closure.

use pretty_assertions::assert_eq;

use hxsl_ir::ast::{Accessor, BinOp, Block, Expr, ExprKind, FunctionAst, Stmt, StmtKind};
use hxsl_ir::module::{
    AccessModifier, ModuleBuilder, OperatorFlags, OperatorSym, PrimitiveClass, PrimitiveKind,
    StorageClass, TypeLayout,
};
use hxsl_ir::{build_function, read_module, write_module, Module, Number, ReadError};

fn sample_module() -> Module {
    let mut builder = ModuleBuilder::new();
    let ns = builder.namespace("demo");
    let int = builder.scalar("int", PrimitiveKind::Int32);
    let float4 = builder.primitive("float4", PrimitiveKind::Float, PrimitiveClass::Vector, 4, 1);

    let point = builder.struct_type(ns, "Point", AccessModifier::Public);
    builder.struct_field(point, "x", int);
    builder.struct_field(point, "y", int);
    builder.constructor(point);
    builder.operator(
        point,
        OperatorSym::Add,
        OperatorFlags::INTRINSIC,
        Some(point),
    );

    builder.global_field(ns, "origin", float4, StorageClass::Static);

    let add_one = builder.function(ns, "add_one", Some(int));
    builder.parameter(add_one, "x", int);

    let get_x = builder.function(ns, "get_x", Some(int));
    builder.parameter(get_x, "p", point);

    let mut module = builder.build();

    // int add_one(int x) { return x + 1; }
    let mut ast = FunctionAst::new(add_one);
    let x = ast.param("x", int);
    ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(Expr::new(
        ExprKind::Binary {
            op: BinOp::Add,
            overload: None,
            lhs: Box::new(Expr::local(x, int)),
            rhs: Box::new(Expr::literal(Number::from_i32(1), int)),
        },
        Some(int),
    ))))]);
    let blob = build_function(&mut module, &ast);
    module.functions[add_one].blob = blob;

    // int get_x(Point p) { return p.x; }
    let mut ast = FunctionAst::new(get_x);
    let p = ast.param("p", point);
    ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(Expr::new(
        ExprKind::Access {
            base: p,
            chain: vec![Accessor::Field {
                owner: point,
                index: 0,
                ty: int,
            }],
        },
        Some(int),
    ))))]);
    let blob = build_function(&mut module, &ast);
    module.functions[get_x].blob = blob;

    module
}

fn names_of(module: &Module) -> Vec<String> {
    let mut names: Vec<String> = module
        .types
        .values()
        .map(|t| t.name().to_string())
        .collect();
    names.extend(module.functions.values().map(|f| f.name.clone()));
    names.sort();
    names
}

#[test]
fn round_trip_preserves_declarations_and_bodies() {
    let module = sample_module();
    let mut bytes = Vec::new();
    write_module(&mut bytes, &module).unwrap();

    let reread = read_module(&mut bytes.as_slice()).unwrap();

    assert_eq!(reread.namespaces.len(), module.namespaces.len());
    assert_eq!(reread.functions.len(), module.functions.len());
    assert_eq!(reread.fields.len(), module.fields.len());
    assert_eq!(reread.params.len(), module.params.len());
    assert_eq!(reread.function_index.len(), module.function_index.len());

    // Every function's instruction stream survives, compared through the
    // textual form. The flat index is ordered by record id, so match the
    // functions up by name.
    for original in module.function_index.iter() {
        let name = &module.functions[*original].name;
        let reconstructed = reread
            .function_index
            .iter()
            .copied()
            .find(|f| reread.functions[*f].name == *name)
            .unwrap_or_else(|| panic!("function {} lost in round trip", name));
        let a = module.functions[*original].blob.to_string();
        let b = reread.functions[reconstructed].blob.to_string();
        assert_eq!(a, b);
    }
}

/// The serialized closure is a fixpoint: reading and re-reading yields the
/// same graph, names included.
#[test]
fn second_round_trip_is_a_fixpoint() {
    let module = sample_module();
    let mut first = Vec::new();
    write_module(&mut first, &module).unwrap();
    let once = read_module(&mut first.as_slice()).unwrap();

    let mut second = Vec::new();
    write_module(&mut second, &once).unwrap();
    let twice = read_module(&mut second.as_slice()).unwrap();

    assert_eq!(once.types.len(), twice.types.len());
    assert_eq!(names_of(&once), names_of(&twice));
}

/// S3: a second write of the re-read module is bit-identical.
#[test]
fn round_trip_is_bit_identical() {
    let module = sample_module();
    let mut first = Vec::new();
    write_module(&mut first, &module).unwrap();

    let reread = read_module(&mut first.as_slice()).unwrap();
    let mut second = Vec::new();
    write_module(&mut second, &reread).unwrap();

    assert_eq!(first, second);
}

/// S5: the offs operand's `(type, field)` pair survives the trip exactly.
#[test]
fn offset_operand_round_trips() {
    let module = sample_module();
    let mut bytes = Vec::new();
    write_module(&mut bytes, &module).unwrap();
    let reread = read_module(&mut bytes.as_slice()).unwrap();

    let get_x = reread
        .function_index
        .iter()
        .copied()
        .find(|f| reread.functions[*f].name == "get_x")
        .expect("get_x survives");
    let blob = &reread.functions[get_x].blob;
    let offs = blob
        .iter()
        .find_map(|node| match &node.data {
            hxsl_ir::Instruction::Offset(op) => Some(op.clone()),
            _ => None,
        })
        .expect("offs instruction survives");
    assert_eq!(offs.field.field, 0);
    assert_eq!(blob.metadata.type_name(offs.field.ty), "Point");
}

/// Pointer records referenced by the layout graph survive; here through a
/// self-referential struct field, which also exercises the cycle path.
#[test]
fn reachable_pointer_records_survive() {
    let mut builder = ModuleBuilder::new();
    let ns = builder.namespace("demo");
    let node = builder.struct_type(ns, "Node", AccessModifier::Public);
    let node_ptr = builder.module_mut().pointer_to(node);
    builder.struct_field(node, "next", node_ptr);
    let module = builder.build();

    let mut bytes = Vec::new();
    write_module(&mut bytes, &module).unwrap();
    let reread = read_module(&mut bytes.as_slice()).unwrap();

    let survived = reread
        .types
        .values()
        .any(|t| matches!(t, TypeLayout::Pointer(p) if p.name == "Node*"));
    assert!(survived);
}

#[test]
fn truncated_stream_is_fatal() {
    let module = sample_module();
    let mut bytes = Vec::new();
    write_module(&mut bytes, &module).unwrap();
    bytes.truncate(bytes.len() / 2);
    match read_module(&mut bytes.as_slice()) {
        Err(ReadError::EndOfStream) => {}
        other => panic!("expected EndOfStream, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn unknown_tag_is_invalid_module() {
    // A single record with a bogus tag.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u64.to_le_bytes());
    bytes.push(0xEE);
    bytes.extend_from_slice(&1u64.to_le_bytes());
    match read_module(&mut bytes.as_slice()) {
        Err(ReadError::UnknownTypeTag(0xEE)) => {}
        other => panic!("expected UnknownTypeTag, got {:?}", other.map(|_| ())),
    }
}
