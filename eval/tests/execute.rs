//! End-to-end execution: lower source-shaped ASTs to IR and run them.

use pretty_assertions::assert_eq;

use hxsl_eval::{EvalError, Interpreter};
use hxsl_ir::ast::{BinOp, Block, ElseIf, Expr, ExprKind, FunctionAst, PostfixOp, Stmt, StmtKind};
use hxsl_ir::module::{AccessModifier, FunctionId, ModuleBuilder, PrimitiveKind, TypeId};
use hxsl_ir::{build_function, read_module, write_module, Instruction, Module, Number, Opcode};

struct Fixture {
    module: Module,
}

impl Fixture {
    fn new() -> (ModuleBuilder, TypeId) {
        let mut builder = ModuleBuilder::new();
        builder.namespace("demo");
        let int = builder.scalar("int", PrimitiveKind::Int32);
        (builder, int)
    }

    fn finish(mut module: Module, asts: Vec<FunctionAst>) -> Self {
        for ast in asts {
            let func = ast.function;
            let blob = build_function(&mut module, &ast);
            module.functions[func].blob = blob;
        }
        Fixture { module }
    }

    fn run(&self, func: FunctionId, params: &[i32]) -> Result<i32, EvalError> {
        let interp = Interpreter::new(&self.module);
        let params: Vec<Number> = params.iter().map(|p| Number::from_i32(*p)).collect();
        interp
            .execute(&self.module.functions[func].blob, &params)
            .map(|n| n.cast(hxsl_ir::NumberType::I32).as_i32())
    }
}

fn int_lit(value: i32, int: TypeId) -> Expr {
    Expr::literal(Number::from_i32(value), int)
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr, int: TypeId) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            overload: None,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        Some(int),
    )
}

/// S1: `int f(int x) { return x + 1; }` with x = 41 yields 42.
#[test]
fn add_one() {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let f = builder.function(ns, "f", Some(int));
    builder.parameter(f, "x", int);
    let module = builder.build();

    let mut ast = FunctionAst::new(f);
    let x = ast.param("x", int);
    ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(binary(
        BinOp::Add,
        Expr::local(x, int),
        int_lit(1, int),
        int,
    ))))]);

    let fixture = Fixture::finish(module, vec![ast]);
    assert_eq!(fixture.run(f, &[41]).unwrap(), 42);
}

/// S2: a counting loop sums 0..n.
#[test]
fn loop_sum() {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let g = builder.function(ns, "g", Some(int));
    builder.parameter(g, "n", int);
    let module = builder.build();

    let mut ast = FunctionAst::new(g);
    let n = ast.param("n", int);
    let s = ast.local("s", int);
    let i = ast.local("i", int);
    ast.body = Block::new(vec![
        Stmt::new(StmtKind::Decl {
            local: s,
            init: Some(int_lit(0, int)),
        }),
        Stmt::new(StmtKind::For {
            init: Some(Box::new(Stmt::new(StmtKind::Decl {
                local: i,
                init: Some(int_lit(0, int)),
            }))),
            cond: binary(BinOp::Lt, Expr::local(i, int), Expr::local(n, int), int),
            step: Some(Expr::new(
                ExprKind::Postfix {
                    op: PostfixOp::Increment,
                    operand: Box::new(Expr::local(i, int)),
                },
                Some(int),
            )),
            body: Block::new(vec![Stmt::new(StmtKind::Expr(Expr::new(
                ExprKind::Assign {
                    target: Box::new(Expr::local(s, int)),
                    value: Box::new(binary(
                        BinOp::Add,
                        Expr::local(s, int),
                        Expr::local(i, int),
                        int,
                    )),
                },
                Some(int),
            )))]),
        }),
        Stmt::new(StmtKind::Return(Some(Expr::local(s, int)))),
    ]);

    let fixture = Fixture::finish(module, vec![ast]);
    assert_eq!(fixture.run(g, &[5]).unwrap(), 10);
    assert_eq!(fixture.run(g, &[0]).unwrap(), 0);
    assert_eq!(fixture.run(g, &[10]).unwrap(), 45);
}

/// S3: `int h(int a, int b) { if (a > b) return a; else return b; }`.
#[test]
fn branchy_max() {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let h = builder.function(ns, "h", Some(int));
    builder.parameter(h, "a", int);
    builder.parameter(h, "b", int);
    let module = builder.build();

    let mut ast = FunctionAst::new(h);
    let a = ast.param("a", int);
    let b = ast.param("b", int);
    ast.body = Block::new(vec![Stmt::new(StmtKind::If {
        cond: binary(BinOp::Gt, Expr::local(a, int), Expr::local(b, int), int),
        then_body: Block::new(vec![Stmt::new(StmtKind::Return(Some(Expr::local(
            a, int,
        ))))]),
        else_ifs: Vec::new(),
        else_body: Some(Block::new(vec![Stmt::new(StmtKind::Return(Some(
            Expr::local(b, int),
        )))])),
    })]);

    let fixture = Fixture::finish(module, vec![ast]);
    assert_eq!(fixture.run(h, &[7, 3]).unwrap(), 7);
    assert_eq!(fixture.run(h, &[3, 7]).unwrap(), 7);
    assert_eq!(fixture.run(h, &[5, 5]).unwrap(), 5);
}

fn fib_fixture() -> (Fixture, FunctionId) {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let fib = builder.function(ns, "fib", Some(int));
    builder.parameter(fib, "n", int);
    let module = builder.build();

    // int fib(int n) { if (n < 2) return n; return fib(n-1) + fib(n-2); }
    let mut ast = FunctionAst::new(fib);
    let n = ast.param("n", int);
    let call = |offset: i32, n, int| {
        Expr::new(
            ExprKind::Call {
                callee: fib,
                args: vec![binary(
                    BinOp::Sub,
                    Expr::local(n, int),
                    int_lit(offset, int),
                    int,
                )],
                constructor: false,
            },
            Some(int),
        )
    };
    ast.body = Block::new(vec![
        Stmt::new(StmtKind::If {
            cond: binary(BinOp::Lt, Expr::local(n, int), int_lit(2, int), int),
            then_body: Block::new(vec![Stmt::new(StmtKind::Return(Some(Expr::local(
                n, int,
            ))))]),
            else_ifs: Vec::new(),
            else_body: None,
        }),
        Stmt::new(StmtKind::Return(Some(binary(
            BinOp::Add,
            call(1, n, int),
            call(2, n, int),
            int,
        )))),
    ]);

    (Fixture::finish(module, vec![ast]), fib)
}

/// S6: recursion over the call boundary.
#[test]
fn fib_recursion() {
    let (fixture, fib) = fib_fixture();
    assert_eq!(fixture.run(fib, &[0]).unwrap(), 0);
    assert_eq!(fixture.run(fib, &[1]).unwrap(), 1);
    assert_eq!(fixture.run(fib, &[10]).unwrap(), 55);
}

/// The same function still runs after a serialization round trip, which
/// exercises the call-target fixup pass.
#[test]
fn fib_survives_round_trip() {
    let (fixture, _) = fib_fixture();
    let mut bytes = Vec::new();
    write_module(&mut bytes, &fixture.module).unwrap();
    let reread = read_module(&mut bytes.as_slice()).unwrap();

    let fib = reread
        .function_index
        .iter()
        .copied()
        .find(|f| reread.functions[*f].name == "fib")
        .expect("fib survives");
    let interp = Interpreter::new(&reread);
    let result = interp
        .execute(&reread.functions[fib].blob, &[Number::from_i32(10)])
        .unwrap();
    assert_eq!(result.as_i32(), 55);
}

/// A struct local passed as an argument forwards its reference through
/// `strefarg`; the callee binds it with `ldrefarg`.
#[test]
fn struct_argument_call() {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let point = builder.struct_type(ns, "P", AccessModifier::Public);
    builder.struct_field(point, "x", int);
    let tag = builder.function(ns, "tag", Some(int));
    builder.parameter(tag, "p", point);
    builder.parameter(tag, "k", int);
    let caller = builder.function(ns, "caller", Some(int));
    builder.parameter(caller, "k", int);
    let module = builder.build();

    // int tag(P p, int k) { return k + 1; }
    let mut tag_ast = FunctionAst::new(tag);
    let _p = tag_ast.param("p", point);
    let k = tag_ast.param("k", int);
    tag_ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(binary(
        BinOp::Add,
        Expr::local(k, int),
        int_lit(1, int),
        int,
    ))))]);

    // int caller(int k) { P p; return tag(p, k); }
    let mut caller_ast = FunctionAst::new(caller);
    let ck = caller_ast.param("k", int);
    let p = caller_ast.local("p", point);
    caller_ast.body = Block::new(vec![
        Stmt::new(StmtKind::Decl {
            local: p,
            init: None,
        }),
        Stmt::new(StmtKind::Return(Some(Expr::new(
            ExprKind::Call {
                callee: tag,
                args: vec![Expr::local(p, point), Expr::local(ck, int)],
                constructor: false,
            },
            Some(int),
        )))),
    ]);

    let fixture = Fixture::finish(module, vec![tag_ast, caller_ast]);

    // The struct goes through the ref flavour of the parameter store,
    // the scalar through the plain one.
    let caller_blob = &fixture.module.functions[caller].blob;
    assert!(caller_blob.iter().any(|n| matches!(
        &n.data,
        Instruction::StoreParam(op) if op.op == Opcode::StoreRefParam
    )));
    assert!(caller_blob.iter().any(|n| matches!(
        &n.data,
        Instruction::StoreParam(op) if op.op == Opcode::StoreParam
    )));

    assert_eq!(fixture.run(caller, &[41]).unwrap(), 42);
}

#[test]
fn integer_division_by_zero_traps() {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let d = builder.function(ns, "d", Some(int));
    builder.parameter(d, "a", int);
    builder.parameter(d, "b", int);
    let module = builder.build();

    let mut ast = FunctionAst::new(d);
    let a = ast.param("a", int);
    let b = ast.param("b", int);
    ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(binary(
        BinOp::Div,
        Expr::local(a, int),
        Expr::local(b, int),
        int,
    ))))]);

    let fixture = Fixture::finish(module, vec![ast]);
    assert_eq!(fixture.run(d, &[10, 2]).unwrap(), 5);
    assert_eq!(fixture.run(d, &[10, 0]), Err(EvalError::DivisionByZero));
}

/// Else-if cascades land in the right arm.
#[test]
fn else_if_cascade() {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let sign = builder.function(ns, "sign", Some(int));
    builder.parameter(sign, "x", int);
    let module = builder.build();

    let mut ast = FunctionAst::new(sign);
    let x = ast.param("x", int);
    ast.body = Block::new(vec![
        Stmt::new(StmtKind::If {
            cond: binary(BinOp::Lt, Expr::local(x, int), int_lit(0, int), int),
            then_body: Block::new(vec![Stmt::new(StmtKind::Return(Some(int_lit(-1, int))))]),
            else_ifs: vec![ElseIf {
                cond: binary(BinOp::Eq, Expr::local(x, int), int_lit(0, int), int),
                body: Block::new(vec![Stmt::new(StmtKind::Return(Some(int_lit(0, int))))]),
            }],
            else_body: None,
        }),
        Stmt::new(StmtKind::Return(Some(int_lit(1, int)))),
    ]);

    let fixture = Fixture::finish(module, vec![ast]);
    assert_eq!(fixture.run(sign, &[-5]).unwrap(), -1);
    assert_eq!(fixture.run(sign, &[0]).unwrap(), 0);
    assert_eq!(fixture.run(sign, &[9]).unwrap(), 1);
}

/// Ternaries pick the correct arm through the cursor moves.
#[test]
fn ternary_select() {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let pick = builder.function(ns, "pick", Some(int));
    builder.parameter(pick, "c", int);
    let module = builder.build();

    let mut ast = FunctionAst::new(pick);
    let c = ast.param("c", int);
    ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(Expr::new(
        ExprKind::Ternary {
            cond: Box::new(Expr::local(c, int)),
            then_value: Box::new(int_lit(10, int)),
            else_value: Box::new(int_lit(20, int)),
        },
        Some(int),
    ))))]);

    let fixture = Fixture::finish(module, vec![ast]);
    assert_eq!(fixture.run(pick, &[1]).unwrap(), 10);
    assert_eq!(fixture.run(pick, &[0]).unwrap(), 20);
}

/// Do-while bodies run at least once.
#[test]
fn do_while_runs_once() {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let f = builder.function(ns, "once", Some(int));
    builder.parameter(f, "n", int);
    let module = builder.build();

    // int once(int n) { int c = 0; do { c = c + 1; } while (0); return c; }
    let mut ast = FunctionAst::new(f);
    let _n = ast.param("n", int);
    let c = ast.local("c", int);
    ast.body = Block::new(vec![
        Stmt::new(StmtKind::Decl {
            local: c,
            init: Some(int_lit(0, int)),
        }),
        Stmt::new(StmtKind::DoWhile {
            body: Block::new(vec![Stmt::new(StmtKind::Expr(Expr::new(
                ExprKind::Assign {
                    target: Box::new(Expr::local(c, int)),
                    value: Box::new(binary(
                        BinOp::Add,
                        Expr::local(c, int),
                        int_lit(1, int),
                        int,
                    )),
                },
                Some(int),
            )))]),
            cond: int_lit(0, int),
        }),
        Stmt::new(StmtKind::Return(Some(Expr::local(c, int)))),
    ]);

    let fixture = Fixture::finish(module, vec![ast]);
    assert_eq!(fixture.run(f, &[0]).unwrap(), 1);
}

/// Break leaves the loop through the exit label.
#[test]
fn break_exits_loop() {
    let (mut builder, int) = Fixture::new();
    let ns = builder.module().root[0];
    let f = builder.function(ns, "capped", Some(int));
    builder.parameter(f, "n", int);
    let module = builder.build();

    // int capped(int n) { int i = 0; while (1) { if (i >= n) break; i = i + 1; } return i; }
    let mut ast = FunctionAst::new(f);
    let n = ast.param("n", int);
    let i = ast.local("i", int);
    ast.body = Block::new(vec![
        Stmt::new(StmtKind::Decl {
            local: i,
            init: Some(int_lit(0, int)),
        }),
        Stmt::new(StmtKind::While {
            cond: int_lit(1, int),
            body: Block::new(vec![
                Stmt::new(StmtKind::If {
                    cond: binary(BinOp::Ge, Expr::local(i, int), Expr::local(n, int), int),
                    then_body: Block::new(vec![Stmt::new(StmtKind::Break)]),
                    else_ifs: Vec::new(),
                    else_body: None,
                }),
                Stmt::new(StmtKind::Expr(Expr::new(
                    ExprKind::Assign {
                        target: Box::new(Expr::local(i, int)),
                        value: Box::new(binary(
                            BinOp::Add,
                            Expr::local(i, int),
                            int_lit(1, int),
                            int,
                        )),
                    },
                    Some(int),
                ))),
            ]),
        }),
        Stmt::new(StmtKind::Return(Some(Expr::local(i, int)))),
    ]);

    let fixture = Fixture::finish(module, vec![ast]);
    assert_eq!(fixture.run(f, &[4]).unwrap(), 4);
}
