//! End-to-end SSA construction over a lowered counting loop:
//!
//! ```text
//! int g(int n) { int s = 0; for (int i = 0; i < n; i++) s = s + i; return s; }
//! ```
//!
//! Checks the single-assignment invariant and phi/predecessor alignment.

use rustc_hash::FxHashSet;

use hxsl_ir::ast::{
    BinOp, Block, Expr, ExprKind, FunctionAst, PostfixOp, Stmt, StmtKind,
};
use hxsl_ir::instruction::Instruction;
use hxsl_ir::module::{ModuleBuilder, PrimitiveKind};
use hxsl_ir::{build_function, ControlFlowGraph, NullSink, Number, VarId};
use hxsl_ir_analysis::{analyze, LoopTree};
use hxsl_ir_transform::construct_ssa;

fn lowered_loop() -> ControlFlowGraph {
    let mut builder = ModuleBuilder::new();
    let ns = builder.namespace("demo");
    let int = builder.scalar("int", PrimitiveKind::Int32);
    let g = builder.function(ns, "g", Some(int));
    builder.parameter(g, "n", int);
    let mut module = builder.build();

    let mut ast = FunctionAst::new(g);
    let n = ast.param("n", int);
    let s = ast.local("s", int);
    let i = ast.local("i", int);

    ast.body = Block::new(vec![
        Stmt::new(StmtKind::Decl {
            local: s,
            init: Some(Expr::literal(Number::from_i32(0), int)),
        }),
        Stmt::new(StmtKind::For {
            init: Some(Box::new(Stmt::new(StmtKind::Decl {
                local: i,
                init: Some(Expr::literal(Number::from_i32(0), int)),
            }))),
            cond: Expr::new(
                ExprKind::Binary {
                    op: BinOp::Lt,
                    overload: None,
                    lhs: Box::new(Expr::local(i, int)),
                    rhs: Box::new(Expr::local(n, int)),
                },
                Some(int),
            ),
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
                    value: Box::new(Expr::new(
                        ExprKind::Binary {
                            op: BinOp::Add,
                            overload: None,
                            lhs: Box::new(Expr::local(s, int)),
                            rhs: Box::new(Expr::local(i, int)),
                        },
                        Some(int),
                    )),
                },
                Some(int),
            )))]),
        }),
        Stmt::new(StmtKind::Return(Some(Expr::local(s, int)))),
    ]);

    let blob = build_function(&mut module, &ast);
    ControlFlowGraph::build(blob)
}

#[test]
fn single_assignment_holds() {
    let mut cfg = lowered_loop();
    let domtree = analyze(&mut cfg, &NullSink);
    construct_ssa(&mut cfg, &domtree);

    let mut seen: FxHashSet<VarId> = FxHashSet::default();
    for block in 0..cfg.num_blocks() {
        for inst in cfg.block_insts(block) {
            if let Some(dst) = cfg.inst(inst).result() {
                assert!(dst.version() >= 1, "unversioned assignment to {}", dst);
                assert!(seen.insert(dst), "second assignment to {}", dst);
            }
        }
    }
}

#[test]
fn loop_header_merges_s_and_i() {
    let mut cfg = lowered_loop();
    let domtree = analyze(&mut cfg, &NullSink);
    construct_ssa(&mut cfg, &domtree);

    let loops = LoopTree::build(&cfg, &domtree);
    assert_eq!(loops.len(), 1);
    let header = loops.nodes[0].header;

    // Variable slots: v0 = n, v1 = s, v2 = i.
    let mut merged_bases: FxHashSet<VarId> = FxHashSet::default();
    for (_, phi) in cfg.block_phis(header) {
        let data = cfg.blob().metadata.phi(phi);
        assert_eq!(
            data.params.len(),
            cfg.block(header).num_preds(),
            "phi operand count must match predecessor count"
        );
        merged_bases.insert(data.result.base());
    }
    assert!(merged_bases.contains(&VarId::new(1)), "phi for s");
    assert!(merged_bases.contains(&VarId::new(2)), "phi for i");
}

/// Invariant 5: the k-th phi operand is a renamed version of the phi's
/// own variable, one per predecessor slot.
#[test]
fn phi_operands_align_with_predecessors() {
    let mut cfg = lowered_loop();
    let domtree = analyze(&mut cfg, &NullSink);
    construct_ssa(&mut cfg, &domtree);

    for block in 0..cfg.num_blocks() {
        let preds = cfg.block(block).num_preds();
        for (_, phi) in cfg.block_phis(block) {
            let data = cfg.blob().metadata.phi(phi);
            assert_eq!(data.params.len(), preds);
            for param in data.params.iter() {
                assert_eq!(param.base(), data.result.base());
            }
        }
    }
}

/// The phi for `s` sees the init value from the pre-header slot and the
/// body's redefinition from the latch slot.
#[test]
fn phi_sources_are_the_reaching_definitions() {
    let mut cfg = lowered_loop();
    let domtree = analyze(&mut cfg, &NullSink);
    construct_ssa(&mut cfg, &domtree);

    let loops = LoopTree::build(&cfg, &domtree);
    let header = loops.nodes[0].header;
    let lp = &loops.nodes[0];
    let pre_header = lp.pre_header.expect("counting loop has a pre-header");

    let s_phi = cfg
        .block_phis(header)
        .into_iter()
        .find(|(_, phi)| cfg.blob().metadata.phi(*phi).result.base() == VarId::new(1))
        .map(|(_, phi)| phi)
        .expect("phi for s");
    let data = cfg.blob().metadata.phi(s_phi);

    let entry_slot = cfg
        .block(header)
        .pred_index(pre_header)
        .expect("pre-header is a predecessor");
    // The pre-header defines s exactly once (the init), so the entry slot
    // carries version 1; the latch-side slot carries a later version.
    assert_eq!(data.params[entry_slot].version(), 1);
    let other_slot = 1 - entry_slot;
    assert!(data.params[other_slot].version() > 1);

    // No phi instruction survives outside the header in this graph.
    for block in 0..cfg.num_blocks() {
        if block != header {
            assert!(cfg.block_phis(block).is_empty());
        }
    }

    // And the interpreter-facing stream predicate: phis only ever appear
    // as a leading run of their block.
    for block in 0..cfg.num_blocks() {
        let mut past_phis = false;
        for inst in cfg.block_insts(block) {
            match cfg.inst(inst) {
                Instruction::Phi(_) => assert!(!past_phis, "phi after a non-phi"),
                _ => past_phis = true,
            }
        }
    }
}
