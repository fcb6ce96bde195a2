//! AST to linear IR lowering.
//!
//! The walk is stack-driven rather than recursive so that deeply nested
//! statements and expressions cannot blow the host stack. Each frame is
//! either a block position, a suspended compound statement waiting for its
//! body to finish, or a label to bind on re-entry.

mod expr;

use crate::ast::{Block, ElseIf, Expr, ExprKind, FunctionAst, LocalId, Stmt, StmtKind};
use crate::blob::CodeBlob;
use crate::diagnostics::SourceSpan;
use crate::instruction::{
    Instruction, JumpOp, LoadParamOp, MoveOp, Opcode, RetOp, StackAllocOp, StoreOp, UnaryOp,
};
use crate::metadata::{Variable, VariableFlags};
use crate::module::Module;
use crate::number::Number;
use crate::value::{Inst, Label, Operand, VarId};

/// Lowers one resolved function body into a [CodeBlob].
pub fn build_function(module: &mut Module, func: &FunctionAst) -> CodeBlob {
    IrBuilder::new(module, func).build()
}

struct LoopFrame {
    continue_to: Label,
    break_to: Label,
}

/// Re-entry state for an if/else-if/else cascade.
struct IfFrame<'a> {
    else_ifs: &'a [ElseIf],
    else_body: Option<&'a Block>,
    state: usize,
    /// Label the previous arm's `jz` skips to (the next arm's entry).
    next_label: Label,
    /// Join label, allocated lazily the first time an arm needs to jump
    /// over the rest of the cascade.
    end_label: Option<Label>,
}

enum Frame<'a> {
    Block {
        block: &'a Block,
        index: usize,
    },
    If(IfFrame<'a>),
    While {
        start: Label,
        end: Label,
    },
    DoWhile {
        cond: &'a Expr,
        start: Label,
        cond_label: Label,
        end: Label,
    },
    For {
        step: Option<&'a Expr>,
        start: Label,
        incr: Label,
        end: Label,
    },
    BindLabel(Label),
}

pub(crate) struct IrBuilder<'a> {
    pub(crate) module: &'a mut Module,
    func: &'a FunctionAst,
    pub(crate) blob: CodeBlob,
    frames: Vec<Frame<'a>>,
    loops: Vec<LoopFrame>,
    mapping_starts: Vec<u32>,
    did_return: bool,
}

impl<'a> IrBuilder<'a> {
    fn new(module: &'a mut Module, func: &'a FunctionAst) -> Self {
        Self {
            module,
            func,
            blob: CodeBlob::new(),
            frames: Vec::new(),
            loops: Vec::new(),
            mapping_starts: Vec::new(),
            did_return: false,
        }
    }

    fn build(mut self) -> CodeBlob {
        self.lower_parameters();

        let body: &'a Block = &self.func.body;
        self.frames.push(Frame::Block {
            block: body,
            index: 0,
        });

        while let Some(frame) = self.frames.pop() {
            match frame {
                Frame::Block { block, index } => self.traverse_block(block, index),
                Frame::If(frame) => self.resume_if(frame),
                Frame::While { start, end } => {
                    self.emit_jump(Opcode::Jump, start, None);
                    self.bind_label(end);
                    self.pop_loop();
                }
                Frame::DoWhile {
                    cond,
                    start,
                    cond_label,
                    end,
                } => {
                    self.bind_label(cond_label);
                    self.mapping_start();
                    let c = self.traverse_expression(cond, None);
                    self.mapping_end(cond.span);
                    self.emit_jump(Opcode::JumpNotZero, start, Some(Operand::Var(c)));
                    self.bind_label(end);
                    self.pop_loop();
                }
                Frame::For {
                    step,
                    start,
                    incr,
                    end,
                } => {
                    self.bind_label(incr);
                    if let Some(step) = step {
                        self.mapping_start();
                        self.traverse_expression(step, None);
                        self.mapping_end(step.span);
                    }
                    self.emit_jump(Opcode::Jump, start, None);
                    self.bind_label(end);
                    self.pop_loop();
                }
                Frame::BindLabel(label) => self.bind_label(label),
            }
        }

        // Every function body ends in a terminator, and a label bound at
        // the very end needs an instruction to land on.
        if !self.did_return || self.blob.has_dangling_label() {
            self.blob.push(Instruction::Ret(RetOp { value: None }));
        }
        debug_assert!(!self.blob.has_dangling_label());

        log::debug!(
            "built {} instructions, {} labels",
            self.blob.len(),
            self.blob.jump_table.len()
        );
        self.blob
    }

    fn lower_parameters(&mut self) {
        let func = self.func;
        for (i, &local) in func.params.iter().enumerate() {
            let decl = &func.locals[local];
            let flags = self.module.var_type_flags(decl.ty);
            if flags.contains(VariableFlags::LARGE_OBJECT) {
                // Large objects arrive by address: the parameter variable
                // is a reference to the caller's storage.
                let addr_ty = self.module.pointer_to(decl.ty);
                let var = self.blob.metadata.reg_var(self.module, addr_ty, local);
                self.blob.push(Instruction::LoadParam(LoadParamOp {
                    op: Opcode::LoadRefParam,
                    dst: var.id,
                    index: i as u32,
                }));
            } else {
                let var = self.blob.metadata.reg_var(self.module, decl.ty, local);
                self.blob.push(Instruction::LoadParam(LoadParamOp {
                    op: Opcode::LoadParam,
                    dst: var.id,
                    index: i as u32,
                }));
            }
        }
    }

    fn traverse_block(&mut self, block: &'a Block, start: usize) {
        let statements = &block.statements;
        let mut index = start;
        while index < statements.len() {
            let stmt = &statements[index];
            index += 1;
            if self.traverse_statement(stmt, block, index) {
                return;
            }
        }
    }

    /// Lowers one statement. Returns true when the statement suspended the
    /// enclosing block (its continuation frame is already pushed) and the
    /// caller must stop iterating.
    fn traverse_statement(&mut self, stmt: &'a Stmt, parent: &'a Block, resume: usize) -> bool {
        match &stmt.kind {
            StmtKind::Block(inner) => {
                self.suspend(parent, resume);
                self.frames.push(Frame::Block {
                    block: inner,
                    index: 0,
                });
                true
            }
            StmtKind::Expr(expr) => {
                self.mapping_start();
                self.traverse_expression(expr, None);
                self.mapping_end(stmt.span);
                false
            }
            StmtKind::Decl { local, init } => {
                self.lower_declaration(*local, init.as_ref(), stmt.span);
                false
            }
            StmtKind::If {
                cond,
                then_body,
                else_ifs,
                else_body,
            } => {
                let next_label = self.blob.jump_table.allocate();

                self.mapping_start();
                let c = self.traverse_expression(cond, None);
                self.mapping_end(cond.span);
                self.emit_jump(Opcode::JumpZero, next_label, Some(Operand::Var(c)));

                self.suspend(parent, resume);
                self.frames.push(Frame::If(IfFrame {
                    else_ifs,
                    else_body: else_body.as_ref(),
                    state: 0,
                    next_label,
                    end_label: None,
                }));
                self.frames.push(Frame::Block {
                    block: then_body,
                    index: 0,
                });
                true
            }
            StmtKind::While { cond, body } => {
                let start = self.label_here();
                let end = self.blob.jump_table.allocate();

                self.mapping_start();
                let c = self.traverse_expression(cond, None);
                self.mapping_end(cond.span);
                self.emit_jump(Opcode::JumpZero, end, Some(Operand::Var(c)));

                self.suspend(parent, resume);
                self.frames.push(Frame::While { start, end });
                self.frames.push(Frame::Block {
                    block: body,
                    index: 0,
                });
                self.push_loop(start, end);
                true
            }
            StmtKind::DoWhile { body, cond } => {
                let start = self.label_here();
                let cond_label = self.blob.jump_table.allocate();
                let end = self.blob.jump_table.allocate();

                self.suspend(parent, resume);
                self.frames.push(Frame::DoWhile {
                    cond,
                    start,
                    cond_label,
                    end,
                });
                self.frames.push(Frame::Block {
                    block: body,
                    index: 0,
                });
                self.push_loop(cond_label, end);
                true
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    let suspended = self.traverse_statement(init, parent, resume);
                    debug_assert!(!suspended, "for-init cannot suspend");
                }
                let start = self.label_here();
                let incr = self.blob.jump_table.allocate();
                let end = self.blob.jump_table.allocate();

                self.mapping_start();
                let c = self.traverse_expression(cond, None);
                self.mapping_end(cond.span);
                self.emit_jump(Opcode::JumpZero, end, Some(Operand::Var(c)));

                self.suspend(parent, resume);
                self.frames.push(Frame::For {
                    step: step.as_ref(),
                    start,
                    incr,
                    end,
                });
                self.frames.push(Frame::Block {
                    block: body,
                    index: 0,
                });
                self.push_loop(incr, end);
                true
            }
            StmtKind::Break => {
                self.mapping_start();
                match self.loops.last() {
                    Some(lp) => {
                        let target = lp.break_to;
                        self.emit_jump(Opcode::Jump, target, None);
                    }
                    None => debug_assert!(false, "break outside of a loop"),
                }
                self.mapping_end(stmt.span);
                false
            }
            StmtKind::Continue => {
                self.mapping_start();
                match self.loops.last() {
                    Some(lp) => {
                        let target = lp.continue_to;
                        self.emit_jump(Opcode::Jump, target, None);
                    }
                    None => debug_assert!(false, "continue outside of a loop"),
                }
                self.mapping_end(stmt.span);
                false
            }
            StmtKind::Return(expr) => {
                self.mapping_start();
                self.did_return = true;
                match expr {
                    None => {
                        self.blob.push(Instruction::Ret(RetOp { value: None }));
                    }
                    Some(expr) => {
                        let value = if let Some(imm) = as_immediate(expr) {
                            Operand::Const(imm)
                        } else if let ExprKind::Local(local) = &expr.kind {
                            Operand::Var(self.find_var(*local).id)
                        } else {
                            Operand::Var(self.traverse_expression(expr, None))
                        };
                        self.blob
                            .push(Instruction::Ret(RetOp { value: Some(value) }));
                    }
                }
                self.mapping_end(stmt.span);
                false
            }
            StmtKind::Discard => {
                self.mapping_start();
                self.blob.push(Instruction::discard());
                self.mapping_end(stmt.span);
                false
            }
        }
    }

    fn lower_declaration(&mut self, local: LocalId, init: Option<&'a Expr>, span: SourceSpan) {
        self.mapping_start();
        let decl_ty = self.func.locals[local].ty;
        let flags = self.module.var_type_flags(decl_ty);

        let (var, zero_ty) = if flags.contains(VariableFlags::LARGE_OBJECT) {
            let base = self.blob.metadata.reg_type(self.module, decl_ty);
            let addr_ty = self.module.pointer_to(decl_ty);
            let var = self.blob.metadata.reg_var(self.module, addr_ty, local);
            self.blob.push(Instruction::StackAlloc(StackAllocOp {
                dst: var.id,
                ty: base,
            }));
            (var, base)
        } else {
            let var = self.blob.metadata.reg_var(self.module, decl_ty, local);
            (var, var.ty)
        };

        match init {
            Some(init) => {
                if let Some(imm) = as_immediate(init) {
                    if var.is_reference() {
                        self.blob.push(Instruction::Store(StoreOp {
                            addr: var.as_operand(),
                            value: Operand::Const(imm),
                        }));
                    } else {
                        self.blob.push(Instruction::Move(MoveOp {
                            dst: var.id,
                            value: Operand::Const(imm),
                        }));
                    }
                } else {
                    let is_ctor = matches!(
                        &init.kind,
                        ExprKind::Call {
                            constructor: true,
                            ..
                        }
                    );
                    let src = self.traverse_expression(init, None);
                    // A constructor already wrote through the alloca via
                    // its implicit first argument.
                    if !is_ctor {
                        if var.is_reference() {
                            self.blob.push(Instruction::Store(StoreOp {
                                addr: var.as_operand(),
                                value: Operand::Var(src),
                            }));
                        } else {
                            self.retarget_last(src, var.id);
                        }
                    }
                }
            }
            None => {
                if !var.is_reference() {
                    self.blob.push(Instruction::Unary(UnaryOp {
                        op: Opcode::Zero,
                        dst: var.id,
                        operand: Operand::Type(zero_ty),
                    }));
                }
            }
        }
        self.mapping_end(span);
    }

    fn resume_if(&mut self, mut frame: IfFrame<'a>) {
        if frame.state < frame.else_ifs.len() {
            let end = match frame.end_label {
                Some(end) => end,
                None => {
                    let end = self.blob.jump_table.allocate();
                    frame.end_label = Some(end);
                    end
                }
            };
            self.emit_jump(Opcode::Jump, end, None);
            self.bind_label(frame.next_label);

            let arm = &frame.else_ifs[frame.state];
            self.mapping_start();
            let c = self.traverse_expression(&arm.cond, None);
            self.mapping_end(arm.cond.span);

            frame.next_label = self.blob.jump_table.allocate();
            let next = frame.next_label;
            self.emit_jump(Opcode::JumpZero, next, Some(Operand::Var(c)));

            frame.state += 1;
            let body = &arm.body;
            self.frames.push(Frame::If(frame));
            self.frames.push(Frame::Block { block: body, index: 0 });
        } else if let Some(else_body) = frame.else_body {
            let end = match frame.end_label {
                Some(end) => end,
                None => self.blob.jump_table.allocate(),
            };
            self.emit_jump(Opcode::Jump, end, None);
            self.bind_label(frame.next_label);
            self.frames.push(Frame::BindLabel(end));
            self.frames.push(Frame::Block {
                block: else_body,
                index: 0,
            });
        } else {
            self.bind_label(frame.next_label);
            if let Some(end) = frame.end_label {
                self.bind_label(end);
            }
        }
    }

    /// Pushes the enclosing block's continuation so a compound statement
    /// can run its body frames first.
    fn suspend(&mut self, parent: &'a Block, resume: usize) {
        self.frames.push(Frame::Block {
            block: parent,
            index: resume,
        });
    }

    fn push_loop(&mut self, continue_to: Label, break_to: Label) {
        self.loops.push(LoopFrame {
            continue_to,
            break_to,
        });
    }

    fn pop_loop(&mut self) {
        let popped = self.loops.pop();
        debug_assert!(popped.is_some());
    }

    /// Allocates a label already bound to the current stream position.
    fn label_here(&mut self) -> Label {
        let here = self.blob.len();
        self.blob.jump_table.allocate_at(here)
    }

    fn bind_label(&mut self, label: Label) {
        let here = self.blob.len();
        self.blob.jump_table.set(label, here);
    }

    pub(crate) fn emit(&mut self, data: Instruction) -> Inst {
        self.blob.push(data)
    }

    fn emit_jump(&mut self, op: Opcode, target: Label, cond: Option<Operand>) {
        self.blob
            .push(Instruction::Jump(JumpOp { op, target, cond }));
    }

    fn mapping_start(&mut self) {
        self.mapping_starts.push(self.blob.len());
    }

    fn mapping_end(&mut self, span: SourceSpan) {
        let start = self.mapping_starts.pop().unwrap_or(0);
        let count = self.blob.len().saturating_sub(start);
        if count > 0 {
            self.blob.annotate_tail(count, span);
        }
    }

    /// Retargets the instruction that just produced `src` to write `dst`
    /// directly, or falls back to a `mov` when the producer is gone.
    pub(crate) fn retarget_last(&mut self, src: VarId, dst: VarId) {
        if let Some(last) = self.blob.last_inst() {
            let instr = self.blob.inst_mut(last);
            if instr.result() == Some(src) {
                instr.set_result(dst);
                return;
            }
        }
        self.blob.push(Instruction::Move(MoveOp {
            dst,
            value: Operand::Var(src),
        }));
    }

    pub(crate) fn find_var(&mut self, local: LocalId) -> Variable {
        if let Some(var) = self.blob.metadata.find_var(local) {
            return var;
        }
        // The frontend declares before use; registering here keeps the
        // builder total if it does not.
        debug_assert!(false, "use of an undeclared local");
        let ty = self.func.locals[local].ty;
        self.blob.metadata.reg_var(self.module, ty, local)
    }
}

fn as_immediate(expr: &Expr) -> Option<Number> {
    match &expr.kind {
        ExprKind::Literal(value) => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, FunctionAst};
    use crate::instruction::Instruction;
    use crate::module::{ModuleBuilder, PrimitiveKind};

    /// S1: `int f(int x) { return x + 1; }` lowers to
    /// `ldarg; add; ret` with the add retargeted into a temp.
    #[test]
    fn simple_add_lowering() {
        let mut builder = ModuleBuilder::new();
        let ns = builder.namespace("demo");
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let f = builder.function(ns, "f", Some(int));
        builder.parameter(f, "x", int);
        let mut module = builder.build();

        let mut ast = FunctionAst::new(f);
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
        let ops: Vec<Opcode> = blob.iter().map(|n| n.data.opcode()).collect();
        assert_eq!(ops, vec![Opcode::LoadParam, Opcode::Add, Opcode::Return]);

        // The add reads the parameter register and an immediate.
        let add = blob.iter().nth(1).unwrap();
        match &add.data {
            Instruction::Binary(op) => {
                assert_eq!(op.lhs, Operand::Var(VarId::new(0)));
                assert_eq!(op.rhs, Operand::Const(Number::from_i32(1)));
            }
            other => panic!("expected add, got {:?}", other),
        }
    }

    /// A void body still gets a terminating return.
    #[test]
    fn empty_body_returns() {
        let mut builder = ModuleBuilder::new();
        let ns = builder.namespace("demo");
        let f = builder.function(ns, "noop", None);
        let mut module = builder.build();

        let ast = FunctionAst::new(f);
        let blob = build_function(&mut module, &ast);
        let ops: Vec<Opcode> = blob.iter().map(|n| n.data.opcode()).collect();
        assert_eq!(ops, vec![Opcode::Return]);
    }

    /// While loops bind head and exit labels around the body.
    #[test]
    fn while_loop_labels() {
        let mut builder = ModuleBuilder::new();
        let ns = builder.namespace("demo");
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let f = builder.function(ns, "spin", Some(int));
        builder.parameter(f, "n", int);
        let mut module = builder.build();

        let mut ast = FunctionAst::new(f);
        let n = ast.param("n", int);
        ast.body = Block::new(vec![
            Stmt::new(StmtKind::While {
                cond: Expr::local(n, int),
                body: Block::new(vec![Stmt::new(StmtKind::Expr(Expr::new(
                    ExprKind::Assign {
                        target: Box::new(Expr::local(n, int)),
                        value: Box::new(Expr::literal(Number::from_i32(0), int)),
                    },
                    Some(int),
                )))]),
            }),
            Stmt::new(StmtKind::Return(Some(Expr::local(n, int)))),
        ]);

        let blob = build_function(&mut module, &ast);
        let ops: Vec<Opcode> = blob.iter().map(|n| n.data.opcode()).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LoadParam,
                Opcode::Load,
                Opcode::JumpZero,
                Opcode::Move,
                Opcode::Jump,
                Opcode::Return,
            ]
        );
        // Head label points at the condition, exit label past the loop.
        assert_eq!(blob.jump_table.targets, vec![1, 5]);
    }
}
