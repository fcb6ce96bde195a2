//! Expression lowering: a small pushdown machine.
//!
//! Each frame carries the expression, its output register, the operand
//! slots filled in by sub-expression frames, and a state counter for
//! re-entry. Operands that are immediates or plain (non-reference)
//! variables are inlined; everything else is materialised into a fresh
//! temporary first.

use crate::ast::{Accessor, BinOp, Expr, ExprKind, PostfixOp, PrefixOp};
use crate::instruction::{
    try_fold, BinaryOp, CallOp, Instruction, JumpOp, LoadOp, MoveOp, Opcode, StoreOp, StoreParamOp,
    UnaryOp,
};
use crate::module::{FunctionId, PrimitiveClass, TypeId, TypeLayout};
use crate::number::Number;
use crate::value::{FieldAccess, Label, Operand, VarId};

use super::IrBuilder;

struct ExprFrame<'a> {
    expr: &'a Expr,
    out: VarId,
    left: Option<Operand>,
    right: Option<Operand>,
    state: u32,
    label: Option<Label>,
}

impl<'a> ExprFrame<'a> {
    fn new(expr: &'a Expr, out: VarId) -> Self {
        Self {
            expr,
            out,
            left: None,
            right: None,
            state: 0,
            label: None,
        }
    }
}

impl<'a> IrBuilder<'a> {
    /// Evaluates `expr` into `out` (or a fresh temporary) and returns the
    /// register holding the result. Void expressions return an invalid id.
    pub(crate) fn traverse_expression(&mut self, expr: &'a Expr, out: Option<VarId>) -> VarId {
        let out = match out {
            Some(v) => v,
            None => self.alloc_temp_for(expr),
        };

        let mut stack: Vec<ExprFrame<'a>> = vec![ExprFrame::new(expr, out)];
        while let Some(mut frame) = stack.pop() {
            let current = frame.expr;
            match &current.kind {
                ExprKind::Literal(value) => {
                    self.emit(Instruction::Move(MoveOp {
                        dst: frame.out,
                        value: Operand::Const(*value),
                    }));
                }
                ExprKind::Local(_) | ExprKind::Access { .. } => {
                    self.read_var(current, frame.out);
                }
                ExprKind::Binary {
                    op,
                    overload,
                    lhs,
                    rhs,
                } => {
                    let lhs: &'a Expr = lhs;
                    let rhs: &'a Expr = rhs;
                    let l_inline = self.inlineable(lhs);
                    let r_inline = self.inlineable(rhs);
                    if frame.state > 0 || (l_inline.is_some() && r_inline.is_some()) {
                        let left = l_inline.unwrap_or_else(|| frame.left.take().expect("lhs slot"));
                        let right =
                            r_inline.unwrap_or_else(|| frame.right.take().expect("rhs slot"));
                        self.operator_call(*op, *overload, left, right, frame.out, lhs);
                    } else {
                        frame.state += 1;
                        let l_slot = match l_inline {
                            Some(_) => None,
                            None => Some(self.alloc_temp_for(lhs)),
                        };
                        let r_slot = match r_inline {
                            Some(_) => None,
                            None => Some(self.alloc_temp_for(rhs)),
                        };
                        frame.left = l_slot.map(Operand::Var);
                        frame.right = r_slot.map(Operand::Var);
                        stack.push(frame);
                        if let Some(r) = r_slot {
                            stack.push(ExprFrame::new(rhs, r));
                        }
                        if let Some(l) = l_slot {
                            stack.push(ExprFrame::new(lhs, l));
                        }
                    }
                }
                ExprKind::Prefix { op, operand } => {
                    let operand: &'a Expr = operand;
                    match op {
                        PrefixOp::Increment | PrefixOp::Decrement => {
                            let source = match self.inlineable(operand) {
                                Some(op) => op,
                                None => {
                                    let r = self.alloc_temp_for(operand);
                                    self.read_var(operand, r);
                                    Operand::Var(r)
                                }
                            };
                            let opcode = if *op == PrefixOp::Increment {
                                Opcode::Add
                            } else {
                                Opcode::Subtract
                            };
                            self.emit(Instruction::Binary(BinaryOp {
                                op: opcode,
                                dst: frame.out,
                                lhs: source,
                                rhs: Operand::Const(Number::from_i32(1)),
                            }));
                            self.write_back(operand, Operand::Var(frame.out));
                        }
                        PrefixOp::Negate | PrefixOp::LogicalNot | PrefixOp::BitwiseNot => {
                            let inline = self.inlineable(operand);
                            if frame.state > 0 || inline.is_some() {
                                let source = inline
                                    .unwrap_or_else(|| frame.right.take().expect("operand slot"));
                                let opcode = match op {
                                    PrefixOp::Negate => Opcode::Negate,
                                    PrefixOp::LogicalNot => Opcode::LogicalNot,
                                    _ => Opcode::BitwiseNot,
                                };
                                self.emit(Instruction::Unary(UnaryOp {
                                    op: opcode,
                                    dst: frame.out,
                                    operand: source,
                                }));
                            } else {
                                frame.state += 1;
                                let r = self.alloc_temp_for(operand);
                                frame.right = Some(Operand::Var(r));
                                stack.push(frame);
                                stack.push(ExprFrame::new(operand, r));
                            }
                        }
                    }
                }
                ExprKind::Postfix { op, operand } => {
                    let operand: &'a Expr = operand;
                    // The expression's value is the old one; the updated
                    // value goes back through a temporary.
                    self.read_var(operand, frame.out);
                    let temp = self.alloc_temp_for(operand);
                    let opcode = if *op == PostfixOp::Increment {
                        Opcode::Add
                    } else {
                        Opcode::Subtract
                    };
                    self.emit(Instruction::Binary(BinaryOp {
                        op: opcode,
                        dst: temp,
                        lhs: Operand::Var(frame.out),
                        rhs: Operand::Const(Number::from_i32(1)),
                    }));
                    self.write_back(operand, Operand::Var(temp));
                }
                ExprKind::Call {
                    callee,
                    args,
                    constructor,
                } => {
                    let param_offset: u32 = if *constructor { 1 } else { 0 };
                    if *constructor && frame.state == 0 {
                        // Constructors write through the storage the
                        // preceding alloca produced.
                        let storage = self.blob.last_inst().and_then(|last| {
                            match self.blob.inst(last) {
                                Instruction::StackAlloc(op) => Some(op.dst),
                                _ => None,
                            }
                        });
                        if let Some(storage) = storage {
                            self.emit_store_param(0, Operand::Var(storage));
                        }
                    }

                    let mut stored_inline = false;
                    loop {
                        let index = frame.state as usize;
                        if index < args.len() {
                            if frame.state != 0 && !stored_inline {
                                if let Some(value) = frame.right.take() {
                                    self.emit_store_param(param_offset + frame.state - 1, value);
                                }
                            }
                            let arg: &'a Expr = &args[index];
                            frame.state += 1;
                            if let Some(imm) = arg_immediate(arg) {
                                stored_inline = true;
                                self.emit_store_param(param_offset + frame.state - 1, imm);
                            } else if let ExprKind::Local(local) = &arg.kind {
                                // References pass their address through
                                // the parameter slot unchanged, via the
                                // ref flavour of the store.
                                stored_inline = true;
                                let var = self.find_var(*local);
                                let op = if var.is_reference() {
                                    Opcode::StoreRefParam
                                } else {
                                    Opcode::StoreParam
                                };
                                self.emit(Instruction::StoreParam(StoreParamOp {
                                    op,
                                    index: param_offset + frame.state - 1,
                                    value: var.as_operand(),
                                }));
                            } else {
                                let r = self.alloc_temp_for(arg);
                                frame.right = Some(Operand::Var(r));
                                stack.push(frame);
                                stack.push(ExprFrame::new(arg, r));
                                break;
                            }
                        } else {
                            if frame.state != 0 && !stored_inline {
                                if let Some(value) = frame.right.take() {
                                    self.emit_store_param(param_offset + frame.state - 1, value);
                                }
                            }
                            let dst = if self.returns_value(*callee) && frame.out.is_valid() {
                                frame.out
                            } else {
                                VarId::INVALID
                            };
                            let callee_ref = self.blob.metadata.reg_func(*callee);
                            self.emit(Instruction::Call(CallOp {
                                dst,
                                callee: callee_ref,
                            }));
                            break;
                        }
                    }
                }
                ExprKind::Cast { overload, operand } => {
                    let operand: &'a Expr = operand;
                    let inline = self.inlineable(operand);
                    if frame.state > 0 || inline.is_some() {
                        let source =
                            inline.unwrap_or_else(|| frame.right.take().expect("operand slot"));
                        match overload {
                            None => {
                                self.emit(Instruction::Unary(UnaryOp {
                                    op: Opcode::Cast,
                                    dst: frame.out,
                                    operand: source,
                                }));
                            }
                            Some(f) => {
                                self.emit_store_param(0, source);
                                let callee_ref = self.blob.metadata.reg_func(*f);
                                self.emit(Instruction::Call(CallOp {
                                    dst: frame.out,
                                    callee: callee_ref,
                                }));
                            }
                        }
                    } else {
                        frame.state += 1;
                        let r = self.alloc_temp_for(operand);
                        frame.right = Some(Operand::Var(r));
                        stack.push(frame);
                        stack.push(ExprFrame::new(operand, r));
                    }
                }
                ExprKind::Assign { target, value } => {
                    let target: &'a Expr = target;
                    let value: &'a Expr = value;
                    let inline = self.inlineable(value);
                    if frame.state > 0 || inline.is_some() {
                        let op = inline.unwrap_or_else(|| frame.left.take().expect("value slot"));
                        self.write_var(target, op);
                    } else {
                        frame.state += 1;
                        let r = self.alloc_temp_for(value);
                        frame.left = Some(Operand::Var(r));
                        stack.push(frame);
                        stack.push(ExprFrame::new(value, r));
                    }
                }
                ExprKind::CompoundAssign {
                    op,
                    overload,
                    target,
                    value,
                } => {
                    let target: &'a Expr = target;
                    let value: &'a Expr = value;
                    let inline = self.inlineable(value);
                    if inline.is_some() || frame.state == 0 {
                        // Read the target before the right-hand side runs.
                        let l = self.alloc_temp_for(target);
                        self.read_var(target, l);
                        frame.left = Some(Operand::Var(l));
                    }
                    if frame.state > 0 || inline.is_some() {
                        let right =
                            inline.unwrap_or_else(|| frame.right.take().expect("value slot"));
                        let left = frame.left.take().expect("target slot");
                        self.operator_call(*op, *overload, left, right, frame.out, target);
                        self.write_var(target, Operand::Var(frame.out));
                    } else {
                        frame.state += 1;
                        let r = self.alloc_temp_for(value);
                        frame.right = Some(Operand::Var(r));
                        stack.push(frame);
                        stack.push(ExprFrame::new(value, r));
                    }
                }
                ExprKind::Ternary {
                    cond,
                    then_value,
                    else_value,
                } => match frame.state {
                    0 => {
                        let cond: &'a Expr = cond;
                        let out = frame.out;
                        frame.state = 1;
                        stack.push(frame);
                        stack.push(ExprFrame::new(cond, out));
                    }
                    1 => {
                        let skip = self.blob.jump_table.allocate();
                        self.emit(Instruction::Jump(JumpOp {
                            op: Opcode::JumpZero,
                            target: skip,
                            cond: Some(Operand::Var(frame.out)),
                        }));
                        let then_value: &'a Expr = then_value;
                        let out = frame.out;
                        frame.label = Some(skip);
                        frame.state = 2;
                        stack.push(frame);
                        stack.push(ExprFrame::new(then_value, out));
                    }
                    2 => {
                        let end = self.blob.jump_table.allocate();
                        self.emit(Instruction::Jump(JumpOp {
                            op: Opcode::Jump,
                            target: end,
                            cond: None,
                        }));
                        self.bind_expr_label(frame.label.take().expect("skip label"));
                        let else_value: &'a Expr = else_value;
                        let out = frame.out;
                        frame.label = Some(end);
                        frame.state = 3;
                        stack.push(frame);
                        stack.push(ExprFrame::new(else_value, out));
                    }
                    _ => {
                        self.bind_expr_label(frame.label.take().expect("end label"));
                    }
                },
            }
        }

        out
    }

    fn bind_expr_label(&mut self, label: Label) {
        let here = self.blob.len();
        self.blob.jump_table.set(label, here);
    }

    fn alloc_temp_ty(&mut self, ty: TypeId) -> VarId {
        self.blob.metadata.reg_temp(self.module, ty).id
    }

    fn alloc_temp_for(&mut self, expr: &Expr) -> VarId {
        match expr.inferred {
            Some(ty) => self.alloc_temp_ty(ty),
            None => VarId::INVALID,
        }
    }

    /// An operand usable without materialisation: an immediate, or a plain
    /// variable that is not a reference.
    fn inlineable(&mut self, expr: &Expr) -> Option<Operand> {
        match &expr.kind {
            ExprKind::Literal(value) => Some(Operand::Const(*value)),
            ExprKind::Local(local) => {
                let var = self.blob.metadata.find_var(*local)?;
                (!var.is_reference()).then(|| var.as_operand())
            }
            _ => None,
        }
    }

    fn returns_value(&self, callee: FunctionId) -> bool {
        self.module.functions[callee].return_type.is_some()
    }

    fn type_class(&self, ty: Option<TypeId>) -> PrimitiveClass {
        match ty {
            Some(ty) => match &self.module.types[ty] {
                TypeLayout::Primitive(p) => p.class,
                _ => PrimitiveClass::Scalar,
            },
            None => PrimitiveClass::Scalar,
        }
    }

    /// Lowers a binary operation: intrinsic operators become opcodes
    /// (vector variants when the left operand is a vector), resolved
    /// overloads become calls.
    pub(crate) fn operator_call(
        &mut self,
        op: BinOp,
        overload: Option<FunctionId>,
        left: Operand,
        right: Operand,
        out: VarId,
        sample: &Expr,
    ) {
        match overload {
            Some(f) => {
                self.emit_store_param(0, left);
                self.emit_store_param(1, right);
                let callee = self.blob.metadata.reg_func(f);
                self.emit(Instruction::Call(CallOp { dst: out, callee }));
            }
            None => {
                let vector = self.type_class(sample.inferred) == PrimitiveClass::Vector;
                let opcode = bin_opcode(op, vector);
                let instr = Instruction::Binary(BinaryOp {
                    op: opcode,
                    dst: out,
                    lhs: left,
                    rhs: right,
                });
                // Both operands immediate: fold at build time.
                match try_fold(&instr) {
                    Some(folded) => {
                        self.emit(Instruction::Move(MoveOp {
                            dst: out,
                            value: Operand::Const(folded),
                        }));
                    }
                    None => {
                        self.emit(instr);
                    }
                }
            }
        }
    }

    fn emit_store_param(&mut self, index: u32, value: Operand) {
        self.emit(Instruction::StoreParam(StoreParamOp {
            op: Opcode::StoreParam,
            index,
            value,
        }));
    }

    /// Reads an lvalue (plain variable or member chain) into `out`.
    pub(crate) fn read_var(&mut self, expr: &Expr, out: VarId) {
        let (src, _is_addr) = self.member_access(expr);
        self.emit(Instruction::Load(LoadOp {
            dst: out,
            addr: Operand::Var(src),
        }));
    }

    /// Writes `value` into an lvalue. Plain variables retarget the
    /// producing instruction where possible; everything else goes through
    /// the address chain and a store.
    pub(crate) fn write_var(&mut self, target: &Expr, value: Operand) {
        if let ExprKind::Local(local) = &target.kind {
            let var = self.find_var(*local);
            if !var.is_reference() {
                match value {
                    Operand::Var(src) => self.retarget_last(src, var.id),
                    other => {
                        self.emit(Instruction::Move(MoveOp {
                            dst: var.id,
                            value: other,
                        }));
                    }
                }
                return;
            }
            self.emit(Instruction::Store(StoreOp {
                addr: var.as_operand(),
                value,
            }));
            return;
        }

        let (addr, _) = self.member_access(target);
        self.emit(Instruction::Store(StoreOp {
            addr: Operand::Var(addr),
            value,
        }));
    }

    /// Write-back for increment/decrement: keeps the expression's own
    /// result register intact, so it never retargets the producer.
    fn write_back(&mut self, target: &Expr, value: Operand) {
        if let ExprKind::Local(local) = &target.kind {
            let var = self.find_var(*local);
            if !var.is_reference() {
                self.emit(Instruction::Move(MoveOp {
                    dst: var.id,
                    value,
                }));
                return;
            }
            self.emit(Instruction::Store(StoreOp {
                addr: var.as_operand(),
                value,
            }));
            return;
        }
        let (addr, _) = self.member_access(target);
        self.emit(Instruction::Store(StoreOp {
            addr: Operand::Var(addr),
            value,
        }));
    }

    /// Walks a member chain, emitting an `offs` per field hop and swizzle
    /// lowering at swizzle hops. Returns the register holding the final
    /// value or address, and whether it is an address.
    fn member_access(&mut self, expr: &Expr) -> (VarId, bool) {
        match &expr.kind {
            ExprKind::Local(local) => (self.find_var(*local).id, false),
            ExprKind::Access { base, chain } => {
                let mut cur = self.find_var(*base).id;
                let mut is_addr = false;
                for accessor in chain {
                    match accessor {
                        Accessor::Swizzle {
                            mask,
                            source_class,
                            ty,
                        } => {
                            let next = self.alloc_temp_ty(*ty);
                            if *source_class == PrimitiveClass::Scalar {
                                self.emit(Instruction::Unary(UnaryOp {
                                    op: Opcode::BroadcastVec,
                                    dst: next,
                                    operand: Operand::Var(cur),
                                }));
                            } else {
                                self.emit(Instruction::Binary(BinaryOp {
                                    op: Opcode::VecSwizzle,
                                    dst: next,
                                    lhs: Operand::Var(cur),
                                    rhs: Operand::Const(Number::from_u32(*mask)),
                                }));
                            }
                            is_addr = false;
                            cur = next;
                        }
                        Accessor::Field { owner, index, ty } => {
                            let addr_ty = self.module.pointer_to(*ty);
                            let next = self.alloc_temp_ty(addr_ty);
                            let owner_ref = self.blob.metadata.reg_type(self.module, *owner);
                            self.emit(Instruction::Offset(crate::instruction::OffsetOp {
                                dst: next,
                                base: Operand::Var(cur),
                                field: FieldAccess::new(owner_ref, *index),
                            }));
                            is_addr = true;
                            cur = next;
                        }
                    }
                }
                (cur, is_addr)
            }
            _ => {
                debug_assert!(false, "expression is not an lvalue");
                (VarId::INVALID, false)
            }
        }
    }
}

fn arg_immediate(expr: &Expr) -> Option<Operand> {
    match &expr.kind {
        ExprKind::Literal(value) => Some(Operand::Const(*value)),
        _ => None,
    }
}

fn bin_opcode(op: BinOp, vector: bool) -> Opcode {
    if vector {
        match op {
            BinOp::Add => return Opcode::VecAdd,
            BinOp::Sub => return Opcode::VecSubtract,
            BinOp::Mul => return Opcode::VecMultiply,
            BinOp::Div => return Opcode::VecDivide,
            _ => {}
        }
    }
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Subtract,
        BinOp::Mul => Opcode::Multiply,
        BinOp::Div => Opcode::Divide,
        BinOp::Rem => Opcode::Modulus,
        BinOp::Shl => Opcode::BitwiseShiftLeft,
        BinOp::Shr => Opcode::BitwiseShiftRight,
        BinOp::LogAnd => Opcode::AndAnd,
        BinOp::LogOr => Opcode::OrOr,
        BinOp::BitAnd => Opcode::BitwiseAnd,
        BinOp::BitOr => Opcode::BitwiseOr,
        BinOp::BitXor => Opcode::BitwiseXor,
        BinOp::Lt => Opcode::LessThan,
        BinOp::Le => Opcode::LessThanOrEqual,
        BinOp::Gt => Opcode::GreaterThan,
        BinOp::Ge => Opcode::GreaterThanOrEqual,
        BinOp::Eq => Opcode::Equal,
        BinOp::Ne => Opcode::NotEqual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, FunctionAst, Stmt, StmtKind};
    use crate::builder::build_function;
    use crate::module::{AccessModifier, ModuleBuilder, PrimitiveKind};
    use crate::value::VarId;

    /// S5: struct field access goes through the reference parameter, offs
    /// and lda.
    #[test]
    fn member_access_chain() {
        let mut builder = ModuleBuilder::new();
        let ns = builder.namespace("demo");
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let p = builder.struct_type(ns, "P", AccessModifier::Public);
        builder.struct_field(p, "x", int);
        let q = builder.function(ns, "q", Some(int));
        builder.parameter(q, "p", p);
        let mut module = builder.build();

        let mut ast = FunctionAst::new(q);
        let pv = ast.param("p", p);
        ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(Expr::new(
            ExprKind::Access {
                base: pv,
                chain: vec![Accessor::Field {
                    owner: p,
                    index: 0,
                    ty: int,
                }],
            },
            Some(int),
        ))))]);

        let blob = build_function(&mut module, &ast);
        let ops: Vec<Opcode> = blob.iter().map(|n| n.data.opcode()).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::LoadRefParam,
                Opcode::OffsetAddress,
                Opcode::Load,
                Opcode::Return,
            ]
        );

        let offs = blob.iter().nth(1).unwrap();
        match &offs.data {
            Instruction::Offset(op) => {
                assert_eq!(op.base, Operand::Var(VarId::new(0)));
                assert_eq!(op.field.field, 0);
            }
            other => panic!("expected offs, got {:?}", other),
        }
    }

    /// Calls store parameters in slot order before the call itself.
    #[test]
    fn call_lowering_orders_params() {
        let mut builder = ModuleBuilder::new();
        let ns = builder.namespace("demo");
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let callee = builder.function(ns, "callee", Some(int));
        builder.parameter(callee, "a", int);
        builder.parameter(callee, "b", int);
        let caller = builder.function(ns, "caller", Some(int));
        let mut module = builder.build();

        let mut ast = FunctionAst::new(caller);
        ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(Expr::new(
            ExprKind::Call {
                callee,
                args: vec![
                    Expr::literal(Number::from_i32(1), int),
                    Expr::literal(Number::from_i32(2), int),
                ],
                constructor: false,
            },
            Some(int),
        ))))]);

        let blob = build_function(&mut module, &ast);
        let ops: Vec<Opcode> = blob.iter().map(|n| n.data.opcode()).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::StoreParam,
                Opcode::StoreParam,
                Opcode::Call,
                Opcode::Return,
            ]
        );
        let indices: Vec<u32> = blob
            .iter()
            .filter_map(|n| match &n.data {
                Instruction::StoreParam(op) => Some(op.index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }

    /// A binary over two immediates folds at build time.
    #[test]
    fn immediate_binary_folds() {
        let mut builder = ModuleBuilder::new();
        let ns = builder.namespace("demo");
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let f = builder.function(ns, "answer", Some(int));
        let mut module = builder.build();

        let mut ast = FunctionAst::new(f);
        ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(Expr::new(
            ExprKind::Binary {
                op: BinOp::Mul,
                overload: None,
                lhs: Box::new(Expr::literal(Number::from_i32(6), int)),
                rhs: Box::new(Expr::literal(Number::from_i32(7), int)),
            },
            Some(int),
        ))))]);

        let blob = build_function(&mut module, &ast);
        let ops: Vec<Opcode> = blob.iter().map(|n| n.data.opcode()).collect();
        assert_eq!(ops, vec![Opcode::Move, Opcode::Return]);
        let first = blob.iter().next().unwrap();
        match &first.data {
            Instruction::Move(op) => {
                assert_eq!(op.value, Operand::Const(Number::from_i32(42)))
            }
            other => panic!("expected folded move, got {:?}", other),
        }
    }

    /// Ternaries lower to a diamond with both arms writing the output.
    #[test]
    fn ternary_lowering() {
        let mut builder = ModuleBuilder::new();
        let ns = builder.namespace("demo");
        let int = builder.scalar("int", PrimitiveKind::Int32);
        let f = builder.function(ns, "pick", Some(int));
        builder.parameter(f, "c", int);
        let mut module = builder.build();

        let mut ast = FunctionAst::new(f);
        let c = ast.param("c", int);
        ast.body = Block::new(vec![Stmt::new(StmtKind::Return(Some(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(Expr::local(c, int)),
                then_value: Box::new(Expr::literal(Number::from_i32(1), int)),
                else_value: Box::new(Expr::literal(Number::from_i32(2), int)),
            },
            Some(int),
        ))))]);

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
                Opcode::Move,
                Opcode::Return,
            ]
        );
        // skip label lands on the else arm, end label past it.
        assert_eq!(blob.jump_table.targets, vec![5, 6]);
    }
}
