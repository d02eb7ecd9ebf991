/// 命令ごとのスタック効果
///
/// 各命令はオペランドをpop/loadし、結果のレジスタをpush/storeする。
/// 値を消費する命令は期待する型への代入縮約で曖昧な型を確定させる。

use super::analysis::{Analyzer, Flow};
use super::cfg::EdgeKind;
use super::error::{AnalysisError, Result};
use super::frame::{Frame, Slot, StackFault};
use super::op::{DupKind, Literal, OpKind, PopKind};
use super::reg::{RegId, RegKind};
use super::types::{Kind, TypeSpec, T, THROWABLE};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{debug, warn};

impl<'a> Analyzer<'a> {
    pub(super) fn exec(&mut self, pc: usize, frame: &mut Frame) -> Result<Flow> {
        let method = self.method;
        match &method.ops[pc].kind {
            OpKind::Add { t }
            | OpKind::Sub { t }
            | OpKind::Mul { t }
            | OpKind::Div { t }
            | OpKind::Rem { t } => {
                let t = self.cfg.store.intern(t);
                self.pop(frame, Some(t))?;
                self.pop(frame, Some(t))?;
                self.push_const(frame, t, None)?;
            }
            OpKind::And { t } | OpKind::Or { t } | OpKind::Xor { t } => {
                let t = self.cfg.store.intern(t);
                let right = self.pop(frame, Some(t))?;
                let left = self.pop(frame, Some(t))?;
                self.exec_logic(frame, t, left, right)?;
            }
            OpKind::Shl { t, shift } | OpKind::Shr { t, shift, .. } => {
                let t = self.cfg.store.intern(t);
                let shift = self.cfg.store.intern(shift);
                self.pop(frame, Some(shift))?;
                self.pop(frame, Some(t))?;
                self.push_const(frame, t, None)?;
            }
            OpKind::Neg { t } => {
                let t = self.cfg.store.intern(t);
                self.pop(frame, Some(t))?;
                self.push_const(frame, t, None)?;
            }
            OpKind::Cmp { t } => {
                let t = self.cfg.store.intern(t);
                self.pop(frame, Some(t))?;
                self.pop(frame, Some(t))?;
                let int = self.cfg.store.int();
                self.push_const(frame, int, None)?;
            }
            OpKind::Cast { from, to } => {
                let from = self.cfg.store.intern(from);
                let to = self.cfg.store.intern(to);
                self.pop(frame, Some(from))?;
                self.push_const(frame, to, None)?;
            }
            OpKind::Aload { t } => {
                let t = self.cfg.store.intern(t);
                let int = self.cfg.store.int();
                let any_ref = self.cfg.store.kind(Kind::REF);
                self.pop(frame, Some(int))?;
                let array = self.pop(frame, Some(any_ref))?;
                let element = match array {
                    Some(array) => {
                        let array_t = self.cfg.regs.get(array).t;
                        self.cfg
                            .store
                            .element_of(array_t)
                            .and_then(|e| self.cfg.store.assign_to(e, t))
                            .unwrap_or(t)
                    }
                    None => t,
                };
                self.push_const(frame, element, None)?;
            }
            OpKind::Astore { t } => {
                let t = self.cfg.store.intern(t);
                let int = self.cfg.store.int();
                let any_ref = self.cfg.store.kind(Kind::REF);
                self.pop(frame, Some(t))?;
                self.pop(frame, Some(int))?;
                self.pop(frame, Some(any_ref))?;
            }
            OpKind::ArrayLength => {
                let any_ref = self.cfg.store.kind(Kind::REF);
                self.pop(frame, Some(any_ref))?;
                let int = self.cfg.store.int();
                self.push_const(frame, int, None)?;
            }
            OpKind::NewArray { t, dims } => {
                let int = self.cfg.store.int();
                let dims = (*dims).max(1);
                for _ in 0..dims {
                    self.pop(frame, Some(int))?;
                }
                let mut array = self.cfg.store.intern(t);
                for _ in 0..dims {
                    array = self.cfg.store.array_of(array);
                }
                self.push_const(frame, array, None)?;
            }
            OpKind::FillArray { .. } => {
                let any_ref = self.cfg.store.kind(Kind::REF);
                self.pop(frame, Some(any_ref))?;
            }
            OpKind::New { t } => {
                let t = self.cfg.store.intern(t);
                self.push_const(frame, t, None)?;
            }
            OpKind::InstanceOf { .. } => {
                let any_ref = self.cfg.store.kind(Kind::REF);
                self.pop(frame, Some(any_ref))?;
                let boolean = self.cfg.store.kind(Kind::BOOLEAN);
                self.push_const(frame, boolean, None)?;
            }
            OpKind::Get { field } => {
                if !field.is_static {
                    let owner = self.cfg.store.class(&field.owner);
                    self.pop(frame, Some(owner))?;
                }
                let t = self.cfg.store.intern(&field.t);
                self.push_const(frame, t, None)?;
            }
            OpKind::Put { field } => {
                let t = self.cfg.store.intern(&field.t);
                self.pop(frame, Some(t))?;
                if !field.is_static {
                    let owner = self.cfg.store.class(&field.owner);
                    self.pop(frame, Some(owner))?;
                }
            }
            OpKind::Invoke { method: callee } => {
                for param in callee.params.iter().rev() {
                    let t = self.cfg.store.intern(param);
                    self.pop(frame, Some(t))?;
                }
                if !callee.is_static {
                    let owner = self.cfg.store.class(&callee.owner);
                    self.pop(frame, Some(owner))?;
                }
                if let Some(ret) = &callee.ret {
                    let t = self.cfg.store.intern(ret);
                    self.push_const(frame, t, None)?;
                }
            }
            OpKind::Monitor { .. } => {
                let any_ref = self.cfg.store.kind(Kind::REF);
                self.pop(frame, Some(any_ref))?;
            }
            OpKind::Load { t, reg } => {
                let t = self.cfg.store.intern(t);
                self.exec_load(frame, t, *reg)?;
            }
            OpKind::Store { t, reg } => {
                let t = self.cfg.store.intern(t);
                self.exec_store(frame, t, *reg)?;
            }
            OpKind::Inc { t, reg, .. } => {
                let t = self.cfg.store.intern(t);
                self.exec_inc(frame, t, *reg)?;
            }
            OpKind::Push { t, value } => {
                let t = self.push_type(t, value.as_ref());
                self.push_const(frame, t, value.clone())?;
            }
            OpKind::Pop { kind } => {
                let popped = match kind {
                    PopKind::Pop => frame.pop_narrow().map(|_| ()),
                    PopKind::Pop2 => match frame.peek(0) {
                        Some(top) if top.wide => frame.pop().map(|_| ()),
                        _ => frame.pop_narrow().and_then(|_| frame.pop_narrow()).map(|_| ()),
                    },
                };
                popped.map_err(|fault| AnalysisError::Stack { pc, fault })?;
            }
            OpKind::Dup { kind } => {
                let (count, pattern) = self.dup_shape(frame, *kind)?;
                self.shuffle(frame, count, pattern)?;
            }
            OpKind::Swap => {
                self.require(frame, &[false, false])?;
                self.shuffle(frame, 2, &[1, 0])?;
            }
            OpKind::Goto { target } => {
                self.jump(frame, *target, EdgeKind::Seq)?;
                return Ok(Flow::End);
            }
            OpKind::Jcmp { t, target, .. } => {
                let t = self.cfg.store.intern(t);
                self.pop(frame, Some(t))?;
                self.pop(frame, Some(t))?;
                self.branch(frame, *target)?;
                return Ok(Flow::End);
            }
            OpKind::Jcnd { t, target, .. } => {
                let t = self.cfg.store.intern(t);
                self.pop(frame, Some(t))?;
                self.branch(frame, *target)?;
                return Ok(Flow::End);
            }
            OpKind::Switch { keys, targets, default } => {
                let int = self.cfg.store.int();
                self.pop(frame, Some(int))?;
                let mut cases: IndexMap<usize, Vec<Option<i32>>> = IndexMap::new();
                for (&key, &target) in keys.iter().zip(targets) {
                    cases.entry(target).or_default().push(Some(key));
                }
                cases.entry(*default).or_default().push(None);
                for (target, values) in cases {
                    self.jump(frame, target, EdgeKind::Case(values))?;
                }
                return Ok(Flow::End);
            }
            OpKind::Jsr { target } => {
                self.exec_jsr(frame, *target)?;
                return Ok(Flow::End);
            }
            OpKind::Ret { reg } => {
                self.exec_ret(frame, *reg)?;
                return Ok(Flow::End);
            }
            OpKind::Return { t } => {
                if let Some(t) = t {
                    let t = self.cfg.store.intern(t);
                    self.pop(frame, Some(t))?;
                }
                return Ok(Flow::End);
            }
            OpKind::Throw => {
                let throwable = self.cfg.store.class(THROWABLE);
                self.pop(frame, Some(throwable))?;
                return Ok(Flow::End);
            }
            OpKind::Unknown { opcode } => {
                return Err(AnalysisError::UnknownOp { pc, opcode: *opcode });
            }
        }
        Ok(Flow::Next)
    }

    /// PUSHの型。リテラルがあれば命令の型と交差させる
    fn push_type(&mut self, t: &TypeSpec, value: Option<&Literal>) -> T {
        let declared = self.cfg.store.intern(t);
        match value {
            Some(literal) => {
                let literal_t = self.cfg.store.intern(&literal.type_spec());
                self.cfg.store.assign_to(literal_t, declared).unwrap_or(declared)
            }
            None => declared,
        }
    }

    /// and/or/xor。boolean になりうる結果は両オペランドを保持する
    fn exec_logic(&mut self, frame: &mut Frame, t: T, left: Option<RegId>, right: Option<RegId>) -> Result<()> {
        let (Some(left), Some(right)) = (left, right) else {
            self.push_const(frame, t, None)?;
            return Ok(());
        };
        let (lt, rt) = (self.cfg.regs.get(left).t, self.cfg.regs.get(right).t);
        let result = self
            .cfg
            .store
            .intersect(lt, rt)
            .and_then(|operands| self.cfg.store.intersect(operands, t))
            .unwrap_or(t);
        if self.cfg.store.kinds(result).intersects(Kind::BOOLEAN) {
            self.push_value(frame, result, RegKind::BoolMath { left, right }, None)?;
        } else {
            self.push_const(frame, result, None)?;
        }
        Ok(())
    }

    /// ローカルindex（wideなら次のスロットも）がフレームに収まるか
    pub(super) fn check_local(&self, index: usize, wide: bool) -> Result<()> {
        let width = if wide { 2 } else { 1 };
        if index + width > self.cfg.locals {
            return Err(AnalysisError::InvalidLocal {
                pc: self.pc,
                index,
                locals: self.cfg.locals,
            });
        }
        Ok(())
    }

    fn exec_load(&mut self, frame: &mut Frame, t: T, index: usize) -> Result<()> {
        self.check_local(index, self.cfg.store.is_wide(t))?;
        match frame.local(index) {
            Some(source) => {
                let source_t = self.cfg.regs.get(source).t;
                let moved = self.cfg.store.assign_to(source_t, t).unwrap_or(source_t);
                self.push_value(frame, moved, RegKind::Move { source, source_index: index }, None)?;
            }
            None => {
                warn!(pc = self.pc, local = index, "load from an unusable local, synthesizing a value");
                self.push_const(frame, t, None)?;
            }
        }
        Ok(())
    }

    fn exec_store(&mut self, frame: &mut Frame, t: T, index: usize) -> Result<()> {
        let pc = self.pc;
        self.check_local(index, self.cfg.store.is_wide(t))?;
        let stack_index = frame.size().saturating_sub(1);
        let popped = if self.cfg.store.is_wide(t) { frame.pop() } else { frame.pop_narrow() };
        let slot = popped.map_err(|fault| AnalysisError::Stack { pc, fault })?;
        let wide = slot.wide;
        let Some(source) = slot.reg else {
            frame.set_local(index, None, wide);
            return Ok(());
        };
        let source_t = self.cfg.regs.get(source).t;
        let moved = self.cfg.store.assign_to(source_t, t).unwrap_or(source_t);
        let moved = self.hinted(index, pc, moved);
        let reg = self.cfg.regs.alloc(
            pc,
            index,
            moved,
            RegKind::Move { source, source_index: stack_index },
            None,
        );
        self.defs[pc].push(reg);
        frame.set_local(index, Some(reg), wide);
        Ok(())
    }

    fn exec_inc(&mut self, frame: &mut Frame, t: T, index: usize) -> Result<()> {
        let pc = self.pc;
        self.check_local(index, false)?;
        self.cfg.reads[pc].push(index);
        let result = match frame.local(index) {
            Some(source) => {
                self.narrow(source, t);
                let source_t = self.cfg.regs.get(source).t;
                self.cfg.store.intersect(source_t, t).unwrap_or(t)
            }
            None => {
                warn!(pc, local = index, "increment of an unusable local");
                t
            }
        };
        let result = self.hinted(index, pc, result);
        let reg = self.cfg.regs.alloc(pc, index, result, RegKind::Const, None);
        self.defs[pc].push(reg);
        frame.set_local(index, Some(reg), false);
        Ok(())
    }

    /// 値を消費するpop。tが与えられれば代入縮約で型を確定させる
    pub(super) fn pop(&mut self, frame: &mut Frame, t: Option<T>) -> Result<Option<RegId>> {
        let pc = self.pc;
        let index = frame.size().saturating_sub(1);
        let wide = t.map(|t| self.cfg.store.is_wide(t)).unwrap_or(false);
        let popped = if wide { frame.pop() } else { frame.pop_narrow() };
        let slot = popped.map_err(|fault| AnalysisError::Stack { pc, fault })?;
        self.cfg.reads[pc].push(index);
        if let (Some(reg), Some(t)) = (slot.reg, t) {
            self.narrow(reg, t);
        }
        Ok(slot.reg)
    }

    /// 新しいレジスタを作ってpushする
    pub(super) fn push_value(
        &mut self,
        frame: &mut Frame,
        t: T,
        kind: RegKind,
        value: Option<Literal>,
    ) -> Result<RegId> {
        let pc = self.pc;
        let wide = self.cfg.store.is_wide(t);
        if self.config.enforce_max_stack {
            if let Some(max) = self.method.max_stack {
                let width = frame.width() + if wide { 2 } else { 1 };
                if width > max {
                    return Err(AnalysisError::StackOverflow { pc, max });
                }
            }
        }
        let reg = self.cfg.regs.alloc(pc, frame.size(), t, kind, value);
        self.defs[pc].push(reg);
        frame.push(reg, wide);
        Ok(reg)
    }

    fn push_const(&mut self, frame: &mut Frame, t: T, value: Option<Literal>) -> Result<RegId> {
        self.push_value(frame, t, RegKind::Const, value)
    }

    /// レジスタの型をtへ縮約する。コピー元と合流入力へも伝播する
    pub(super) fn narrow(&mut self, reg: RegId, t: T) {
        let mut work = vec![(reg, t)];
        let mut seen: HashSet<RegId> = HashSet::new();
        while let Some((reg, t)) = work.pop() {
            if !seen.insert(reg) {
                continue;
            }
            let current = self.cfg.regs.get(reg).t;
            match self.cfg.store.assign_to(current, t) {
                Some(narrowed) if narrowed != current => {
                    self.cfg.regs.get_mut(reg).t = narrowed;
                    match &self.cfg.regs.get(reg).kind {
                        RegKind::Move { source, .. } => work.push((*source, narrowed)),
                        RegKind::Merge(node) => {
                            work.extend(node.inputs.iter().map(|i| (i.reg, narrowed)));
                        }
                        RegKind::Const | RegKind::BoolMath { .. } => {}
                    }
                }
                Some(_) => {}
                None => debug!(
                    pc = self.pc,
                    "{} of type {} used as {}",
                    reg,
                    self.cfg.store.name(current),
                    self.cfg.store.name(t)
                ),
            }
        }
    }

    /// 無条件の移動
    fn jump(&mut self, frame: &mut Frame, target: usize, kind: EdgeKind) -> Result<()> {
        let to = self.target_bb(target)?;
        let from = self.current_bb();
        self.cfg.add_edge(from, to, kind);
        self.merge_frame(Some(from), target, frame)?;
        self.apply_renames(frame);
        Ok(())
    }

    /// 条件分岐: 成立側と次の命令
    fn branch(&mut self, frame: &mut Frame, target: usize) -> Result<()> {
        let follow = self.pc + 1;
        if follow >= self.method.ops.len() {
            return Err(AnalysisError::FallOffEnd { pc: self.pc });
        }
        self.jump(frame, target, EdgeKind::True)?;
        self.jump(frame, follow, EdgeKind::False)
    }

    /// トップから順にスロット幅を検査する（trueはwide必須、falseは単一幅必須）
    fn require(&self, frame: &Frame, widths: &[bool]) -> Result<()> {
        let pc = self.pc;
        for (depth, &wide) in widths.iter().enumerate() {
            match frame.peek(depth) {
                None => return Err(AnalysisError::Stack { pc, fault: StackFault::Underflow }),
                Some(slot) if slot.wide != wide => {
                    return Err(AnalysisError::Stack { pc, fault: StackFault::WideSplit })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// DUP系命令の消費スロット数と並べ替え（0が最深）
    fn dup_shape(&self, frame: &Frame, kind: DupKind) -> Result<(usize, &'static [usize])> {
        fn shape(
            widths: &'static [bool],
            count: usize,
            pattern: &'static [usize],
        ) -> (&'static [bool], usize, &'static [usize]) {
            (widths, count, pattern)
        }
        let wide_at = |depth: usize| frame.peek(depth).map(|s| s.wide);
        let (widths, count, pattern) = match kind {
            DupKind::Dup => shape(&[false], 1, &[0, 0]),
            DupKind::DupX1 => shape(&[false, false], 2, &[1, 0, 1]),
            DupKind::DupX2 => match wide_at(1) {
                Some(true) => shape(&[false, true], 2, &[1, 0, 1]),
                _ => shape(&[false, false, false], 3, &[2, 0, 1, 2]),
            },
            DupKind::Dup2 => match wide_at(0) {
                Some(true) => shape(&[true], 1, &[0, 0]),
                _ => shape(&[false, false], 2, &[0, 1, 0, 1]),
            },
            DupKind::Dup2X1 => match wide_at(0) {
                Some(true) => shape(&[true, false], 2, &[1, 0, 1]),
                _ => shape(&[false, false, false], 3, &[1, 2, 0, 1, 2]),
            },
            DupKind::Dup2X2 => match (wide_at(0), wide_at(1), wide_at(2)) {
                (Some(true), Some(true), _) => shape(&[true, true], 2, &[1, 0, 1]),
                (Some(true), _, _) => shape(&[true, false, false], 3, &[2, 0, 1, 2]),
                (_, _, Some(true)) => shape(&[false, false, true], 3, &[1, 2, 0, 1, 2]),
                _ => shape(&[false, false, false, false], 4, &[2, 3, 0, 1, 2, 3]),
            },
        };
        self.require(frame, widths)?;
        Ok((count, pattern))
    }

    /// トップcount個のスロットをpatternの順に積み直す
    ///
    /// 位置の変わらない値は同じレジスタのまま、移動・複製された値はMOVEになる
    fn shuffle(&mut self, frame: &mut Frame, count: usize, pattern: &[usize]) -> Result<()> {
        let pc = self.pc;
        let depth = frame.stack_len();
        if depth < count {
            return Err(AnalysisError::Stack { pc, fault: StackFault::Underflow });
        }
        let base = frame.stack_index(depth - count);
        let consumed: Vec<Slot> = frame.stack()[depth - count..].to_vec();
        for _ in 0..count {
            frame.pop().map_err(|fault| AnalysisError::Stack { pc, fault })?;
        }
        for (position, &source) in pattern.iter().enumerate() {
            let slot = consumed[source];
            match slot.reg {
                Some(reg) if position != source => {
                    let t = self.cfg.regs.get(reg).t;
                    self.push_value(
                        frame,
                        t,
                        RegKind::Move { source: reg, source_index: base + source },
                        None,
                    )?;
                }
                _ => frame.push_slot(slot),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::dataflow::analysis::analyze;
    use crate::dataflow::cfg::EdgeKind;
    use crate::dataflow::config::AnalysisConfig;
    use crate::dataflow::error::AnalysisError;
    use crate::dataflow::frame::StackFault;
    use crate::dataflow::op::{DupKind, FieldRef, Literal, MethodCode, MethodRef, OpKind, PopKind};
    use crate::dataflow::reg::RegKind;
    use crate::dataflow::types::{Kind, MapHierarchy, TypeSpec};
    use std::sync::Arc;

    fn run(method: &MethodCode) -> Result<crate::dataflow::cfg::Cfg, AnalysisError> {
        analyze(method, Arc::new(MapHierarchy::new()), &AnalysisConfig::default())
    }

    fn long() -> TypeSpec {
        TypeSpec::Multi(Kind::LONG)
    }

    #[test]
    fn test_push_literal_type() {
        let method = MethodCode::new(
            "lit",
            0,
            vec![
                OpKind::Push { t: TypeSpec::Multi(Kind::INT_FAMILY), value: Some(Literal::Int(-5)) },
                OpKind::Pop { kind: PopKind::Pop },
                OpKind::Return { t: None },
            ],
        );
        let cfg = run(&method).unwrap();
        let reg = cfg.frame_in(1).unwrap().peek(0).unwrap().reg.unwrap();
        assert_eq!(cfg.reg_type(reg), "{byte,short,int}");
        assert_eq!(cfg.reg(reg).value, Some(Literal::Int(-5)));
    }

    #[test]
    fn test_consumer_narrows_ambiguous_value() {
        let method = MethodCode::new(
            "narrow",
            0,
            vec![
                OpKind::Push { t: TypeSpec::Multi(Kind::BYTE | Kind::SHORT | Kind::INT), value: None },
                OpKind::Put {
                    field: FieldRef {
                        owner: "com.example.A".to_string(),
                        name: "s".to_string(),
                        t: TypeSpec::Multi(Kind::SHORT),
                        is_static: true,
                    },
                },
                OpKind::Return { t: None },
            ],
        );
        let cfg = run(&method).unwrap();
        let reg = cfg.frame_in(1).unwrap().peek(0).unwrap().reg.unwrap();
        assert_eq!(cfg.reg_type(reg), "short");
        assert_eq!(cfg.reads(1), &[0]);
    }

    #[test]
    fn test_dup_creates_move() {
        let method = MethodCode::new(
            "dup",
            0,
            vec![
                OpKind::New { t: TypeSpec::class("com.example.A") },
                OpKind::Dup { kind: DupKind::Dup },
                OpKind::Invoke {
                    method: MethodRef {
                        owner: "com.example.A".to_string(),
                        name: "<init>".to_string(),
                        params: vec![],
                        ret: None,
                        is_static: false,
                    },
                },
                OpKind::Return { t: Some(TypeSpec::class("com.example.A")) },
            ],
        );
        let cfg = run(&method).unwrap();
        let frame = cfg.frame_in(2).unwrap();
        let original = frame.peek(1).unwrap().reg.unwrap();
        let copy = frame.peek(0).unwrap().reg.unwrap();
        assert_ne!(original, copy);
        assert_eq!(
            cfg.reg(copy).kind,
            RegKind::Move { source: original, source_index: 0 }
        );
        assert_eq!(cfg.frame_in(3).unwrap().peek(0).unwrap().reg, Some(original));
    }

    #[test]
    fn test_dup2_x1_with_wide_top() {
        // int, long -> long, int, long
        let method = MethodCode::new(
            "dup2x1",
            0,
            vec![
                OpKind::Push { t: TypeSpec::int(), value: None },
                OpKind::Push { t: long(), value: None },
                OpKind::Dup { kind: DupKind::Dup2X1 },
                OpKind::Return { t: None },
            ],
        );
        let cfg = run(&method).unwrap();
        let frame = cfg.frame_in(3).unwrap();
        assert_eq!(frame.stack_len(), 3);
        assert_eq!(frame.width(), 5);
        assert!(frame.peek(0).unwrap().wide);
        assert!(!frame.peek(1).unwrap().wide);
        assert!(frame.peek(2).unwrap().wide);
    }

    #[test]
    fn test_narrow_pop_of_wide_value_fails() {
        let method = MethodCode::new(
            "split",
            0,
            vec![
                OpKind::Push { t: long(), value: None },
                OpKind::Pop { kind: PopKind::Pop },
                OpKind::Return { t: None },
            ],
        );
        assert_eq!(
            run(&method).unwrap_err(),
            AnalysisError::Stack { pc: 1, fault: StackFault::WideSplit }
        );
    }

    #[test]
    fn test_stack_underflow() {
        let method = MethodCode::new("under", 0, vec![OpKind::Return { t: Some(TypeSpec::int()) }]);
        assert_eq!(
            run(&method).unwrap_err(),
            AnalysisError::Stack { pc: 0, fault: StackFault::Underflow }
        );
    }

    #[test]
    fn test_max_stack_enforced() {
        let mut method = MethodCode::new(
            "over",
            0,
            vec![
                OpKind::Push { t: long(), value: None },
                OpKind::Return { t: None },
            ],
        );
        method.max_stack = Some(1);
        assert_eq!(run(&method).unwrap_err(), AnalysisError::StackOverflow { pc: 0, max: 1 });
    }

    #[test]
    fn test_boolean_logic_keeps_operands() {
        let boolean = TypeSpec::Multi(Kind::BOOLEAN | Kind::INT);
        let method = MethodCode::new(
            "both",
            2,
            vec![
                OpKind::Load { t: boolean.clone(), reg: 0 },
                OpKind::Load { t: boolean.clone(), reg: 1 },
                OpKind::And { t: boolean.clone() },
                OpKind::Return { t: Some(boolean) },
            ],
        )
        .with_params(vec![TypeSpec::Multi(Kind::BOOLEAN), TypeSpec::Multi(Kind::BOOLEAN)]);
        let cfg = run(&method).unwrap();
        let result = cfg.frame_in(3).unwrap().peek(0).unwrap().reg.unwrap();
        assert!(matches!(cfg.reg(result).kind, RegKind::BoolMath { .. }));
        assert_eq!(cfg.reg_type(result), "boolean");
    }

    #[test]
    fn test_unknown_op_is_fatal() {
        let method = MethodCode::new("weird", 0, vec![OpKind::Unknown { opcode: 0xba }]);
        assert_eq!(
            run(&method).unwrap_err(),
            AnalysisError::UnknownOp { pc: 0, opcode: 0xba }
        );
    }

    #[test]
    fn test_swap_moves_both_values() {
        let method = MethodCode::new(
            "swap",
            0,
            vec![
                OpKind::Push { t: TypeSpec::int(), value: None },
                OpKind::Push { t: TypeSpec::Multi(Kind::FLOAT), value: None },
                OpKind::Swap,
                OpKind::Return { t: None },
            ],
        );
        let cfg = run(&method).unwrap();
        let before = cfg.frame_in(2).unwrap();
        let (a, b) = (before.peek(1).unwrap().reg.unwrap(), before.peek(0).unwrap().reg.unwrap());
        let after = cfg.frame_in(3).unwrap();
        let top = after.peek(0).unwrap().reg.unwrap();
        let bottom = after.peek(1).unwrap().reg.unwrap();
        assert_eq!(cfg.reg(top).kind, RegKind::Move { source: a, source_index: 0 });
        assert_eq!(cfg.reg(bottom).kind, RegKind::Move { source: b, source_index: 1 });
        assert_eq!(cfg.reg_type(top), "int");
    }

    #[test]
    fn test_swap_of_wide_value_fails() {
        let method = MethodCode::new(
            "swap_long",
            0,
            vec![
                OpKind::Push { t: TypeSpec::int(), value: None },
                OpKind::Push { t: long(), value: None },
                OpKind::Swap,
                OpKind::Return { t: None },
            ],
        );
        assert_eq!(
            run(&method).unwrap_err(),
            AnalysisError::Stack { pc: 2, fault: StackFault::WideSplit }
        );
    }

    #[test]
    fn test_dup_x2_inserts_below_three() {
        // a, b, c -> c, a, b, c
        let method = MethodCode::new(
            "dupx2",
            0,
            vec![
                OpKind::Push { t: TypeSpec::int(), value: None },
                OpKind::Push { t: TypeSpec::int(), value: None },
                OpKind::Push { t: TypeSpec::int(), value: None },
                OpKind::Dup { kind: DupKind::DupX2 },
                OpKind::Return { t: None },
            ],
        );
        let cfg = run(&method).unwrap();
        let c = cfg.frame_in(3).unwrap().peek(0).unwrap().reg.unwrap();
        let frame = cfg.frame_in(4).unwrap();
        assert_eq!(frame.stack_len(), 4);
        for depth in [0, 3] {
            let copy = frame.peek(depth).unwrap().reg.unwrap();
            assert_eq!(cfg.reg(copy).kind, RegKind::Move { source: c, source_index: 2 });
        }
    }

    #[test]
    fn test_dup2_x2_with_two_wide_values() {
        // long a, long b -> b, a, b
        let method = MethodCode::new(
            "dup2x2",
            0,
            vec![
                OpKind::Push { t: long(), value: None },
                OpKind::Push { t: long(), value: None },
                OpKind::Dup { kind: DupKind::Dup2X2 },
                OpKind::Return { t: None },
            ],
        );
        let cfg = run(&method).unwrap();
        let b = cfg.frame_in(2).unwrap().peek(0).unwrap().reg.unwrap();
        let frame = cfg.frame_in(3).unwrap();
        assert_eq!(frame.stack_len(), 3);
        assert_eq!(frame.width(), 6);
        assert!(frame.stack().iter().all(|s| s.wide));
        let top = frame.peek(0).unwrap().reg.unwrap();
        let bottom = frame.peek(2).unwrap().reg.unwrap();
        assert_eq!(cfg.reg(top).kind, RegKind::Move { source: b, source_index: 1 });
        assert_eq!(cfg.reg(bottom).kind, RegKind::Move { source: b, source_index: 1 });
    }

    #[test]
    fn test_switch_groups_cases_by_target() {
        // 0: load r0; 1: switch {1 -> 2, 2 -> 3, 3 -> 2, default -> 3}; 2: return; 3: return
        let method = MethodCode::new(
            "select",
            1,
            vec![
                OpKind::Load { t: TypeSpec::int(), reg: 0 },
                OpKind::Switch { keys: vec![1, 2, 3], targets: vec![2, 3, 2], default: 3 },
                OpKind::Return { t: None },
                OpKind::Return { t: None },
            ],
        )
        .with_params(vec![TypeSpec::int()]);
        let cfg = run(&method).unwrap();
        let entry = cfg.block_of(1).unwrap().id;
        let edges: Vec<_> = cfg.out_edges(entry).map(|e| (cfg.block(e.to).start_pc, e.kind.clone())).collect();
        assert_eq!(
            edges,
            vec![
                (2, EdgeKind::Case(vec![Some(1), Some(3)])),
                (3, EdgeKind::Case(vec![Some(2), None])),
            ]
        );
        assert_eq!(edges[1].1.to_string(), "case [2, default]");
    }

    #[test]
    fn test_local_index_out_of_range() {
        let method = MethodCode::new(
            "oob",
            0,
            vec![
                OpKind::Push { t: TypeSpec::int(), value: None },
                OpKind::Store { t: TypeSpec::int(), reg: 3 },
                OpKind::Load { t: TypeSpec::int(), reg: 3 },
                OpKind::Return { t: Some(TypeSpec::int()) },
            ],
        );
        assert_eq!(
            run(&method).unwrap_err(),
            AnalysisError::InvalidLocal { pc: 1, index: 3, locals: 0 }
        );

        // wide値は2スロット必要
        let method = MethodCode::new(
            "oob_long",
            1,
            vec![
                OpKind::Push { t: long(), value: None },
                OpKind::Store { t: long(), reg: 0 },
                OpKind::Return { t: None },
            ],
        );
        assert_eq!(
            run(&method).unwrap_err(),
            AnalysisError::InvalidLocal { pc: 1, index: 0, locals: 1 }
        );

        let method = MethodCode::new(
            "oob_inc",
            1,
            vec![OpKind::Inc { t: TypeSpec::int(), reg: 1, value: 1 }, OpKind::Return { t: None }],
        );
        assert_eq!(
            run(&method).unwrap_err(),
            AnalysisError::InvalidLocal { pc: 0, index: 1, locals: 1 }
        );
    }
}
