/// データフロー解析の駆動部
///
/// ワークリスト上のブロック先頭pcを1つずつ取り出し、記録済みフレームをコピーして
/// 命令を実行する。制御移動命令に達したら各分岐先へフレームを合流させる。
/// 既に実行済みのブロックへの合流は、値の遡及置換（merge.rs）で反映するため、
/// 各ブロックは一度だけ実行される。
///
/// 基本ブロックは分岐先として初めて参照されたときに作られ、
/// 実行済みブロックの途中が分岐先になった場合は分割される。

use super::cfg::{BlockId, Cfg, EdgeKind};
use super::config::AnalysisConfig;
use super::error::{AnalysisError, Result};
use super::frame::{Frame, Slot};
use super::liveness;
use super::merge::Rewrite;
use super::op::MethodCode;
use super::reg::{RegId, RegKind};
use super::sub::{JsrCall, SubId, SubRet};
use super::types::{ClassHierarchy, Kind, TypeSpec, TypeStore, OBJECT, T, THROWABLE};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, debug_span, trace};

/// 1メソッドを解析してCFGを構築する
pub fn analyze(method: &MethodCode, hierarchy: Arc<dyn ClassHierarchy>, config: &AnalysisConfig) -> Result<Cfg> {
    if method.ops.is_empty() {
        return Err(AnalysisError::EmptyMethod);
    }
    let span = debug_span!("analyze", method = %method.name);
    let _enter = span.enter();

    let mut analyzer = Analyzer::new(method, TypeStore::new(hierarchy), config);
    analyzer.seed();
    analyzer.run()?;
    let mut cfg = analyzer.finish();
    if config.mark_liveness {
        liveness::mark(&mut cfg);
    }
    debug!(
        blocks = cfg.stats.blocks,
        registers = cfg.stats.registers,
        merges = cfg.stats.merges,
        "analysis finished"
    );
    Ok(cfg)
}

/// 命令実行後の制御
pub(super) enum Flow {
    Next,
    End,
}

pub(super) struct Analyzer<'a> {
    pub(super) method: &'a MethodCode,
    pub(super) config: &'a AnalysisConfig,
    pub(super) cfg: Cfg,
    queue: VecDeque<BlockId>,
    /// 合流先ブロック → フレームを渡し済みの先行ブロック（Noneはメソッド入口）
    pub(super) contributed: HashMap<BlockId, Vec<Option<BlockId>>>,
    /// pc → その命令が生成したレジスタ
    pub(super) defs: Vec<Vec<RegId>>,
    /// ハンドラpc → 例外レジスタ
    exc_regs: HashMap<usize, RegId>,
    pub(super) current: Option<BlockId>,
    /// 実行中の命令
    pub(super) pc: usize,
    pub(super) rewrites: VecDeque<Rewrite>,
    /// 作業フレームに反映すべき置換
    pub(super) renames: Vec<Rewrite>,
}

impl<'a> Analyzer<'a> {
    pub(super) fn new(method: &'a MethodCode, store: TypeStore, config: &'a AnalysisConfig) -> Self {
        let locals = method.max_locals.max(Self::param_width(method));
        let cfg = Cfg::new(
            method.name.clone(),
            method.ops.clone(),
            locals,
            store,
            method.hints.clone(),
        );
        Self {
            method,
            config,
            cfg,
            queue: VecDeque::new(),
            contributed: HashMap::new(),
            defs: vec![Vec::new(); method.ops.len()],
            exc_regs: HashMap::new(),
            current: None,
            pc: 0,
            rewrites: VecDeque::new(),
            renames: Vec::new(),
        }
    }

    fn param_specs(method: &MethodCode) -> Vec<TypeSpec> {
        let mut specs = Vec::with_capacity(method.params.len() + 1);
        if !method.is_static {
            specs.push(TypeSpec::class(method.owner.as_deref().unwrap_or(OBJECT)));
        }
        specs.extend(method.params.iter().cloned());
        specs
    }

    fn param_width(method: &MethodCode) -> usize {
        Self::param_specs(method)
            .iter()
            .map(|s| if s.is_wide() { 2 } else { 1 })
            .sum()
    }

    /// pc 0に引数から入口フレームを設置する
    pub(super) fn seed(&mut self) {
        let mut frame = Frame::new(self.cfg.locals);
        let mut index = 0;
        for spec in Self::param_specs(self.method) {
            let declared = self.cfg.store.intern(&spec);
            let t = self.hinted(index, 0, declared);
            let wide = spec.is_wide();
            let reg = self.cfg.regs.alloc(0, index, t, RegKind::Const, None);
            frame.set_local(index, Some(reg), wide);
            self.cfg.params.push(reg);
            index += if wide { 2 } else { 1 };
        }
        let entry = self.cfg.new_block(0);
        self.cfg.frames[0] = Some(frame);
        self.contributed.insert(entry, vec![None]);
        self.queue.push_back(entry);
    }

    pub(super) fn run(&mut self) -> Result<()> {
        while let Some(bb) = self.queue.pop_front() {
            self.cfg.stats.visits += 1;
            self.exec_block(bb)?;
        }
        Ok(())
    }

    pub(super) fn finish(mut self) -> Cfg {
        self.cfg.compute_rpo();
        self.cfg.stats.blocks = self.cfg.blocks.len();
        self.cfg.stats.edges = self.cfg.edges.len();
        self.cfg.stats.registers = self.cfg.regs.len();
        self.cfg
    }

    /// 実行中のブロック（分割で入れ替わることがある）
    pub(super) fn current_bb(&self) -> BlockId {
        self.current.unwrap_or(BlockId(0))
    }

    fn exec_block(&mut self, bb: BlockId) -> Result<()> {
        let start = self.cfg.block(bb).start_pc;
        let mut frame = match &self.cfg.frames[start] {
            Some(frame) => frame.clone(),
            None => return Ok(()),
        };
        self.current = Some(bb);
        self.renames.clear();
        debug!(block = %bb, pc = start, "executing block");

        let ranges = self.ranges_at(start);
        self.pc = start;
        let handlers = self.handler_edges(start)?;

        let mut pc = start;
        loop {
            self.pc = pc;
            if pc != start {
                // 既存ブロックの先頭、または例外範囲の境界ではブロックを閉じる
                let next = match self.cfg.starts[pc] {
                    Some(next) => Some(next),
                    None if self.ranges_at(pc) != ranges => Some(self.target_bb(pc)?),
                    None => None,
                };
                if let Some(next) = next {
                    let from = self.current_bb();
                    self.cfg.frames_out[pc - 1] = Some(frame.clone());
                    self.cfg.add_edge(from, next, EdgeKind::Seq);
                    self.merge_frame(Some(from), pc, &frame)?;
                    break;
                }
                self.cfg.frames[pc] = Some(frame.clone());
            }

            let cur = self.current_bb();
            self.cfg.blocks[cur.0 as usize].ops.push(pc);
            self.cfg.pc_bb[pc] = Some(cur);

            for &(handler_pc, exception) in &handlers {
                let handler_frame = frame.handler_frame(exception);
                let cur = self.current_bb();
                self.merge_frame(Some(cur), handler_pc, &handler_frame)?;
                self.apply_renames(&mut frame);
            }

            trace!(pc, op = %self.method.ops[pc], "exec");
            match self.exec(pc, &mut frame)? {
                Flow::Next => {
                    if pc + 1 >= self.method.ops.len() {
                        return Err(AnalysisError::FallOffEnd { pc });
                    }
                    pc += 1;
                }
                Flow::End => {
                    let cur = self.current_bb();
                    self.cfg.blocks[cur.0 as usize].closed = true;
                    break;
                }
            }
        }
        self.current = None;
        Ok(())
    }

    /// pcを覆う例外表エントリのインデックス
    fn ranges_at(&self, pc: usize) -> Vec<usize> {
        self.method
            .excs
            .iter()
            .enumerate()
            .filter(|(_, e)| e.covers(pc))
            .map(|(i, _)| i)
            .collect()
    }

    /// ブロック先頭で例外辺を張り、(ハンドラpc, 例外レジスタ)を返す
    ///
    /// 同じハンドラpcのエントリは宣言順に1本の辺へまとめる。先に捕捉済みの型と
    /// 全例外捕捉より後のエントリには到達しないので除外する。
    fn handler_edges(&mut self, pc: usize) -> Result<Vec<(usize, RegId)>> {
        let mut groups: IndexMap<usize, (Vec<String>, bool)> = IndexMap::new();
        let mut caught: HashSet<&str> = HashSet::new();
        for exc in self.method.excs.iter().filter(|e| e.covers(pc)) {
            match &exc.catch_type {
                Some(name) => {
                    if caught.insert(name.as_str()) {
                        groups.entry(exc.handler_pc).or_default().0.push(name.clone());
                    }
                }
                None => {
                    groups.entry(exc.handler_pc).or_default().1 = true;
                    break;
                }
            }
        }

        let mut handlers = Vec::with_capacity(groups.len());
        for (handler_pc, (types, finally)) in groups {
            let kind = if finally { EdgeKind::Finally } else { EdgeKind::Catch(types) };
            let to = self.target_bb(handler_pc)?;
            let exception = self.exception_reg(handler_pc, &kind);
            let from = self.current_bb();
            self.cfg.add_edge(from, to, kind);
            handlers.push((handler_pc, exception));
        }
        Ok(handlers)
    }

    /// ハンドラ入口でスタックに積まれる例外のレジスタ
    fn exception_reg(&mut self, handler_pc: usize, kind: &EdgeKind) -> RegId {
        if let Some(&reg) = self.exc_regs.get(&handler_pc) {
            return reg;
        }
        let store = &mut self.cfg.store;
        let t = match kind {
            EdgeKind::Catch(types) => {
                let mut ts = types.iter().map(|name| store.class(name)).collect::<Vec<T>>().into_iter();
                let first = ts.next().unwrap_or_else(|| store.class(THROWABLE));
                ts.fold(first, |acc, t| store.intersect(acc, t).unwrap_or(acc))
            }
            _ => store.class(THROWABLE),
        };
        let index = self.cfg.locals;
        let reg = self.cfg.regs.alloc(handler_pc, index, t, RegKind::Const, None);
        self.exc_regs.insert(handler_pc, reg);
        reg
    }

    /// 分岐先pcのブロックを取得する
    ///
    /// 未知のpcなら新しいブロックを作ってワークリストに積み、
    /// 実行済みブロックの途中なら分割する。
    pub(super) fn target_bb(&mut self, target: usize) -> Result<BlockId> {
        if target >= self.method.ops.len() {
            return Err(AnalysisError::InvalidTarget { pc: self.pc, target });
        }
        if let Some(bb) = self.cfg.starts[target] {
            return Ok(bb);
        }
        if let Some(bb) = self.cfg.pc_bb[target] {
            return Ok(self.split(bb, target));
        }
        let bb = self.cfg.new_block(target);
        debug!(block = %bb, pc = target, "new block");
        self.queue.push_back(bb);
        Ok(bb)
    }

    /// ブロックbbをpcで分割する
    ///
    /// 元のIDは前半（先頭pc、入辺、先頭の合流レジスタ）が保持し、
    /// 後半が新しいIDで出辺を引き継ぐ。例外辺は両方に張る。
    fn split(&mut self, bb: BlockId, pc: usize) -> BlockId {
        let tail = BlockId(self.cfg.blocks.len() as u32);
        let head = &mut self.cfg.blocks[bb.0 as usize];
        let at = head.ops.iter().position(|&p| p == pc).unwrap_or(head.ops.len());
        let ops = head.ops.split_off(at);
        let head_end = head.ops.last().copied();
        let outs = std::mem::take(&mut head.outs);
        let closed = head.closed;
        let origin = head.origin;
        head.closed = true;

        let mut block = super::cfg::BasicBlock::new(tail, pc);
        block.ops = ops;
        block.outs = outs;
        block.closed = closed;
        block.origin = origin;
        for &p in &block.ops {
            self.cfg.pc_bb[p] = Some(tail);
        }
        self.cfg.starts[pc] = Some(tail);
        for &e in &block.outs {
            self.cfg.edges[e].from = tail;
        }
        let moved: Vec<(BlockId, EdgeKind)> = block
            .outs
            .iter()
            .map(|&e| (self.cfg.edges[e].to, self.cfg.edges[e].kind.clone()))
            .collect();
        self.cfg.blocks.push(block);
        // 前半の末尾命令の実行後の値は、分割点へ合流する前のフレーム
        if let Some(end) = head_end {
            self.cfg.frames_out[end] = self.cfg.frames[pc].clone();
        }

        for (to, kind) in &moved {
            if kind.is_handler() {
                self.cfg.add_edge(bb, *to, kind.clone());
                self.add_contributor(*to, Some(tail));
            } else {
                if let Some(preds) = self.contributed.get_mut(to) {
                    for pred in preds.iter_mut().filter(|p| **p == Some(bb)) {
                        *pred = Some(tail);
                    }
                }
                self.cfg.regs.retarget_pred(*to, bb, tail);
            }
        }
        self.cfg.add_edge(bb, tail, EdgeKind::Seq);
        self.contributed.insert(tail, vec![Some(bb)]);
        self.cfg.subs.retarget(bb, tail, pc);
        if self.current == Some(bb) {
            self.current = Some(tail);
        }
        self.cfg.stats.splits += 1;
        debug!(block = %bb, tail = %tail, pc, "split block");
        tail
    }

    /// デバッグ情報の型ヒントを適用する。互換でなければ推論型のまま
    pub(super) fn hinted(&mut self, index: usize, pc: usize, t: T) -> T {
        if !self.config.use_debug_hints {
            return t;
        }
        let hint = self
            .method
            .hints
            .iter()
            .find(|h| h.index == index && h.start_pc <= pc + 1 && pc < h.end_pc);
        let Some(hint) = hint else {
            return t;
        };
        let declared = self.cfg.store.intern(&hint.t);
        match self.cfg.store.assign_to(t, declared) {
            Some(_) if self.cfg.store.is_class(declared) => declared,
            Some(narrowed) => narrowed,
            None => {
                debug!(
                    pc,
                    index,
                    hint = %hint.name,
                    "ignoring debug hint: {} is not assignable to {}",
                    self.cfg.store.name(t),
                    self.cfg.store.name(declared)
                );
                t
            }
        }
    }

    /// JSR: 戻りアドレスを積んでサブルーチン入口へ
    pub(super) fn exec_jsr(&mut self, frame: &mut Frame, target: usize) -> Result<()> {
        let pc = self.pc;
        let (sub, fresh) = self.cfg.subs.get_or_create(target);
        if frame.in_sub(sub) {
            return Err(AnalysisError::ReentrantSubroutine { pc, entry: target });
        }
        let ret_t = self.cfg.store.kind(Kind::RET);
        let mut sub_frame = frame.clone();
        self.push_value(&mut sub_frame, ret_t, RegKind::Const, None)?;
        sub_frame.push_sub(sub);

        let to = self.target_bb(target)?;
        let from = self.current_bb();
        self.cfg.subs.get_mut(sub).callers.push(JsrCall {
            bb: from,
            jsr_pc: pc,
            follow_pc: pc + 1,
        });
        if fresh {
            debug!(pc, entry = target, "new subroutine S{}", sub.0);
        }
        self.cfg.add_edge(from, to, EdgeKind::Jsr(sub));
        self.merge_frame(Some(from), target, &sub_frame)?;
        self.apply_renames(frame);

        if self.cfg.subs.get(sub).ret.is_some() {
            let call = self.cfg.subs.get(sub).callers.last().copied();
            if let Some(call) = call {
                self.wire_return(sub, call)?;
            }
        }
        Ok(())
    }

    /// RET: 実行中のサブルーチンの呼び出し元すべてへ戻る
    pub(super) fn exec_ret(&mut self, frame: &Frame, index: usize) -> Result<()> {
        let pc = self.pc;
        let sub = *frame
            .subs()
            .last()
            .ok_or(AnalysisError::RetOutsideSubroutine { pc })?;
        self.check_local(index, false)?;
        self.cfg.reads[pc].push(index);
        let bb = self.current_bb();
        self.cfg.subs.get_mut(sub).ret = Some(SubRet { pc, bb });
        let callers = self.cfg.subs.get(sub).callers.clone();
        for call in callers {
            self.wire_return(sub, call)?;
        }
        Ok(())
    }

    /// RETから呼び出し元の次の命令へ戻り辺を張る
    ///
    /// 本体で書き換えられなかったローカルはJSR直前の値に戻し、
    /// 書き換えられたローカルは本体の値を引き継ぐ。
    fn wire_return(&mut self, sub: SubId, call: JsrCall) -> Result<()> {
        let entry_pc = self.cfg.subs.get(sub).entry_pc;
        let Some(ret) = self.cfg.subs.get(sub).ret else {
            return Ok(());
        };
        let frames = &self.cfg.frames;
        let (Some(ret_frame), Some(entry_frame), Some(pre)) =
            (&frames[ret.pc], &frames[entry_pc], &frames[call.jsr_pc])
        else {
            return Ok(());
        };

        let mut out = ret_frame.clone();
        for index in 0..self.cfg.locals {
            if ret_frame.get(index) == entry_frame.get(index) {
                out.set_slot(index, pre.slot(index).unwrap_or(Slot::default()));
            }
        }
        out.set_subs(pre.subs().to_vec());

        let to = self.target_bb(call.follow_pc)?;
        let from = self.cfg.subs.get(sub).ret.map(|r| r.bb).unwrap_or(ret.bb);
        debug!(sub = sub.0, from = %from, follow = call.follow_pc, "wiring subroutine return");
        self.cfg.add_edge(from, to, EdgeKind::Ret(sub));
        self.merge_frame(Some(from), call.follow_pc, &out)
    }

    /// 合流先への寄与を記録する
    pub(super) fn add_contributor(&mut self, bb: BlockId, pred: Option<BlockId>) {
        let preds = self.contributed.entry(bb).or_default();
        if !preds.contains(&pred) {
            preds.push(pred);
        }
    }
}
