/// 合流と遡及置換
///
/// 分岐先へのフレーム合流はスロットごとに`merge_reg`で行う。既存の値と異なる値が
/// 流れ込むと合流レジスタを作り、古い値を参照している下流のスロットを
/// 置換義務のワークリストで書き換える。書き換えが別の合流点を生むこともあり、
/// その場合は義務を追加して不動点まで処理する。

use super::analysis::Analyzer;
use super::cfg::{BlockId, EdgeKind};
use super::error::{AnalysisError, Result};
use super::frame::Frame;
use super::reg::{MergeInput, MergeNode, RegId, RegKind};
use super::sub::SubId;
use tracing::{trace, warn};

/// 置換義務: pcから始まるスロットindexのoldをnewへ
///
/// newがNoneならスロットを使用不能（型の衝突）にする
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Rewrite {
    pub pc: usize,
    pub index: usize,
    pub old: RegId,
    pub new: Option<RegId>,
}

impl<'a> Analyzer<'a> {
    /// 分岐先targetのフレームへframeを合流させる
    pub(super) fn merge_frame(&mut self, pred: Option<BlockId>, target: usize, frame: &Frame) -> Result<()> {
        let Some(bb) = self.cfg.starts[target] else {
            return Err(AnalysisError::InvalidTarget { pc: self.pc, target });
        };
        let Some(expected) = self.cfg.frames[target].as_ref().map(|f| f.stack_len()) else {
            // 最初の到達はそのまま設置
            self.cfg.frames[target] = Some(frame.clone());
            self.add_contributor(bb, pred);
            return Ok(());
        };
        if expected != frame.stack_len() {
            return Err(AnalysisError::StackDepthMismatch {
                pc: self.pc,
                target,
                expected,
                found: frame.stack_len(),
            });
        }
        for index in 0..frame.size() {
            self.merge_reg(bb, index, frame.get(index), pred, true);
        }
        self.add_contributor(bb, pred);
        self.drain_rewrites()
    }

    /// ブロックbb先頭のスロットindexへ値newを合流させる
    ///
    /// keep_predがfalseなら、predが以前に渡した古い値を合流入力に含めない
    pub(super) fn merge_reg(
        &mut self,
        bb: BlockId,
        index: usize,
        new: Option<RegId>,
        pred: Option<BlockId>,
        keep_pred: bool,
    ) {
        let start = self.cfg.block(bb).start_pc;
        let Some(old) = self.cfg.frames[start].as_ref().and_then(|f| f.get(index)) else {
            return;
        };
        let Some(new) = new else {
            self.rewrites.push_back(Rewrite { pc: start, index, old, new: None });
            return;
        };
        if old == new {
            return;
        }

        let (old_t, new_t) = (self.cfg.regs.get(old).t, self.cfg.regs.get(new).t);
        let joined = self.cfg.store.intersect(old_t, new_t);

        if self.cfg.regs.get(old).is_merge_at(bb) {
            match joined {
                Some(t) => {
                    self.cfg.regs.push_input(old, MergeInput { pred, reg: new });
                    self.cfg.regs.get_mut(old).t = t;
                }
                None => self.conflict(start, index, old, new),
            }
            return;
        }

        let Some(t) = joined else {
            self.conflict(start, index, old, new);
            return;
        };
        let mut inputs: Vec<MergeInput> = self
            .contributed
            .get(&bb)
            .map(|preds| {
                preds
                    .iter()
                    .filter(|&&p| keep_pred || p != pred)
                    .map(|&p| MergeInput { pred: p, reg: old })
                    .collect()
            })
            .unwrap_or_default();
        inputs.push(MergeInput { pred, reg: new });
        let merge = self.cfg.regs.alloc(
            start,
            index,
            t,
            RegKind::Merge(MergeNode { block: bb, inputs }),
            None,
        );
        self.cfg.stats.merges += 1;
        trace!(pc = start, index, "{} merges {} and {}", merge, old, new);
        self.rewrites.push_back(Rewrite { pc: start, index, old, new: Some(merge) });
    }

    fn conflict(&mut self, pc: usize, index: usize, old: RegId, new: RegId) {
        self.cfg.stats.conflicts += 1;
        warn!(
            pc,
            slot = index,
            "type conflict merging {} ({}) with {} ({}), slot becomes unusable",
            old,
            self.cfg.store.name(self.cfg.regs.get(old).t),
            new,
            self.cfg.store.name(self.cfg.regs.get(new).t)
        );
        self.rewrites.push_back(Rewrite { pc, index, old, new: None });
    }

    /// 置換義務を空になるまで処理する
    pub(super) fn drain_rewrites(&mut self) -> Result<()> {
        while let Some(rewrite) = self.rewrites.pop_front() {
            self.cfg.stats.rewrite_steps += 1;
            let budget = self
                .config
                .rewrite_budget(self.cfg.regs.len(), self.cfg.blocks.len());
            if self.cfg.stats.rewrite_steps > budget {
                self.rewrites.clear();
                return Err(AnalysisError::RewriteBudgetExceeded { budget });
            }
            self.rewrite(rewrite);
        }
        Ok(())
    }

    /// 1件の置換義務: ブロック内を再定義まで進み、末尾に達したら後続へ伝播する
    fn rewrite(&mut self, rw: Rewrite) {
        let Some(bb) = self.cfg.pc_bb[rw.pc].or(self.cfg.starts[rw.pc]) else {
            return;
        };
        let end = self.cfg.block(bb).end_pc();
        let mut pc = rw.pc;
        let mut touched = false;
        let mut reached_end = false;
        loop {
            let Some(frame) = self.cfg.frames[pc].as_mut() else {
                break;
            };
            if frame.get(rw.index) != Some(rw.old) {
                break;
            }
            frame.set(rw.index, rw.new);
            touched = true;
            self.fix_defs(pc, rw);
            match end {
                Some(end) if pc < end => pc += 1,
                Some(_) => {
                    if let Some(out) = self.cfg.frames_out[pc].as_mut() {
                        if out.get(rw.index) == Some(rw.old) {
                            out.set(rw.index, rw.new);
                        }
                    }
                    reached_end = true;
                    break;
                }
                None => break,
            }
        }
        if !touched {
            return;
        }
        if reached_end && self.current == Some(bb) {
            self.renames.push(rw);
        }

        let locals = self.cfg.locals;
        let succs: Vec<(BlockId, EdgeKind)> = self
            .cfg
            .out_edges(bb)
            .map(|e| (e.to, e.kind.clone()))
            .collect();
        for (to, kind) in succs {
            match kind {
                // ハンドラはブロック内のどの命令からも到達する（スタックは例外のみ）
                kind if kind.is_handler() => {
                    if rw.index < locals {
                        self.rewrite_successor(bb, to, rw);
                    }
                }
                // 本体で書き換えないローカルの戻り値は呼び出し元のもの
                EdgeKind::Ret(sub) if rw.index < locals && !self.written_in_sub(sub, rw.index) => {}
                _ if reached_end => self.rewrite_successor(bb, to, rw),
                _ => {}
            }
        }

        // JSRの戻り先には、本体で書き換えられないローカルが呼び出し元から直接届く
        if reached_end && rw.index < locals {
            let follows: Vec<(usize, BlockId)> = self
                .cfg
                .subs
                .iter()
                .filter(|sub| !self.written_in_sub(sub.id, rw.index))
                .filter_map(|sub| sub.ret.map(|ret| (sub, ret.bb)))
                .flat_map(|(sub, ret_bb)| {
                    sub.callers
                        .iter()
                        .filter(move |c| c.bb == bb)
                        .map(move |c| (c.follow_pc, ret_bb))
                })
                .collect();
            for (follow_pc, ret_bb) in follows {
                if let Some(to) = self.cfg.starts[follow_pc] {
                    self.rewrite_successor(ret_bb, to, rw);
                }
            }
        }
    }

    /// サブルーチン本体がローカルindexを書き換えるか（RET時と入口の値が異なる）
    pub(super) fn written_in_sub(&self, sub: SubId, index: usize) -> bool {
        let sub = self.cfg.subs.get(sub);
        let Some(ret) = sub.ret else {
            return false;
        };
        let at = |pc: usize| self.cfg.frames[pc].as_ref().and_then(|f| f.get(index));
        at(ret.pc) != at(sub.entry_pc)
    }

    /// 後続ブロックtoの先頭スロットへ置換を伝播する
    fn rewrite_successor(&mut self, pred: BlockId, to: BlockId, rw: Rewrite) {
        let start = self.cfg.block(to).start_pc;
        let Some(slot) = self.cfg.frames[start].as_ref().map(|f| f.get(rw.index)) else {
            return;
        };
        let Some(current) = slot else {
            return;
        };

        if current == rw.old {
            let sole = self
                .contributed
                .get(&to)
                .map(|preds| preds.iter().all(|p| *p == Some(pred)))
                .unwrap_or(false);
            if sole {
                self.rewrites.push_back(Rewrite { pc: start, ..rw });
            } else {
                self.merge_reg(to, rw.index, rw.new, Some(pred), false);
            }
            return;
        }

        if !self.cfg.regs.get(current).is_merge_at(to) {
            return;
        }
        let origin = self.cfg.block(pred).origin;
        let has_input = self.cfg.regs.get(current).merge_node().map_or(false, |node| {
            node.inputs.iter().any(|i| {
                i.reg == rw.old && i.pred.map_or(false, |p| self.cfg.block(p).origin == origin)
            })
        });
        if !has_input {
            return;
        }
        match rw.new {
            None => self.rewrites.push_back(Rewrite { pc: start, index: rw.index, old: current, new: None }),
            Some(new) => {
                let blocks = &self.cfg.blocks;
                self.cfg.regs.replace_input(current, rw.old, new, |p| {
                    p.map_or(false, |p| blocks[p.0 as usize].origin == origin)
                });
                let (t, new_t) = (self.cfg.regs.get(current).t, self.cfg.regs.get(new).t);
                match self.cfg.store.intersect(t, new_t) {
                    Some(t) => self.cfg.regs.get_mut(current).t = t,
                    None => self.conflict(start, rw.index, current, new),
                }
            }
        }
    }

    /// pcの命令が生成したレジスタの参照元を付け替える
    fn fix_defs(&mut self, pc: usize, rw: Rewrite) {
        let Some(new) = rw.new else {
            return;
        };
        for &id in &self.defs[pc] {
            match &mut self.cfg.regs.get_mut(id).kind {
                RegKind::Move { source, source_index } if *source == rw.old && *source_index == rw.index => {
                    *source = new;
                }
                RegKind::BoolMath { left, right } => {
                    if *left == rw.old {
                        *left = new;
                    }
                    if *right == rw.old {
                        *right = new;
                    }
                }
                _ => {}
            }
        }
    }

    /// 実行中ブロックの作業フレームに保留中の置換を反映する
    pub(super) fn apply_renames(&mut self, frame: &mut Frame) {
        for rw in self.renames.drain(..) {
            if frame.get(rw.index) == Some(rw.old) {
                frame.set(rw.index, rw.new);
            }
        }
    }
}
