/// 活性解析
///
/// 値として読まれたフレームスロットから後ろ向きに辿り、定義に至るまでの
/// スロットとレジスタに活性印を付ける。MOVEはコピー元へ、MERGEは各入力の
/// 先行ブロックへ進み、CONST/BOOLMATHと印の付いたスロットで止まる。

use super::cfg::{BlockId, Cfg, Edge, EdgeKind};
use super::reg::{RegId, RegKind};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
enum Task {
    /// pcのフレームのスロットindexがregとして読まれる
    Slot { pc: usize, index: usize, reg: RegId },
    /// regの定義を辿る
    Reg(RegId),
}

/// すべての読み出し地点から活性を伝播させる
pub(crate) fn mark(cfg: &mut Cfg) {
    let mut work: Vec<Task> = Vec::new();
    for (pc, reads) in cfg.reads.iter().enumerate() {
        let Some(frame) = &cfg.frames[pc] else {
            continue;
        };
        for &index in reads {
            if let Some(reg) = frame.get(index) {
                work.push(Task::Slot { pc, index, reg });
            }
        }
    }

    while let Some(task) = work.pop() {
        match task {
            Task::Slot { pc, index, reg } => walk_slot(cfg, pc, index, reg, &mut work),
            Task::Reg(reg) => mark_reg(cfg, reg, &mut work),
        }
    }

    cfg.stats.alive = cfg.regs.iter().filter(|r| r.alive).count();
    debug!(alive = cfg.stats.alive, registers = cfg.regs.len(), "liveness marked");
}

/// ブロック内を後ろ向きに辿り、regを保持しているスロットに印を付ける
fn walk_slot(cfg: &mut Cfg, pc: usize, index: usize, reg: RegId, work: &mut Vec<Task>) {
    work.push(Task::Reg(reg));
    let Some(bb) = cfg.pc_bb[pc] else {
        return;
    };
    let start = cfg.block(bb).start_pc;
    let mut p = pc;
    loop {
        let Some(frame) = cfg.frames[p].as_mut() else {
            return;
        };
        // 直前の命令がregを定義した
        if frame.get(index) != Some(reg) {
            return;
        }
        if !frame.mark_alive(index) {
            return;
        }
        if p == start {
            break;
        }
        p -= 1;
    }

    if cfg.regs.get(reg).is_merge_at(bb) {
        return;
    }
    let ins: Vec<Edge> = cfg.in_edges(bb).cloned().collect();
    for edge in &ins {
        pred_sources(cfg, edge, start, index, reg, work);
    }
}

/// 辺の元ブロックでregを保持していたスロットを積む
fn pred_sources(cfg: &Cfg, edge: &Edge, start: usize, index: usize, reg: RegId, work: &mut Vec<Task>) {
    let pred = cfg.block(edge.from);
    let holds = |pc: usize| cfg.frames[pc].as_ref().and_then(|f| f.get(index)) == Some(reg);
    let mut push = |pc: usize| {
        if holds(pc) {
            work.push(Task::Slot { pc, index, reg });
        }
    };
    match &edge.kind {
        kind if kind.is_handler() => {
            // 例外はブロック内のどの命令からも起こりうる
            if index < cfg.locals {
                pred.ops.iter().copied().for_each(&mut push);
            }
        }
        EdgeKind::Ret(sub) => {
            let sub = cfg.subs.get(*sub);
            let Some(ret) = sub.ret else {
                return;
            };
            let written = index >= cfg.locals || {
                let at = |pc: usize| cfg.frames[pc].as_ref().and_then(|f| f.get(index));
                at(ret.pc) != at(sub.entry_pc)
            };
            if written {
                push(ret.pc);
            } else {
                // 本体で書き換えられないローカルはサブルーチンを飛び越える
                for call in sub.callers.iter().filter(|c| c.follow_pc == start) {
                    push(call.jsr_pc);
                }
            }
        }
        _ => {
            if let Some(last) = pred.end_pc() {
                push(last);
            }
        }
    }
}

/// regを活性にし、定義元を辿る
fn mark_reg(cfg: &mut Cfg, reg: RegId, work: &mut Vec<Task>) {
    let r = cfg.regs.get_mut(reg);
    if r.alive {
        return;
    }
    r.alive = true;
    let (pc, index) = (r.pc, r.index);
    match r.kind.clone() {
        RegKind::Move { source, source_index } => {
            work.push(Task::Slot { pc, index: source_index, reg: source });
        }
        RegKind::Merge(node) => {
            let start = cfg.block(node.block).start_pc;
            for input in &node.inputs {
                work.push(Task::Reg(input.reg));
                let Some(pred) = input.pred else {
                    continue;
                };
                let edges: Vec<Edge> = edges_between(cfg, pred, node.block);
                for edge in &edges {
                    pred_sources(cfg, edge, start, index, input.reg, work);
                }
            }
        }
        RegKind::Const | RegKind::BoolMath { .. } => {}
    }
}

fn edges_between(cfg: &Cfg, from: BlockId, to: BlockId) -> Vec<Edge> {
    cfg.out_edges(from).filter(|e| e.to == to).cloned().collect()
}
