/// 制御フローグラフ
///
/// データフロー解析の出力。基本ブロック、種別付きの辺、各pcの直前フレーム、
/// レジスタと型のアリーナを所有し、後段の構造復元パスに問い合わせ口を提供する。

use super::frame::Frame;
use super::op::{Op, VarHint};
use super::reg::{Reg, RegArena, RegId};
use super::sub::{SubId, SubTable};
use super::types::{TypeStore, T};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;
use serde::Serialize;
use std::fmt;

/// 基本ブロックID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// 辺の種別
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// 逐次実行・無条件ジャンプ
    Seq,
    True,
    False,
    /// switchのケース値（Noneはdefault）
    Case(Vec<Option<i32>>),
    /// 捕捉する例外型（宣言順）
    Catch(Vec<String>),
    /// 全例外を捕捉するハンドラ
    Finally,
    Jsr(SubId),
    Ret(SubId),
}

impl EdgeKind {
    pub fn is_handler(&self) -> bool {
        matches!(self, EdgeKind::Catch(_) | EdgeKind::Finally)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Seq => write!(f, "seq"),
            EdgeKind::True => write!(f, "true"),
            EdgeKind::False => write!(f, "false"),
            EdgeKind::Case(values) => {
                let values: Vec<String> = values
                    .iter()
                    .map(|v| v.map(|k| k.to_string()).unwrap_or_else(|| "default".to_string()))
                    .collect();
                write!(f, "case [{}]", values.join(", "))
            }
            EdgeKind::Catch(types) => write!(f, "catch [{}]", types.join(", ")),
            EdgeKind::Finally => write!(f, "finally"),
            EdgeKind::Jsr(sub) => write!(f, "jsr S{}", sub.0),
            EdgeKind::Ret(sub) => write!(f, "ret S{}", sub.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// 基本ブロック
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub start_pc: usize,
    /// 命令のpc（昇順、連続）
    pub ops: Vec<usize>,
    /// 出辺・入辺（`Cfg::edges`のインデックス）
    pub outs: Vec<usize>,
    pub ins: Vec<usize>,
    /// 制御移動命令で終わったか
    pub closed: bool,
    /// 分割前の元ブロック（分割されていなければ自身）
    pub origin: BlockId,
}

impl BasicBlock {
    pub fn new(id: BlockId, start_pc: usize) -> Self {
        Self {
            id,
            start_pc,
            ops: Vec::new(),
            outs: Vec::new(),
            ins: Vec::new(),
            closed: false,
            origin: id,
        }
    }

    /// 最後の命令のpc（未実行ならNone）
    pub fn end_pc(&self) -> Option<usize> {
        self.ops.last().copied()
    }

    pub fn contains(&self, pc: usize) -> bool {
        self.ops.first().map(|&s| s <= pc).unwrap_or(false) && self.end_pc().map(|e| pc <= e).unwrap_or(false)
    }
}

/// 解析統計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisStats {
    /// ワークリストから取り出したブロック数
    pub visits: usize,
    pub blocks: usize,
    pub edges: usize,
    pub registers: usize,
    pub merges: usize,
    pub conflicts: usize,
    pub splits: usize,
    pub rewrite_steps: usize,
    pub alive: usize,
}

/// 制御フローグラフ（解析結果）
#[derive(Debug)]
pub struct Cfg {
    pub(crate) name: String,
    pub(crate) ops: Vec<Op>,
    pub(crate) locals: usize,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) edges: Vec<Edge>,
    /// 各pcの命令実行前のフレーム
    pub(crate) frames: Vec<Option<Frame>>,
    /// 後続ブロックへ落ちる命令の実行後フレーム（合流前の値）
    pub(crate) frames_out: Vec<Option<Frame>>,
    /// 各pcの命令が値として読むフレームスロット
    pub(crate) reads: Vec<Vec<usize>>,
    /// pc → そのpcを含むブロック
    pub(crate) pc_bb: Vec<Option<BlockId>>,
    /// pc → そのpcから始まるブロック
    pub(crate) starts: Vec<Option<BlockId>>,
    pub(crate) regs: RegArena,
    pub(crate) store: TypeStore,
    pub(crate) subs: SubTable,
    pub(crate) params: Vec<RegId>,
    pub(crate) hints: Vec<VarHint>,
    pub(crate) rpo: Vec<BlockId>,
    pub(crate) stats: AnalysisStats,
}

impl Cfg {
    pub(crate) fn new(name: String, ops: Vec<Op>, locals: usize, store: TypeStore, hints: Vec<VarHint>) -> Self {
        let n = ops.len();
        Self {
            name,
            ops,
            locals,
            blocks: Vec::new(),
            edges: Vec::new(),
            frames: vec![None; n],
            frames_out: vec![None; n],
            reads: vec![Vec::new(); n],
            pc_bb: vec![None; n],
            starts: vec![None; n],
            regs: RegArena::new(),
            store,
            subs: SubTable::new(),
            params: Vec::new(),
            hints,
            rpo: Vec::new(),
            stats: AnalysisStats::default(),
        }
    }

    pub(crate) fn new_block(&mut self, start_pc: usize) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id, start_pc));
        self.starts[start_pc] = Some(id);
        id
    }

    pub(crate) fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) -> usize {
        let index = self.edges.len();
        self.edges.push(Edge { from, to, kind });
        self.blocks[from.0 as usize].outs.push(index);
        self.blocks[to.0 as usize].ins.push(index);
        index
    }

    /// 逆後順を計算する
    pub(crate) fn compute_rpo(&mut self) {
        if self.blocks.is_empty() {
            self.rpo.clear();
            return;
        }
        let mut graph: DiGraph<BlockId, ()> = DiGraph::with_capacity(self.blocks.len(), self.edges.len());
        let nodes: Vec<NodeIndex> = self.blocks.iter().map(|b| graph.add_node(b.id)).collect();
        for edge in &self.edges {
            graph.add_edge(nodes[edge.from.0 as usize], nodes[edge.to.0 as usize], ());
        }
        let mut dfs = DfsPostOrder::new(&graph, nodes[0]);
        let mut order = Vec::with_capacity(self.blocks.len());
        while let Some(node) = dfs.next(&graph) {
            order.push(graph[node]);
        }
        order.reverse();
        self.rpo = order;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn op(&self, pc: usize) -> Option<&Op> {
        self.ops.get(pc)
    }

    /// ローカル変数のスロット数
    pub fn locals(&self) -> usize {
        self.locals
    }

    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    /// ID順のブロック
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// 逆後順のブロック
    pub fn blocks_rpo(&self) -> impl Iterator<Item = &BasicBlock> {
        self.rpo.iter().map(move |&id| self.block(id))
    }

    /// pcを含むブロック
    pub fn block_of(&self, pc: usize) -> Option<&BasicBlock> {
        self.pc_bb.get(pc).copied().flatten().map(|id| self.block(id))
    }

    /// pcから始まるブロック
    pub fn block_starting_at(&self, pc: usize) -> Option<&BasicBlock> {
        self.starts.get(pc).copied().flatten().map(|id| self.block(id))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn out_edges(&self, id: BlockId) -> impl Iterator<Item = &Edge> {
        self.block(id).outs.iter().map(move |&e| &self.edges[e])
    }

    pub fn in_edges(&self, id: BlockId) -> impl Iterator<Item = &Edge> {
        self.block(id).ins.iter().map(move |&e| &self.edges[e])
    }

    /// 命令実行前のフレーム
    pub fn frame_in(&self, pc: usize) -> Option<&Frame> {
        self.frames.get(pc).and_then(|f| f.as_ref())
    }

    /// 命令実行後のフレーム
    ///
    /// 次の命令へ進む命令のみ。制御移動命令は後続ごとにフレームが異なるためNone。
    /// ブロック末尾の命令は後続の合流前の値を返す
    pub fn frame_out(&self, pc: usize) -> Option<&Frame> {
        let op = self.ops.get(pc)?;
        if op.kind.is_control() {
            return None;
        }
        match &self.frames_out[pc] {
            Some(frame) => Some(frame),
            None => self.frame_in(pc + 1),
        }
    }

    pub fn reg(&self, id: RegId) -> &Reg {
        self.regs.get(id)
    }

    pub fn regs(&self) -> &RegArena {
        &self.regs
    }

    pub fn store(&self) -> &TypeStore {
        &self.store
    }

    pub fn type_name(&self, t: T) -> &str {
        self.store.name(t)
    }

    /// レジスタの型名
    pub fn reg_type(&self, id: RegId) -> &str {
        self.type_name(self.reg(id).t)
    }

    /// 引数のレジスタ（インスタンスメソッドはthisを含む）
    pub fn params(&self) -> &[RegId] {
        &self.params
    }

    pub fn subs(&self) -> &SubTable {
        &self.subs
    }

    /// デバッグ情報の変数名
    pub fn var_name(&self, index: usize, pc: usize) -> Option<&str> {
        self.hints
            .iter()
            .find(|h| h.index == index && h.start_pc <= pc && pc < h.end_pc)
            .map(|h| h.name.as_str())
    }

    /// pcのフレームのスロットが読まれるか
    pub fn is_alive(&self, pc: usize, index: usize) -> bool {
        self.frame_in(pc).map(|f| f.is_alive(index)).unwrap_or(false)
    }

    /// pcの命令が読むスロット
    pub fn reads(&self, pc: usize) -> &[usize] {
        self.reads.get(pc).map(|r| r.as_slice()).unwrap_or(&[])
    }

    pub fn stats(&self) -> &AnalysisStats {
        &self.stats
    }

    pub fn summary(&self) -> CfgSummary {
        let blocks = self
            .blocks_rpo()
            .map(|b| BlockSummary {
                id: b.id,
                start_pc: b.start_pc,
                end_pc: b.end_pc(),
                successors: self
                    .out_edges(b.id)
                    .map(|e| (e.to, e.kind.to_string()))
                    .collect(),
            })
            .collect();
        let params = self
            .params
            .iter()
            .map(|&r| self.reg_type(r).to_string())
            .collect();
        CfgSummary {
            name: self.name.clone(),
            params,
            blocks,
            stats: self.stats.clone(),
        }
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Control Flow Graph: {}", self.name)?;
        if let Some(entry) = self.entry() {
            writeln!(f, "  Entry Block: {}", entry.id)?;
        }
        writeln!(f, "  Block Count: {}", self.block_count())?;
        writeln!(f)?;

        for block in self.blocks_rpo() {
            match block.end_pc() {
                Some(end) => writeln!(f, "Block {} (pc {} - {}):", block.id, block.start_pc, end)?,
                None => writeln!(f, "Block {} (pc {}):", block.id, block.start_pc)?,
            }
            for &pc in &block.ops {
                let frame = self.frame_in(pc).map(|fr| fr.to_string()).unwrap_or_default();
                writeln!(f, "  {:4}: {:<40} {}", pc, frame, self.ops[pc])?;
            }
            let succs: Vec<String> = self
                .out_edges(block.id)
                .map(|e| format!("{} ({})", e.to, e.kind))
                .collect();
            if !succs.is_empty() {
                writeln!(f, "  Successors: {}", succs.join(", "))?;
            }
            writeln!(f)?;
        }

        let mut merges = self.regs.iter().filter(|r| r.is_merge()).peekable();
        if merges.peek().is_some() {
            writeln!(f, "Merges:")?;
            for reg in merges {
                if let Some(node) = reg.merge_node() {
                    let inputs: Vec<String> = node
                        .inputs
                        .iter()
                        .map(|i| match i.pred {
                            Some(p) => format!("{}:{}", p, i.reg),
                            None => format!("entry:{}", i.reg),
                        })
                        .collect();
                    writeln!(
                        f,
                        "  {} @{} slot {}: {} <- {}",
                        reg.id,
                        node.block,
                        reg.index,
                        self.type_name(reg.t),
                        inputs.join(", ")
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// 機械可読な要約（CLIのJSON出力用）
#[derive(Debug, Clone, Serialize)]
pub struct CfgSummary {
    pub name: String,
    pub params: Vec<String>,
    pub blocks: Vec<BlockSummary>,
    pub stats: AnalysisStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    pub id: BlockId,
    pub start_pc: usize,
    pub end_pc: Option<usize>,
    pub successors: Vec<(BlockId, String)>,
}
