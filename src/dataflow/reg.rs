/// シンボリックレジスタ
///
/// 定義ごとに一つ作られる値の記録。同一性が意味を持つ（後段のパスは
/// 「このレジスタがまだスタックトップにあるか」でインライン化を判定する）ため、
/// 値が同じでも統合せず、アリーナ上の安定した整数IDで識別する。

use super::cfg::BlockId;
use super::op::Literal;
use super::types::T;
use std::fmt;

/// レジスタID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegId(pub u32);

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// 合流入力: どの先行ブロックからどの値が来たか（Noneはメソッド入口）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeInput {
    pub pred: Option<BlockId>,
    pub reg: RegId,
}

/// n項の合流ノード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeNode {
    /// 合流が起きたブロック
    pub block: BlockId,
    pub inputs: Vec<MergeInput>,
}

/// レジスタの生成種別
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegKind {
    /// リテラルまたは定義上固定の値（演算結果・引数を含む）
    Const,
    /// 別レジスタのコピー（source_indexはコピー元のフレームスロット）
    Move { source: RegId, source_index: usize },
    /// boolean演算の結果（短絡評価への書き換え用に両オペランドを保持）
    BoolMath { left: RegId, right: RegId },
    Merge(MergeNode),
}

/// シンボリックレジスタ
#[derive(Debug, Clone, PartialEq)]
pub struct Reg {
    pub id: RegId,
    /// 定義pc（合流レジスタはブロック先頭pc）
    pub pc: usize,
    /// フレーム内のスロット番号
    pub index: usize,
    pub t: T,
    pub kind: RegKind,
    pub value: Option<Literal>,
    pub alive: bool,
}

impl Reg {
    pub fn is_merge(&self) -> bool {
        matches!(self.kind, RegKind::Merge(_))
    }

    /// ブロックbbで生成された合流レジスタか
    pub fn is_merge_at(&self, bb: BlockId) -> bool {
        matches!(&self.kind, RegKind::Merge(node) if node.block == bb)
    }

    pub fn merge_node(&self) -> Option<&MergeNode> {
        match &self.kind {
            RegKind::Merge(node) => Some(node),
            _ => None,
        }
    }
}

/// レジスタのアリーナ
#[derive(Debug, Clone, Default)]
pub struct RegArena {
    regs: Vec<Reg>,
}

impl RegArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, pc: usize, index: usize, t: T, kind: RegKind, value: Option<Literal>) -> RegId {
        let id = RegId(self.regs.len() as u32);
        self.regs.push(Reg {
            id,
            pc,
            index,
            t,
            kind,
            value,
            alive: false,
        });
        id
    }

    pub fn get(&self, id: RegId) -> &Reg {
        &self.regs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: RegId) -> &mut Reg {
        &mut self.regs[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reg> {
        self.regs.iter()
    }

    /// 合流レジスタの入力のうち、predが条件を満たしoldを指すものをnewに置き換える。
    /// 置き換えた数を返す
    pub fn replace_input(
        &mut self,
        merge: RegId,
        old: RegId,
        new: RegId,
        pred_matches: impl Fn(Option<BlockId>) -> bool,
    ) -> usize {
        let mut count = 0;
        if let RegKind::Merge(node) = &mut self.get_mut(merge).kind {
            for input in node.inputs.iter_mut().filter(|i| i.reg == old && pred_matches(i.pred)) {
                input.reg = new;
                count += 1;
            }
        }
        count
    }

    /// ブロック分割後、blockで合流する入力の先行ブロックをoldからnewへ付け替える
    pub fn retarget_pred(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        for reg in &mut self.regs {
            if let RegKind::Merge(node) = &mut reg.kind {
                if node.block != block {
                    continue;
                }
                for input in node.inputs.iter_mut().filter(|i| i.pred == Some(old)) {
                    input.pred = Some(new);
                }
            }
        }
    }

    /// 合流レジスタに入力を追加（同じ入力は重複させない）
    pub fn push_input(&mut self, merge: RegId, input: MergeInput) {
        if let RegKind::Merge(node) = &mut self.get_mut(merge).kind {
            if !node.inputs.contains(&input) {
                node.inputs.push(input);
            }
        }
    }
}
