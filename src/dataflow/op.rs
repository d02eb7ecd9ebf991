/// デコード済み命令の表現
///
/// クラスファイル/Dalvikのデコーダはどちらもこのスタックマシン命令列を出力する。
/// pcは命令配列上のインデックスで、分岐先もインデックスで表す。

use super::types::{Kind, TypeSpec};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 条件分岐の比較演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

/// DUP系命令の形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DupKind {
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
}

/// POP系命令の形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopKind {
    Pop,
    Pop2,
}

/// 定数値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// クラスリテラル
    Type(String),
    Null,
}

impl Literal {
    /// リテラルから推論される型
    pub fn type_spec(&self) -> TypeSpec {
        match self {
            Literal::Int(v) => TypeSpec::Multi(Kind::for_int(*v as i64)),
            Literal::Long(_) => TypeSpec::Multi(Kind::LONG),
            Literal::Float(_) => TypeSpec::Multi(Kind::FLOAT),
            Literal::Double(_) => TypeSpec::Multi(Kind::DOUBLE),
            Literal::Str(_) => TypeSpec::class("java.lang.String"),
            Literal::Type(_) => TypeSpec::class("java.lang.Class"),
            Literal::Null => TypeSpec::Multi(Kind::REF),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Long(v) => write!(f, "{}L", v),
            Literal::Float(v) => write!(f, "{}F", v),
            Literal::Double(v) => write!(f, "{}D", v),
            Literal::Str(s) => write!(f, "{:?}", s),
            Literal::Type(t) => write!(f, "{}.class", t),
            Literal::Null => write!(f, "null"),
        }
    }
}

/// フィールド参照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    #[serde(rename = "type")]
    pub t: TypeSpec,
    #[serde(default)]
    pub is_static: bool,
}

/// メソッド参照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub params: Vec<TypeSpec>,
    /// voidならNone
    #[serde(default)]
    pub ret: Option<TypeSpec>,
    #[serde(default)]
    pub is_static: bool,
}

/// 命令の種類
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpKind {
    Add { t: TypeSpec },
    Sub { t: TypeSpec },
    Mul { t: TypeSpec },
    Div { t: TypeSpec },
    Rem { t: TypeSpec },
    And { t: TypeSpec },
    Or { t: TypeSpec },
    Xor { t: TypeSpec },
    Shl { t: TypeSpec, shift: TypeSpec },
    Shr { t: TypeSpec, shift: TypeSpec, #[serde(default)] unsigned: bool },
    Neg { t: TypeSpec },
    /// 三方比較（lcmp, fcmpl等）
    Cmp { t: TypeSpec },
    Cast { from: TypeSpec, to: TypeSpec },
    /// 配列要素の読み出し
    Aload { t: TypeSpec },
    /// 配列要素への書き込み
    Astore { t: TypeSpec },
    ArrayLength,
    NewArray { t: TypeSpec, #[serde(default = "one")] dims: usize },
    FillArray { values: Vec<Literal> },
    New { t: TypeSpec },
    InstanceOf { t: TypeSpec },
    Get { field: FieldRef },
    Put { field: FieldRef },
    Invoke { method: MethodRef },
    Monitor { enter: bool },
    Load { t: TypeSpec, reg: usize },
    Store { t: TypeSpec, reg: usize },
    Inc { t: TypeSpec, reg: usize, value: i32 },
    Push { t: TypeSpec, #[serde(default)] value: Option<Literal> },
    Pop { kind: PopKind },
    Dup { kind: DupKind },
    Swap,
    Goto { target: usize },
    /// 2オペランドの条件分岐
    Jcmp { t: TypeSpec, cmp: CmpOp, target: usize },
    /// 0/nullとの比較による条件分岐
    Jcnd { t: TypeSpec, cmp: CmpOp, target: usize },
    Switch { keys: Vec<i32>, targets: Vec<usize>, default: usize },
    Jsr { target: usize },
    Ret { reg: usize },
    Return { #[serde(default)] t: Option<TypeSpec> },
    Throw,
    /// デコーダが分類できなかった命令
    Unknown { opcode: u16 },
}

fn one() -> usize {
    1
}

impl OpKind {
    /// ブロックを閉じる制御移動命令か
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            OpKind::Goto { .. }
                | OpKind::Jcmp { .. }
                | OpKind::Jcnd { .. }
                | OpKind::Switch { .. }
                | OpKind::Jsr { .. }
                | OpKind::Ret { .. }
                | OpKind::Return { .. }
                | OpKind::Throw
        )
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpKind::Add { .. } => "ADD",
            OpKind::Sub { .. } => "SUB",
            OpKind::Mul { .. } => "MUL",
            OpKind::Div { .. } => "DIV",
            OpKind::Rem { .. } => "REM",
            OpKind::And { .. } => "AND",
            OpKind::Or { .. } => "OR",
            OpKind::Xor { .. } => "XOR",
            OpKind::Shl { .. } => "SHL",
            OpKind::Shr { .. } => "SHR",
            OpKind::Neg { .. } => "NEG",
            OpKind::Cmp { .. } => "CMP",
            OpKind::Cast { .. } => "CAST",
            OpKind::Aload { .. } => "ALOAD",
            OpKind::Astore { .. } => "ASTORE",
            OpKind::ArrayLength => "ARRAYLENGTH",
            OpKind::NewArray { .. } => "NEWARRAY",
            OpKind::FillArray { .. } => "FILLARRAY",
            OpKind::New { .. } => "NEW",
            OpKind::InstanceOf { .. } => "INSTANCEOF",
            OpKind::Get { .. } => "GET",
            OpKind::Put { .. } => "PUT",
            OpKind::Invoke { .. } => "INVOKE",
            OpKind::Monitor { .. } => "MONITOR",
            OpKind::Load { .. } => "LOAD",
            OpKind::Store { .. } => "STORE",
            OpKind::Inc { .. } => "INC",
            OpKind::Push { .. } => "PUSH",
            OpKind::Pop { .. } => "POP",
            OpKind::Dup { .. } => "DUP",
            OpKind::Swap => "SWAP",
            OpKind::Goto { .. } => "GOTO",
            OpKind::Jcmp { .. } => "JCMP",
            OpKind::Jcnd { .. } => "JCND",
            OpKind::Switch { .. } => "SWITCH",
            OpKind::Jsr { .. } => "JSR",
            OpKind::Ret { .. } => "RET",
            OpKind::Return { .. } => "RETURN",
            OpKind::Throw => "THROW",
            OpKind::Unknown { .. } => "UNKNOWN",
        }
    }
}

/// デコード済み命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub pc: usize,
    /// ソース行番号（デバッグ情報があれば）
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(flatten)]
    pub kind: OpKind,
}

impl Op {
    pub fn new(pc: usize, kind: OpKind) -> Self {
        Self { pc, line: None, kind }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.mnemonic())?;
        match &self.kind {
            OpKind::Add { t }
            | OpKind::Sub { t }
            | OpKind::Mul { t }
            | OpKind::Div { t }
            | OpKind::Rem { t }
            | OpKind::And { t }
            | OpKind::Or { t }
            | OpKind::Xor { t }
            | OpKind::Neg { t }
            | OpKind::Cmp { t }
            | OpKind::Aload { t }
            | OpKind::Astore { t }
            | OpKind::New { t }
            | OpKind::InstanceOf { t } => write!(f, " {}", t),
            OpKind::Shl { t, .. } | OpKind::Shr { t, .. } => write!(f, " {}", t),
            OpKind::Cast { from, to } => write!(f, " {} -> {}", from, to),
            OpKind::NewArray { t, dims } => write!(f, " {} dims={}", t, dims),
            OpKind::FillArray { values } => write!(f, " [{} values]", values.len()),
            OpKind::Get { field } | OpKind::Put { field } => {
                write!(f, " {}.{}: {}", field.owner, field.name, field.t)
            }
            OpKind::Invoke { method } => write!(f, " {}.{}", method.owner, method.name),
            OpKind::Monitor { enter } => write!(f, " {}", if *enter { "enter" } else { "exit" }),
            OpKind::Load { t, reg } | OpKind::Store { t, reg } => write!(f, " {} r{}", t, reg),
            OpKind::Inc { reg, value, .. } => write!(f, " r{} {:+}", reg, value),
            OpKind::Push { t, value } => match value {
                Some(v) => write!(f, " {} {}", t, v),
                None => write!(f, " {}", t),
            },
            OpKind::Pop { kind } => write!(f, " {:?}", kind),
            OpKind::Dup { kind } => write!(f, " {:?}", kind),
            OpKind::Goto { target } | OpKind::Jsr { target } => write!(f, " {}", target),
            OpKind::Jcmp { cmp, target, .. } | OpKind::Jcnd { cmp, target, .. } => {
                write!(f, " {:?} {}", cmp, target)
            }
            OpKind::Switch { keys, targets, default } => {
                write!(f, " {:?} -> {:?} default {}", keys, targets, default)
            }
            OpKind::Ret { reg } => write!(f, " r{}", reg),
            OpKind::Return { t: Some(t) } => write!(f, " {}", t),
            OpKind::Unknown { opcode } => write!(f, " 0x{:x}", opcode),
            OpKind::ArrayLength | OpKind::Swap | OpKind::Return { t: None } | OpKind::Throw => Ok(()),
        }
    }
}

/// 例外ハンドラ表のエントリ
///
/// 範囲は[start_pc, end_pc)。catch_typeがNoneならfinally（全例外）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exc {
    pub start_pc: usize,
    pub end_pc: usize,
    pub handler_pc: usize,
    #[serde(default)]
    pub catch_type: Option<String>,
}

impl Exc {
    pub fn covers(&self, pc: usize) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

/// デバッグ情報の変数宣言ヒント（ローカル変数表）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarHint {
    pub index: usize,
    pub start_pc: usize,
    pub end_pc: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub t: TypeSpec,
}

/// 解析対象メソッドの入力一式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCode {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub params: Vec<TypeSpec>,
    #[serde(default)]
    pub ret: Option<TypeSpec>,
    pub max_locals: usize,
    #[serde(default)]
    pub max_stack: Option<usize>,
    pub ops: Vec<Op>,
    #[serde(default)]
    pub excs: Vec<Exc>,
    #[serde(default)]
    pub hints: Vec<VarHint>,
}

impl MethodCode {
    /// 静的メソッドとして作成（pcは命令の並び順で振り直す）
    pub fn new(name: impl Into<String>, max_locals: usize, kinds: Vec<OpKind>) -> Self {
        let ops = kinds
            .into_iter()
            .enumerate()
            .map(|(pc, kind)| Op::new(pc, kind))
            .collect();
        Self {
            name: name.into(),
            owner: None,
            is_static: true,
            params: Vec::new(),
            ret: None,
            max_locals,
            max_stack: None,
            ops,
            excs: Vec::new(),
            hints: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<TypeSpec>) -> Self {
        self.params = params;
        self
    }

    pub fn with_excs(mut self, excs: Vec<Exc>) -> Self {
        self.excs = excs;
        self
    }

    pub fn with_hints(mut self, hints: Vec<VarHint>) -> Self {
        self.hints = hints;
        self
    }

    /// インスタンスメソッドにする（ローカル0がthis）
    pub fn instance_of(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self.is_static = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_display() {
        let op = Op::new(3, OpKind::Load { t: TypeSpec::int(), reg: 2 });
        assert_eq!(op.to_string(), "LOAD int r2");

        let op = Op::new(4, OpKind::Jcmp { t: TypeSpec::int(), cmp: CmpOp::Lt, target: 9 });
        assert_eq!(op.to_string(), "JCMP Lt 9");
    }

    #[test]
    fn test_control_ops() {
        assert!(OpKind::Goto { target: 0 }.is_control());
        assert!(OpKind::Throw.is_control());
        assert!(!OpKind::Swap.is_control());
    }

    #[test]
    fn test_literal_types() {
        assert_eq!(Literal::Int(-5).type_spec().to_string(), "{byte,short,int}");
        assert_eq!(Literal::Null.type_spec().to_string(), "ref");
        assert_eq!(Literal::Str("x".into()).type_spec().to_string(), "java.lang.String");
    }

    #[test]
    fn test_op_json() {
        let json = r#"{"pc": 0, "op": "load", "t": "{byte,short,int}", "reg": 1}"#;
        let op: Op = serde_json::from_str(json).unwrap();
        assert_eq!(op.kind, OpKind::Load { t: TypeSpec::Multi(Kind::BYTE | Kind::SHORT | Kind::INT), reg: 1 });
    }
}
