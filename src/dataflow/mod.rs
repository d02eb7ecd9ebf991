/// スタック型バイトコードの型付きデータフロー解析
///
/// デコード済みの命令列と例外表から制御フローグラフを構築し、
/// 各プログラム点のローカル変数とオペランドスタックを型付きレジスタで表す。
///
/// 構成:
/// - types: 型束（プリミティブ種別の多重型と参照型）
/// - reg / frame: シンボリックレジスタとフレーム
/// - cfg / sub: 基本ブロック・辺とサブルーチン（JSR/RET）
/// - analysis / exec / merge: ワークリスト不動点による駆動部
/// - liveness: 活性解析

pub mod analysis;
pub mod batch;
pub mod cfg;
pub mod config;
pub mod error;
mod exec;
pub mod frame;
mod liveness;
mod merge;
pub mod op;
pub mod reg;
pub mod sub;
pub mod types;

pub use analysis::analyze;
pub use batch::{analyze_methods, MethodOutcome};
pub use cfg::{BasicBlock, BlockId, Cfg, CfgSummary, Edge, EdgeKind};
pub use config::AnalysisConfig;
pub use error::AnalysisError;
pub use frame::{Frame, Slot};
pub use op::{Exc, MethodCode, Op, OpKind, VarHint};
pub use reg::{Reg, RegId, RegKind};
pub use sub::{Sub, SubId};
pub use types::{ClassDecl, ClassHierarchy, Kind, MapHierarchy, TypeSpec, TypeStore, T};
