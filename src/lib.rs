/// bytecode-flow ライブラリ
///
/// スタック型バイトコード（クラスファイル/Dalvik）のデコンパイラ向け
/// 型付きデータフロー解析エンジンを提供

pub mod dataflow;

pub use dataflow::{analyze, analyze_methods, AnalysisConfig, AnalysisError, Cfg, MethodCode};
