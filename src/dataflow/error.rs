/// 解析エラー
///
/// いずれも解析中のメソッド1つに閉じた致命的エラー。
/// 型の衝突や不整合なデバッグ情報は警告のみで続行するためここには含まない。

use super::frame::StackFault;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("method has no instructions")]
    EmptyMethod,

    #[error("pc {pc}: stack depth mismatch merging into pc {target} (expected {expected}, found {found})")]
    StackDepthMismatch {
        pc: usize,
        target: usize,
        expected: usize,
        found: usize,
    },

    #[error("pc {pc}: re-entrant call of subroutine at pc {entry}")]
    ReentrantSubroutine { pc: usize, entry: usize },

    #[error("pc {pc}: unknown instruction (opcode 0x{opcode:x})")]
    UnknownOp { pc: usize, opcode: u16 },

    #[error("pc {pc}: {fault}")]
    Stack {
        pc: usize,
        #[source]
        fault: StackFault,
    },

    #[error("pc {pc}: operand stack exceeds max_stack {max}")]
    StackOverflow { pc: usize, max: usize },

    #[error("pc {pc}: local {index} out of range (max_locals {locals})")]
    InvalidLocal { pc: usize, index: usize, locals: usize },

    #[error("pc {pc}: RET outside of any subroutine")]
    RetOutsideSubroutine { pc: usize },

    #[error("pc {pc}: branch target {target} out of range")]
    InvalidTarget { pc: usize, target: usize },

    #[error("pc {pc}: execution falls off the end of the code")]
    FallOffEnd { pc: usize },

    #[error("register rewrite budget of {budget} steps exceeded")]
    RewriteBudgetExceeded { budget: usize },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

impl AnalysisError {
    /// エラーが発生したpc（メソッド全体のエラーはNone）
    pub fn pc(&self) -> Option<usize> {
        match self {
            AnalysisError::EmptyMethod | AnalysisError::RewriteBudgetExceeded { .. } => None,
            AnalysisError::StackDepthMismatch { pc, .. }
            | AnalysisError::ReentrantSubroutine { pc, .. }
            | AnalysisError::UnknownOp { pc, .. }
            | AnalysisError::Stack { pc, .. }
            | AnalysisError::StackOverflow { pc, .. }
            | AnalysisError::InvalidLocal { pc, .. }
            | AnalysisError::RetOutsideSubroutine { pc }
            | AnalysisError::InvalidTarget { pc, .. }
            | AnalysisError::FallOffEnd { pc } => Some(*pc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AnalysisError::UnknownOp { pc: 4, opcode: 0xba };
        assert_eq!(err.to_string(), "pc 4: unknown instruction (opcode 0xba)");
        assert_eq!(err.pc(), Some(4));

        let err = AnalysisError::Stack { pc: 2, fault: StackFault::WideSplit };
        assert_eq!(err.to_string(), "pc 2: single-width pop would split a wide value");
        assert!(std::error::Error::source(&err).is_some());

        let err = AnalysisError::InvalidLocal { pc: 1, index: 3, locals: 2 };
        assert_eq!(err.to_string(), "pc 1: local 3 out of range (max_locals 2)");
        assert_eq!(err.pc(), Some(1));
    }
}
