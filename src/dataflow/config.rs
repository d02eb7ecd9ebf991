/// 解析設定

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// ローカル変数表の型・名前を推論結果より優先する
    pub use_debug_hints: bool,
    /// 解析後に活性マークを行う
    pub mark_liveness: bool,
    /// max_stackを超えるpushをエラーにする
    pub enforce_max_stack: bool,
    /// 遡及置換の上限 = factor × レジスタ数 × ブロック数
    pub rewrite_budget_factor: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            use_debug_hints: true,
            mark_liveness: true,
            enforce_max_stack: true,
            rewrite_budget_factor: 4,
        }
    }
}

impl AnalysisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// 現在の規模に対する置換ステップの上限
    pub fn rewrite_budget(&self, registers: usize, blocks: usize) -> usize {
        self.rewrite_budget_factor
            .saturating_mul(registers + 1)
            .saturating_mul(blocks + 1)
            .saturating_add(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AnalysisConfig::from_json(r#"{"mark_liveness": false}"#).unwrap();
        assert!(!config.mark_liveness);
        assert!(config.use_debug_hints);
        assert_eq!(config.rewrite_budget_factor, 4);
    }

    #[test]
    fn test_rewrite_budget_grows_with_size() {
        let config = AnalysisConfig::new();
        assert!(config.rewrite_budget(10, 4) > config.rewrite_budget(1, 1));
    }
}
