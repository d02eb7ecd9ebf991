/// 複数メソッドの一括解析
///
/// メソッドごとに独立したCFGと型キャッシュを持つので、`parallel`機能が有効なら
/// rayonで並列に解析する。1メソッドの失敗は他のメソッドに影響しない。

use super::analysis::analyze;
use super::cfg::Cfg;
use super::config::AnalysisConfig;
use super::error::Result;
use super::op::MethodCode;
use super::types::ClassHierarchy;
use std::sync::Arc;
use tracing::{info, warn};

/// 1メソッドの解析結果
#[derive(Debug)]
pub struct MethodOutcome {
    pub name: String,
    pub result: Result<Cfg>,
}

impl MethodOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

fn analyze_one(method: &MethodCode, hierarchy: &Arc<dyn ClassHierarchy>, config: &AnalysisConfig) -> MethodOutcome {
    let result = analyze(method, hierarchy.clone(), config);
    if let Err(e) = &result {
        warn!(method = %method.name, "analysis failed: {}", e);
    }
    MethodOutcome {
        name: method.name.clone(),
        result,
    }
}

/// メソッド群を解析する（入力順に結果を返す）
#[cfg(feature = "parallel")]
pub fn analyze_methods(
    methods: &[MethodCode],
    hierarchy: Arc<dyn ClassHierarchy>,
    config: &AnalysisConfig,
) -> Vec<MethodOutcome> {
    use rayon::prelude::*;

    let outcomes: Vec<MethodOutcome> = methods
        .par_iter()
        .map(|method| analyze_one(method, &hierarchy, config))
        .collect();
    report(&outcomes);
    outcomes
}

/// メソッド群を解析する（入力順に結果を返す）
#[cfg(not(feature = "parallel"))]
pub fn analyze_methods(
    methods: &[MethodCode],
    hierarchy: Arc<dyn ClassHierarchy>,
    config: &AnalysisConfig,
) -> Vec<MethodOutcome> {
    let outcomes: Vec<MethodOutcome> = methods
        .iter()
        .map(|method| analyze_one(method, &hierarchy, config))
        .collect();
    report(&outcomes);
    outcomes
}

fn report(outcomes: &[MethodOutcome]) {
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    info!(methods = outcomes.len(), failed, "batch analysis finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::error::AnalysisError;
    use crate::dataflow::op::OpKind;
    use crate::dataflow::types::{MapHierarchy, TypeSpec};

    #[test]
    fn test_failure_is_isolated_per_method() {
        let methods = vec![
            MethodCode::new(
                "good",
                0,
                vec![
                    OpKind::Push { t: TypeSpec::int(), value: None },
                    OpKind::Return { t: Some(TypeSpec::int()) },
                ],
            ),
            MethodCode::new("bad", 0, vec![OpKind::Unknown { opcode: 0xfe }]),
            MethodCode::new("also_good", 0, vec![OpKind::Return { t: None }]),
        ];
        let outcomes = analyze_methods(&methods, Arc::new(MapHierarchy::new()), &AnalysisConfig::default());
        let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["good", "bad", "also_good"]);
        assert!(outcomes[0].is_ok());
        assert_eq!(
            outcomes[1].result.as_ref().unwrap_err(),
            &AnalysisError::UnknownOp { pc: 0, opcode: 0xfe }
        );
        assert!(outcomes[2].is_ok());
    }
}
