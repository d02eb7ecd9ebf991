/// flowdump - データフロー解析結果のダンプ
///
/// Usage:
///   flowdump class.json
///   flowdump class.json --method run --json
///   flowdump class.json --config analysis.json -vv

use anyhow::{Context, Result};
use bytecode_flow::dataflow::{analyze_methods, AnalysisConfig, ClassDecl, MapHierarchy, MethodCode};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "flowdump")]
#[command(about = "Typed data-flow analysis dump for decoded stack bytecode", long_about = None)]
struct Cli {
    /// Decoded class (JSON: classes + methods)
    input: PathBuf,

    /// Analysis configuration (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print JSON summaries instead of the CFG dump
    #[arg(long)]
    json: bool,

    /// Only analyse methods with this name
    #[arg(short, long)]
    method: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// デコーダが出力するクラス1つ分の入力
#[derive(Debug, Deserialize)]
struct ClassInput {
    /// 階層解決に使うクラス宣言
    #[serde(default)]
    classes: Vec<ClassDecl>,
    methods: Vec<MethodCode>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            AnalysisConfig::from_json(&text).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => AnalysisConfig::default(),
    };

    let text = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let input: ClassInput =
        serde_json::from_str(&text).with_context(|| format!("invalid class input {}", cli.input.display()))?;

    let methods: Vec<MethodCode> = match &cli.method {
        Some(name) => input.methods.into_iter().filter(|m| &m.name == name).collect(),
        None => input.methods,
    };
    info!(methods = methods.len(), classes = input.classes.len(), "analysing {}", cli.input.display());

    let hierarchy = Arc::new(MapHierarchy::from_decls(input.classes));
    let outcomes = analyze_methods(&methods, hierarchy, &config);

    let mut summaries = Vec::new();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(cfg) if cli.json => summaries.push(cfg.summary()),
            Ok(cfg) => println!("{}", cfg),
            Err(e) => error!(method = %outcome.name, "{}", e),
        }
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        error!("{} of {} methods failed", failed, outcomes.len());
    }
    Ok(())
}
