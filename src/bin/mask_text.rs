use anyhow::Context;
use privacy_guard_lib::models::{MaskedResult, MaskingOptions};
use privacy_guard_lib::services::{AppConfig, ConfigStore, Orchestrator};
use serde::Serialize;
use std::io::Read;

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

/// First positional argument, skipping values that belong to `--key value` options.
fn input_path(args: &[String]) -> Option<String> {
    const VALUE_OPTIONS: [&str; 4] = ["--threshold", "--mode", "--endpoint", "--out"];
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if VALUE_OPTIONS.contains(&arg.as_str()) {
            iter.next();
            continue;
        }
        if !arg.starts_with("--") {
            return Some(arg.clone());
        }
    }
    None
}

fn load_config() -> AppConfig {
    let loaded = ConfigStore::default_config_dir()
        .map(ConfigStore::new)
        .map(|store| store.load());

    let config = match loaded {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            tracing::warn!("[CONFIG] failed to load config, using defaults: {}", e);
            AppConfig::default()
        }
        None => AppConfig::default(),
    };

    AppConfig {
        engine: config.engine.with_env_overrides(),
        ..config
    }
}

fn print_summary(result: &MaskedResult) {
    println!();
    println!(
        "Source: {}  success={}  entities={}/{}  avg_risk={:.1}  time={}ms",
        result.source.as_str(),
        result.success,
        result.stats.masked_entities,
        result.stats.total_entities,
        result.stats.average_risk,
        result.stats.processing_time_ms
    );
    for e in &result.entities {
        println!(
            "  bytes=[{},{}] {:<12} risk={:<3} -> {}",
            e.start_offset, e.end_offset, e.category, e.risk, e.placeholder
        );
    }
    if let Some(err) = &result.error {
        println!("Error: {}", err);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        eprintln!(
            "Usage:\n  mask_text [path] [--threshold <0-100>] [--mode <medical|general>] [--local] [--endpoint <url>] [--quick] [--out <json_path>]\n\nNotes:\n  - Reads stdin when no path is given.\n  - `--local` skips the remote detector entirely.\n  - Env: PRIVACY_GUARD_ENDPOINT, PRIVACY_GUARD_LOCAL_FALLBACK, RUST_LOG."
        );
        return Ok(());
    }

    privacy_guard_lib::init_logging();

    let text = match input_path(&args) {
        Some(path) => std::fs::read_to_string(&path).with_context(|| format!("read file failed: {}", path))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin failed")?;
            buf
        }
    };

    let mut config = load_config();
    if let Some(endpoint) = parse_arg_value(&args, "--endpoint") {
        config.engine.endpoint = endpoint.trim_end_matches('/').to_string();
    }

    let threshold = match parse_arg_value(&args, "--threshold") {
        Some(raw) => Some(
            raw.parse::<i64>()
                .with_context(|| format!("invalid --threshold: {}", raw))?,
        ),
        None => None,
    };
    let options = MaskingOptions {
        threshold,
        mode: parse_arg_value(&args, "--mode"),
        force_local: has_flag(&args, "--local"),
    };
    let out_path = parse_arg_value(&args, "--out");

    let orchestrator = Orchestrator::from_app_config(&config);

    if has_flag(&args, "--quick") {
        let analysis = orchestrator.quick_analyze(&text).await;
        println!(
            "has_risk={} risk_level={:.1} entity_count={}",
            analysis.has_risk, analysis.risk_level, analysis.entity_count
        );
        if let Some(err) = &analysis.error {
            println!("Error: {}", err);
        }
        return Ok(());
    }

    let result = orchestrator.process(&text, options).await;
    println!("{}", result.masked_text);
    print_summary(&result);

    if let Some(out_path) = out_path {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Output<'a> {
            endpoint: &'a str,
            chars: usize,
            result: &'a MaskedResult,
        }

        let out = Output {
            endpoint: &config.engine.endpoint,
            chars: text.chars().count(),
            result: &result,
        };

        let json = serde_json::to_string_pretty(&out)?;
        std::fs::write(&out_path, json).with_context(|| format!("write out failed: {}", out_path))?;
        println!();
        println!("Wrote JSON: {}", out_path);
    }

    if !result.success {
        anyhow::bail!(
            "masking failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
