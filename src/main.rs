//! Capability Forge - Entry Point
//!
//! Commands:
//! - validate <file> [--kind k]: run the validation pipeline on a source file
//! - deploy <definition> [--source file]: render, validate and store
//! - list [kind]: show stored artifacts
//! - maintain: one learning maintenance pass

use anyhow::{bail, Context};
use capability_forge::autonomous::{LearningEngine, LearningMaintenance};
use capability_forge::forge::{
    ArtifactKind, ArtifactStore, DefinitionLoader, Forge, PipelineOutcome, SandboxRunner,
    SecurityScanner, ValidationPipeline,
};
use capability_forge::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().skip(1).collect();
    let help_mode = args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h");
    let pretty_mode = args.iter().any(|a| a == "--pretty");
    let json_mode = args.iter().any(|a| a == "--json");

    if help_mode {
        print_help();
        return Ok(());
    }

    // Setup logging
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::WARN);

    if pretty_mode {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Keep stdout for command output - log to stderr as JSON
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;
    info!(data_dir = %config.data_dir.display(), "Capability Forge v{}", env!("CARGO_PKG_VERSION"));

    let positional: Vec<&str> = positional_args(&args);
    let command = positional.first().copied().unwrap_or_default();

    match command {
        "validate" => {
            let file = positional.get(1).context("validate needs a source file")?;
            let kind = match flag_value(&args, "--kind") {
                Some(k) => k.parse::<ArtifactKind>()?,
                None => kind_from_path(Path::new(file)),
            };
            let source = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;

            let pipeline = build_pipeline(&config)?;
            let outcome = pipeline.evaluate(&source, kind, &config.work_dir).await;
            report(&outcome, json_mode)?;
            if !outcome.accepted() {
                std::process::exit(1);
            }
        }
        "deploy" => {
            let file = positional.get(1).context("deploy needs a definition file")?;
            let definition = DefinitionLoader::new().load_from_file(Path::new(file)).await?;
            let forge = build_forge(&config).await?;

            let deployment = match flag_value(&args, "--source") {
                Some(source_file) => {
                    let source = tokio::fs::read_to_string(source_file)
                        .await
                        .with_context(|| format!("Failed to read {}", source_file))?;
                    forge.submit_source(&definition, &source).await?
                }
                None => forge.submit(&definition).await?,
            };

            report(&deployment.outcome, json_mode)?;
            match deployment.location {
                Some(location) => println!("Stored {} at {}", definition.id, location.display()),
                None => std::process::exit(1),
            }
        }
        "list" => {
            let kind = positional.get(1).map(|k| k.parse::<ArtifactKind>()).transpose()?;
            let store = ArtifactStore::open(&config.data_dir).await?;
            let definitions = store.list(kind).await?;

            if json_mode {
                println!("{}", serde_json::to_string_pretty(&definitions)?);
            } else if definitions.is_empty() {
                println!("No artifacts stored");
            } else {
                for def in definitions {
                    println!("{:<32} {:<10} {}", def.id, def.kind.as_str(), def.description);
                }
            }
        }
        "maintain" => {
            let forge = Arc::new(build_forge(&config).await?);
            let engine = Arc::new(
                LearningEngine::open(config.learnings_path(), config.learning_config()).await?,
            );
            let maintenance =
                LearningMaintenance::with_config(config.maintenance_config(), engine.clone(), forge);

            for (task, count) in maintenance.run_once().await? {
                println!("{:<12} {}", task.as_str(), count);
            }
            let stats = engine.stats().await;
            println!(
                "patterns={} candidates={} crystallized={} open_failures={}",
                stats.patterns, stats.candidates, stats.crystallized, stats.open_failures
            );
        }
        other => bail!("Unknown command '{}'. Run with --help for usage.", other),
    }

    Ok(())
}

fn print_help() {
    println!("Capability Forge v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: capability-forge <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  validate <file> [--kind k]           Run the validation pipeline on a source file");
    println!("  deploy <def.toml|json> [--source f]  Render (or take --source), validate and store");
    println!("  list [kind]                          List stored artifacts");
    println!("  maintain                             Run one learning maintenance pass");
    println!();
    println!("Options:");
    println!("  --json        Print results as JSON");
    println!("  --pretty      Human-readable logs instead of JSON");
    println!("  --help, -h    Show this help");
    println!();
    println!("Environment variables:");
    println!("  CAPFORGE_DATA_DIR               Manifest, artifacts and learnings");
    println!("  CAPFORGE_WORK_DIR               Parent of sandbox directories");
    println!("  CAPFORGE_NODE_BIN               Sandbox interpreter (default: node)");
    println!("  CAPFORGE_NODE_ARGS              Extra interpreter arguments");
    println!("  CAPFORGE_SANDBOX_TIMEOUT        Seconds (default: 15)");
    println!("  CAPFORGE_SANDBOX_PERMISSIONS    Node permission model (default: true)");
    println!("  CAPFORGE_POLICY_FILE            TOML security policy");
    println!("  CAPFORGE_PATTERN_THRESHOLD      Candidate threshold (default: 3)");
    println!("  CAPFORGE_CRYSTALLIZE_THRESHOLD  Promotion threshold (default: 5)");
    println!("  CAPFORGE_RETENTION_DAYS         Prune window (default: 30)");
    println!("  CAPFORGE_MAX_SUCCESSES          Success entries kept (default: 100)");
}

/// Arguments that are neither flags nor flag values
fn positional_args(args: &[String]) -> Vec<&str> {
    const VALUE_FLAGS: &[&str] = &["--kind", "--source"];
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip = true;
        } else if !arg.starts_with("--") {
            out.push(arg.as_str());
        }
    }
    out
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn kind_from_path(path: &Path) -> ArtifactKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") => ArtifactKind::Skill,
        _ => ArtifactKind::Extension,
    }
}

fn build_pipeline(config: &Config) -> anyhow::Result<ValidationPipeline> {
    let scanner = SecurityScanner::new(config.security_policy()?);
    let sandbox = SandboxRunner::new(config.sandbox_config());
    Ok(ValidationPipeline::new(scanner, sandbox))
}

async fn build_forge(config: &Config) -> anyhow::Result<Forge> {
    let store = ArtifactStore::open(&config.data_dir).await?;
    let work_dir: PathBuf = config.work_dir.clone();
    Ok(Forge::new(build_pipeline(config)?, Arc::new(store), work_dir))
}

fn report(outcome: &PipelineOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    print!("{}", outcome.verdict.format());
    println!("State: {}", outcome.state());
    if let Some(sandbox) = &outcome.sandbox {
        println!(
            "Sandbox: {} in {}ms{}",
            if sandbox.success { "passed" } else { "failed" },
            sandbox.duration_ms,
            if sandbox.timed_out { " (timed out)" } else { "" }
        );
    }
    Ok(())
}
