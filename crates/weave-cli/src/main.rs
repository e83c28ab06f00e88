//! The Weave CLI.
//!
//! Provides the `weave` command with the following subcommands:
//!
//! - `weave check <file>` - Parse and evaluate a source file once, print
//!   the resolved record as JSON
//! - `weave run <file>` - Parse, evaluate, and drive any triggers the
//!   source registers until interrupted

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;
use weave_rt::value::Value;
use weave_rt::Runtime;

#[derive(Parser)]
#[command(name = "weave", version, about = "The Weave DSL runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and evaluate a source file once, printing the record as JSON
    Check {
        /// Path to the source file
        file: PathBuf,
    },
    /// Parse, evaluate, and run any triggers the source registers until
    /// interrupted with Ctrl-C
    Run {
        /// Path to the source file
        file: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build the Weave runtime's async executor");
    let local = LocalSet::new();

    let result = match cli.command {
        Commands::Check { file } => local.block_on(&runtime, check(&file)),
        Commands::Run { file } => local.block_on(&runtime, run(&file, &local)),
    };

    if let Err(message) = result {
        eprintln!("error: {message}");
        process::exit(1);
    }
}

async fn check(path: &Path) -> Result<(), String> {
    let source = read_source(path)?;
    let wv = Runtime::new();

    let ast = wv.parse(&source).map_err(|e| e.to_string())?;
    let (record, triggers) = wv
        .evaluate(&ast, weave_rt::scope::Scope::root())
        .await
        .map_err(|d| d.to_string())?;

    if !triggers.is_empty() {
        eprintln!("note: {} trigger(s) registered; `weave run` drives them", triggers.len());
    }
    println!("{}", serde_json::to_string_pretty(&value_to_json(&record)).expect("JSON encoding cannot fail for Value"));
    Ok(())
}

async fn run(path: &Path, local: &LocalSet) -> Result<(), String> {
    let source = read_source(path)?;
    let wv = Runtime::new();

    let outcome = wv.run(&source, local).await.map_err(|e| e.to_string())?;
    println!("{}", serde_json::to_string_pretty(&value_to_json(&outcome.record)).expect("JSON encoding cannot fail for Value"));

    let Some(scheduler) = outcome.scheduler else {
        return Ok(());
    };
    tracing::info!("triggers registered, running until interrupted");
    let _ = tokio::signal::ctrl_c().await;
    wv.shutdown(scheduler).await;
    Ok(())
}

fn read_source(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("failed to read '{}': {e}", path.display()))
}

/// Renders a [`Value`] the way a host embedding the runtime would present
/// it over JSON; functions have no JSON representation and print as a
/// descriptive string instead.
fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::json;
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Str(s) => json!(s),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Dict(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                obj.insert(k.clone(), value_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
        Value::Function(def) => json!(format!("<function {}>", def.name.as_deref().unwrap_or("anonymous"))),
    }
}
