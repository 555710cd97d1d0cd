// src/bin/fileops.rs

//! CLI demonstration harness (§10.4).
//!
//! Reads a JSON request envelope from a file argument or stdin, runs it
//! through [`fileops_engine::FileOpsEngine`], prints the JSON aggregate
//! result, and exits non-zero on `success: false`. Not the terminal UI the
//! core's scope excludes — no interactive rendering, no streaming.

use clap::Parser;
use fileops_engine::facade::FileOpsEngine;
use fileops_engine::progress::{LogProgress, SilentProgress};
use fileops_engine::types::Request;
use fileops_engine::{EngineConfig, Result};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

#[derive(Parser, Debug)]
#[command(name = "fileops", about = "Run a batched file-operations request against a root directory")]
struct Args {
    /// Root directory every operation's paths are resolved against.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to a JSON request file. Reads stdin if omitted.
    request: Option<PathBuf>,

    /// Emit progress lines to stderr via tracing instead of running silently.
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("fileops: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<bool> {
    let args = Args::parse();

    let raw = match &args.request {
        Some(path) => std::fs::read_to_string(path).map_err(fileops_engine::Error::Io)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).map_err(fileops_engine::Error::Io)?;
            buf
        }
    };

    let request: Request = serde_json::from_str(&raw)
        .map_err(|e| fileops_engine::Error::SchemaInvalid(format!("invalid request JSON: {e}")))?;

    let engine = FileOpsEngine::new(EngineConfig::new(&args.root))?;
    let abort = AtomicBool::new(false);

    let result = if args.verbose {
        engine.execute(&request, &abort, &LogProgress::new("fileops", request.operations.len() as u64))?
    } else {
        engine.execute(&request, &abort, &SilentProgress::new())?
    };

    let rendered = serde_json::to_string_pretty(&result).map_err(|e| fileops_engine::Error::Internal(e.to_string()))?;
    println!("{rendered}");

    Ok(result.success)
}
