//! Command-line interface for the engram trace store.

pub mod commands;

use clap::{Parser, Subcommand};

/// Engram: execution-memory core for agent orchestration.
#[derive(Parser)]
#[command(name = "engram", version, about)]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a project-local trace store under .engram/
    Init(commands::init::InitArgs),
    /// Route a goal: replay a stored trace or delegate to the engine
    Dispatch(commands::dispatch::DispatchArgs),
    /// Run one consolidation pass over the store
    Consolidate(commands::consolidate::ConsolidateArgs),
    /// Inspect and manage stored traces
    Trace(commands::trace::TraceArgs),
}

/// Print an error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json: bool) {
    if json {
        let payload = serde_json::json!({ "error": format!("{err:#}") });
        eprintln!("{payload}");
    } else {
        eprintln!("{} {err:#}", console::style("error:").red().bold());
    }
    std::process::exit(1);
}
