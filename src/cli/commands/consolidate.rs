//! `engram consolidate`: trigger one consolidation pass.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;

use crate::services::ConsolidationEngine;

/// Arguments for `engram consolidate`.
#[derive(Args)]
pub struct ConsolidateArgs {}

pub async fn execute(_args: ConsolidateArgs, json: bool) -> Result<()> {
    let config = super::load_config()?;
    let repo = super::open_repository(&config).await?;
    let engine = Arc::new(ConsolidationEngine::new(repo, config.consolidation.clone()));

    let report = engine.run_pass().await.context("Consolidation pass failed")?;

    if json {
        let transitions: Vec<_> = report
            .transitions
            .iter()
            .map(|t| {
                serde_json::json!({
                    "trace_id": t.trace_id,
                    "from_tier": t.from.0.as_str(),
                    "from_status": t.from.1.as_str(),
                    "to_tier": t.to.0.as_str(),
                    "to_status": t.to.1.as_str(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "evaluated": report.evaluated,
                "transitions": transitions,
                "deleted": report.deleted,
            })
        );
    } else {
        println!(
            "Evaluated {} trace(s): {} transition(s), {} deletion(s)",
            report.evaluated,
            report.transitions.len(),
            report.deleted.len()
        );
        for t in &report.transitions {
            println!(
                "  {} {}/{} -> {}/{}",
                super::short_id(&t.trace_id),
                t.from.0.as_str(),
                t.from.1.as_str(),
                t.to.0.as_str(),
                t.to.1.as_str()
            );
        }
        for id in &report.deleted {
            println!("  {} deleted (aged out of archive)", super::short_id(id));
        }
    }
    Ok(())
}
