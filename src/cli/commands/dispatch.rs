//! `engram dispatch`: route a goal through the decision rule.

use anyhow::{Context, Result};
use clap::Args;
use console::style;

use crate::application::{DispatchMode, DispatchResult};

/// Arguments for `engram dispatch`.
#[derive(Args)]
pub struct DispatchArgs {
    /// Goal description to route.
    pub goal: String,

    /// Context label for the distinct-context consolidation gate.
    #[arg(long)]
    pub context: Option<String>,

    /// Execute the routed action instead of only reporting the decision.
    /// Requires the core to be embedded with real collaborators; the
    /// standalone binary runs against null ports.
    #[arg(long)]
    pub execute: bool,
}

pub async fn execute(args: DispatchArgs, json: bool) -> Result<()> {
    let config = super::load_config()?;
    let repo = super::open_repository(&config).await?;
    let dispatcher = super::build_dispatcher(repo, &config);

    if !args.execute {
        let decision = dispatcher
            .decide(&args.goal)
            .await
            .context("Failed to evaluate dispatch decision")?;

        if json {
            let candidate = decision.candidate.as_ref().map(|c| {
                serde_json::json!({
                    "trace_id": c.trace_id,
                    "goal_signature": c.goal_signature,
                    "similarity": c.similarity,
                    "score": c.score,
                    "confidence": c.confidence,
                    "success_rate": c.success_rate,
                })
            });
            println!(
                "{}",
                serde_json::json!({ "mode": decision.mode.as_str(), "candidate": candidate })
            );
        } else {
            let mode = match decision.mode {
                DispatchMode::Follower => style("FOLLOWER").green().bold(),
                DispatchMode::Learner => style("LEARNER").yellow().bold(),
            };
            println!("{mode}  {}", args.goal);
            match decision.candidate {
                Some(c) => println!(
                    "  best match {} ({:.2} similarity, {:.2} score, confidence {:.2}, success {:.2})",
                    super::short_id(&c.trace_id),
                    c.similarity,
                    c.score,
                    c.confidence,
                    c.success_rate
                ),
                None => println!("  no stored trace clears the match floor"),
            }
        }
        return Ok(());
    }

    let report = dispatcher
        .dispatch(&args.goal, args.context.as_deref())
        .await
        .context("Dispatch failed")?;

    if json {
        let result = match &report.result {
            DispatchResult::Replayed { trace_id, report } => serde_json::json!({
                "kind": "replayed",
                "trace_id": trace_id,
                "status": format!("{:?}", report.status),
                "duration_ms": report.duration_ms,
                "committed": report.committed,
            }),
            DispatchResult::Learned { success, synthesized_trace, escalated_from } => {
                serde_json::json!({
                    "kind": "learned",
                    "success": success,
                    "synthesized_trace": synthesized_trace,
                    "escalated_from": escalated_from,
                })
            }
        };
        println!(
            "{}",
            serde_json::json!({ "mode": report.mode.as_str(), "result": result })
        );
    } else {
        match report.result {
            DispatchResult::Replayed { trace_id, report: replay } => {
                println!(
                    "Replayed trace {} in {}ms: {:?}",
                    super::short_id(&trace_id),
                    replay.duration_ms,
                    replay.status
                );
            }
            DispatchResult::Learned { success, synthesized_trace, .. } => {
                println!(
                    "Delegated to reasoning engine (success: {success}){}",
                    match synthesized_trace {
                        Some(id) => format!(", synthesized trace {}", super::short_id(&id)),
                        None => String::new(),
                    }
                );
            }
        }
    }
    Ok(())
}
