//! `engram trace`: inspect and manage stored traces.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use uuid::Uuid;

use crate::domain::models::{ExecutionTrace, TraceStatus, TraceTier};
use crate::domain::ports::TraceRepository;

/// Arguments for `engram trace`.
#[derive(Args)]
pub struct TraceArgs {
    #[command(subcommand)]
    pub command: TraceCommand,
}

/// Trace subcommands.
#[derive(Subcommand)]
pub enum TraceCommand {
    /// List traces (active by default).
    List {
        /// Filter by tier (high, mid, low, ultra-low).
        #[arg(long)]
        tier: Option<String>,
        /// Filter by status (active, archived_candidate, flagged_for_review,
        /// archived, corrupt, superseded).
        #[arg(long)]
        status: Option<String>,
    },
    /// Show a trace's persisted document.
    Show {
        /// Trace id.
        id: Uuid,
    },
    /// Show compact stats for a trace.
    Stats {
        /// Trace id.
        id: Uuid,
    },
    /// Record the explicit approval signal that allows promotion to the
    /// ultra-low tier.
    Approve {
        /// Trace id.
        id: Uuid,
    },
    /// Archive a trace (operator decision, e.g. after reviewing a
    /// flagged trace). The tier is retained.
    Archive {
        /// Trace id.
        id: Uuid,
    },
}

pub async fn execute(args: TraceArgs, json: bool) -> Result<()> {
    let config = super::load_config()?;
    let repo = super::open_repository(&config).await?;

    match args.command {
        TraceCommand::List { tier, status } => {
            let traces = match (tier, status) {
                (Some(t), None) => {
                    let tier = TraceTier::from_str(&t)
                        .ok_or_else(|| anyhow!("unknown tier '{t}'"))?;
                    repo.list_by_tier(tier).await?
                }
                (None, Some(s)) => {
                    let status = TraceStatus::from_str(&s)
                        .ok_or_else(|| anyhow!("unknown status '{s}'"))?;
                    repo.list_by_status(status).await?
                }
                (None, None) => repo.list_by_status(TraceStatus::Active).await?,
                (Some(_), Some(_)) => {
                    return Err(anyhow!("use either --tier or --status, not both"));
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&traces)?);
            } else if traces.is_empty() {
                println!("No traces found.");
            } else {
                println!("{}", format_trace_table(&traces));
                println!(
                    "\nShowing {} trace{}",
                    traces.len(),
                    if traces.len() == 1 { "" } else { "s" }
                );
            }
        }
        TraceCommand::Show { id } => {
            let trace = repo
                .get(id)
                .await
                .context("Failed to load trace")?
                .ok_or_else(|| anyhow!("trace {id} not found"))?;
            println!("{}", trace.to_document()?);
        }
        TraceCommand::Stats { id } => {
            let trace = repo
                .get(id)
                .await
                .context("Failed to load trace")?
                .ok_or_else(|| anyhow!("trace {id} not found"))?;
            let stats = trace.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("trace        {id}");
                println!("confidence   {:.3}", stats.confidence);
                println!("tier         {}", stats.tier.as_str());
                println!("usage_count  {}", stats.usage_count);
                println!("success_rate {:.3}", stats.success_rate);
            }
        }
        TraceCommand::Approve { id } => {
            repo.set_fundamental(id, true)
                .await
                .context("Failed to record approval")?;
            if json {
                println!("{}", serde_json::json!({ "trace_id": id, "fundamental": true }));
            } else {
                println!("Trace {id} flagged fundamental (eligible for ultra-low tier)");
            }
        }
        TraceCommand::Archive { id } => {
            let trace = repo
                .get(id)
                .await
                .context("Failed to load trace")?
                .ok_or_else(|| anyhow!("trace {id} not found"))?;
            if trace.status == TraceStatus::Archived {
                return Err(anyhow!("trace {id} is already archived"));
            }
            let moved = repo
                .transition(id, (trace.tier, trace.status), (trace.tier, TraceStatus::Archived))
                .await
                .context("Failed to archive trace")?;
            if !moved {
                return Err(anyhow!("trace {id} changed state concurrently, retry"));
            }
            if json {
                println!("{}", serde_json::json!({ "trace_id": id, "status": "archived" }));
            } else {
                println!("Trace {id} archived");
            }
        }
    }
    Ok(())
}

fn format_trace_table(traces: &[ExecutionTrace]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "ID", "Goal", "Tier", "Status", "Conf", "Success", "Usage", "Ver",
        ]);

    for trace in traces {
        let mut goal = trace.goal_signature.clone();
        if goal.len() > 48 {
            goal.truncate(45);
            goal.push_str("...");
        }
        table.add_row(vec![
            Cell::new(super::short_id(&trace.id)),
            Cell::new(goal),
            Cell::new(trace.tier.as_str()),
            Cell::new(trace.status.as_str()),
            Cell::new(format!("{:.2}", trace.confidence)),
            Cell::new(format!("{:.2}", trace.success_rate)),
            Cell::new(trace.usage_count),
            Cell::new(trace.version),
        ]);
    }
    table
}
