//! Engram CLI entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use engram::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init(args) => engram::cli::commands::init::execute(args, cli.json).await,
        Commands::Dispatch(args) => engram::cli::commands::dispatch::execute(args, cli.json).await,
        Commands::Consolidate(args) => {
            engram::cli::commands::consolidate::execute(args, cli.json).await
        }
        Commands::Trace(args) => engram::cli::commands::trace::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        engram::cli::handle_error(err, cli.json);
    }
}
