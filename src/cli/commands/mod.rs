//! CLI command implementations.

pub mod consolidate;
pub mod dispatch;
pub mod init;
pub mod trace;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::adapters::sqlite::{initialize_database, SqliteTraceRepository};
use crate::application::Dispatcher;
use crate::domain::models::Config;
use crate::domain::ports::{NullReasoningEngine, NullToolRunner};
use crate::infrastructure::ConfigLoader;
use crate::services::{ReplayExecutor, SynthesizerConfig, TraceSynthesizer};

/// Load the project configuration.
pub(crate) fn load_config() -> Result<Config> {
    ConfigLoader::load().context("Failed to load configuration")
}

/// Open (and migrate) the configured trace store.
pub(crate) async fn open_repository(config: &Config) -> Result<Arc<SqliteTraceRepository>> {
    let url = format!("sqlite:{}", config.database.path);
    let pool = initialize_database(&url)
        .await
        .context("Failed to open trace store")?;
    Ok(Arc::new(SqliteTraceRepository::new(pool)))
}

/// Build a dispatcher over the store.
///
/// The standalone binary has no reasoning engine or tool layer of its
/// own; the null ports stand in until the core is embedded in the host
/// platform, which wires real collaborators through the library API.
pub(crate) fn build_dispatcher(
    repo: Arc<SqliteTraceRepository>,
    config: &Config,
) -> Dispatcher<SqliteTraceRepository> {
    let executor = ReplayExecutor::new(
        repo.clone(),
        Arc::new(NullToolRunner),
        config.executor.clone(),
        config.consolidation.confidence.clone(),
    );
    let synthesizer = TraceSynthesizer::new(SynthesizerConfig {
        seed_confidence_cap: config.consolidation.seed_confidence_cap,
        ..SynthesizerConfig::default()
    });
    Dispatcher::new(
        repo,
        executor,
        Arc::new(NullReasoningEngine),
        synthesizer,
        config.dispatch.clone(),
    )
}

/// Shorten a UUID for table display.
pub(crate) fn short_id(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}
