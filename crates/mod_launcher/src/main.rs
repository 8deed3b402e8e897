//! Main entry point for the mod launcher
//!
//! Loads configuration, discovers mod candidates, resolves and commits the
//! load set, then prints either the loaded modules or the failure tree.

mod cli;
mod config;
mod logging;
mod report;

use anyhow::Context;
use clap::Parser;
use futures::future::try_join_all;
use mod_loader::{
    CandidateFinder, CandidatePool, DependencyOverrides, DirectoryCandidateFinder, LoaderContext,
    StaticCandidateFinder,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::cli::Args;
use crate::config::AppConfig;
use crate::logging::setup_logging;
use crate::report::{render_failure, LoadSummary};

// ============================================================================
// Discovery
// ============================================================================

/// Runs every finder on the blocking pool at the same time.
///
/// Sources are opened up front, in finder order, so the pool reads back the
/// same candidate order however the finders interleave.
async fn discover(finders: Vec<Arc<dyn CandidateFinder>>, pool: &Arc<CandidatePool>) -> anyhow::Result<()> {
    let tasks = finders.into_iter().map(|finder| {
        let source = pool.open_source(finder.name());
        let pool = Arc::clone(pool);
        tokio::task::spawn_blocking(move || finder.find(&pool, source))
    });

    for result in try_join_all(tasks).await? {
        result?;
    }
    Ok(())
}

async fn load_overrides(path: Option<PathBuf>) -> anyhow::Result<DependencyOverrides> {
    let Some(path) = path else {
        return Ok(DependencyOverrides::new());
    };

    let overrides = tokio::task::spawn_blocking(move || DependencyOverrides::load(path)).await??;
    if !overrides.is_empty() {
        info!("Loaded dependency overrides for {} mod(s)", overrides.len());
    }
    Ok(overrides)
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Configuration is loaded before logging so its level applies.
    let mut config = AppConfig::load_from_file(&args.config)
        .await
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    config.apply_args(&args);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    setup_logging(&config.logging)?;

    let loader_config = config.to_loader_config().map_err(anyhow::Error::msg)?;
    info!(
        "Loading mods from {} for {}",
        config.loader.mods_directory, loader_config.environment
    );

    let overrides = load_overrides(config.overrides_file()).await?;

    let pool = Arc::new(CandidatePool::new());
    let finders: Vec<Arc<dyn CandidateFinder>> = vec![
        Arc::new(StaticCandidateFinder::builtin()?),
        Arc::new(DirectoryCandidateFinder::new(config.mods_directory())),
    ];
    discover(finders, &pool).await?;

    let environment = loader_config.environment;
    let context = LoaderContext::new(loader_config, overrides);
    match context.load_from_pool(&pool) {
        Ok(load_report) => {
            let summary = LoadSummary::new(environment, &load_report, context.registry()?);
            print!("{}", summary.render(args.report)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Mod loading failed: {}", e);
            print!("{}", render_failure(&e, args.report)?);
            Ok(ExitCode::FAILURE)
        }
    }
}
