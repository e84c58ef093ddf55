mod cli;
mod output;

use anyhow::{Context, Result};
use cachet_cache::config::loader::load_config;
use cachet_cache::observability::init_tracing_with_level;
use cachet_cache::{Cache, Maintenance};
use clap::Parser;

use cli::Cli;
use output::{print_error, print_warning};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_config(cli.config.as_deref())
        .map_err(anyhow::Error::msg)
        .context("failed to load configuration")?;
    init_tracing_with_level(cli.log_level.as_deref().unwrap_or(&settings.logging.level));

    let cache = Cache::from_settings(&settings)?;

    if cli.tiers {
        output::print_tiers(
            &cache.valid_tiers(),
            &cache.configured_tiers(),
            &cache.available_tiers().await,
        );
    }

    let directives = cli.directives();
    if directives.is_empty() {
        if !cli.tiers {
            print_warning("nothing to do; pass --clear_all, --cleanup or --clear_tier=<name>");
        }
        return Ok(());
    }

    let report = Maintenance::new(cache).run(&directives).await?;
    output::print_report(&report);
    if !report.is_success() {
        anyhow::bail!(
            "{} of {} maintenance actions failed",
            report.failures().count(),
            report.outcomes().len()
        );
    }
    tracing::debug!(removed = report.removed(), "maintenance complete");
    Ok(())
}
