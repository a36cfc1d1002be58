use anyhow::{Context, Result};
use clap::Parser;
use jala_catalog::{config, db};
use std::path::PathBuf;
use tracing::info;

mod cli;

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage catalogs, site assignments and sync logs")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: cli::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    if matches!(args.command, cli::Command::ExampleConfig) {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url(), cfg.busy_timeout()).await?;
    db::run_migrations(&pool).await?;
    info!("catalog store ready");

    cli::run(&pool, &cfg, args.command).await
}
