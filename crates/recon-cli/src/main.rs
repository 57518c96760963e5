use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use recon_storage::{run_migrations, MemoryCatalog, PgCatalog};
use recon_sync::{
    engine_from_config, maybe_build_scheduler, MatchInvocation, MatchWeights, ReconConfig,
    ReconEngine, SyncInvocation,
};
use recon_web::AppState;
use recon_wordpress::FixtureSource;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "recon-cli")]
#[command(about = "Content reconciliation engine command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull remote posts into the catalog.
    Sync {
        #[arg(long)]
        max_articles: Option<usize>,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Dry run against a posts fixture and an in-memory catalog.
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Match one news candidate against the catalog.
    Match { candidate_id: String },
    Migrate,
    Serve,
    /// Run cron-driven syncs until interrupted.
    Schedule,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = ReconConfig::from_env();

    let command = cli.command.unwrap_or(Commands::Sync {
        max_articles: None,
        start_date: None,
        end_date: None,
        fixture: None,
    });

    match command {
        Commands::Sync {
            max_articles,
            start_date,
            end_date,
            fixture,
        } => {
            let engine = match fixture {
                Some(path) => {
                    let source = FixtureSource::from_file(&path)
                        .with_context(|| format!("loading fixture {}", path.display()))?;
                    info!(fixture = %path.display(), "dry run against in-memory catalog");
                    ReconEngine::new(
                        Arc::new(MemoryCatalog::new()),
                        Arc::new(source),
                        MatchWeights::load_or_default(&config.match_rules_path)?,
                        config.per_page,
                    )
                }
                None => engine_from_config(&config).await?,
            };
            let invocation = SyncInvocation {
                max_articles: max_articles.unwrap_or(config.default_max_articles),
                start_date,
                end_date,
            };
            let response = engine.sync(&invocation).await.context("sync run failed")?;
            print_json(&response)?;
        }
        Commands::Match { candidate_id } => {
            let engine = engine_from_config(&config).await?;
            let response = engine
                .match_candidate(&MatchInvocation { candidate_id })
                .await
                .context("match failed")?;
            print_json(&response)?;
        }
        Commands::Migrate => {
            let catalog = PgCatalog::connect(&config.database_url)
                .await
                .context("connecting to catalog database")?;
            run_migrations(catalog.pool()).await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let engine = Arc::new(engine_from_config(&config).await?);
            let scheduler = maybe_build_scheduler(&config, engine.clone()).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
            }
            recon_web::serve(config.web_port, AppState::new(engine)).await?;
        }
        Commands::Schedule => {
            let engine = Arc::new(engine_from_config(&config).await?);
            let Some(mut sched) = maybe_build_scheduler(&config, engine).await? else {
                bail!("scheduler disabled; set RECON_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler running, ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
