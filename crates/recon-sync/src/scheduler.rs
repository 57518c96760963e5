use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::ReconConfig;
use crate::engine::{EngineError, ReconEngine};
use crate::invocation::SyncInvocation;

/// Cron-driven sync runs. Shares the engine's run lock, so a tick that lands
/// on an active run is skipped rather than queued.
pub async fn maybe_build_scheduler(
    config: &ReconConfig,
    engine: Arc<ReconEngine>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.as_str();
    let invocation = SyncInvocation {
        max_articles: config.default_max_articles,
        start_date: None,
        end_date: None,
    };
    let job = Job::new_async(cron, move |_uuid, _l| {
        let engine = engine.clone();
        let invocation = invocation.clone();
        Box::pin(async move {
            match engine.sync(&invocation).await {
                Ok(response) => info!(
                    synced = response.results.synced,
                    duplicates = response.results.duplicates,
                    errors = response.results.errors.len(),
                    "scheduled sync finished"
                ),
                Err(EngineError::Busy) => warn!("scheduled sync skipped; previous run still active"),
                Err(err) => error!(error = %err, "scheduled sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(cron, "sync scheduler configured");
    Ok(Some(sched))
}
