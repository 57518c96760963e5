use std::sync::Arc;
use std::time::Duration;

use recon_core::ReconError;
use recon_storage::Catalog;
use recon_wordpress::ContentSource;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::invocation::{MatchInvocation, MatchResponse, SyncInvocation, SyncResponse};
use crate::matcher::{CandidateMatcher, MatchWeights};
use crate::orchestrator::{SyncOrchestrator, SyncRequest};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a sync run is already in progress")]
    Busy,
    #[error("sync run exceeded {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Recon(#[from] ReconError),
}

/// Caller-side wrapper shared by the HTTP layer, the CLI and the scheduler.
///
/// Holds the single run lock for the catalog and applies the run timeout;
/// the orchestrator itself knows about neither.
pub struct ReconEngine {
    orchestrator: SyncOrchestrator,
    matcher: CandidateMatcher,
    run_lock: Mutex<()>,
    run_timeout: Duration,
    default_max_articles: usize,
}

impl ReconEngine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        source: Arc<dyn ContentSource>,
        weights: MatchWeights,
        per_page: u32,
    ) -> Self {
        Self {
            orchestrator: SyncOrchestrator::new(source, catalog.clone(), per_page),
            matcher: CandidateMatcher::new(catalog, weights),
            run_lock: Mutex::new(()),
            run_timeout: Duration::from_secs(600),
            default_max_articles: 100,
        }
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn with_default_max_articles(mut self, max_articles: usize) -> Self {
        self.default_max_articles = max_articles;
        self
    }

    pub fn default_max_articles(&self) -> usize {
        self.default_max_articles
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn matcher(&self) -> &CandidateMatcher {
        &self.matcher
    }

    /// Refuses instead of queueing when another run holds the lock.
    pub async fn sync(&self, invocation: &SyncInvocation) -> Result<SyncResponse, EngineError> {
        let _guard = self.run_lock.try_lock().map_err(|_| {
            warn!("sync requested while another run is active");
            EngineError::Busy
        })?;
        let request = SyncRequest::from(invocation);
        let result = tokio::time::timeout(self.run_timeout, self.orchestrator.run(&request))
            .await
            .map_err(|_| EngineError::TimedOut(self.run_timeout))??;
        Ok(SyncResponse::from(result))
    }

    /// Unknown or malformed ids are `NotFound`; unpublished candidates and
    /// sub-threshold scores come back as `success = false`.
    pub async fn match_candidate(
        &self,
        invocation: &MatchInvocation,
    ) -> Result<MatchResponse, ReconError> {
        let candidate_id =
            Uuid::parse_str(invocation.candidate_id.trim()).map_err(|_| ReconError::NotFound {
                entity: "candidate",
                id: invocation.candidate_id.clone(),
            })?;
        match self.matcher.match_candidate_id(candidate_id).await {
            Ok(outcome) => {
                info!(%candidate_id, matched = outcome.is_matched(), "match invocation finished");
                Ok(MatchResponse::from(outcome))
            }
            Err(ReconError::PreconditionFailed(message)) => Ok(MatchResponse::rejected(message)),
            Err(err) => Err(err),
        }
    }
}
