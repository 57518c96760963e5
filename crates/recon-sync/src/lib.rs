//! Reconciliation pipeline: remote sync into the local catalog and candidate matching.

mod authors;
mod config;
mod detect;
mod engine;
mod invocation;
mod matcher;
mod orchestrator;
mod scheduler;
mod upsert;

use std::sync::Arc;

use anyhow::{Context, Result};
use recon_storage::{HttpFetcher, PgCatalog};
use recon_wordpress::WordPressClient;

pub use authors::AuthorResolver;
pub use config::ReconConfig;
pub use detect::{normalize_title, DuplicateDetector, MIN_TITLE_CHARS, TITLE_PREFIX_CHARS};
pub use engine::{EngineError, ReconEngine};
pub use invocation::{
    MatchDetails, MatchInvocation, MatchResponse, SyncInvocation, SyncResponse, SyncResults,
};
pub use matcher::{
    confidence_for, keyword_tokens, score_article, CandidateMatcher, MatchOutcome, MatchWeights,
    RulesError, ScoreBreakdown, ScoredArticle,
};
pub use orchestrator::{SyncOrchestrator, SyncRequest};
pub use scheduler::maybe_build_scheduler;
pub use upsert::{plain_excerpt, to_local_article, ArticleUpserter, EXCERPT_MAX_CHARS};

pub const CRATE_NAME: &str = "recon-sync";

pub fn wordpress_source(config: &ReconConfig) -> Result<WordPressClient> {
    let http = HttpFetcher::new(config.http_config()).context("building http client")?;
    Ok(WordPressClient::new(config.wordpress_config(), http))
}

/// Postgres catalog + live WordPress source + rules file, as the binaries run it.
pub async fn engine_from_config(config: &ReconConfig) -> Result<ReconEngine> {
    let catalog = PgCatalog::connect(&config.database_url)
        .await
        .context("connecting to catalog database")?;
    let weights = MatchWeights::load_or_default(&config.match_rules_path)
        .context("loading match rules")?;
    let source = wordpress_source(config)?;
    Ok(ReconEngine::new(Arc::new(catalog), Arc::new(source), weights, config.per_page)
        .with_run_timeout(config.run_timeout())
        .with_default_max_articles(config.default_max_articles))
}
