use std::sync::Arc;

use chrono::NaiveDate;
use recon_core::{
    DuplicateMatchType, ItemOutcome, ReconError, RemoteArticle, SyncRunResult,
};
use recon_storage::Catalog;
use recon_wordpress::{fetch_all, ContentSource, DateWindow, PageQuery};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::authors::AuthorResolver;
use crate::detect::DuplicateDetector;
use crate::upsert::ArticleUpserter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub max_articles: usize,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl SyncRequest {
    pub fn latest(max_articles: usize) -> Self {
        Self {
            max_articles,
            start_date: None,
            end_date: None,
        }
    }
}

/// Fetches a bounded batch of remote posts, then reconciles them one at a time.
pub struct SyncOrchestrator {
    source: Arc<dyn ContentSource>,
    detector: DuplicateDetector,
    authors: AuthorResolver,
    upserter: ArticleUpserter,
    per_page: u32,
}

impl SyncOrchestrator {
    pub fn new(source: Arc<dyn ContentSource>, catalog: Arc<dyn Catalog>, per_page: u32) -> Self {
        Self {
            source,
            detector: DuplicateDetector::new(catalog.clone()),
            authors: AuthorResolver::new(catalog.clone()),
            upserter: ArticleUpserter::new(catalog),
            per_page,
        }
    }

    /// Only a failed first page aborts the run; item failures land in the result.
    pub async fn run(&self, request: &SyncRequest) -> Result<SyncRunResult, ReconError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sync_run", %run_id, source = self.source.source_id());
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: &SyncRequest) -> Result<SyncRunResult, ReconError> {
        let batch = fetch_all(
            self.source.as_ref(),
            PageQuery {
                per_page: self.per_page,
                max_items: request.max_articles,
                window: DateWindow::from_dates(request.start_date, request.end_date),
            },
        )
        .await?;
        info!(
            fetched = batch.articles.len(),
            rejected = batch.rejected.len(),
            pages = batch.pages,
            "fetch phase complete"
        );

        let total = batch.articles.len() + batch.rejected.len();
        let mut outcomes = Vec::with_capacity(total);
        for rejected in batch.rejected {
            warn!(external_id = ?rejected.external_id, reason = %rejected.reason, "malformed post skipped");
            outcomes.push(ItemOutcome::Failed {
                external_id: rejected.external_id,
                message: rejected.reason,
            });
        }
        for (index, remote) in batch.articles.iter().enumerate() {
            debug!(index, external_id = remote.external_id, "processing");
            outcomes.push(self.process_item(remote).await);
        }

        let result = outcomes
            .into_iter()
            .fold(SyncRunResult::new(total), SyncRunResult::absorb);
        info!(
            total = result.total_fetched,
            created = result.created,
            duplicates = result.duplicates_skipped,
            failed = result.failed,
            "sync run complete"
        );
        Ok(result)
    }

    async fn process_item(&self, remote: &RemoteArticle) -> ItemOutcome {
        let external_id = remote.external_id;
        let failed = |err: ReconError| {
            warn!(external_id, error = %err, "item failed");
            ItemOutcome::Failed {
                external_id: Some(external_id),
                message: err.to_string(),
            }
        };

        let check = match self.detector.detect(remote).await {
            Ok(check) => check,
            Err(err) => return failed(err.into()),
        };
        if check.is_duplicate {
            return ItemOutcome::Duplicate {
                external_id,
                existing_local_id: check.existing_local_id,
                match_type: check.match_type,
            };
        }

        let author_id = match self
            .authors
            .resolve(remote.author_id, remote.author.as_ref())
            .await
        {
            Ok(author_id) => author_id,
            Err(err) => return failed(err.into()),
        };

        match self.upserter.upsert(remote, author_id).await {
            Ok(local_id) => {
                debug!(external_id, %local_id, "created local article");
                ItemOutcome::Created {
                    external_id,
                    local_id,
                }
            }
            // A concurrent writer inserted the same remote id after our check.
            Err(err) if err.is_conflict() => {
                warn!(external_id, "insert conflicted, counting as duplicate");
                ItemOutcome::Duplicate {
                    external_id,
                    existing_local_id: None,
                    match_type: Some(DuplicateMatchType::RemoteId),
                }
            }
            Err(err) => failed(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recon_core::{
        CatalogError, LocalArticle, LocalAuthor, NewLocalArticle, NewLocalAuthor, NewsCandidate,
    };
    use recon_storage::MemoryCatalog;
    use recon_wordpress::FixtureSource;
    use serde_json::json;
    use std::path::PathBuf;

    fn fixture_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/wordpress/posts.json")
    }

    fn post(id: i64, title: &str) -> serde_json::Value {
        json!({
            "id": id,
            "date": "2026-03-04T09:30:00",
            "status": "publish",
            "title": { "rendered": title },
            "content": { "rendered": "<p>Body text for the story.</p>" },
            "excerpt": { "rendered": "" },
            "author": 7,
            "_embedded": { "author": [{ "id": 7, "name": "Dana Whitfield", "slug": "dana" }] }
        })
    }

    fn orchestrator(source: FixtureSource, catalog: Arc<dyn Catalog>) -> SyncOrchestrator {
        SyncOrchestrator::new(Arc::new(source), catalog, 2)
    }

    #[tokio::test]
    async fn second_run_over_unchanged_remote_is_all_duplicates() {
        let catalog = Arc::new(MemoryCatalog::new());
        let posts = vec![post(1, "First story"), post(2, "Second story"), post(3, "Third story")];
        let sync = orchestrator(FixtureSource::new(posts), catalog.clone());
        let request = SyncRequest::latest(10);

        let first = sync.run(&request).await.unwrap();
        assert_eq!(first.total_fetched, 3);
        assert_eq!(first.created, 3);

        let second = sync.run(&request).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.duplicates_skipped, second.total_fetched);
        assert_eq!(catalog.articles().await.len(), 3);
        assert_eq!(catalog.authors().await.len(), 1);
    }

    #[tokio::test]
    async fn same_remote_id_twice_yields_one_article() {
        let catalog = Arc::new(MemoryCatalog::new());
        let request = SyncRequest::latest(10);
        orchestrator(FixtureSource::new(vec![post(42, "Fed Raises Rates Again")]), catalog.clone())
            .run(&request)
            .await
            .unwrap();
        let again = orchestrator(
            FixtureSource::new(vec![post(42, "Fed Raises Rates Again (updated)")]),
            catalog.clone(),
        )
        .run(&request)
        .await
        .unwrap();

        assert_eq!(again.duplicates_skipped, 1);
        let articles = catalog.articles().await;
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].external_id, Some(42));
        assert_eq!(articles[0].title, "Fed Raises Rates Again");
    }

    #[tokio::test]
    async fn identical_title_under_new_id_is_skipped() {
        let catalog = Arc::new(MemoryCatalog::new());
        let request = SyncRequest::latest(10);
        orchestrator(FixtureSource::new(vec![post(42, "Fed Raises Rates Again")]), catalog.clone())
            .run(&request)
            .await
            .unwrap();
        let again = orchestrator(FixtureSource::new(vec![post(77, "Fed Raises Rates Again")]), catalog.clone())
            .run(&request)
            .await
            .unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.duplicates_skipped, 1);
        assert!(catalog.find_article_by_external_id(77).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fixture_batch_reports_malformed_posts_and_keeps_going() {
        let catalog = Arc::new(MemoryCatalog::new());
        let source = FixtureSource::from_file(fixture_path()).unwrap();
        let result = orchestrator(source, catalog.clone())
            .run(&SyncRequest::latest(50))
            .await
            .unwrap();

        assert_eq!(result.total_fetched, 5);
        assert_eq!(result.created, 4);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("post <unknown>:"));

        let articles = catalog.articles().await;
        let draft = articles.iter().find(|a| a.external_id == Some(44)).unwrap();
        assert!(!draft.is_published());
        assert!(draft.author_id.is_none());
        // posts 42 and 46 share the remote author
        assert_eq!(catalog.authors().await.len(), 2);
    }

    #[tokio::test]
    async fn malformed_posts_use_up_the_max_articles_budget() {
        let catalog = Arc::new(MemoryCatalog::new());
        let posts = vec![
            json!({ "title": { "rendered": "No id here" } }),
            post(1, "First story"),
            post(2, "Second story"),
            post(3, "Third story"),
        ];
        let result = orchestrator(FixtureSource::new(posts), catalog.clone())
            .run(&SyncRequest::latest(2))
            .await
            .unwrap();

        assert_eq!(result.total_fetched, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.created, 1);
        assert_eq!(catalog.articles().await.len(), 1);
    }

    #[tokio::test]
    async fn first_page_failure_is_remote_unavailable() {
        let catalog = Arc::new(MemoryCatalog::new());
        let source = FixtureSource::new(vec![post(1, "First story")]).with_failure(1, 503);
        let err = orchestrator(source, catalog)
            .run(&SyncRequest::latest(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn later_page_failure_keeps_what_was_fetched() {
        let catalog = Arc::new(MemoryCatalog::new());
        let posts = vec![post(1, "First story"), post(2, "Second story"), post(3, "Third story")];
        let source = FixtureSource::new(posts).with_failure(2, 500);
        let result = orchestrator(source, catalog)
            .run(&SyncRequest::latest(10))
            .await
            .unwrap();
        assert_eq!(result.total_fetched, 2);
        assert_eq!(result.created, 2);
    }

    /// Delegates to a memory catalog but fails or races on chosen remote ids.
    struct FlakyCatalog {
        inner: MemoryCatalog,
        broken_id: i64,
        raced_id: i64,
    }

    #[async_trait]
    impl Catalog for FlakyCatalog {
        async fn find_article_by_external_id(
            &self,
            external_id: i64,
        ) -> Result<Option<LocalArticle>, CatalogError> {
            self.inner.find_article_by_external_id(external_id).await
        }
        async fn find_articles_by_title_fragment(
            &self,
            fragment: &str,
        ) -> Result<Vec<LocalArticle>, CatalogError> {
            self.inner.find_articles_by_title_fragment(fragment).await
        }
        async fn get_article(&self, id: Uuid) -> Result<Option<LocalArticle>, CatalogError> {
            self.inner.get_article(id).await
        }
        async fn insert_article(&self, article: NewLocalArticle) -> Result<Uuid, CatalogError> {
            match article.external_id {
                Some(id) if id == self.broken_id => {
                    Err(CatalogError::Backend("disk full".to_string()))
                }
                Some(id) if id == self.raced_id => Err(CatalogError::Conflict {
                    table: "articles",
                    external_id: id,
                }),
                _ => self.inner.insert_article(article).await,
            }
        }
        async fn published_articles_with_external_id(
            &self,
        ) -> Result<Vec<LocalArticle>, CatalogError> {
            self.inner.published_articles_with_external_id().await
        }
        async fn find_author_by_external_id(
            &self,
            external_id: i64,
        ) -> Result<Option<LocalAuthor>, CatalogError> {
            self.inner.find_author_by_external_id(external_id).await
        }
        async fn find_unlinked_authors_by_name(
            &self,
            name: &str,
        ) -> Result<Vec<LocalAuthor>, CatalogError> {
            self.inner.find_unlinked_authors_by_name(name).await
        }
        async fn link_author(
            &self,
            author_id: Uuid,
            external_id: i64,
            display_name: &str,
        ) -> Result<(), CatalogError> {
            self.inner.link_author(author_id, external_id, display_name).await
        }
        async fn insert_author(&self, author: NewLocalAuthor) -> Result<Uuid, CatalogError> {
            self.inner.insert_author(author).await
        }
        async fn get_candidate(&self, id: Uuid) -> Result<Option<NewsCandidate>, CatalogError> {
            self.inner.get_candidate(id).await
        }
        async fn record_candidate_match(
            &self,
            candidate_id: Uuid,
            article_id: Uuid,
            confidence: f64,
        ) -> Result<(), CatalogError> {
            self.inner
                .record_candidate_match(candidate_id, article_id, confidence)
                .await
        }
    }

    #[tokio::test]
    async fn one_failing_item_does_not_abort_the_run() {
        let catalog = Arc::new(FlakyCatalog {
            inner: MemoryCatalog::new(),
            broken_id: 2,
            raced_id: 3,
        });
        let posts = vec![
            post(1, "First story"),
            post(2, "Second story"),
            post(3, "Third story"),
            post(4, "Fourth story"),
        ];
        let result = orchestrator(FixtureSource::new(posts), catalog.clone())
            .run(&SyncRequest::latest(10))
            .await
            .unwrap();

        assert_eq!(result.total_fetched, 4);
        assert_eq!(result.created, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.duplicates_skipped, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("post 2:"));
        assert!(result.errors[0].contains("disk full"));
        assert_eq!(catalog.inner.articles().await.len(), 2);
    }
}
