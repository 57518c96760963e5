use async_trait::async_trait;
use chrono::Utc;
use recon_core::{
    CatalogError, LocalArticle, LocalAuthor, NewLocalArticle, NewLocalAuthor, NewsCandidate,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Read/write access to the local article catalog.
///
/// Implementations must reject a second article or author carrying an
/// external id that is already present with [`CatalogError::Conflict`].
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn find_article_by_external_id(
        &self,
        external_id: i64,
    ) -> Result<Option<LocalArticle>, CatalogError>;

    /// Case-insensitive substring search over normalized titles.
    async fn find_articles_by_title_fragment(
        &self,
        fragment: &str,
    ) -> Result<Vec<LocalArticle>, CatalogError>;

    async fn get_article(&self, id: Uuid) -> Result<Option<LocalArticle>, CatalogError>;

    async fn insert_article(&self, article: NewLocalArticle) -> Result<Uuid, CatalogError>;

    /// Published articles with an external id, newest publish date first, then by id.
    async fn published_articles_with_external_id(&self)
        -> Result<Vec<LocalArticle>, CatalogError>;

    async fn find_author_by_external_id(
        &self,
        external_id: i64,
    ) -> Result<Option<LocalAuthor>, CatalogError>;

    /// Authors without an external id whose display name equals `name`, ignoring case.
    async fn find_unlinked_authors_by_name(
        &self,
        name: &str,
    ) -> Result<Vec<LocalAuthor>, CatalogError>;

    /// Attach a remote identity to an author that has none yet.
    async fn link_author(
        &self,
        author_id: Uuid,
        external_id: i64,
        display_name: &str,
    ) -> Result<(), CatalogError>;

    async fn insert_author(&self, author: NewLocalAuthor) -> Result<Uuid, CatalogError>;

    async fn get_candidate(&self, id: Uuid) -> Result<Option<NewsCandidate>, CatalogError>;

    /// Sets exactly `matched_article_id` and `match_confidence` on the candidate.
    async fn record_candidate_match(
        &self,
        candidate_id: Uuid,
        article_id: Uuid,
        confidence: f64,
    ) -> Result<(), CatalogError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    articles: Vec<LocalArticle>,
    authors: Vec<LocalAuthor>,
    candidates: Vec<NewsCandidate>,
}

/// In-process catalog with the same uniqueness rules as the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates come from the discovery pipeline; this stands in for it.
    pub async fn add_candidate(&self, candidate: NewsCandidate) {
        self.state.lock().await.candidates.push(candidate);
    }

    pub async fn articles(&self) -> Vec<LocalArticle> {
        self.state.lock().await.articles.clone()
    }

    pub async fn authors(&self) -> Vec<LocalAuthor> {
        self.state.lock().await.authors.clone()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn find_article_by_external_id(
        &self,
        external_id: i64,
    ) -> Result<Option<LocalArticle>, CatalogError> {
        let state = self.state.lock().await;
        Ok(state
            .articles
            .iter()
            .find(|a| a.external_id == Some(external_id))
            .cloned())
    }

    async fn find_articles_by_title_fragment(
        &self,
        fragment: &str,
    ) -> Result<Vec<LocalArticle>, CatalogError> {
        let needle = fragment.to_lowercase();
        let state = self.state.lock().await;
        Ok(state
            .articles
            .iter()
            .filter(|a| a.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn get_article(&self, id: Uuid) -> Result<Option<LocalArticle>, CatalogError> {
        let state = self.state.lock().await;
        Ok(state.articles.iter().find(|a| a.id == id).cloned())
    }

    async fn insert_article(&self, article: NewLocalArticle) -> Result<Uuid, CatalogError> {
        let mut state = self.state.lock().await;
        if let Some(external_id) = article.external_id {
            if state
                .articles
                .iter()
                .any(|a| a.external_id == Some(external_id))
            {
                return Err(CatalogError::Conflict {
                    table: "articles",
                    external_id,
                });
            }
        }
        if let Some(author_id) = article.author_id {
            if !state.authors.iter().any(|a| a.id == author_id) {
                return Err(CatalogError::Missing {
                    entity: "author",
                    id: author_id,
                });
            }
        }

        let id = Uuid::new_v4();
        state.articles.push(LocalArticle {
            id,
            external_id: article.external_id,
            title: article.title,
            body: article.body,
            excerpt: article.excerpt,
            status: article.status,
            publish_date: article.publish_date,
            author_id: article.author_id,
            source_system: article.source_system,
            source_url: article.source_url,
            category_ids: article.category_ids,
            tag_ids: article.tag_ids,
            topic_tags: article.topic_tags,
            last_synced_at: article.last_synced_at,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn published_articles_with_external_id(
        &self,
    ) -> Result<Vec<LocalArticle>, CatalogError> {
        let state = self.state.lock().await;
        let mut out = state
            .articles
            .iter()
            .filter(|a| a.is_published() && a.external_id.is_some())
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| {
            b.publish_date
                .cmp(&a.publish_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }

    async fn find_author_by_external_id(
        &self,
        external_id: i64,
    ) -> Result<Option<LocalAuthor>, CatalogError> {
        let state = self.state.lock().await;
        Ok(state
            .authors
            .iter()
            .find(|a| a.external_id == Some(external_id))
            .cloned())
    }

    async fn find_unlinked_authors_by_name(
        &self,
        name: &str,
    ) -> Result<Vec<LocalAuthor>, CatalogError> {
        let wanted = name.to_lowercase();
        let state = self.state.lock().await;
        Ok(state
            .authors
            .iter()
            .filter(|a| a.external_id.is_none() && a.display_name.to_lowercase() == wanted)
            .cloned()
            .collect())
    }

    async fn link_author(
        &self,
        author_id: Uuid,
        external_id: i64,
        display_name: &str,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        if state
            .authors
            .iter()
            .any(|a| a.id != author_id && a.external_id == Some(external_id))
        {
            return Err(CatalogError::Conflict {
                table: "authors",
                external_id,
            });
        }
        let author = state
            .authors
            .iter_mut()
            .find(|a| a.id == author_id && a.external_id.is_none())
            .ok_or(CatalogError::Missing {
                entity: "unlinked author",
                id: author_id,
            })?;
        author.external_id = Some(external_id);
        author.display_name = display_name.to_string();
        Ok(())
    }

    async fn insert_author(&self, author: NewLocalAuthor) -> Result<Uuid, CatalogError> {
        let mut state = self.state.lock().await;
        if let Some(external_id) = author.external_id {
            if state
                .authors
                .iter()
                .any(|a| a.external_id == Some(external_id))
            {
                return Err(CatalogError::Conflict {
                    table: "authors",
                    external_id,
                });
            }
        }
        let id = Uuid::new_v4();
        state.authors.push(LocalAuthor {
            id,
            display_name: author.display_name,
            email: author.email,
            bio: author.bio,
            slug: author.slug,
            external_id: author.external_id,
            author_type: author.author_type,
        });
        Ok(id)
    }

    async fn get_candidate(&self, id: Uuid) -> Result<Option<NewsCandidate>, CatalogError> {
        let state = self.state.lock().await;
        Ok(state.candidates.iter().find(|c| c.id == id).cloned())
    }

    async fn record_candidate_match(
        &self,
        candidate_id: Uuid,
        article_id: Uuid,
        confidence: f64,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        if !state.articles.iter().any(|a| a.id == article_id) {
            return Err(CatalogError::Missing {
                entity: "article",
                id: article_id,
            });
        }
        let candidate = state
            .candidates
            .iter_mut()
            .find(|c| c.id == candidate_id)
            .ok_or(CatalogError::Missing {
                entity: "candidate",
                id: candidate_id,
            })?;
        candidate.matched_article_id = Some(article_id);
        candidate.match_confidence = Some(confidence);
        Ok(())
    }
}
