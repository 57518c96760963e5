use std::sync::Arc;

use chrono::{DateTime, Utc};
use recon_core::{
    truncate_chars, ArticleStatus, CatalogError, NewLocalArticle, RemoteArticle,
    SOURCE_SYSTEM_WORDPRESS,
};
use recon_storage::Catalog;
use recon_wordpress::to_plain_text;
use uuid::Uuid;

use crate::detect::normalize_title;

pub const EXCERPT_MAX_CHARS: usize = 500;

/// Plain-text excerpt: the rendered excerpt, or the body when the excerpt is empty.
pub fn plain_excerpt(remote: &RemoteArticle) -> Option<String> {
    let mut text = to_plain_text(&remote.excerpt_html);
    if text.is_empty() {
        text = to_plain_text(&remote.body_html);
    }
    let text = truncate_chars(&text, EXCERPT_MAX_CHARS);
    (!text.is_empty()).then_some(text)
}

/// Build the insert row for a remote article. Pure; `synced_at` is injected for tests.
pub fn to_local_article(
    remote: &RemoteArticle,
    author_id: Option<Uuid>,
    synced_at: DateTime<Utc>,
) -> NewLocalArticle {
    let body = remote.body_html.trim();
    NewLocalArticle {
        external_id: Some(remote.external_id),
        title: normalize_title(&remote.title),
        body: (!body.is_empty()).then(|| body.to_string()),
        excerpt: plain_excerpt(remote),
        status: ArticleStatus::from_remote(&remote.status),
        publish_date: remote.published_at.map(|ts| ts.date()),
        author_id,
        source_system: SOURCE_SYSTEM_WORDPRESS.to_string(),
        source_url: remote.link.clone(),
        category_ids: remote.category_ids.clone(),
        tag_ids: remote.tag_ids.clone(),
        topic_tags: Vec::new(),
        last_synced_at: Some(synced_at),
    }
}

/// Insert-only writer; revisions of already-synced posts are never applied.
pub struct ArticleUpserter {
    catalog: Arc<dyn Catalog>,
}

impl ArticleUpserter {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    pub async fn upsert(
        &self,
        remote: &RemoteArticle,
        author_id: Option<Uuid>,
    ) -> Result<Uuid, CatalogError> {
        self.catalog
            .insert_article(to_local_article(remote, author_id, Utc::now()))
            .await
    }
}
