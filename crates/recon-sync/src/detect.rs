use std::sync::Arc;

use recon_core::{
    char_prefix, collapse_whitespace, CatalogError, DuplicateCheck, DuplicateMatchType,
    RemoteArticle,
};
use recon_storage::Catalog;
use tracing::debug;

/// Characters of the remote title used to narrow the catalog query.
pub const TITLE_PREFIX_CHARS: usize = 20;
/// Titles shorter than this never take the title fallback.
pub const MIN_TITLE_CHARS: usize = 5;

/// Canonical form shared by stored titles and incoming remote titles.
pub fn normalize_title(raw: &str) -> String {
    collapse_whitespace(raw)
}

pub struct DuplicateDetector {
    catalog: Arc<dyn Catalog>,
}

impl DuplicateDetector {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Remote id first, then an exact normalized-title match among prefix hits.
    pub async fn detect(&self, remote: &RemoteArticle) -> Result<DuplicateCheck, CatalogError> {
        if let Some(existing) = self
            .catalog
            .find_article_by_external_id(remote.external_id)
            .await?
        {
            debug!(external_id = remote.external_id, local_id = %existing.id, "duplicate by remote id");
            return Ok(DuplicateCheck::found(
                existing.id,
                DuplicateMatchType::RemoteId,
            ));
        }

        let title = normalize_title(&remote.title);
        if title.chars().count() < MIN_TITLE_CHARS {
            return Ok(DuplicateCheck::not_duplicate());
        }

        let narrowed = self
            .catalog
            .find_articles_by_title_fragment(char_prefix(&title, TITLE_PREFIX_CHARS))
            .await?;
        match narrowed
            .iter()
            .find(|article| normalize_title(&article.title) == title)
        {
            Some(hit) => {
                debug!(external_id = remote.external_id, local_id = %hit.id, "duplicate by exact title");
                Ok(DuplicateCheck::found(hit.id, DuplicateMatchType::ExactTitle))
            }
            None => Ok(DuplicateCheck::not_duplicate()),
        }
    }
}
