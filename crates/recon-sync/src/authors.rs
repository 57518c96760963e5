use std::sync::Arc;

use recon_core::{collapse_whitespace, AuthorType, CatalogError, NewLocalAuthor, RemoteAuthor};
use recon_storage::Catalog;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maps remote author references onto local author records, creating them on first sight.
pub struct AuthorResolver {
    catalog: Arc<dyn Catalog>,
}

impl AuthorResolver {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Resolution order: stored external id, then an unlinked author with the
    /// same display name (adopted and backfilled), then a fresh external author.
    pub async fn resolve(
        &self,
        remote_author_id: Option<i64>,
        payload: Option<&RemoteAuthor>,
    ) -> Result<Option<Uuid>, CatalogError> {
        let Some(payload) = payload else {
            return Ok(None);
        };
        let external_id = remote_author_id.unwrap_or(payload.external_id);
        let name = collapse_whitespace(&payload.name);

        if let Some(existing) = self.catalog.find_author_by_external_id(external_id).await? {
            return Ok(Some(existing.id));
        }

        if !name.is_empty() {
            let unlinked = self.catalog.find_unlinked_authors_by_name(&name).await?;
            if let Some(adopted) = unlinked.first() {
                return match self.catalog.link_author(adopted.id, external_id, &name).await {
                    Ok(()) => {
                        debug!(external_id, author_id = %adopted.id, "adopted unlinked author");
                        Ok(Some(adopted.id))
                    }
                    Err(err) if err.is_conflict() => self.winner_of_race(external_id, err).await,
                    Err(err) => Err(err),
                };
            }
        }

        let created = self
            .catalog
            .insert_author(NewLocalAuthor {
                display_name: name,
                email: payload.email.clone(),
                bio: payload.bio.clone(),
                slug: payload.slug.clone(),
                external_id: Some(external_id),
                author_type: AuthorType::External,
            })
            .await;

        match created {
            Ok(id) => {
                debug!(external_id, author_id = %id, "created external author");
                Ok(Some(id))
            }
            Err(err) if err.is_conflict() => self.winner_of_race(external_id, err).await,
            Err(err) => Err(err),
        }
    }

    /// Another writer claimed this external id first; use its record.
    async fn winner_of_race(
        &self,
        external_id: i64,
        conflict: CatalogError,
    ) -> Result<Option<Uuid>, CatalogError> {
        warn!(external_id, "author write raced, re-reading by external id");
        let existing = self.catalog.find_author_by_external_id(external_id).await?;
        existing.map(|a| Some(a.id)).ok_or(conflict)
    }
}
