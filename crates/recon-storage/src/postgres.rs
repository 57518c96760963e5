use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use recon_core::{
    ArticleStatus, AuthorType, CatalogError, LocalArticle, LocalAuthor, NewLocalArticle,
    NewLocalAuthor, NewsCandidate,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::catalog::Catalog;

const ARTICLE_COLUMNS: &str = r#"
    id, external_id, title, body, excerpt, status, publish_date, author_id,
    source_system, source_url, category_ids, tag_ids, topic_tags,
    last_synced_at, created_at
"#;

const AUTHOR_COLUMNS: &str = "id, display_name, email, bio, slug, external_id, author_type";

const CANDIDATE_COLUMNS: &str = r#"
    id, headline, summary, topic_tags, discovered_at, published_at,
    is_published, matched_article_id, match_confidence
"#;

/// Postgres-backed catalog. Uniqueness of external ids is enforced by the schema.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(backend)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), CatalogError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| CatalogError::Backend(format!("migration failed: {e}")))?;
    info!("catalog migrations applied");
    Ok(())
}

fn backend(err: sqlx::Error) -> CatalogError {
    CatalogError::Backend(err.to_string())
}

fn insert_error(table: &'static str, external_id: Option<i64>, err: sqlx::Error) -> CatalogError {
    let unique = err
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);
    match (unique, external_id) {
        (true, Some(external_id)) => CatalogError::Conflict { table, external_id },
        _ => backend(err),
    }
}

fn article_from_row(row: &PgRow) -> Result<LocalArticle, CatalogError> {
    let status: String = row.try_get("status").map_err(backend)?;
    let status = ArticleStatus::parse(&status)
        .ok_or_else(|| CatalogError::Backend(format!("unknown article status {status:?}")))?;
    Ok(LocalArticle {
        id: row.try_get("id").map_err(backend)?,
        external_id: row.try_get("external_id").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        body: row.try_get("body").map_err(backend)?,
        excerpt: row.try_get("excerpt").map_err(backend)?,
        status,
        publish_date: row.try_get::<Option<NaiveDate>, _>("publish_date").map_err(backend)?,
        author_id: row.try_get("author_id").map_err(backend)?,
        source_system: row.try_get("source_system").map_err(backend)?,
        source_url: row.try_get("source_url").map_err(backend)?,
        category_ids: row.try_get("category_ids").map_err(backend)?,
        tag_ids: row.try_get("tag_ids").map_err(backend)?,
        topic_tags: row.try_get("topic_tags").map_err(backend)?,
        last_synced_at: row
            .try_get::<Option<DateTime<Utc>>, _>("last_synced_at")
            .map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn author_from_row(row: &PgRow) -> Result<LocalAuthor, CatalogError> {
    let author_type: String = row.try_get("author_type").map_err(backend)?;
    let author_type = AuthorType::parse(&author_type)
        .ok_or_else(|| CatalogError::Backend(format!("unknown author type {author_type:?}")))?;
    Ok(LocalAuthor {
        id: row.try_get("id").map_err(backend)?,
        display_name: row.try_get("display_name").map_err(backend)?,
        email: row.try_get("email").map_err(backend)?,
        bio: row.try_get("bio").map_err(backend)?,
        slug: row.try_get("slug").map_err(backend)?,
        external_id: row.try_get("external_id").map_err(backend)?,
        author_type,
    })
}

fn candidate_from_row(row: &PgRow) -> Result<NewsCandidate, CatalogError> {
    Ok(NewsCandidate {
        id: row.try_get("id").map_err(backend)?,
        headline: row.try_get("headline").map_err(backend)?,
        summary: row.try_get("summary").map_err(backend)?,
        topic_tags: row.try_get("topic_tags").map_err(backend)?,
        discovered_at: row.try_get("discovered_at").map_err(backend)?,
        published_at: row.try_get("published_at").map_err(backend)?,
        is_published: row.try_get("is_published").map_err(backend)?,
        matched_article_id: row.try_get("matched_article_id").map_err(backend)?,
        match_confidence: row.try_get("match_confidence").map_err(backend)?,
    })
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn find_article_by_external_id(
        &self,
        external_id: i64,
    ) -> Result<Option<LocalArticle>, CatalogError> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE external_id = $1");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(article_from_row).transpose()
    }

    async fn find_articles_by_title_fragment(
        &self,
        fragment: &str,
    ) -> Result<Vec<LocalArticle>, CatalogError> {
        // strpos avoids LIKE wildcard escaping for titles containing % or _.
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE strpos(lower(title), lower($1)) > 0 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(fragment)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(article_from_row).collect()
    }

    async fn get_article(&self, id: Uuid) -> Result<Option<LocalArticle>, CatalogError> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(article_from_row).transpose()
    }

    async fn insert_article(&self, article: NewLocalArticle) -> Result<Uuid, CatalogError> {
        let external_id = article.external_id;
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO articles (
                id, external_id, title, body, excerpt, status, publish_date, author_id,
                source_system, source_url, category_ids, tag_ids, topic_tags, last_synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(article.external_id)
        .bind(&article.title)
        .bind(&article.body)
        .bind(&article.excerpt)
        .bind(article.status.as_str())
        .bind(article.publish_date)
        .bind(article.author_id)
        .bind(&article.source_system)
        .bind(&article.source_url)
        .bind(&article.category_ids)
        .bind(&article.tag_ids)
        .bind(&article.topic_tags)
        .bind(article.last_synced_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| insert_error("articles", external_id, e))?;

        match (inserted, external_id) {
            (Some(id), _) => Ok(id),
            (None, Some(external_id)) => Err(CatalogError::Conflict {
                table: "articles",
                external_id,
            }),
            (None, None) => Err(CatalogError::Backend(
                "insert returned no row for article without external id".to_string(),
            )),
        }
    }

    async fn published_articles_with_external_id(
        &self,
    ) -> Result<Vec<LocalArticle>, CatalogError> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE status = 'published' AND external_id IS NOT NULL \
             ORDER BY publish_date DESC NULLS LAST, id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(article_from_row).collect()
    }

    async fn find_author_by_external_id(
        &self,
        external_id: i64,
    ) -> Result<Option<LocalAuthor>, CatalogError> {
        let sql = format!("SELECT {AUTHOR_COLUMNS} FROM authors WHERE external_id = $1");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(author_from_row).transpose()
    }

    async fn find_unlinked_authors_by_name(
        &self,
        name: &str,
    ) -> Result<Vec<LocalAuthor>, CatalogError> {
        let sql = format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors \
             WHERE external_id IS NULL AND lower(display_name) = lower($1) \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(author_from_row).collect()
    }

    async fn link_author(
        &self,
        author_id: Uuid,
        external_id: i64,
        display_name: &str,
    ) -> Result<(), CatalogError> {
        let result = sqlx::query(
            r#"
            UPDATE authors
               SET external_id = $2,
                   display_name = $3,
                   updated_at = NOW()
             WHERE id = $1
               AND external_id IS NULL
            "#,
        )
        .bind(author_id)
        .bind(external_id)
        .bind(display_name)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error("authors", Some(external_id), e))?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::Missing {
                entity: "unlinked author",
                id: author_id,
            });
        }
        Ok(())
    }

    async fn insert_author(&self, author: NewLocalAuthor) -> Result<Uuid, CatalogError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO authors (id, display_name, email, bio, slug, external_id, author_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&author.display_name)
        .bind(&author.email)
        .bind(&author.bio)
        .bind(&author.slug)
        .bind(author.external_id)
        .bind(author.author_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error("authors", author.external_id, e))?;
        Ok(id)
    }

    async fn get_candidate(&self, id: Uuid) -> Result<Option<NewsCandidate>, CatalogError> {
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM news_candidates WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(candidate_from_row).transpose()
    }

    async fn record_candidate_match(
        &self,
        candidate_id: Uuid,
        article_id: Uuid,
        confidence: f64,
    ) -> Result<(), CatalogError> {
        let result = sqlx::query(
            r#"
            UPDATE news_candidates
               SET matched_article_id = $2,
                   match_confidence = $3
             WHERE id = $1
            "#,
        )
        .bind(candidate_id)
        .bind(article_id)
        .bind(confidence)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::Missing {
                entity: "candidate",
                id: candidate_id,
            });
        }
        Ok(())
    }
}
