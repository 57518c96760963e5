//! Core domain model and error taxonomy for the content reconciliation engine.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "recon-core";

/// Source system tag stamped on every article imported through sync.
pub const SOURCE_SYSTEM_WORDPRESS: &str = "wordpress";

/// Remote status value that maps to a published local article.
pub const REMOTE_STATUS_PUBLISH: &str = "publish";

/// Upper bound on error messages retained in a [`SyncRunResult`].
pub const MAX_REPORTED_ERRORS: usize = 50;

/// Author sub-object embedded in a remote post fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAuthor {
    pub external_id: i64,
    pub name: String,
    pub slug: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
}

/// Immutable snapshot of one remote post, already decoded from the CMS payload.
///
/// `title` is plain text (tags stripped, entities decoded, whitespace collapsed);
/// body and excerpt keep their rendered HTML until the upserter normalizes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteArticle {
    pub external_id: i64,
    pub title: String,
    pub body_html: String,
    pub excerpt_html: String,
    pub published_at: Option<NaiveDateTime>,
    pub status: String,
    pub author_id: Option<i64>,
    pub author: Option<RemoteAuthor>,
    pub category_ids: Vec<i64>,
    pub tag_ids: Vec<i64>,
    pub link: Option<String>,
}

impl RemoteArticle {
    pub fn is_published(&self) -> bool {
        self.status == REMOTE_STATUS_PUBLISH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Published,
    Draft,
}

impl ArticleStatus {
    /// `publish` maps to published, every other remote status is a draft.
    pub fn from_remote(status: &str) -> Self {
        if status == REMOTE_STATUS_PUBLISH {
            Self::Published
        } else {
            Self::Draft
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Draft => "draft",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "published" => Some(Self::Published),
            "draft" => Some(Self::Draft),
            _ => None,
        }
    }
}

/// Canonical article record in the local catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalArticle {
    pub id: Uuid,
    pub external_id: Option<i64>,
    pub title: String,
    pub body: Option<String>,
    pub excerpt: Option<String>,
    pub status: ArticleStatus,
    pub publish_date: Option<NaiveDate>,
    pub author_id: Option<Uuid>,
    pub source_system: String,
    pub source_url: Option<String>,
    pub category_ids: Vec<i64>,
    pub tag_ids: Vec<i64>,
    pub topic_tags: Vec<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LocalArticle {
    pub fn is_published(&self) -> bool {
        self.status == ArticleStatus::Published
    }
}

/// Insert payload for [`LocalArticle`]; the catalog assigns id and creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLocalArticle {
    pub external_id: Option<i64>,
    pub title: String,
    pub body: Option<String>,
    pub excerpt: Option<String>,
    pub status: ArticleStatus,
    pub publish_date: Option<NaiveDate>,
    pub author_id: Option<Uuid>,
    pub source_system: String,
    pub source_url: Option<String>,
    pub category_ids: Vec<i64>,
    pub tag_ids: Vec<i64>,
    pub topic_tags: Vec<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    External,
    Internal,
}

impl AuthorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Internal => "internal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "external" => Some(Self::External),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAuthor {
    pub id: Uuid,
    pub display_name: String,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub slug: Option<String>,
    pub external_id: Option<i64>,
    pub author_type: AuthorType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLocalAuthor {
    pub display_name: String,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub slug: Option<String>,
    pub external_id: Option<i64>,
    pub author_type: AuthorType,
}

/// A discovered news item awaiting reconciliation against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsCandidate {
    pub id: Uuid,
    pub headline: String,
    pub summary: Option<String>,
    pub topic_tags: Vec<String>,
    pub discovered_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    /// Set by the discovery pipeline once the story is live externally.
    pub is_published: bool,
    pub matched_article_id: Option<Uuid>,
    pub match_confidence: Option<f64>,
}

impl NewsCandidate {
    /// Date used for recency comparison: external publish time, else discovery time.
    pub fn reference_date(&self) -> NaiveDate {
        self.published_at.unwrap_or(self.discovered_at).date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMatchType {
    RemoteId,
    ExactTitle,
}

impl DuplicateMatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoteId => "remote_id",
            Self::ExactTitle => "exact_title",
        }
    }
}

/// Result of checking one remote article against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub existing_local_id: Option<Uuid>,
    pub match_type: Option<DuplicateMatchType>,
}

impl DuplicateCheck {
    pub fn not_duplicate() -> Self {
        Self {
            is_duplicate: false,
            existing_local_id: None,
            match_type: None,
        }
    }

    pub fn found(existing_local_id: Uuid, match_type: DuplicateMatchType) -> Self {
        Self {
            is_duplicate: true,
            existing_local_id: Some(existing_local_id),
            match_type: Some(match_type),
        }
    }
}

/// What happened to a single fetched item during a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemOutcome {
    Created {
        external_id: i64,
        local_id: Uuid,
    },
    Duplicate {
        external_id: i64,
        existing_local_id: Option<Uuid>,
        match_type: Option<DuplicateMatchType>,
    },
    Failed {
        external_id: Option<i64>,
        message: String,
    },
}

/// Summary of one orchestrator invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunResult {
    pub total_fetched: usize,
    pub created: usize,
    pub duplicates_skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl SyncRunResult {
    pub fn new(total_fetched: usize) -> Self {
        Self {
            total_fetched,
            ..Default::default()
        }
    }

    /// Fold step: counts every outcome, keeps at most [`MAX_REPORTED_ERRORS`] messages.
    pub fn absorb(mut self, outcome: ItemOutcome) -> Self {
        match outcome {
            ItemOutcome::Created { .. } => self.created += 1,
            ItemOutcome::Duplicate { .. } => self.duplicates_skipped += 1,
            ItemOutcome::Failed {
                external_id,
                message,
            } => {
                self.failed += 1;
                if self.errors.len() < MAX_REPORTED_ERRORS {
                    let line = match external_id {
                        Some(id) => format!("post {id}: {message}"),
                        None => format!("post <unknown>: {message}"),
                    };
                    self.errors.push(line);
                }
            }
        }
        self
    }

    /// Failures counted but not listed in `errors`.
    pub fn unreported_errors(&self) -> usize {
        self.failed.saturating_sub(self.errors.len())
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{table} already holds external id {external_id}")]
    Conflict {
        table: &'static str,
        external_id: i64,
    },
    #[error("{entity} {id} does not exist")]
    Missing { entity: &'static str, id: Uuid },
    #[error("catalog backend error: {0}")]
    Backend(String),
}

impl CatalogError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("remote content API unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] CatalogError),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
}

pub type ReconResult<T> = Result<T, ReconError>;

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `n` characters of `input` (char-based, never splits a code point).
pub fn char_prefix(input: &str, n: usize) -> &str {
    match input.char_indices().nth(n) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Truncate to at most `max_chars` characters, trimming a trailing partial space.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    char_prefix(input, max_chars).trim_end().to_string()
}
