//! Candidate-to-article matching by additive keyword, cluster and recency score.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use recon_core::{LocalArticle, NewsCandidate, ReconError};
use recon_storage::Catalog;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

const RECENCY_DAY_WINDOW: i64 = 1;
const RECENCY_WEEK_WINDOW: i64 = 7;

/// Rules file layout this build understands.
pub const RULES_VERSION: u32 = 1;

/// Scoring parameters. Unset YAML keys keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub title_token: u32,
    pub body_token: u32,
    pub cluster_tag: u32,
    pub recency_week: u32,
    pub recency_day: u32,
    /// Exclusive: a best score must be strictly greater to match.
    pub threshold: u32,
    pub min_title_token_chars: usize,
    pub min_body_token_chars: usize,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            title_token: 10,
            body_token: 2,
            cluster_tag: 20,
            recency_week: 5,
            recency_day: 10,
            threshold: 15,
            min_title_token_chars: 4,
            min_body_token_chars: 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{path}: unsupported rules version {found}, expected {expected}", expected = RULES_VERSION)]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

#[derive(Debug, Deserialize)]
struct MatchRulesFile {
    #[serde(default = "default_rules_version")]
    version: u32,
    #[serde(flatten)]
    weights: MatchWeights,
}

fn default_rules_version() -> u32 {
    RULES_VERSION
}

impl MatchWeights {
    pub fn from_yaml_str(raw: &str, path: &Path) -> Result<Self, RulesError> {
        let file: MatchRulesFile = serde_yaml::from_str(raw).map_err(|source| RulesError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if file.version != RULES_VERSION {
            return Err(RulesError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: file.version,
            });
        }
        Ok(file.weights)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RulesError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RulesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw, path)
    }

    /// Optional rules file: absent means defaults, present but broken is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, RulesError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no match rules file, using default weights");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }
}

/// Per-signal contributions to a candidate/article score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub title: u32,
    pub body: u32,
    pub cluster: u32,
    pub recency: u32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u32 {
        self.title + self.body + self.cluster + self.recency
    }
}

/// Distinct lower-cased tokens with surrounding punctuation removed.
pub fn keyword_tokens(text: &str, min_chars: usize) -> BTreeSet<String> {
    text.split_whitespace()
        .map(|raw| {
            raw.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|token| token.chars().count() >= min_chars)
        .collect()
}

fn tag_set(tags: &[String]) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

pub fn score_article(
    candidate: &NewsCandidate,
    article: &LocalArticle,
    weights: &MatchWeights,
) -> ScoreBreakdown {
    let headline = keyword_tokens(&candidate.headline, weights.min_title_token_chars);
    let title = keyword_tokens(&article.title, weights.min_title_token_chars);
    let shared_title = headline.intersection(&title).count() as u32;

    let shared_body = match (
        non_empty(candidate.summary.as_deref()),
        non_empty(article.excerpt.as_deref()),
    ) {
        (Some(summary), Some(excerpt)) => {
            let excerpt = excerpt.to_lowercase();
            keyword_tokens(summary, weights.min_body_token_chars)
                .iter()
                .filter(|token| excerpt.contains(token.as_str()))
                .count() as u32
        }
        _ => 0,
    };

    let shared_tags = tag_set(&candidate.topic_tags)
        .intersection(&tag_set(&article.topic_tags))
        .count() as u32;

    let recency = match article.publish_date {
        Some(published) => {
            let days = (candidate.reference_date() - published).num_days().abs();
            if days <= RECENCY_DAY_WINDOW {
                weights.recency_day
            } else if days <= RECENCY_WEEK_WINDOW {
                weights.recency_week
            } else {
                0
            }
        }
        None => 0,
    };

    ScoreBreakdown {
        title: shared_title * weights.title_token,
        body: shared_body * weights.body_token,
        cluster: shared_tags * weights.cluster_tag,
        recency,
    }
}

pub fn confidence_for(score: u32) -> f64 {
    (f64::from(score) / 100.0).min(1.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredArticle {
    pub article_id: Uuid,
    pub article_title: String,
    pub breakdown: ScoreBreakdown,
}

impl ScoredArticle {
    pub fn score(&self) -> u32 {
        self.breakdown.total()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        article_id: Uuid,
        article_title: String,
        score: u32,
        confidence: f64,
    },
    NoMatch {
        best_score: Option<u32>,
    },
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

pub struct CandidateMatcher {
    catalog: Arc<dyn Catalog>,
    weights: MatchWeights,
}

impl CandidateMatcher {
    pub fn new(catalog: Arc<dyn Catalog>, weights: MatchWeights) -> Self {
        Self { catalog, weights }
    }

    pub fn weights(&self) -> &MatchWeights {
        &self.weights
    }

    /// Highest-scoring published article; ties keep catalog order. Read-only.
    pub async fn best_article(
        &self,
        candidate: &NewsCandidate,
    ) -> Result<Option<ScoredArticle>, ReconError> {
        let articles = self.catalog.published_articles_with_external_id().await?;
        let mut best: Option<ScoredArticle> = None;
        for article in &articles {
            let breakdown = score_article(candidate, article, &self.weights);
            if best
                .as_ref()
                .map_or(true, |current| breakdown.total() > current.score())
            {
                best = Some(ScoredArticle {
                    article_id: article.id,
                    article_title: article.title.clone(),
                    breakdown,
                });
            }
        }
        Ok(best)
    }

    /// Score a published candidate and record the link when it clears the threshold.
    pub async fn match_candidate(
        &self,
        candidate: &NewsCandidate,
    ) -> Result<MatchOutcome, ReconError> {
        let span = tracing::info_span!("candidate_match", candidate_id = %candidate.id);
        async {
            if !candidate.is_published {
                return Err(ReconError::PreconditionFailed(format!(
                    "candidate {} is not published yet",
                    candidate.id
                )));
            }

            let best = self.best_article(candidate).await?;
            match best {
                Some(scored) if scored.score() > self.weights.threshold => {
                    let score = scored.score();
                    let confidence = confidence_for(score);
                    self.catalog
                        .record_candidate_match(candidate.id, scored.article_id, confidence)
                        .await?;
                    info!(
                        article_id = %scored.article_id,
                        score,
                        confidence,
                        breakdown = ?scored.breakdown,
                        "candidate matched"
                    );
                    Ok(MatchOutcome::Matched {
                        article_id: scored.article_id,
                        article_title: scored.article_title,
                        score,
                        confidence,
                    })
                }
                other => {
                    let best_score = other.as_ref().map(ScoredArticle::score);
                    debug!(?best_score, threshold = self.weights.threshold, "no article cleared threshold");
                    Ok(MatchOutcome::NoMatch { best_score })
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn match_candidate_id(&self, candidate_id: Uuid) -> Result<MatchOutcome, ReconError> {
        let candidate = self
            .catalog
            .get_candidate(candidate_id)
            .await?
            .ok_or_else(|| ReconError::NotFound {
                entity: "candidate",
                id: candidate_id.to_string(),
            })?;
        self.match_candidate(&candidate).await
    }
}
