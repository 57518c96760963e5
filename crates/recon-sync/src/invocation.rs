//! Wire shapes for the sync and match invocations (camelCase JSON).

use chrono::NaiveDate;
use recon_core::SyncRunResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::matcher::MatchOutcome;
use crate::orchestrator::SyncRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInvocation {
    pub max_articles: usize,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl From<&SyncInvocation> for SyncRequest {
    fn from(invocation: &SyncInvocation) -> Self {
        Self {
            max_articles: invocation.max_articles,
            start_date: invocation.start_date,
            end_date: invocation.end_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResults {
    pub synced: usize,
    /// Revisions are never applied, so this stays zero.
    pub updated: usize,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub results: SyncResults,
    pub total_articles: usize,
}

impl From<SyncRunResult> for SyncResponse {
    fn from(result: SyncRunResult) -> Self {
        let unreported = result.unreported_errors();
        let mut errors = result.errors;
        if unreported > 0 {
            errors.push(format!("... and {unreported} more failed posts"));
        }
        Self {
            success: true,
            results: SyncResults {
                synced: result.created,
                updated: 0,
                duplicates: result.duplicates_skipped,
                errors,
            },
            total_articles: result.total_fetched,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInvocation {
    pub candidate_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetails {
    pub article_id: Uuid,
    pub article_title: String,
    pub confidence_score: f64,
    pub match_score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResponse {
    pub success: bool,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MatchResponse {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            matched: None,
            message: Some(message.into()),
        }
    }
}

impl From<MatchOutcome> for MatchResponse {
    fn from(outcome: MatchOutcome) -> Self {
        match outcome {
            MatchOutcome::Matched {
                article_id,
                article_title,
                score,
                confidence,
            } => Self {
                success: true,
                matched: Some(MatchDetails {
                    article_id,
                    article_title,
                    confidence_score: confidence,
                    match_score: score,
                }),
                message: None,
            },
            MatchOutcome::NoMatch { best_score } => Self::rejected(match best_score {
                Some(score) => format!("no article scored above the match threshold (best {score})"),
                None => "no published articles to match against".to_string(),
            }),
        }
    }
}
