//! JSON HTTP surface for sync and match invocations.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use recon_core::ReconError;
use recon_sync::{EngineError, MatchInvocation, ReconEngine, SyncInvocation};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "recon-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconEngine>,
}

impl AppState {
    pub fn new(engine: Arc<ReconEngine>) -> Self {
        Self { engine }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/sync", post(sync_handler))
        .route("/api/match", post(match_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(port: u16, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "recon web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "message": self.message })),
        )
            .into_response()
    }
}

impl From<ReconError> for ApiError {
    fn from(err: ReconError) -> Self {
        let status = match &err {
            ReconError::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
            ReconError::NotFound { .. } => StatusCode::NOT_FOUND,
            ReconError::PreconditionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ReconError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Busy => Self {
                status: StatusCode::CONFLICT,
                message: err.to_string(),
            },
            EngineError::TimedOut(_) => {
                warn!(error = %err, "sync run timed out");
                Self {
                    status: StatusCode::GATEWAY_TIMEOUT,
                    message: err.to_string(),
                }
            }
            EngineError::Recon(inner) => inner.into(),
        }
    }
}

async fn healthz_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Json(invocation): Json<SyncInvocation>,
) -> Result<Response, ApiError> {
    let response = state.engine.sync(&invocation).await?;
    Ok(Json(response).into_response())
}

async fn match_handler(
    State(state): State<Arc<AppState>>,
    Json(invocation): Json<MatchInvocation>,
) -> Result<Response, ApiError> {
    let response = state.engine.match_candidate(&invocation).await?;
    Ok(Json(response).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::{NaiveDate, TimeZone, Utc};
    use http_body_util::BodyExt;
    use recon_core::{ArticleStatus, NewLocalArticle, NewsCandidate};
    use recon_storage::{Catalog, FetchError, MemoryCatalog};
    use recon_sync::MatchWeights;
    use recon_wordpress::{ContentSource, DateWindow, FixtureSource, RemotePage};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn fixture_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/wordpress/posts.json")
    }

    fn state_with(catalog: Arc<MemoryCatalog>, source: Arc<dyn ContentSource>) -> AppState {
        AppState::new(Arc::new(ReconEngine::new(
            catalog,
            source,
            MatchWeights::default(),
            10,
        )))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let source = Arc::new(FixtureSource::new(vec![]));
        let app = app(state_with(Arc::new(MemoryCatalog::new()), source));
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sync_endpoint_reports_counts() {
        let source = Arc::new(FixtureSource::from_file(fixture_path()).unwrap());
        let app = app(state_with(Arc::new(MemoryCatalog::new()), source));

        let first = app
            .clone()
            .oneshot(post_json("/api/sync", json!({ "maxArticles": 50 })))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let body = json_body(first).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["totalArticles"], 5);
        assert_eq!(body["results"]["synced"], 4);
        assert_eq!(body["results"]["updated"], 0);
        assert_eq!(body["results"]["errors"].as_array().unwrap().len(), 1);

        let second = json_body(
            app.oneshot(post_json("/api/sync", json!({ "maxArticles": 50 })))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(second["results"]["synced"], 0);
        assert_eq!(second["results"]["duplicates"], 4);
    }

    #[tokio::test]
    async fn remote_outage_on_first_page_is_bad_gateway() {
        let source = Arc::new(FixtureSource::new(vec![]).with_failure(1, 503));
        let app = app(state_with(Arc::new(MemoryCatalog::new()), source));
        let resp = app
            .oneshot(post_json("/api/sync", json!({ "maxArticles": 10 })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].is_string());
    }

    /// Parks every page fetch until released, signalling when the first one starts.
    struct GatedSource {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ContentSource for GatedSource {
        fn source_id(&self) -> &str {
            "gated"
        }

        async fn fetch_page(
            &self,
            _page: u32,
            _per_page: u32,
            _window: &DateWindow,
        ) -> Result<RemotePage, FetchError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(RemotePage::default())
        }
    }

    #[tokio::test]
    async fn overlapping_sync_requests_get_conflict() {
        let source = Arc::new(GatedSource {
            started: Notify::new(),
            release: Notify::new(),
        });
        let app = app(state_with(Arc::new(MemoryCatalog::new()), source.clone()));

        let running = tokio::spawn(
            app.clone()
                .oneshot(post_json("/api/sync", json!({ "maxArticles": 10 }))),
        );
        source.started.notified().await;

        let refused = app
            .oneshot(post_json("/api/sync", json!({ "maxArticles": 10 })))
            .await
            .unwrap();
        assert_eq!(refused.status(), StatusCode::CONFLICT);

        source.release.notify_one();
        let finished = running.await.unwrap().unwrap();
        assert_eq!(finished.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stalled_run_times_out() {
        let source = Arc::new(GatedSource {
            started: Notify::new(),
            release: Notify::new(),
        });
        let engine = ReconEngine::new(
            Arc::new(MemoryCatalog::new()),
            source,
            MatchWeights::default(),
            10,
        )
        .with_run_timeout(Duration::from_millis(50));
        let resp = app(AppState::new(Arc::new(engine)))
            .oneshot(post_json("/api/sync", json!({ "maxArticles": 10 })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn match_endpoint_links_candidate() {
        let catalog = Arc::new(MemoryCatalog::new());
        let article_id = catalog
            .insert_article(NewLocalArticle {
                external_id: Some(43),
                title: "Mortgage Rates Fall Sharply After Fed's Signal".into(),
                body: None,
                excerpt: Some("Thirty-year mortgage rates dropped to their lowest level.".into()),
                status: ArticleStatus::Published,
                publish_date: NaiveDate::from_ymd_opt(2026, 3, 3),
                author_id: None,
                source_system: "wordpress".into(),
                source_url: None,
                category_ids: vec![],
                tag_ids: vec![],
                topic_tags: vec!["housing".into()],
                last_synced_at: None,
            })
            .await
            .unwrap();
        let candidate = NewsCandidate {
            id: Uuid::new_v4(),
            headline: "Mortgage Rates Fall Sharply".into(),
            summary: None,
            topic_tags: vec!["housing".into()],
            discovered_at: Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).single().unwrap(),
            published_at: None,
            is_published: true,
            matched_article_id: None,
            match_confidence: None,
        };
        catalog.add_candidate(candidate.clone()).await;

        let app = app(state_with(catalog.clone(), Arc::new(FixtureSource::new(vec![]))));
        let resp = app
            .oneshot(post_json(
                "/api/match",
                json!({ "candidateId": candidate.id.to_string() }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["match"]["articleId"], article_id.to_string());
        // mortgage, rates, fall, sharply = 40; cluster 20; same day 10
        assert_eq!(body["match"]["matchScore"], 70);
        assert_eq!(body["match"]["confidenceScore"], 0.7);

        let stored = catalog.get_candidate(candidate.id).await.unwrap().unwrap();
        assert_eq!(stored.matched_article_id, Some(article_id));
    }

    #[tokio::test]
    async fn match_endpoint_unknown_candidate_is_404() {
        let app = app(state_with(
            Arc::new(MemoryCatalog::new()),
            Arc::new(FixtureSource::new(vec![])),
        ));
        let resp = app
            .oneshot(post_json(
                "/api/match",
                json!({ "candidateId": Uuid::new_v4().to_string() }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
        assert!(body.get("error").is_none());
    }
}
