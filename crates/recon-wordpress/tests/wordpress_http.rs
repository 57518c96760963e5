use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Query;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use recon_core::ReconError;
use recon_storage::{BackoffPolicy, BasicAuth, HttpClientConfig, HttpFetcher};
use recon_wordpress::{fetch_all, DateWindow, PageQuery, WordPressClient, WordPressConfig};
use serde_json::json;

const TOTAL_POSTS: usize = 5;
// base64("editor:secret")
const EXPECTED_AUTH: &str = "Basic ZWRpdG9yOnNlY3JldA==";

fn all_posts() -> Vec<serde_json::Value> {
    (1..=TOTAL_POSTS)
        .map(|id| {
            json!({
                "id": id,
                "date": format!("2026-03-0{id}T10:00:00"),
                "status": "publish",
                "link": format!("https://news.example.com/?p={id}"),
                "title": { "rendered": format!("Story &amp; angle {id}") },
                "content": { "rendered": "<p>Body</p>" },
                "excerpt": { "rendered": "<p>Excerpt</p>" },
                "author": 3,
                "_embedded": { "author": [{ "id": 3, "name": "Desk Editor", "slug": "desk" }] }
            })
        })
        .collect()
}

fn page_of(params: &HashMap<String, String>) -> Result<(Vec<serde_json::Value>, usize), Response> {
    if params.get("_embed").map(String::as_str) != Some("author") {
        return Err((StatusCode::BAD_REQUEST, "missing _embed").into_response());
    }
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let per_page: usize = params
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(10);

    let visible = all_posts()
        .into_iter()
        .filter(|p| {
            let date = p["date"].as_str().unwrap_or_default();
            params.get("after").map_or(true, |after| date >= after.as_str())
                && params.get("before").map_or(true, |before| date < before.as_str())
        })
        .collect::<Vec<_>>();
    let total_pages = visible.len().div_ceil(per_page).max(1);
    if page > total_pages {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": "rest_post_invalid_page_number" })),
        )
            .into_response());
    }
    let items = visible
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect();
    Ok((items, total_pages))
}

async fn posts(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(EXPECTED_AUTH);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "code": "rest_forbidden" }))).into_response();
    }
    match page_of(&params) {
        Ok((items, total_pages)) => {
            ([("x-wp-totalpages", total_pages.to_string())], Json(items)).into_response()
        }
        Err(resp) => resp,
    }
}

async fn legacy_posts(Query(params): Query<HashMap<String, String>>) -> Response {
    match page_of(&params) {
        Ok((items, _)) => Json(items).into_response(),
        Err(resp) => resp,
    }
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/wp-json/wp/v2/posts", get(posts))
        .route("/legacy/wp-json/wp/v2/posts", get(legacy_posts));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(base_url: String, credentials: Option<BasicAuth>, per_page: u32) -> WordPressClient {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(5),
        user_agent: Some("recon-test/0.1".into()),
        backoff: BackoffPolicy::none(),
    })
    .unwrap();
    WordPressClient::new(
        WordPressConfig {
            base_url,
            credentials,
            per_page,
        },
        http,
    )
}

fn editor() -> Option<BasicAuth> {
    Some(BasicAuth {
        username: "editor".into(),
        password: "secret".into(),
    })
}

#[tokio::test]
async fn walks_every_page_with_basic_auth() {
    let addr = spawn_server().await;
    let wp = client(format!("http://{addr}/wp-json/wp/v2/"), editor(), 2);
    let batch = fetch_all(
        &wp,
        PageQuery {
            per_page: 2,
            max_items: 100,
            window: DateWindow::default(),
        },
    )
    .await
    .unwrap();

    assert_eq!(batch.pages, 3);
    assert_eq!(
        batch.articles.iter().map(|a| a.external_id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert_eq!(batch.articles[0].title, "Story & angle 1");
    assert_eq!(batch.articles[0].author.as_ref().unwrap().name, "Desk Editor");
}

#[tokio::test]
async fn rejected_credentials_fail_the_first_page() {
    let addr = spawn_server().await;
    let wp = client(format!("http://{addr}/wp-json/wp/v2"), None, 2);
    let err = fetch_all(
        &wp,
        PageQuery {
            per_page: 2,
            max_items: 10,
            window: DateWindow::default(),
        },
    )
    .await
    .unwrap_err();
    match err {
        ReconError::RemoteUnavailable(message) => assert!(message.contains("401")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn date_window_is_forwarded_as_after_and_before() {
    let addr = spawn_server().await;
    let wp = client(format!("http://{addr}/wp-json/wp/v2"), editor(), 10);
    let batch = fetch_all(
        &wp,
        PageQuery {
            per_page: 10,
            max_items: 10,
            window: DateWindow::from_dates(
                NaiveDate::from_ymd_opt(2026, 3, 2),
                NaiveDate::from_ymd_opt(2026, 3, 4),
            ),
        },
    )
    .await
    .unwrap();
    assert_eq!(
        batch.articles.iter().map(|a| a.external_id).collect::<Vec<_>>(),
        vec![2, 3, 4]
    );
}

#[tokio::test]
async fn out_of_range_page_ends_the_stream() {
    let addr = spawn_server().await;
    let wp = client(format!("http://{addr}/legacy/wp-json/wp/v2"), None, 5);
    let batch = fetch_all(
        &wp,
        PageQuery {
            per_page: 5,
            max_items: 50,
            window: DateWindow::default(),
        },
    )
    .await
    .unwrap();
    assert_eq!(batch.articles.len(), TOTAL_POSTS);
    assert_eq!(batch.pages, 1);
}
