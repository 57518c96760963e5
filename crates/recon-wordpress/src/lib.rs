//! Remote content fetcher: WordPress REST client, fixture source, and the page cursor.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};
use recon_core::{collapse_whitespace, RemoteArticle, RemoteAuthor, ReconError};
use recon_storage::{BasicAuth, FetchError, HttpFetcher};
use scraper::{Html, Node};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "recon-wordpress";

/// The WordPress REST API refuses `per_page` above this.
pub const MAX_PER_PAGE: u32 = 100;

const ISO_SECONDS: &str = "%Y-%m-%dT%H:%M:%S";

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "br", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "tr", "td", "th", "figcaption", "hr", "section", "article", "pre",
];

/// Inclusive lower and exclusive upper bound on the remote `date` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub after: Option<NaiveDateTime>,
    pub before: Option<NaiveDateTime>,
}

impl DateWindow {
    /// Whole-day window: `start` from midnight, `end` through the end of that day.
    pub fn from_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            after: start.and_then(|d| d.and_hms_opt(0, 0, 0)),
            before: end
                .and_then(|d| d.checked_add_days(Days::new(1)))
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
        }
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.after.map_or(true, |after| ts >= after) && self.before.map_or(true, |before| ts < before)
    }
}

/// A post the fetch boundary refused to turn into a [`RemoteArticle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedPost {
    pub external_id: Option<i64>,
    pub reason: String,
    /// Index of the post within its page.
    pub position: usize,
}

/// One decoded page of remote posts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePage {
    pub articles: Vec<RemoteArticle>,
    pub rejected: Vec<RejectedPost>,
    /// Number of items the remote returned, accepted or not.
    pub raw_count: usize,
    pub total_pages: Option<u32>,
}

impl RemotePage {
    /// Keep only the first `keep` raw items, accepted or rejected, in page order.
    pub fn truncate_raw(&mut self, keep: usize) {
        if keep >= self.raw_count {
            return;
        }
        self.rejected.retain(|rejected| rejected.position < keep);
        self.articles.truncate(keep - self.rejected.len());
        self.raw_count = keep;
    }
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_page(
        &self,
        page: u32,
        per_page: u32,
        window: &DateWindow,
    ) -> Result<RemotePage, FetchError>;
}

#[derive(Debug, Deserialize, Default)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct WpPost {
    id: i64,
    #[serde(default)]
    title: Rendered,
    #[serde(default)]
    content: Rendered,
    #[serde(default)]
    excerpt: Rendered,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    author: Option<i64>,
    #[serde(default)]
    categories: Vec<i64>,
    #[serde(default)]
    tags: Vec<i64>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default, rename = "_embedded")]
    embedded: Option<WpEmbedded>,
}

#[derive(Debug, Deserialize)]
struct WpEmbedded {
    // Error objects show up here for deleted users, so keep entries untyped.
    #[serde(default)]
    author: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct WpAuthor {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Plain text from rendered HTML: tags dropped, entities decoded, whitespace collapsed.
pub fn to_plain_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Text(text) => {
                let in_script = node
                    .parent()
                    .and_then(|p| p.value().as_element())
                    .is_some_and(|e| matches!(e.name(), "script" | "style"));
                if !in_script {
                    out.push_str(text);
                }
            }
            Node::Element(element) if BLOCK_ELEMENTS.contains(&element.name()) => out.push(' '),
            _ => {}
        }
    }
    collapse_whitespace(&out)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_remote_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, ISO_SECONDS)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

fn embedded_author(post: &WpPost) -> Option<RemoteAuthor> {
    let raw = post.embedded.as_ref()?.author.first()?;
    let author: WpAuthor = serde_json::from_value(raw.clone()).ok()?;
    let name = non_empty(author.name)?;
    let external_id = author
        .id
        .or(post.author)
        .filter(|id| *id > 0)?;
    Some(RemoteAuthor {
        external_id,
        name,
        slug: non_empty(author.slug),
        email: non_empty(author.email),
        bio: non_empty(author.description),
    })
}

/// Decode one raw post. Anything that is not a post object with an integer id is rejected.
pub fn decode_post(value: JsonValue) -> Result<RemoteArticle, RejectedPost> {
    let external_id = value.get("id").and_then(JsonValue::as_i64);
    let post: WpPost = serde_json::from_value(value).map_err(|e| RejectedPost {
        external_id,
        reason: format!("malformed post payload: {e}"),
        position: 0,
    })?;

    let published_at = match post.date.as_deref() {
        Some(raw) => {
            let parsed = parse_remote_timestamp(raw);
            if parsed.is_none() {
                warn!(post_id = post.id, date = raw, "unparseable post date, dropping it");
            }
            parsed
        }
        None => None,
    };

    let author = embedded_author(&post);
    Ok(RemoteArticle {
        external_id: post.id,
        title: to_plain_text(&post.title.rendered),
        body_html: post.content.rendered,
        excerpt_html: post.excerpt.rendered,
        published_at,
        status: post.status.unwrap_or_default(),
        author_id: post.author.filter(|id| *id > 0),
        author,
        category_ids: post.categories,
        tag_ids: post.tags,
        link: non_empty(post.link),
    })
}

pub fn decode_page(items: Vec<JsonValue>) -> RemotePage {
    let raw_count = items.len();
    let mut page = RemotePage {
        raw_count,
        ..Default::default()
    };
    for (position, item) in items.into_iter().enumerate() {
        match decode_post(item) {
            Ok(article) => page.articles.push(article),
            Err(rejected) => {
                warn!(post_id = ?rejected.external_id, reason = %rejected.reason, "rejected remote post");
                page.rejected.push(RejectedPost { position, ..rejected });
            }
        }
    }
    page
}

#[derive(Debug, Clone)]
pub struct WordPressConfig {
    /// e.g. `https://news.example.com/wp-json/wp/v2`
    pub base_url: String,
    pub credentials: Option<BasicAuth>,
    pub per_page: u32,
}

impl WordPressConfig {
    pub fn posts_url(&self) -> String {
        format!("{}/posts", self.base_url.trim_end_matches('/'))
    }

    pub fn effective_per_page(&self) -> u32 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }
}

/// Paginated client for `GET {base}/posts`.
#[derive(Debug, Clone)]
pub struct WordPressClient {
    config: WordPressConfig,
    http: HttpFetcher,
}

impl WordPressClient {
    pub fn new(config: WordPressConfig, http: HttpFetcher) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &WordPressConfig {
        &self.config
    }
}

#[async_trait]
impl ContentSource for WordPressClient {
    fn source_id(&self) -> &str {
        "wordpress"
    }

    async fn fetch_page(
        &self,
        page: u32,
        per_page: u32,
        window: &DateWindow,
    ) -> Result<RemotePage, FetchError> {
        let url = self.config.posts_url();
        let mut query = vec![
            ("page", page.to_string()),
            ("per_page", per_page.clamp(1, MAX_PER_PAGE).to_string()),
            ("_embed", "author".to_string()),
            ("orderby", "id".to_string()),
            ("order", "asc".to_string()),
        ];
        if let Some(after) = window.after {
            query.push(("after", after.format(ISO_SECONDS).to_string()));
        }
        if let Some(before) = window.before {
            query.push(("before", before.format(ISO_SECONDS).to_string()));
        }

        let response = self
            .http
            .get(&url, &query, self.config.credentials.as_ref())
            .await?;
        let body: JsonValue =
            serde_json::from_slice(&response.body).map_err(|e| FetchError::Decode {
                url: response.final_url.clone(),
                message: e.to_string(),
            })?;
        let JsonValue::Array(items) = body else {
            return Err(FetchError::Decode {
                url: response.final_url,
                message: "expected a JSON array of posts".to_string(),
            });
        };

        let mut decoded = decode_page(items);
        decoded.total_pages = response.header_u32("x-wp-totalpages");
        debug!(
            page,
            accepted = decoded.articles.len(),
            rejected = decoded.rejected.len(),
            total_pages = ?decoded.total_pages,
            "decoded posts page"
        );
        Ok(decoded)
    }
}

/// Serves WordPress-shaped post JSON from memory, paginated like the real API.
#[derive(Debug, Default)]
pub struct FixtureSource {
    posts: Vec<JsonValue>,
    failures: BTreeMap<u32, u16>,
    advertise_total_pages: bool,
    requests: AtomicUsize,
}

impl FixtureSource {
    pub fn new(posts: Vec<JsonValue>) -> Self {
        Self {
            posts,
            ..Default::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_fixture_posts(path)?))
    }

    /// Make `page` answer with HTTP `status`.
    pub fn with_failure(mut self, page: u32, status: u16) -> Self {
        self.failures.insert(page, status);
        self
    }

    pub fn with_total_pages_header(mut self) -> Self {
        self.advertise_total_pages = true;
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn in_window(post: &JsonValue, window: &DateWindow) -> bool {
        match post
            .get("date")
            .and_then(JsonValue::as_str)
            .and_then(parse_remote_timestamp)
        {
            Some(ts) => window.contains(ts),
            None => window.after.is_none() && window.before.is_none(),
        }
    }
}

#[async_trait]
impl ContentSource for FixtureSource {
    fn source_id(&self) -> &str {
        "fixture"
    }

    async fn fetch_page(
        &self,
        page: u32,
        per_page: u32,
        window: &DateWindow,
    ) -> Result<RemotePage, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.failures.get(&page) {
            return Err(FetchError::HttpStatus {
                status: *status,
                url: format!("fixture://posts?page={page}"),
            });
        }

        let per_page = per_page.clamp(1, MAX_PER_PAGE) as usize;
        let visible = self
            .posts
            .iter()
            .filter(|p| Self::in_window(p, window))
            .cloned()
            .collect::<Vec<_>>();
        let start = (page.max(1) as usize - 1) * per_page;
        let items = visible
            .iter()
            .skip(start)
            .take(per_page)
            .cloned()
            .collect::<Vec<_>>();

        let mut decoded = decode_page(items);
        if self.advertise_total_pages {
            decoded.total_pages = Some(visible.len().div_ceil(per_page).max(1) as u32);
        }
        Ok(decoded)
    }
}

pub fn load_fixture_posts(path: impl AsRef<Path>) -> Result<Vec<JsonValue>> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub per_page: u32,
    pub max_items: usize,
    pub window: DateWindow,
}

/// Lazy cursor over remote pages. Ends on `max_items`, a short or empty page,
/// the advertised last page, or a failed page after the first.
pub struct PostPager<'a> {
    source: &'a dyn ContentSource,
    query: PageQuery,
    per_page: u32,
    next_page: u32,
    yielded: usize,
    finished: bool,
}

impl<'a> PostPager<'a> {
    pub fn new(source: &'a dyn ContentSource, query: PageQuery) -> Self {
        // Page size is fixed for the whole cursor so page offsets stay aligned.
        let per_page = query
            .per_page
            .clamp(1, MAX_PER_PAGE)
            .min(query.max_items.clamp(1, MAX_PER_PAGE as usize) as u32);
        Self {
            source,
            query,
            per_page,
            next_page: 1,
            yielded: 0,
            finished: false,
        }
    }

    /// Rewind to page one so the same sequence can be walked again.
    pub fn reset(&mut self) {
        self.next_page = 1;
        self.yielded = 0;
        self.finished = false;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn yielded(&self) -> usize {
        self.yielded
    }

    pub async fn next_batch(&mut self) -> Result<Option<RemotePage>, ReconError> {
        if self.finished || self.yielded >= self.query.max_items {
            self.finished = true;
            return Ok(None);
        }

        let page = self.next_page;
        let mut fetched = match self
            .source
            .fetch_page(page, self.per_page, &self.query.window)
            .await
        {
            Ok(fetched) => fetched,
            Err(err) if page == 1 => {
                self.finished = true;
                return Err(ReconError::RemoteUnavailable(err.to_string()));
            }
            Err(err) => {
                warn!(page, error = %err, "page fetch failed; treating as end of stream");
                self.finished = true;
                return Ok(None);
            }
        };

        self.next_page += 1;
        if fetched.raw_count < self.per_page as usize {
            self.finished = true;
        }
        if fetched.total_pages.is_some_and(|total| page >= total) {
            self.finished = true;
        }
        if fetched.raw_count == 0 {
            return Ok(None);
        }

        // Rejected posts use up the budget too.
        fetched.truncate_raw(self.query.max_items - self.yielded);
        self.yielded += fetched.raw_count;
        if self.yielded >= self.query.max_items {
            self.finished = true;
        }
        Ok(Some(fetched))
    }
}

/// Everything a pager produced, accumulated client-side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedBatch {
    pub articles: Vec<RemoteArticle>,
    pub rejected: Vec<RejectedPost>,
    pub pages: u32,
}

/// Drain a pager into memory. Only a first-page failure is an error.
pub async fn fetch_all(source: &dyn ContentSource, query: PageQuery) -> Result<FetchedBatch, ReconError> {
    let mut batch = FetchedBatch::default();
    if query.max_items == 0 {
        return Ok(batch);
    }
    let mut pager = PostPager::new(source, query);
    while let Some(page) = pager.next_batch().await? {
        batch.pages += 1;
        batch.articles.extend(page.articles);
        batch.rejected.extend(page.rejected);
    }
    info!(
        source = source.source_id(),
        pages = batch.pages,
        articles = batch.articles.len(),
        rejected = batch.rejected.len(),
        "remote fetch finished"
    );
    Ok(batch)
}
