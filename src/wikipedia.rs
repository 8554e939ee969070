//! [`Upstream`] implementation backed by Wikipedia: the MediaWiki action
//! API for batches of ids, the REST API for single titles.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwap;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::form_urlencoded;

use crate::{
    error::UpstreamError,
    page::{PageId, WikiPage},
    upstream::{PageMap, TitleLookup, Upstream},
};

/// The site queries are sent to; `{lang}` is replaced by the handler
/// namespace.
pub const DEFAULT_SITE: &str = "https://{lang}.wikipedia.org";

const ACTION_PATH: &str = "/w/api.php";
const SUMMARY_PATH: &str = "/api/rest_v1/page/summary/";

/// `type` of a REST page summary for a page that doesn't exist.
pub const SUMMARY_NOT_FOUND: &str = "https://mediawiki.org/wiki/HyperSwitch/errors/not_found";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wikimedia asks API clients to identify themselves.
const USER_AGENT: &str = concat!(
    "wikipage/",
    env!("CARGO_PKG_VERSION"),
    " (batched page metadata client)"
);

/// A fully built query URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WikipediaQuery(String);

impl WikipediaQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WikipediaQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fetches page titles and plain-text introductions, up to the API's limit
/// of 20 extracts per query.
pub struct WikipediaUpstream {
    site: String,
    timeout: Duration,
    // Swapped for a fresh client to drop the connection pool
    client: ArcSwap<reqwest::Client>,
}

impl fmt::Debug for WikipediaUpstream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WikipediaUpstream")
            .field("site", &self.site)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WikipediaUpstream {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_site(DEFAULT_SITE, DEFAULT_TIMEOUT)
    }

    /// Use a different site, for instance a mirror or a local test server.
    /// Any `{lang}` in `site` is replaced by the namespace.
    pub fn with_site(site: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = build_client(timeout)?;

        Ok(Self {
            site: site.into(),
            timeout,
            client: ArcSwap::from_pointee(client),
        })
    }

    fn url(&self, lang: &str, path: &str) -> String {
        let mut url = self.site.replace("{lang}", lang);
        url.push_str(path);
        url
    }

    /// Send `query` and return the response body. Statuses other than
    /// success and those in `accepted` are failures.
    async fn fetch(
        &self,
        query: &WikipediaQuery,
        accepted: &[StatusCode],
    ) -> Result<Vec<u8>, UpstreamError> {
        let client = self.client.load_full();

        let response = client
            .get(query.as_str())
            .send()
            .await
            .map_err(|err| UpstreamError::transport(query.as_str(), err))?;

        let status = response.status();
        if !status.is_success() && !accepted.contains(&status) {
            return Err(UpstreamError::Status {
                query: query.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| UpstreamError::transport(query.as_str(), err))?;

        Ok(body.to_vec())
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

impl Upstream for WikipediaUpstream {
    type Query = WikipediaQuery;

    fn build_query(&self, lang: &str, ids: &[PageId]) -> WikipediaQuery {
        let ids: Vec<String> = ids.iter().map(PageId::to_string).collect();

        let params = form_urlencoded::Serializer::new(String::new())
            .append_pair("action", "query")
            .append_pair("prop", "extracts")
            .append_pair("exintro", "1")
            .append_pair("explaintext", "1")
            .append_pair("exlimit", "max")
            .append_pair("format", "json")
            .append_pair("formatversion", "2")
            .append_pair("pageids", &ids.join("|"))
            .finish();

        WikipediaQuery(format!("{}?{}", self.url(lang, ACTION_PATH), params))
    }

    async fn execute(&self, query: &WikipediaQuery) -> Result<PageMap, UpstreamError> {
        let body = self.fetch(query, &[]).await?;

        decode_query(&body).map_err(|err| UpstreamError::decode(query.as_str(), err))
    }

    fn reset_connections(&self) {
        match build_client(self.timeout) {
            Ok(client) => self.client.store(Arc::new(client)),
            Err(err) => warn!(error = %err, "could not rebuild HTTP client; keeping the old one"),
        }
    }
}

impl TitleLookup for WikipediaUpstream {
    /// The REST summary of `title`, following redirects. Titles use
    /// underscores for spaces.
    fn build_title_query(&self, lang: &str, title: &str) -> WikipediaQuery {
        let title = title.replace(' ', "_");
        let title: String = form_urlencoded::byte_serialize(title.as_bytes()).collect();

        WikipediaQuery(format!("{}{}?redirect=true", self.url(lang, SUMMARY_PATH), title))
    }

    async fn execute_title(
        &self,
        query: &WikipediaQuery,
    ) -> Result<Option<WikiPage>, UpstreamError> {
        // A missing title is a 404 carrying the not-found summary
        let body = self.fetch(query, &[StatusCode::NOT_FOUND]).await?;

        decode_summary(&body).map_err(|err| UpstreamError::decode(query.as_str(), err))
    }
}

/// A response that parsed, but isn't a list of pages.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("API error {code}: {info}")]
    Api { code: String, info: String },
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    query: Option<QueryBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiError {
    code: String,
    info: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryBody {
    pages: Vec<RawPage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPage {
    pageid: PageId,
    title: String,
    extract: String,
    missing: bool,
    invalid: bool,
}

impl RawPage {
    fn into_page(self) -> Option<WikiPage> {
        // Each of these means "no such page" on its own; the API doesn't
        // always set more than one of them
        if self.missing || self.invalid || self.pageid == 0 {
            return None;
        }

        Some(WikiPage::new(self.pageid, self.title, self.extract))
    }
}

/// Decode an action API response (`formatversion=2`). Pages flagged as
/// missing or invalid, or decoded with a zero id, are left out of the map.
pub fn decode_query(body: &[u8]) -> Result<PageMap, DecodeError> {
    let response: QueryResponse = serde_json::from_slice(body)?;

    if let Some(ApiError { code, info }) = response.error {
        return Err(DecodeError::Api { code, info });
    }

    Ok(response
        .query
        .unwrap_or_default()
        .pages
        .into_iter()
        .filter_map(RawPage::into_page)
        .map(|page| (page.id, page))
        .collect())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Summary {
    #[serde(rename = "type")]
    kind: String,
    pageid: PageId,
    title: String,
    extract: String,
}

/// Decode a REST API page summary. Returns `None` for the not-found
/// summary, or for a summary that decodes with a zero page id.
pub fn decode_summary(body: &[u8]) -> Result<Option<WikiPage>, DecodeError> {
    let summary: Summary = serde_json::from_slice(body)?;

    if summary.kind == SUMMARY_NOT_FOUND || summary.pageid == 0 {
        return Ok(None);
    }

    Ok(Some(WikiPage::new(summary.pageid, summary.title, summary.extract)))
}
