//! Search augmentation: Brave Search API plus readable-text extraction.
//!
//! Hits are turned into assistant-role instruction turns that are appended
//! to the history before dispatch, so the model answers with fresh context.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use chatcord_core::config::SearchConfig;

/// User-Agent header.
const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7_2) AppleWebKit/537.36 (KHTML, like Gecko)";

const BRAVE_API_BASE: &str = "https://api.search.brave.com/res/v1";

/// Paragraphs shorter than this are navigation noise.
const MIN_PARAGRAPH_CHARS: usize = 30;
const MAX_PARAGRAPHS: usize = 5;
const MAX_PAGE_CHARS: usize = 2000;

/// Pages larger than this are not parsed.
const MAX_PAGE_BYTES: usize = 500 * 1024;

// ─────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────

/// What kind of results to look for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchKind {
    Web,
    Images,
    Videos,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Web => "search",
            SearchKind::Images => "images",
            SearchKind::Videos => "videos",
        }
    }

    fn endpoint(&self) -> &'static str {
        match self {
            SearchKind::Web => "web/search",
            SearchKind::Images => "images/search",
            SearchKind::Videos => "videos/search",
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "search" | "web" => Ok(SearchKind::Web),
            "images" | "image" => Ok(SearchKind::Images),
            "videos" | "video" => Ok(SearchKind::Videos),
            other => Err(format!("unknown search kind '{other}' (expected web, images or videos)")),
        }
    }
}

/// One search result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    /// Page, image or video URL.
    pub url: String,
    /// Description returned by the search API.
    pub snippet: String,
    /// Extracted page text (web hits only, when page fetching is on).
    pub page_text: Option<String>,
}

/// External search capability.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, kind: SearchKind) -> anyhow::Result<Vec<SearchHit>>;
}

// ─────────────────────────────────────────────
// Instruction turns
// ─────────────────────────────────────────────

/// Render hits as instruction turns; no hits ⇒ a single "no results" turn.
pub fn search_turns(query: &str, kind: SearchKind, hits: &[SearchHit]) -> Vec<String> {
    let turns: Vec<String> = hits
        .iter()
        .filter(|hit| !hit.url.is_empty())
        .map(|hit| match kind {
            SearchKind::Web => {
                let text = hit.page_text.as_deref().unwrap_or(&hit.snippet);
                format!(
                    "Use this web search result to answer the user.\n\
                     Link: {}\nTitle: {}\nContent:\n{}",
                    hit.url, hit.title, text
                )
            }
            SearchKind::Images => format!(
                "Show the user this image found by search and describe what it is.\n\
                 Title: {}\nImage: {}",
                hit.title, hit.url
            ),
            SearchKind::Videos => format!(
                "Recommend this video found by search to the user.\n\
                 Title: {}\nVideo: {}\nDescription: {}",
                hit.title, hit.url, hit.snippet
            ),
        })
        .collect();

    if turns.is_empty() {
        vec![format!("Nothing was found for \"{query}\" ({kind}). Tell the user the search returned no results.")]
    } else {
        turns
    }
}

// ─────────────────────────────────────────────
// BraveSearch
// ─────────────────────────────────────────────

/// [`SearchProvider`] backed by the Brave Search API.
pub struct BraveSearch {
    api_key: String,
    base_url: String,
    max_results: usize,
    fetch_pages: bool,
    page_timeout: Duration,
    client: Client,
    html: HtmlText,
}

impl BraveSearch {
    /// Fails when no API key is configured.
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        if config.brave_api_key.trim().is_empty() {
            anyhow::bail!("No Brave API key configured (set search.braveApiKey or BRAVE_API_KEY)");
        }
        Ok(Self {
            api_key: config.brave_api_key.clone(),
            base_url: BRAVE_API_BASE.to_string(),
            max_results: config.max_results.clamp(1, 20),
            fetch_pages: config.fetch_pages,
            page_timeout: Duration::from_secs(config.page_timeout_secs.max(1)),
            client: Client::builder()
                .user_agent(USER_AGENT)
                .redirect(reqwest::redirect::Policy::limited(5))
                .build()
                .unwrap_or_default(),
            html: HtmlText::new()?,
        })
    }

    /// Point at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn query_api(&self, query: &str, kind: SearchKind) -> anyhow::Result<Value> {
        let url = format!("{}/{}", self.base_url, kind.endpoint());
        debug!(query = %query, kind = %kind, "searching");

        let resp = self
            .client
            .get(&url)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &self.max_results.to_string())])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Brave API request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Brave API returned {status}: {body}");
        }

        resp.json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse Brave response: {e}"))
    }

    /// Fetch a page and keep its first readable paragraphs. `None` on any failure.
    async fn fetch_page_text(&self, url: &str) -> Option<String> {
        let resp = match self.client.get(url).timeout(self.page_timeout).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(url = %url, status = %resp.status(), "page fetch rejected");
                return None;
            }
            Err(e) => {
                debug!(url = %url, error = %e, "page fetch failed");
                return None;
            }
        };

        let bytes = resp.bytes().await.ok()?;
        if bytes.len() > MAX_PAGE_BYTES {
            debug!(url = %url, size = bytes.len(), "page too large, skipping");
            return None;
        }
        let html = String::from_utf8_lossy(&bytes);
        let text = self.html.extract_paragraphs(&html, MAX_PARAGRAPHS, MAX_PAGE_CHARS);
        (!text.is_empty()).then_some(text)
    }
}

#[async_trait]
impl SearchProvider for BraveSearch {
    async fn search(&self, query: &str, kind: SearchKind) -> anyhow::Result<Vec<SearchHit>> {
        let body = self.query_api(query, kind).await?;
        let mut hits = self.parse_hits(&body, kind);
        hits.truncate(self.max_results);

        if kind == SearchKind::Web && self.fetch_pages {
            for hit in &mut hits {
                hit.page_text = self.fetch_page_text(&hit.url).await;
            }
        }

        if hits.is_empty() {
            warn!(query = %query, kind = %kind, "search returned no results");
        }
        Ok(hits)
    }
}

impl BraveSearch {
    /// Pull hits out of a Brave response body.
    fn parse_hits(&self, body: &Value, kind: SearchKind) -> Vec<SearchHit> {
        let results = match kind {
            SearchKind::Web => &body["web"]["results"],
            SearchKind::Images | SearchKind::Videos => &body["results"],
        };
        let Some(results) = results.as_array() else {
            return Vec::new();
        };

        results
            .iter()
            .map(|r| {
                let text = |v: &Value| v.as_str().unwrap_or_default().to_string();
                let url = match kind {
                    // Images carry the full-size URL under properties
                    SearchKind::Images => r["properties"]["url"]
                        .as_str()
                        .map(String::from)
                        .unwrap_or_else(|| text(&r["url"])),
                    _ => text(&r["url"]),
                };
                SearchHit {
                    title: self.html.strip_tags(&text(&r["title"])),
                    url,
                    snippet: self.html.strip_tags(&text(&r["description"])),
                    page_text: None,
                }
            })
            .collect()
    }
}

// ─────────────────────────────────────────────
// HTML helpers
// ─────────────────────────────────────────────

/// Compiled patterns for turning HTML into plain text (built once per client).
struct HtmlText {
    script_or_style: Regex,
    paragraph: Regex,
    tag: Regex,
    whitespace: Regex,
}

impl HtmlText {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            script_or_style: Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>")?,
            paragraph: Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>")?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Remove tags, decode common entities, collapse whitespace.
    fn strip_tags(&self, fragment: &str) -> String {
        let text = self.tag.replace_all(fragment, " ");
        let text = text
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&");
        self.whitespace.replace_all(&text, " ").trim().to_string()
    }

    /// Up to `max_paragraphs` `<p>` blocks longer than 30 chars, stopping once
    /// `max_chars` has been exceeded. Joined with newlines.
    fn extract_paragraphs(&self, html: &str, max_paragraphs: usize, max_chars: usize) -> String {
        let html = self.script_or_style.replace_all(html, "");
        let mut kept = Vec::new();
        let mut total = 0;

        for cap in self.paragraph.captures_iter(&html) {
            if total > max_chars || kept.len() >= max_paragraphs {
                break;
            }
            let text = self.strip_tags(&cap[1]);
            let len = text.chars().count();
            if len > MIN_PARAGRAPH_CHARS {
                total += len;
                kept.push(text);
            }
        }
        kept.join("\n")
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
