//! Web search tool backed by the DuckDuckGo HTML endpoint.
//!
//! One GET with a browser User-Agent, then regex extraction of result
//! anchors. No API key involved. The redirector wrapping DuckDuckGo puts
//! around result URLs is decoded back to the real target.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::security::net::resolve_and_check;
use crate::security::{Permission, RiskLevel, SecurityPolicy};
use crate::tools::html::decode_entities;
use crate::tools::traits::{
    ParamType, Parameter, PermissionPolicy, Tool, ToolCtx, ToolOutcome, ToolSpec, opt_u64,
    require_str,
};
use crate::tools::web_fetch::pinned_client;

const SEARCH_HOST: &str = "html.duckduckgo.com";
const BROWSER_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:122.0) Gecko/20100101 Firefox/122.0";
/// Anchors scanned before trimming to the requested count.
const SCAN_LIMIT: usize = 30;

static RESULT_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
        .expect("static regex")
});
static SNIPPET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#).expect("static regex")
});
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static regex"));

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

// ─── Parsing helpers ──────────────────────────────────────────────────────────

/// Unwrap DuckDuckGo's `/l/?uddg=<encoded>` redirector.
pub(crate) fn decode_redirect_url(raw: &str) -> String {
    let unescaped = raw.replace("&amp;", "&");
    if let Some(start) = unescaped.find("uddg=") {
        let encoded = &unescaped[start + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    if unescaped.starts_with("//") {
        return format!("https:{unescaped}");
    }
    unescaped
}

fn clean_fragment(html: &str) -> String {
    let stripped = TAGS.replace_all(html, "");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract hits from the results page, scanning at most [`SCAN_LIMIT`]
/// anchors.
pub(crate) fn parse_results(html: &str) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    for block in html.split("class=\"result__body\"").skip(1) {
        if hits.len() >= SCAN_LIMIT {
            break;
        }
        let Some(caps) = RESULT_ANCHOR.captures(block) else {
            continue;
        };
        let url = decode_redirect_url(&caps[1]);
        let title = clean_fragment(&caps[2]);
        let snippet = SNIPPET
            .captures(block)
            .map(|s| clean_fragment(&s[1]))
            .unwrap_or_default();

        if !title.is_empty() && !url.is_empty() {
            hits.push(SearchHit { title, url, snippet });
        }
    }
    hits
}

// ─── WebSearchTool ────────────────────────────────────────────────────────────

pub struct WebSearchTool {
    policy: Arc<SecurityPolicy>,
}

impl WebSearchTool {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }

    fn search_url(query: &str) -> String {
        format!(
            "https://{SEARCH_HOST}/html/?q={}",
            urlencoding::encode(query)
        )
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_search".into(),
            description: "Search the web and return title/URL/snippet triples. Uses the \
                          DuckDuckGo HTML endpoint; no API key required."
                .into(),
            short_description: "Search the web; returns titles, URLs, and snippets.".into(),
            parameters: vec![
                Parameter::required("query", ParamType::String, "Search query."),
                Parameter::optional("max_results", ParamType::Integer, "Results to return (1-10).")
                    .with_default(json!(5)),
            ],
            risk_level: RiskLevel::Medium,
            permission: PermissionPolicy::Static(Permission::Auto),
        }
    }

    async fn execute(&self, ctx: &ToolCtx, args: &Value) -> ToolOutcome {
        let started = std::time::Instant::now();
        if ctx.cancel.is_cancelled() {
            return ToolOutcome::cancelled();
        }

        let query = match require_str(args, "query") {
            Ok(q) => q.to_string(),
            Err(e) => return ToolOutcome::fail(e),
        };
        let max_results = opt_u64(args, "max_results").unwrap_or(5).clamp(1, 10) as usize;

        self.policy.log_action(
            self.name(),
            json!({"query": query, "max_results": max_results}),
            RiskLevel::Medium,
            "allowed",
            None,
        );

        let html = tokio::select! {
            result = run_search(&query, ctx.limits.search_timeout) => result,
            _ = ctx.cancel.cancelled() => {
                return ToolOutcome::cancelled().with_duration(started.elapsed());
            }
        };
        let html = match html {
            Ok(h) => h,
            Err(e) => return ToolOutcome::fail(e).with_duration(started.elapsed()),
        };

        let mut hits = parse_results(&html);
        hits.truncate(max_results);

        if hits.is_empty() {
            let mut outcome =
                ToolOutcome::ok(format!("no results for '{query}'")).with_duration(started.elapsed());
            outcome.match_count = 0;
            return outcome;
        }

        let mut output = format!("Search results for '{query}':\n\n");
        for (i, hit) in hits.iter().enumerate() {
            output.push_str(&format!(
                "{}. {}\n   {}\n   {}\n\n",
                i + 1,
                hit.title,
                hit.url,
                hit.snippet
            ));
        }

        let mut outcome = ToolOutcome::ok(output.trim_end().to_string())
            .with_duration(started.elapsed());
        outcome.match_count = hits.len() as u64;
        outcome.metadata = Some(json!({ "query": query, "results": hits }));
        outcome
    }
}

async fn run_search(query: &str, timeout: std::time::Duration) -> Result<String, String> {
    let addrs = resolve_and_check(SEARCH_HOST, 443)
        .await
        .map_err(|e| e.to_string())?;
    let client = pinned_client(SEARCH_HOST, &addrs, timeout).map_err(|e| e.to_string())?;

    let response = client
        .get(WebSearchTool::search_url(query))
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .header(reqwest::header::ACCEPT, "text/html")
        .send()
        .await
        .map_err(|e| format!("search request failed: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("search failed with HTTP {}", response.status().as_u16()));
    }
    response
        .text()
        .await
        .map_err(|e| format!("failed to read search response: {e}"))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use tempfile::TempDir;

    fn ctx() -> ToolCtx {
        let dir = TempDir::new().unwrap();
        let policy = Arc::new(SecurityPolicy::rooted_at(vec![dir.path().to_path_buf()]));
        ToolCtx::new(policy, Arc::new(FileCache::default()))
    }

    #[test]
    fn search_url_encodes_query() {
        let url = WebSearchTool::search_url("rust async runtime");
        assert!(url.starts_with("https://html.duckduckgo.com/html/?q="));
        assert!(url.contains("rust%20async%20runtime") || url.contains("rust+async+runtime"));
    }

    #[test]
    fn redirect_url_decodes() {
        let raw = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fdocs&amp;rut=abc";
        assert_eq!(decode_redirect_url(raw), "https://example.com/docs");
    }

    #[test]
    fn direct_url_passes_through() {
        assert_eq!(
            decode_redirect_url("https://example.com/x"),
            "https://example.com/x"
        );
        assert_eq!(
            decode_redirect_url("//cdn.example.com/y"),
            "https://cdn.example.com/y"
        );
    }

    #[test]
    fn parses_result_blocks() {
        let html = r#"
            <div class="result__body">
                <a class="result__a" href="https://first.example">First <b>Title</b></a>
                <a class="result__snippet">Snippet &amp; text</a>
            </div>
            <div class="result__body">
                <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fsecond.example">Second</a>
                <a class="result__snippet">Another</a>
            </div>
        "#;
        let hits = parse_results(html);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "First Title");
        assert_eq!(hits[0].snippet, "Snippet & text");
        assert_eq!(hits[1].url, "https://second.example");
    }

    #[test]
    fn empty_page_yields_no_hits() {
        assert!(parse_results("<html><body>nothing here</body></html>").is_empty());
    }

    #[tokio::test]
    async fn missing_query_fails() {
        let ctx = ctx();
        let tool = WebSearchTool::new(ctx.policy.clone());
        let r = tool.execute(&ctx, &json!({})).await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("query"));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let ctx = ctx();
        ctx.cancel.cancel();
        let tool = WebSearchTool::new(ctx.policy.clone());
        let r = tool.execute(&ctx, &json!({"query": "x"})).await;
        assert_eq!(r.error.as_deref(), Some("operation cancelled"));
    }
}
