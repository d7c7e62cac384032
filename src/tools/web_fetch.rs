//! HTTP fetch tool with SSRF-safe dialing.
//!
//! Redirects are followed manually so every hop goes through the same URL
//! validation and address resolution as the first request. The client is
//! pinned to the addresses that were vetted (`resolve_to_addrs`), so a DNS
//! answer that changes between check and connect cannot reach a blocked
//! network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

use crate::error::WebError;
use crate::security::net::{resolve_and_check, validate_url};
use crate::security::{Permission, RiskLevel, SecurityPolicy};
use crate::tools::html::{html_to_markdown, html_to_text};
use crate::tools::traits::{
    ParamType, Parameter, PermissionPolicy, Tool, ToolCtx, ToolOutcome, ToolSpec, opt_str,
    require_str,
};

const USER_AGENT: &str = "ferroclaw/0.1 (+https://github.com/nsrtech/ferroclaw)";

/// Build a client whose connections for `host` only go to `addrs`.
pub(crate) fn pinned_client(
    host: &str,
    addrs: &[std::net::SocketAddr],
    timeout: Duration,
) -> Result<reqwest::Client, WebError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .resolve_to_addrs(host, addrs)
        .build()
        .map_err(|e| WebError::Transport(format!("failed to build HTTP client: {e}")))
}

pub(crate) struct FetchedPage {
    pub body: String,
    pub final_url: Url,
    pub status: u16,
    pub content_type: String,
    pub truncated: bool,
}

/// GET `raw_url` with per-hop validation, pinned addresses, and a response
/// size cap.
pub(crate) async fn fetch_validated(
    raw_url: &str,
    max_redirects: usize,
    max_response: usize,
    timeout: Duration,
) -> Result<FetchedPage, WebError> {
    let mut current = raw_url.to_string();

    for _hop in 0..=max_redirects {
        let url = validate_url(&current)?;
        let host = url
            .host_str()
            .ok_or_else(|| WebError::InvalidUrl {
                url: current.clone(),
                reason: "missing host".into(),
            })?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);

        let addrs = resolve_and_check(&host, port).await?;
        let client = pinned_client(&host, &addrs, timeout)?;

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| WebError::Transport(e.to_string()))?;

        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| WebError::Transport("redirect without Location header".into()))?;
            // Relative redirects resolve against the current URL; the next
            // loop iteration re-validates the result.
            current = url
                .join(location)
                .map_err(|e| WebError::InvalidUrl {
                    url: location.to_string(),
                    reason: e.to_string(),
                })?
                .to_string();
            continue;
        }

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let mut body = Vec::new();
        let mut truncated = false;
        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| WebError::Transport(e.to_string()))?
        {
            if body.len() + chunk.len() > max_response {
                body.extend_from_slice(&chunk[..max_response - body.len()]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        return Ok(FetchedPage {
            body: String::from_utf8_lossy(&body).into_owned(),
            final_url: url,
            status,
            content_type,
            truncated,
        });
    }

    Err(WebError::TooManyRedirects { max: max_redirects })
}

// ─── WebFetchTool ─────────────────────────────────────────────────────────────

pub struct WebFetchTool {
    policy: Arc<SecurityPolicy>,
}

impl WebFetchTool {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_fetch".into(),
            description: "Fetch a URL over HTTPS and return its content as plain text or \
                          markdown. HTTP URLs are upgraded to HTTPS. Requests to private, \
                          loopback, link-local, and cloud-metadata addresses are refused, \
                          including via DNS."
                .into(),
            short_description: "Fetch a URL and return its content as text or markdown.".into(),
            parameters: vec![
                Parameter::required("url", ParamType::String, "URL to fetch (http/https)."),
                Parameter::optional("prompt", ParamType::String, "What to look for in the page."),
                Parameter::optional("output_format", ParamType::String, "Rendering of HTML pages.")
                    .with_allowed(&["text", "markdown"])
                    .with_default(json!("markdown")),
            ],
            risk_level: RiskLevel::Medium,
            permission: PermissionPolicy::Static(Permission::Ask),
        }
    }

    async fn execute(&self, ctx: &ToolCtx, args: &Value) -> ToolOutcome {
        let started = std::time::Instant::now();
        if ctx.cancel.is_cancelled() {
            return ToolOutcome::cancelled();
        }

        let url = match require_str(args, "url") {
            Ok(u) => u.to_string(),
            Err(e) => return ToolOutcome::fail(e),
        };
        let format = opt_str(args, "output_format").unwrap_or("markdown");
        let prompt = opt_str(args, "prompt").map(str::to_string);

        self.policy.log_action(
            self.name(),
            json!({"url": url, "output_format": format}),
            RiskLevel::Medium,
            "allowed",
            None,
        );

        let fetched = tokio::select! {
            result = fetch_validated(
                &url,
                ctx.limits.fetch_max_redirects,
                ctx.limits.fetch_max_response,
                ctx.limits.fetch_timeout,
            ) => result,
            _ = ctx.cancel.cancelled() => {
                return ToolOutcome::cancelled().with_duration(started.elapsed());
            }
        };

        let page = match fetched {
            Ok(p) => p,
            Err(e) => {
                self.policy.log_action(
                    self.name(),
                    json!({"url": url}),
                    RiskLevel::Medium,
                    "failed",
                    Some(e.kind()),
                );
                return ToolOutcome::fail(e.to_string()).with_duration(started.elapsed());
            }
        };

        let is_html = page.content_type.contains("html")
            || page.body.trim_start().to_lowercase().starts_with("<!doctype html")
            || page.body.trim_start().to_lowercase().starts_with("<html");

        let rendered = if is_html {
            match format {
                "text" => html_to_text(&page.body),
                _ => html_to_markdown(&page.body),
            }
        } else {
            page.body.clone()
        };

        let mut output = format!("URL: {}\nStatus: {}\n", page.final_url, page.status);
        if page.truncated {
            output.push_str("Note: response truncated at the size limit\n");
        }
        output.push('\n');
        output.push_str(&rendered);

        let mut outcome = if (200..400).contains(&page.status) {
            ToolOutcome::ok(output)
        } else {
            let mut o = ToolOutcome::fail(format!("request returned HTTP {}", page.status));
            o.output = Some(output);
            o
        };
        outcome.duration = started.elapsed();
        outcome.truncated = page.truncated;
        outcome.bytes_read = page.body.len() as u64;
        outcome.metadata = Some(json!({
            "final_url": page.final_url.to_string(),
            "status": page.status,
            "content_type": page.content_type,
            "prompt": prompt,
        }));
        outcome
    }
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

    fn tool(ctx: &ToolCtx) -> WebFetchTool {
        WebFetchTool::new(ctx.policy.clone())
    }

    #[tokio::test]
    async fn missing_url_fails() {
        let ctx = ctx();
        let r = tool(&ctx).execute(&ctx, &json!({})).await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("url"));
    }

    #[tokio::test]
    async fn metadata_host_blocked_before_any_socket() {
        let ctx = ctx();
        let r = tool(&ctx)
            .execute(
                &ctx,
                &json!({"url": "http://169.254.169.254/latest/meta-data/"}),
            )
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("blocked"));
        assert_eq!(r.bytes_read, 0);
    }

    #[tokio::test]
    async fn private_literal_ip_blocked() {
        let ctx = ctx();
        let r = tool(&ctx)
            .execute(&ctx, &json!({"url": "http://10.0.0.5/admin"}))
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn ftp_scheme_rejected() {
        let ctx = ctx();
        let r = tool(&ctx)
            .execute(&ctx, &json!({"url": "ftp://example.com/file"}))
            .await;
        assert!(!r.success);
        assert!(r.error.as_deref().unwrap().contains("scheme"));
    }

    #[tokio::test]
    async fn localhost_blocked() {
        let ctx = ctx();
        let r = tool(&ctx)
            .execute(&ctx, &json!({"url": "http://localhost:8080/x"}))
            .await;
        assert!(!r.success);
    }

    #[tokio::test]
    async fn fetch_respects_cancellation() {
        let ctx = ctx();
        ctx.cancel.cancel();
        let r = tool(&ctx)
            .execute(&ctx, &json!({"url": "https://example.com/"}))
            .await;
        assert_eq!(r.error.as_deref(), Some("operation cancelled"));
    }
}
