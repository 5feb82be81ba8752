// src/core/scanner/page_crawler.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::browser::{
    BrowserDriver, BrowserSession, InterceptedRequest, ObservedResponse, SessionOptions, TrafficEvent,
};
use crate::core::config::ScannerConfig;
use crate::core::error::{BrowserError, ScanError, ScanResult};
use crate::core::models::{
    CapturedRequest, CapturedResponse, Headers, SensitivePage, Severity, Vulnerability,
};
use crate::core::scanner::content_scanner::analyze_content;
use crate::core::scanner::headers_scanner::analyze_headers;
use crate::core::scanner::sensitive_pages::classify;

/// Collects the text of every node whose parent is rendered and visible.
pub const VISIBLE_TEXT_SCRIPT: &str = r#"(() => {
  if (!document.body) return '';
  const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT, {
    acceptNode: (node) => {
      const parent = node.parentElement;
      if (!parent) return NodeFilter.FILTER_REJECT;
      const style = getComputedStyle(parent);
      if (style.display === 'none' || style.visibility === 'hidden') return NodeFilter.FILTER_REJECT;
      return node.textContent && node.textContent.trim() ? NodeFilter.FILTER_ACCEPT : NodeFilter.FILTER_REJECT;
    },
  });
  let text = '';
  while (walker.nextNode()) text += walker.currentNode.textContent + '\n';
  return text;
})()"#;

/// MIME type the browser assigned to the rendered document.
pub const DOCUMENT_CONTENT_TYPE_SCRIPT: &str = "document.contentType";

static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static HIDDEN_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script, style, noscript, template").unwrap());

const API_PATH_MARKERS: &[&str] = &["/api/", "/graphql", "/rest/"];
const API_CONTENT_TYPES: &[&str] = &["application/json", "application/x-www-form-urlencoded"];

/// How far a page got before analysis stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Rendered,
    NavigationFailed,
    NonHtml,
    Empty,
}

/// Everything learned from rendering one URL.
#[derive(Debug, Clone)]
pub struct PageCrawl {
    pub url: String,
    pub status: PageStatus,
    pub title: String,
    pub html_content: String,
    pub text: String,
    pub links: Vec<String>,
    pub sensitive_pages: Vec<SensitivePage>,
    pub vulnerabilities: Vec<Vulnerability>,
    /// `data:image/png;base64,...`
    pub screenshot: Option<String>,
    pub api_requests: Vec<CapturedRequest>,
}

impl PageCrawl {
    fn degraded(url: &str, status: PageStatus, title: &str, screenshot: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            status,
            title: title.to_string(),
            html_content: String::new(),
            text: String::new(),
            links: Vec::new(),
            sensitive_pages: Vec::new(),
            vulnerabilities: Vec::new(),
            screenshot,
            api_requests: Vec::new(),
        }
    }

    fn navigation_failed(url: &str, error: &BrowserError) -> Self {
        let mut crawl = Self::degraded(url, PageStatus::NavigationFailed, "Crawl Failed", None);
        crawl.text = "Failed to navigate to URL.".to_string();
        crawl.vulnerabilities.push(Vulnerability::new(
            "Crawl Error",
            format!("Browser failed to navigate to the page. Error: {error}"),
            Severity::Critical,
        ));
        crawl
    }

    /// JSON array stored on the `Webpage` record.
    pub fn vulnerabilities_json(&self) -> String {
        serde_json::to_string(&self.vulnerabilities).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Request metadata held from interception until its response shows up.
#[derive(Debug)]
struct CorrelationContext {
    url: String,
    method: String,
    resource_type: String,
    headers: Headers,
    request_body: Option<Value>,
    started: Instant,
}

/// A response that completed a correlated request; the body is read later.
struct PendingCapture {
    request_id: String,
    record: CapturedRequest,
}

/// Per-call traffic state. Lives only as long as one `fetch`.
struct TrafficCapture {
    from_page: String,
    in_flight: HashMap<String, CorrelationContext>,
    completed: Vec<PendingCapture>,
}

impl TrafficCapture {
    fn new(from_page: &str) -> Self {
        Self { from_page: from_page.to_string(), in_flight: HashMap::new(), completed: Vec::new() }
    }

    fn absorb(&mut self, events: Vec<TrafficEvent>) {
        for event in events {
            match event {
                TrafficEvent::Request(request) => self.on_request(request),
                TrafficEvent::Response(response) => self.on_response(response),
            }
        }
    }

    fn on_request(&mut self, request: InterceptedRequest) {
        if !is_interesting(&request) {
            return;
        }
        let request_body = request.post_data.as_deref().map(parse_body);
        self.in_flight.insert(
            request.id,
            CorrelationContext {
                url: request.url,
                method: request.method,
                resource_type: request.resource_type,
                headers: request.headers,
                request_body,
                started: request.at,
            },
        );
    }

    fn on_response(&mut self, response: ObservedResponse) {
        let Some(context) = self.in_flight.remove(&response.id) else {
            return;
        };
        let duration = response.at.saturating_duration_since(context.started).as_millis() as u64;
        let response_size = response.headers.get("content-length").and_then(|v| v.trim().parse().ok());
        self.completed.push(PendingCapture {
            request_id: response.id,
            record: CapturedRequest {
                url: context.url,
                method: context.method,
                resource_type: context.resource_type,
                status: Some(response.status),
                headers: context.headers,
                request_body: context.request_body,
                response: Some(CapturedResponse { body: String::new(), headers: response.headers }),
                response_size,
                duration,
                from_page: self.from_page.clone(),
            },
        });
    }

    /// Reads bodies under the cap and hands back the finished records.
    fn finish(self, session: &mut dyn BrowserSession, body_cap: usize) -> Vec<CapturedRequest> {
        if !self.in_flight.is_empty() {
            debug!(count = self.in_flight.len(), "Requests never answered; dropping them.");
        }
        self.completed
            .into_iter()
            .map(|PendingCapture { request_id, mut record }| {
                let body = match record.response_size {
                    Some(size) if size as usize >= body_cap => None,
                    declared => session
                        .response_body(&request_id)
                        .map_err(|e| debug!(url = %record.url, error = %e, "Response body unavailable."))
                        .ok()
                        .filter(|body| declared.is_some() || body.len() < body_cap),
                };
                record.response = match (body, record.response.take()) {
                    (Some(body), Some(response)) => Some(CapturedResponse { body, headers: response.headers }),
                    _ => None,
                };
                record
            })
            .collect()
    }
}

/// Paths that look like an API, any non-GET method, or a JSON/form payload.
fn is_interesting(request: &InterceptedRequest) -> bool {
    let content_type = request.headers.get("content-type").map(String::as_str).unwrap_or_default();
    API_PATH_MARKERS.iter().any(|marker| request.url.contains(marker))
        || request.method != "GET"
        || API_CONTENT_TYPES.iter().any(|ct| content_type.contains(ct))
}

fn parse_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Renders single pages in throwaway browser sessions and runs the per-page detectors.
#[derive(Clone)]
pub struct PageCrawler {
    driver: Arc<dyn BrowserDriver>,
    config: ScannerConfig,
}

impl PageCrawler {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: ScannerConfig) -> Self {
        Self { driver, config }
    }

    /// Renders one page and runs every per-page detector against it.
    ///
    /// # Arguments
    /// * `url` - Absolute URL of the page.
    /// * `proxy` - Optional proxy server for the browser session.
    ///
    /// # Returns
    /// A `PageCrawl`, possibly degraded. See `fetch` for the error cases.
    pub async fn crawl(&self, url: &str, proxy: Option<&str>) -> ScanResult<PageCrawl> {
        let crawler = self.clone();
        let url = url.to_string();
        let proxy = proxy.map(str::to_string);
        let crawl = tokio::task::spawn_blocking(move || crawler.fetch(&url, proxy.as_deref()))
            .await
            .map_err(|e| ScanError::Pipeline(format!("page crawl task failed: {e}")))??;
        Ok(crawl)
    }

    /// Renders `url` in a fresh session.
    ///
    /// Only a session that cannot be launched is an error. Navigation failures,
    /// non-HTML responses and empty documents come back as degraded results.
    pub fn fetch(&self, url: &str, proxy: Option<&str>) -> Result<PageCrawl, BrowserError> {
        info!(url, proxy = ?proxy, "Crawling page.");
        let options = SessionOptions {
            headless: true,
            proxy: proxy.map(str::to_string),
            user_agent: self.config.user_agent.clone(),
            timeout: self.config.navigation_timeout,
            network_idle: self.config.network_idle,
        };
        let mut session = self.driver.open(&options)?;
        Ok(self.render(session.as_mut(), url))
    }

    fn render(&self, session: &mut dyn BrowserSession, url: &str) -> PageCrawl {
        let mut traffic = TrafficCapture::new(url);

        let navigation = match session.navigate(url) {
            Ok(navigation) => navigation,
            Err(e) => {
                warn!(url, error = %e, "Navigation failed.");
                return PageCrawl::navigation_failed(url, &e);
            }
        };
        traffic.absorb(session.drain_traffic());
        let final_url = if navigation.url.is_empty() { url.to_string() } else { navigation.url.clone() };
        debug!(url, final_url = %final_url, status = navigation.status, "Navigation settled.");

        let screenshot = match session.screenshot() {
            Ok(png) => Some(format!("data:image/png;base64,{}", STANDARD.encode(png))),
            Err(e) => {
                warn!(url = %final_url, error = %e, "Screenshot failed.");
                None
            }
        };

        let content_type = match navigation.header("content-type") {
            Some(content_type) => content_type.to_string(),
            None => document_content_type(session, &final_url),
        };
        if !content_type.contains("text/html") {
            info!(url = %final_url, content_type, "Skipping analysis of non-HTML content.");
            return PageCrawl::degraded(&final_url, PageStatus::NonHtml, "Non-HTML Content", screenshot);
        }

        let html = match session.content() {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %final_url, error = %e, "Could not read rendered DOM.");
                String::new()
            }
        };
        let document = Html::parse_document(&html);
        if is_empty_document(&html, &document) {
            warn!(url = %final_url, "No body content found.");
            return PageCrawl::degraded(&final_url, PageStatus::Empty, "Empty HTML", screenshot);
        }

        let mut vulnerabilities = analyze_headers(&navigation.headers);
        vulnerabilities.extend(analyze_content(&html, &document));

        let text = match session.evaluate(VISIBLE_TEXT_SCRIPT) {
            Ok(Value::String(text)) => text,
            Ok(other) => {
                debug!(url = %final_url, value = %other, "Unexpected visible-text result.");
                fallback_text(&document)
            }
            Err(e) => {
                debug!(url = %final_url, error = %e, "Visible-text walk failed; using static text.");
                fallback_text(&document)
            }
        };

        let title = document
            .select(&TITLE_SELECTOR)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let (links, sensitive_pages) = extract_links(url, &document);

        traffic.absorb(session.drain_traffic());
        let api_requests = traffic.finish(session, self.config.response_body_cap);

        info!(
            url = %final_url,
            links = links.len(),
            vulnerabilities = vulnerabilities.len(),
            sensitive_pages = sensitive_pages.len(),
            api_requests = api_requests.len(),
            "Page crawled."
        );

        PageCrawl {
            url: url.to_string(),
            status: PageStatus::Rendered,
            title,
            html_content: html,
            text: text.trim().to_string(),
            links,
            sensitive_pages,
            vulnerabilities,
            screenshot,
            api_requests,
        }
    }
}

/// Content type read from the DOM when no main-document response was observed,
/// as with cached or service-worker responses. Assumes HTML if the DOM cannot say.
fn document_content_type(session: &mut dyn BrowserSession, url: &str) -> String {
    match session.evaluate(DOCUMENT_CONTENT_TYPE_SCRIPT) {
        Ok(Value::String(content_type)) if !content_type.is_empty() => {
            debug!(url, content_type = %content_type, "No response headers; using the document content type.");
            content_type
        }
        Ok(_) | Err(_) => {
            debug!(url, "No content type available; treating the page as HTML.");
            "text/html".to_string()
        }
    }
}

fn is_empty_document(html: &str, document: &Html) -> bool {
    if html.trim().is_empty() {
        return true;
    }
    match document.select(&BODY_SELECTOR).next() {
        None => true,
        Some(body) => {
            body.children().filter_map(ElementRef::wrap).next().is_none()
                && body.text().all(|t| t.trim().is_empty())
        }
    }
}

/// Static approximation of the visible text when script evaluation is unavailable.
fn fallback_text(document: &Html) -> String {
    let Some(body) = document.select(&BODY_SELECTOR).next() else {
        return String::new();
    };
    let hidden: HashSet<_> = body
        .select(&HIDDEN_SELECTOR)
        .flat_map(|el| el.descendants().map(|n| n.id()))
        .collect();
    body.descendants()
        .filter(|node| !hidden.contains(&node.id()))
        .filter_map(|node| node.value().as_text().map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Absolute http(s) links in document order, de-duplicated, plus any that look sensitive.
fn extract_links(base: &str, document: &Html) -> (Vec<String>, Vec<SensitivePage>) {
    let Ok(base) = Url::parse(base) else {
        return (Vec::new(), Vec::new());
    };
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut sensitive = Vec::new();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let href = anchor.value().attr("href").unwrap_or_default().trim();
        if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
            continue;
        }
        let Ok(mut absolute) = base.join(href) else {
            continue;
        };
        if !matches!(absolute.scheme(), "http" | "https") {
            continue;
        }
        absolute.set_fragment(None);
        let absolute = absolute.to_string();
        if !seen.insert(absolute.clone()) {
            continue;
        }

        let label = link_label(&anchor);
        if let Some(page) = classify(&absolute, &label) {
            debug!(url = %absolute, kind = %page.kind, "Sensitive page candidate.");
            sensitive.push(page);
        }
        links.push(absolute);
    }
    (links, sensitive)
}

fn link_label(anchor: &ElementRef) -> String {
    let text = anchor.text().collect::<String>().trim().to_string();
    if !text.is_empty() {
        return text;
    }
    anchor
        .value()
        .attr("title")
        .or_else(|| anchor.value().attr("aria-label"))
        .unwrap_or_default()
        .to_string()
}
