// src/core/scanner/fingerprint_scanner.rs

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::browser::{BrowserDriver, InterceptedRequest, ObservedResponse, SessionOptions, TrafficEvent};
use crate::core::config::ScannerConfig;
use crate::core::error::{BrowserError, ScanError, ScanResult};
use crate::core::models::{TechInventory, TechItem, TechSection, UNKNOWN_VERSION};

/// Reads the globals the rules below look for. Present globals map to their version, or "".
const GLOBALS_SCRIPT: &str = r#"JSON.stringify({
  jQuery: window.jQuery ? String((window.jQuery.fn && window.jQuery.fn.jquery) || '') : null,
  React: window.React ? String(window.React.version || '') : null,
  Vue: window.Vue ? String(window.Vue.version || '') : null,
  gtag: window.gtag ? '' : null,
  ga: window.ga ? '' : null,
})"#;

/// Defines the different types of evidence a rule can match.
enum Check {
    /// A JavaScript global is defined; its value, when non-empty, is the version.
    Global(&'static str),
    /// At least one element matches the selector.
    Selector(&'static Lazy<Selector>),
    /// The first matching element carries the version in the given attribute.
    Attribute(&'static Lazy<Selector>, &'static str),
    /// Pattern in the `content` of a named meta tag.
    MetaTag(&'static str, &'static Lazy<Regex>),
    /// Pattern in the `src` attribute of `<script>` tags.
    ScriptSrc(&'static Lazy<Regex>),
    /// Pattern in any response's header of this name. Capture group 1 is the version.
    ResponseHeader(&'static str, &'static Lazy<Regex>),
    /// Any outbound request URL matches.
    RequestUrl(&'static Lazy<Regex>),
}

/// A rule that defines how to detect a specific technology.
struct FingerprintRule {
    section: TechSection,
    category: &'static str,
    name: &'static str,
    purpose: &'static str,
    vendor: &'static str,
    check: Check,
}

static RE_ANY: Lazy<Regex> = Lazy::new(|| Regex::new(r".").unwrap());
static RE_NGINX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)nginx(?:/([0-9.]+))?").unwrap());
static RE_APACHE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)apache(?:/([0-9.]+))?").unwrap());
static RE_IIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)microsoft-iis(?:/([0-9.]+))?").unwrap());
static RE_PHP: Lazy<Regex> = Lazy::new(|| Regex::new(r"PHP/([\d\.]+)").unwrap());
static RE_WORDPRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"WordPress\s*([\d\.]+)?").unwrap());
static RE_REACT_SCRIPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"react").unwrap());
static RE_NEXTJS_SCRIPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/_next/static/").unwrap());
static RE_GOOGLE_ANALYTICS: Lazy<Regex> = Lazy::new(|| Regex::new(r"google-analytics\.com").unwrap());
static RE_GENERATOR_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+[\.\d]*").unwrap());

static SEL_REACT_ROOT: Lazy<Selector> = Lazy::new(|| Selector::parse("[data-reactroot]").unwrap());
static SEL_VUE: Lazy<Selector> = Lazy::new(|| Selector::parse("[v-cloak], [data-v-app]").unwrap());
static SEL_ANGULAR: Lazy<Selector> = Lazy::new(|| Selector::parse("[ng-version]").unwrap());
static SEL_BOOTSTRAP: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[href*="bootstrap"], .container"#).unwrap());
static SEL_TAILWIND: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[class*="tw-"], [class*="bg-"]"#).unwrap());
static SEL_WP_CONTENT: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"link[href*="wp-content"]"#).unwrap());
static SEL_GENERATOR: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[name="generator"]"#).unwrap());
static SEL_SCRIPT_SRC: Lazy<Selector> = Lazy::new(|| Selector::parse("script[src]").unwrap());

/// The master list of fingerprinting rules. Several rules may name the same technology.
static RULES: Lazy<Vec<FingerprintRule>> = Lazy::new(|| {
    use TechSection::*;
    let rule = |section, category, name, purpose, vendor, check| FingerprintRule {
        section,
        category,
        name,
        purpose,
        vendor,
        check,
    };
    vec![
        rule(Software, "JavaScript Library", "jQuery", "DOM manipulation and AJAX", "jQuery Foundation", Check::Global("jQuery")),
        rule(Software, "JavaScript Framework", "React", "User interface construction", "Meta (Facebook)", Check::Global("React")),
        rule(Software, "JavaScript Framework", "React", "User interface construction", "Meta (Facebook)", Check::Selector(&SEL_REACT_ROOT)),
        rule(Software, "JavaScript Framework", "React", "User interface construction", "Meta (Facebook)", Check::ScriptSrc(&RE_REACT_SCRIPT)),
        rule(Software, "JavaScript Framework", "Vue.js", "Progressive web application framework", "Vue.js Team", Check::Global("Vue")),
        rule(Software, "JavaScript Framework", "Vue.js", "Progressive web application framework", "Vue.js Team", Check::Selector(&SEL_VUE)),
        rule(Software, "Programming Language", "PHP", "Server-side scripting", "The PHP Group", Check::ResponseHeader("x-powered-by", &RE_PHP)),
        rule(WebServices, "Web Server", "Nginx", "HTTP service", "Nginx Inc.", Check::ResponseHeader("server", &RE_NGINX)),
        rule(WebServices, "Web Server", "Apache", "HTTP service", "Apache Software Foundation", Check::ResponseHeader("server", &RE_APACHE)),
        rule(WebServices, "Web Server", "IIS", "HTTP service", "Microsoft Corporation", Check::ResponseHeader("server", &RE_IIS)),
        rule(WebServices, "CDN Service", "Cloudflare", "Content delivery network", "Cloudflare Inc.", Check::ResponseHeader("cf-ray", &RE_ANY)),
        rule(WebServices, "CDN Service", "Cloudflare", "Content delivery network", "Cloudflare Inc.", Check::ResponseHeader("cf-cache-status", &RE_ANY)),
        rule(Frameworks, "CSS Framework", "Bootstrap", "Responsive UI framework", "Bootstrap Team", Check::Selector(&SEL_BOOTSTRAP)),
        rule(Frameworks, "CSS Framework", "Tailwind CSS", "Utility-first CSS framework", "Tailwind Labs", Check::Selector(&SEL_TAILWIND)),
        rule(Frameworks, "JavaScript Framework", "Next.js", "React application framework", "Vercel Inc.", Check::ScriptSrc(&RE_NEXTJS_SCRIPT)),
        rule(Frameworks, "JavaScript Framework", "Angular", "Single-page application framework", "Google", Check::Attribute(&SEL_ANGULAR, "ng-version")),
        rule(Libraries, "Analytics Tool", "Google Analytics", "Website analytics", "Google", Check::Global("gtag")),
        rule(Libraries, "Analytics Tool", "Google Analytics", "Website analytics", "Google", Check::Global("ga")),
        rule(Cms, "Content Management System", "WordPress", "Content management", "Automattic", Check::Selector(&SEL_WP_CONTENT)),
        rule(Cms, "Content Management System", "WordPress", "Content management", "Automattic", Check::MetaTag("generator", &RE_WORDPRESS)),
        rule(Analytics, "Web Analytics", "Google Analytics", "User behaviour analytics", "Google", Check::RequestUrl(&RE_GOOGLE_ANALYTICS)),
        rule(Security, "Security Protocol", "HSTS", "HTTPS enforcement", "W3C Standard", Check::ResponseHeader("strict-transport-security", &RE_ANY)),
        rule(Security, "Security Policy", "CSP", "XSS protection", "W3C Standard", Check::ResponseHeader("content-security-policy", &RE_ANY)),
        rule(Hosting, "Hosting Service", "Vercel", "Frontend deployment platform", "Vercel Inc.", Check::ResponseHeader("x-vercel-id", &RE_ANY)),
    ]
});

/// Per-visit knobs.
#[derive(Debug, Clone)]
pub struct TechOptions {
    pub headless: bool,
    pub timeout: Duration,
    pub proxy: Option<String>,
}

impl Default for TechOptions {
    fn default() -> Self {
        Self { headless: true, timeout: Duration::from_secs(30), proxy: None }
    }
}

/// Everything one page visit left behind.
struct Evidence {
    document: Html,
    globals: Value,
    requests: Vec<InterceptedRequest>,
    responses: Vec<ObservedResponse>,
}

/// Identifies the technology stack of a site from a single rendered visit.
#[derive(Clone)]
pub struct TechFingerprinter {
    driver: Arc<dyn BrowserDriver>,
    user_agent: String,
    network_idle: Duration,
}

impl TechFingerprinter {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: &ScannerConfig) -> Self {
        Self { driver, user_agent: config.user_agent.clone(), network_idle: config.network_idle }
    }

    /// Identifies the technologies behind `url` from one browser visit.
    ///
    /// The visit runs on the blocking pool because the browser API is synchronous.
    ///
    /// # Arguments
    /// * `url` - The page to render, usually the target's homepage.
    /// * `options` - Headless mode, timeout and optional proxy for the session.
    ///
    /// # Returns
    /// The de-duplicated `TechInventory`, or an error when no session could be
    /// opened or the page never loaded.
    pub async fn identify(&self, url: &str, options: TechOptions) -> ScanResult<TechInventory> {
        let fingerprinter = self.clone();
        let url = url.to_string();
        let inventory = tokio::task::spawn_blocking(move || fingerprinter.identify_blocking(&url, &options))
            .await
            .map_err(|e| ScanError::Pipeline(format!("fingerprint task failed: {e}")))??;
        Ok(inventory)
    }

    pub fn identify_blocking(&self, url: &str, options: &TechOptions) -> Result<TechInventory, BrowserError> {
        info!(url, "Starting fingerprint scan.");
        let session_options = SessionOptions {
            headless: options.headless,
            proxy: options.proxy.clone(),
            user_agent: self.user_agent.clone(),
            timeout: options.timeout,
            network_idle: self.network_idle,
        };
        let mut session = self.driver.open(&session_options)?;
        session.navigate(url)?;

        let html = session.content()?;
        let globals = match session.evaluate(GLOBALS_SCRIPT) {
            Ok(Value::String(json)) => serde_json::from_str(&json).unwrap_or(Value::Null),
            Ok(value) => value,
            Err(e) => {
                debug!(url, error = %e, "Global probe failed.");
                Value::Null
            }
        };

        let mut requests = Vec::new();
        let mut responses = Vec::new();
        for event in session.drain_traffic() {
            match event {
                TrafficEvent::Request(r) => requests.push(r),
                TrafficEvent::Response(r) => responses.push(r),
            }
        }
        drop(session);

        let evidence = Evidence { document: Html::parse_document(&html), globals, requests, responses };
        let inventory = classify(url, &evidence);
        info!(url, technologies = inventory.sections().iter().map(|(_, items)| items.len()).sum::<usize>(), "Fingerprint scan finished.");
        Ok(inventory)
    }
}

fn classify(url: &str, evidence: &Evidence) -> TechInventory {
    let mut inventory = TechInventory { url: url.to_string(), timestamp: Utc::now(), ..Default::default() };

    if let Some(item) = detect_generator(&evidence.document) {
        inventory.software.push(item);
    }

    debug!(total_rules = RULES.len(), "Applying fingerprinting rules.");
    for rule in RULES.iter() {
        if let Some(version) = apply(&rule.check, evidence) {
            debug!(tech = rule.name, version = ?version, "Rule matched.");
            inventory.section_mut(rule.section).push(TechItem {
                category: rule.category.to_string(),
                name: rule.name.to_string(),
                version: version.unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
                purpose: rule.purpose.to_string(),
                vendor: rule.vendor.to_string(),
            });
        }
    }

    for section in [
        TechSection::Software,
        TechSection::WebServices,
        TechSection::Frameworks,
        TechSection::Libraries,
        TechSection::Cms,
        TechSection::Analytics,
        TechSection::Security,
        TechSection::Hosting,
    ] {
        let items = inventory.section_mut(section);
        *items = deduplicate(std::mem::take(items));
    }
    inventory
}

/// The generator meta tag names the software and, often, its version.
fn detect_generator(document: &Html) -> Option<TechItem> {
    let content = document.select(&SEL_GENERATOR).next()?.value().attr("content")?.trim();
    let name = content.split_whitespace().next()?;
    Some(TechItem {
        category: "Content Management System".to_string(),
        name: name.to_string(),
        version: RE_GENERATOR_VERSION
            .find(content)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
        purpose: "Website content management".to_string(),
        vendor: UNKNOWN_VERSION.to_string(),
    })
}

/// `None` when the rule did not match; `Some(None)` when it matched without a version.
fn apply(check: &Check, evidence: &Evidence) -> Option<Option<String>> {
    match check {
        Check::Global(name) => match evidence.globals.get(*name)? {
            Value::Null => None,
            Value::String(v) => Some(Some(v.clone()).filter(|v| !v.is_empty())),
            _ => Some(None),
        },
        Check::Selector(selector) => evidence.document.select(selector).next().map(|_| None),
        Check::Attribute(selector, attr) => evidence
            .document
            .select(selector)
            .next()
            .map(|el| el.value().attr(attr).map(str::to_string).filter(|v| !v.is_empty())),
        Check::MetaTag(name, re) => {
            let selector = Selector::parse(&format!("meta[name='{name}']")).ok()?;
            let content = evidence.document.select(&selector).next()?.value().attr("content")?;
            check_with_regex(content, re)
        }
        Check::ScriptSrc(re) => evidence
            .document
            .select(&SEL_SCRIPT_SRC)
            .filter_map(|el| el.value().attr("src"))
            .find_map(|src| check_with_regex(src, re)),
        Check::ResponseHeader(name, re) => {
            let mut matched = None;
            for value in evidence.responses.iter().filter_map(|r| r.headers.get(*name)) {
                match check_with_regex(value, re) {
                    Some(Some(version)) => return Some(Some(version)),
                    Some(None) => matched = Some(None),
                    None => {}
                }
            }
            matched
        }
        Check::RequestUrl(re) => evidence.requests.iter().any(|r| re.is_match(&r.url)).then_some(None),
    }
}

/// `Some(version)` if the regex matches, where the version is capture group 1 when present.
fn check_with_regex(text: &str, re: &Regex) -> Option<Option<String>> {
    re.captures(text)
        .map(|caps| caps.get(1).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty()))
}

/// Keeps the first item per (name, category), upgrading an unknown version when a later rule knows it.
fn deduplicate(items: Vec<TechItem>) -> Vec<TechItem> {
    let mut seen = HashSet::new();
    let mut kept: Vec<TechItem> = Vec::new();
    for item in items {
        let key = (item.name.clone(), item.category.clone());
        if seen.insert(key) {
            kept.push(item);
        } else if item.version != UNKNOWN_VERSION {
            if let Some(existing) = kept
                .iter_mut()
                .find(|k| k.name == item.name && k.category == item.category && k.version == UNKNOWN_VERSION)
            {
                existing.version = item.version;
            }
        }
    }
    kept
}

/// Renders the inventory as plain text, skipping empty sections.
///
/// # Arguments
/// * `inventory` - The result of `TechFingerprinter::identify`.
///
/// # Returns
/// A multi-line report with one `  - name (vX)` line per technology.
pub fn report(inventory: &TechInventory) -> String {
    let mut report = String::from("\n=== Website Technology Report ===\n");
    report.push_str(&format!("Site: {}\n", inventory.url));
    report.push_str(&format!("Analysed at: {}\n\n", inventory.timestamp.to_rfc3339()));

    for (title, items) in inventory.sections() {
        if items.is_empty() {
            continue;
        }
        report.push_str(&format!("{title}:\n"));
        for item in items {
            if item.version == UNKNOWN_VERSION {
                report.push_str(&format!("  - {}\n", item.name));
            } else {
                report.push_str(&format!("  - {} (v{})\n", item.name, item.version));
            }
            report.push_str(&format!("    Category: {}\n", item.category));
            report.push_str(&format!("    Purpose: {}\n", item.purpose));
            report.push_str(&format!("    Vendor: {}\n\n", item.vendor));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::browser::fake::{self, FakeDriver, FakePage};

    const URL: &str = "https://shop.example/";

    fn identify(page: FakePage) -> TechInventory {
        let driver = FakeDriver::default().with_page(URL, page);
        let fingerprinter = TechFingerprinter::new(Arc::new(driver), &ScannerConfig::default());
        fingerprinter.identify_blocking(URL, &TechOptions::default()).unwrap()
    }

    fn names(items: &[TechItem]) -> Vec<(&str, &str)> {
        items.iter().map(|i| (i.name.as_str(), i.version.as_str())).collect()
    }

    #[test]
    fn dom_globals_and_generator_drive_software() {
        let html = r#"<html><head><meta name="generator" content="WordPress 6.4.2"></head>
            <body><div data-reactroot></div></body></html>"#;
        let mut page = FakePage::html(URL, html, &[]);
        page.globals = serde_json::json!({"jQuery": "3.7.1", "React": "", "Vue": null});
        let inventory = identify(page);

        assert_eq!(
            names(&inventory.software),
            vec![("WordPress", "6.4.2"), ("jQuery", "3.7.1"), ("React", "unknown")]
        );
        assert_eq!(names(&inventory.cms), vec![("WordPress", "6.4.2")]);
    }

    #[test]
    fn stringified_globals_are_parsed() {
        let mut page = FakePage::html(URL, "<body></body>", &[]);
        page.globals = Value::String(r#"{"gtag":""}"#.into());
        let inventory = identify(page);
        assert_eq!(names(&inventory.libraries), vec![("Google Analytics", "unknown")]);
    }

    #[test]
    fn headers_across_responses_drive_services_security_and_hosting() {
        let mut page = FakePage::html(URL, "<body></body>", &[]);
        page.traffic = vec![
            (fake::response("1", URL, 200, &[("server", "nginx/1.25.3"), ("strict-transport-security", "max-age=1")]), None),
            (fake::response("2", "https://shop.example/a.js", 200, &[("server", "nginx"), ("cf-ray", "abc")]), None),
            (fake::response("3", "https://shop.example/b.js", 200, &[("cf-cache-status", "HIT"), ("x-vercel-id", "fra1")]), None),
        ];
        let inventory = identify(page);

        assert_eq!(names(&inventory.web_services), vec![("Nginx", "1.25.3"), ("Cloudflare", "unknown")]);
        assert_eq!(names(&inventory.security), vec![("HSTS", "unknown")]);
        assert_eq!(names(&inventory.hosting), vec![("Vercel", "unknown")]);
    }

    #[test]
    fn outbound_requests_drive_analytics() {
        let mut page = FakePage::html(URL, "<body></body>", &[]);
        page.traffic = vec![
            (fake::request("1", "https://www.google-analytics.com/g/collect?v=2", "POST", None, None), None),
            (fake::request("2", "https://www.google-analytics.com/analytics.js", "GET", None, None), None),
        ];
        let inventory = identify(page);
        assert_eq!(names(&inventory.analytics), vec![("Google Analytics", "unknown")]);
    }

    #[test]
    fn deduplication_keeps_one_item_and_upgrades_its_version() {
        let item = |version: &str| TechItem {
            category: "Web Server".into(),
            name: "Apache".into(),
            version: version.into(),
            purpose: String::new(),
            vendor: String::new(),
        };
        let kept = deduplicate(vec![item(UNKNOWN_VERSION), item("2.4.1"), item("2.4.2")]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].version, "2.4.1");
    }

    #[test]
    fn navigation_failure_is_an_error() {
        let fingerprinter = TechFingerprinter::new(Arc::new(FakeDriver::default()), &ScannerConfig::default());
        let result = fingerprinter.identify_blocking("https://gone.example/", &TechOptions::default());
        assert!(matches!(result, Err(BrowserError::Navigation(_))));
    }

    #[test]
    fn report_skips_empty_sections_and_unknown_versions() {
        let mut inventory = TechInventory { url: URL.into(), ..Default::default() };
        inventory.web_services.push(TechItem {
            category: "Web Server".into(),
            name: "Nginx".into(),
            version: "1.25.3".into(),
            purpose: "HTTP service".into(),
            vendor: "Nginx Inc.".into(),
        });
        inventory.security.push(TechItem {
            category: "Security Policy".into(),
            name: "CSP".into(),
            version: UNKNOWN_VERSION.into(),
            purpose: "XSS protection".into(),
            vendor: "W3C Standard".into(),
        });
        let text = report(&inventory);

        assert!(text.contains("Site: https://shop.example/"));
        assert!(text.contains("Web Services:\n  - Nginx (v1.25.3)\n    Category: Web Server\n"));
        assert!(text.contains("Security:\n  - CSP\n"));
        assert!(!text.contains("Software:"));
        assert!(text.find("Web Services:").unwrap() < text.find("Security:").unwrap());
    }
}
