// src/core/scanner/metadata_scanner.rs

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::core::error::ScanResult;
use crate::core::models::PageMetadata;

const METADATA_USER_AGENT: &str = "Mozilla/5.0 (compatible; MetadataScraper/1.0)";

/// Conventional icon locations, tried in order.
pub const FAVICON_PATHS: &[&str] =
    &["/favicon.ico", "/favicon.png", "/apple-touch-icon.png", "/apple-touch-icon-precomposed.png"];

static OG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[property^="og:"]"#).unwrap());

/// Plain HTTP probing used next to the browser crawl.
#[async_trait]
pub trait WebProbe: Send + Sync {
    /// OpenGraph properties keyed without the `og:` prefix. Failures are reported
    /// through an `error` entry, never as an `Err`.
    async fn metadata(&self, url: &str, extract_images: bool) -> PageMetadata;

    /// Lightweight existence check.
    async fn exists(&self, url: &str) -> bool;
}

pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> ScanResult<Self> {
        let client = reqwest::Client::builder().user_agent(METADATA_USER_AGENT).timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn fetch_html(&self, url: &str) -> ScanResult<String> {
        Ok(self.client.get(url).send().await?.error_for_status()?.text().await?)
    }

    async fn fetch_image(&self, url: &str) -> ScanResult<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await?;
        Ok(format!("data:{content_type};base64,{}", STANDARD.encode(&bytes)))
    }
}

#[async_trait]
impl WebProbe for HttpProbe {
    async fn metadata(&self, url: &str, extract_images: bool) -> PageMetadata {
        let html = match self.fetch_html(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url, error = %e, "Metadata fetch failed.");
                return PageMetadata::from([
                    ("image_base64".to_string(), String::new()),
                    ("error".to_string(), "Failed to fetch metadata".to_string()),
                ]);
            }
        };
        let mut metadata = parse_og_tags(&html);

        if let Some(image) = metadata.get("image").cloned().filter(|_| extract_images) {
            let image_url = Url::parse(url).and_then(|base| base.join(&image)).map(String::from).unwrap_or(image);
            match self.fetch_image(&image_url).await {
                Ok(data_uri) => {
                    metadata.insert("image_base64".into(), data_uri);
                }
                Err(e) => {
                    warn!(url = %image_url, error = %e, "Failed to download og:image.");
                    metadata.insert("image_error".into(), "Image download failed".into());
                    metadata.insert("error".into(), "Failed to fetch image".into());
                    metadata.insert("image_base64".into(), String::new());
                }
            }
        }
        debug!(url, properties = metadata.len(), "Metadata collected.");
        metadata
    }

    async fn exists(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "HEAD request failed.");
                false
            }
        }
    }
}

/// `og:*` meta tags with the prefix stripped; empty values are ignored.
pub fn parse_og_tags(html: &str) -> PageMetadata {
    let document = Html::parse_document(html);
    document
        .select(&OG_SELECTOR)
        .filter_map(|meta| {
            let property = meta.value().attr("property")?.strip_prefix("og:")?;
            let content = meta.value().attr("content")?;
            (!property.is_empty() && !content.is_empty()).then(|| (property.to_string(), content.to_string()))
        })
        .collect()
}

/// First conventional icon path on the page's origin that answers.
///
/// # Arguments
/// * `probe` - Used for the existence checks.
/// * `page_url` - Any URL on the site; only its origin is kept.
///
/// # Returns
/// The absolute favicon URL, or `None` if no candidate exists or the URL does not parse.
pub async fn resolve_favicon(probe: &dyn WebProbe, page_url: &str) -> Option<String> {
    let origin = Url::parse(page_url).ok()?.origin().ascii_serialization();
    for path in FAVICON_PATHS {
        let candidate = format!("{origin}{path}");
        if probe.exists(&candidate).await {
            debug!(favicon = %candidate, "Favicon found.");
            return Some(candidate);
        }
    }
    None
}


#[cfg(test)]
mod tests {
    use super::fake::FakeProbe;
    use super::*;
    use crate::core::error::ScanError;

    #[test]
    fn og_properties_are_collected_without_prefix() {
        let html = r#"<head>
            <meta property="og:title" content="Example">
            <meta property="og:description" content="A site">
            <meta property="og:image" content="">
            <meta name="description" content="ignored">
        </head>"#;
        let metadata = parse_og_tags(html);
        assert_eq!(metadata.get("title").map(String::as_str), Some("Example"));
        assert_eq!(metadata.get("description").map(String::as_str), Some("A site"));
        assert_eq!(metadata.len(), 2);
    }

    #[tokio::test]
    async fn favicon_probe_stops_at_the_first_hit() {
        let probe = FakeProbe {
            existing: ["https://a.example/apple-touch-icon.png".to_string(), "https://a.example/favicon.png".to_string()]
                .into(),
            ..Default::default()
        };
        let favicon = resolve_favicon(&probe, "https://a.example/deep/page?q=1").await;
        assert_eq!(favicon.as_deref(), Some("https://a.example/favicon.png"));
        assert_eq!(
            *probe.checked.lock().unwrap(),
            vec!["https://a.example/favicon.ico", "https://a.example/favicon.png"]
        );
    }

    #[tokio::test]
    async fn no_favicon_yields_none() {
        let probe = FakeProbe::default();
        assert!(resolve_favicon(&probe, "http://10.0.0.1").await.is_none());
        assert_eq!(probe.checked.lock().unwrap().len(), FAVICON_PATHS.len());
    }

    #[tokio::test]
    async fn unreachable_host_reports_an_error_entry() {
        let probe = HttpProbe::new(Duration::from_millis(300)).unwrap();
        assert!(matches!(probe.fetch_html("http://127.0.0.1:9/").await, Err(ScanError::Http(_))));
        let metadata = probe.metadata("http://127.0.0.1:9/", true).await;
        assert_eq!(metadata.get("error").map(String::as_str), Some("Failed to fetch metadata"));
        assert_eq!(metadata.get("image_base64").map(String::as_str), Some(""));
    }
}
