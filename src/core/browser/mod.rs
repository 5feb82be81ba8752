// src/core/browser/mod.rs

//! Headless browser seam. A session is opened per page visit, owned by exactly one
//! caller, and released when dropped.

pub mod chrome;

use std::time::{Duration, Instant};

use crate::core::error::BrowserError;
use crate::core::models::Headers;

pub use chrome::ChromeDriver;

/// How a fresh session is launched.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    pub proxy: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
    pub network_idle: Duration,
}

/// The main-document response of a navigation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Navigation {
    pub url: String,
    pub status: u16,
    pub headers: Headers,
}

impl Navigation {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// An outbound request as it was paused by the interceptor.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub post_data: Option<String>,
    pub resource_type: String,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct ObservedResponse {
    pub id: String,
    pub url: String,
    pub status: u16,
    pub headers: Headers,
    pub resource_type: String,
    pub at: Instant,
}

/// Traffic in arrival order.
#[derive(Debug, Clone)]
pub enum TrafficEvent {
    Request(InterceptedRequest),
    Response(ObservedResponse),
}

/// One live, exclusively owned browser tab.
pub trait BrowserSession: Send {
    /// Navigates and waits for network quiescence.
    fn navigate(&mut self, url: &str) -> Result<Navigation, BrowserError>;

    /// Evaluates an expression against the rendered DOM and returns its JSON value.
    fn evaluate(&mut self, expression: &str) -> Result<serde_json::Value, BrowserError>;

    /// Serialized DOM as currently rendered.
    fn content(&mut self) -> Result<String, BrowserError>;

    /// Full-page PNG.
    fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError>;

    /// Takes every traffic event recorded since the previous call.
    fn drain_traffic(&mut self) -> Vec<TrafficEvent>;

    fn response_body(&mut self, request_id: &str) -> Result<String, BrowserError>;
}

/// Launches isolated browser sessions.
pub trait BrowserDriver: Send + Sync {
    fn open(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// Lower-cases header names and flattens a JSON header object into a `Headers` map.
pub fn headers_from_json(value: Option<&serde_json::Value>) -> Headers {
    let mut headers = Headers::new();
    if let Some(serde_json::Value::Object(map)) = value {
        for (name, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            headers.insert(name.to_ascii_lowercase(), value);
        }
    }
    headers
}

#[cfg(test)]
pub mod fake {
    //! Scripted browser used by the crawler, fingerprinter and orchestrator tests.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Canned behaviour for one URL.
    #[derive(Debug, Clone, Default)]
    pub struct FakePage {
        pub navigation: Option<Navigation>,
        pub html: String,
        pub visible_text: String,
        /// Answer to `document.contentType`.
        pub document_content_type: String,
        pub globals: serde_json::Value,
        pub traffic: Vec<(TrafficEvent, Option<String>)>,
        pub screenshot: Option<Vec<u8>>,
    }

    impl FakePage {
        /// An HTML page served with the given extra headers.
        pub fn html(url: &str, html: &str, headers: &[(&str, &str)]) -> Self {
            let mut map = Headers::new();
            map.insert("content-type".into(), "text/html; charset=utf-8".into());
            for (k, v) in headers {
                map.insert(k.to_ascii_lowercase(), v.to_string());
            }
            Self {
                navigation: Some(Navigation { url: url.to_string(), status: 200, headers: map }),
                html: html.to_string(),
                visible_text: String::new(),
                document_content_type: "text/html".into(),
                globals: serde_json::json!({}),
                traffic: Vec::new(),
                screenshot: Some(vec![0x89, b'P', b'N', b'G']),
            }
        }
    }

    #[derive(Default)]
    pub struct FakeDriver {
        pub pages: HashMap<String, FakePage>,
        pub opened: Arc<Mutex<Vec<Option<String>>>>,
        pub visits: Arc<Mutex<Vec<String>>>,
        pub fail_launch: bool,
    }

    impl FakeDriver {
        pub fn with_page(mut self, url: &str, page: FakePage) -> Self {
            self.pages.insert(url.to_string(), page);
            self
        }
    }

    impl BrowserDriver for FakeDriver {
        fn open(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
            if self.fail_launch {
                return Err(BrowserError::Launch("no chrome".into()));
            }
            if let Ok(mut opened) = self.opened.lock() {
                opened.push(options.proxy.clone());
            }
            Ok(Box::new(FakeSession {
                pages: self.pages.clone(),
                visits: Arc::clone(&self.visits),
                current: None,
                pending: Vec::new(),
                bodies: HashMap::new(),
            }))
        }
    }

    pub struct FakeSession {
        pages: HashMap<String, FakePage>,
        visits: Arc<Mutex<Vec<String>>>,
        current: Option<FakePage>,
        pending: Vec<TrafficEvent>,
        bodies: HashMap<String, String>,
    }

    impl BrowserSession for FakeSession {
        fn navigate(&mut self, url: &str) -> Result<Navigation, BrowserError> {
            if let Ok(mut visits) = self.visits.lock() {
                visits.push(url.to_string());
            }
            let page = self
                .pages
                .get(url)
                .cloned()
                .ok_or_else(|| BrowserError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {url}")))?;
            for (event, body) in &page.traffic {
                if let (TrafficEvent::Response(response), Some(body)) = (event, body) {
                    self.bodies.insert(response.id.clone(), body.clone());
                }
                self.pending.push(event.clone());
            }
            let navigation = page.navigation.clone().unwrap_or_default();
            self.current = Some(page);
            Ok(navigation)
        }

        fn evaluate(&mut self, expression: &str) -> Result<serde_json::Value, BrowserError> {
            let page = self.current.as_ref().ok_or_else(|| BrowserError::Evaluation("no page".into()))?;
            if expression.contains("createTreeWalker") {
                Ok(serde_json::Value::String(page.visible_text.clone()))
            } else if expression == "document.contentType" {
                Ok(serde_json::Value::String(page.document_content_type.clone()))
            } else {
                Ok(page.globals.clone())
            }
        }

        fn content(&mut self) -> Result<String, BrowserError> {
            Ok(self.current.as_ref().map(|p| p.html.clone()).unwrap_or_default())
        }

        fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
            self.current
                .as_ref()
                .and_then(|p| p.screenshot.clone())
                .ok_or_else(|| BrowserError::Screenshot("capture failed".into()))
        }

        fn drain_traffic(&mut self) -> Vec<TrafficEvent> {
            std::mem::take(&mut self.pending)
        }

        fn response_body(&mut self, request_id: &str) -> Result<String, BrowserError> {
            self.bodies
                .get(request_id)
                .cloned()
                .ok_or_else(|| BrowserError::Protocol("No resource with given identifier found".into()))
        }
    }

    pub fn request(id: &str, url: &str, method: &str, content_type: Option<&str>, body: Option<&str>) -> TrafficEvent {
        let mut headers = Headers::new();
        if let Some(ct) = content_type {
            headers.insert("content-type".into(), ct.into());
        }
        TrafficEvent::Request(InterceptedRequest {
            id: id.into(),
            url: url.into(),
            method: method.into(),
            headers,
            post_data: body.map(str::to_string),
            resource_type: "XHR".into(),
            at: Instant::now(),
        })
    }

    pub fn response(id: &str, url: &str, status: u16, headers: &[(&str, &str)]) -> TrafficEvent {
        TrafficEvent::Response(ObservedResponse {
            id: id.into(),
            url: url.into(),
            status,
            headers: headers.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.to_string())).collect(),
            resource_type: "XHR".into(),
            at: Instant::now(),
        })
    }
}
