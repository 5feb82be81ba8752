// src/core/browser/chrome.rs

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine};
use headless_chrome::browser::tab::RequestPausedDecision;
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::protocol::cdp::Network::events::ResponseReceivedEventParams;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    headers_from_json, BrowserDriver, BrowserError, BrowserSession, InterceptedRequest, Navigation,
    ObservedResponse, SessionOptions, TrafficEvent,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_SCREENSHOT_HEIGHT: f64 = 16_384.0;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PausedParams {
    request_id: String,
    network_id: Option<String>,
    resource_type: Value,
    request: PausedRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PausedRequest {
    url: String,
    method: String,
    #[serde(default)]
    headers: Option<Value>,
    post_data: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedParams {
    request_id: String,
    #[serde(rename = "type")]
    resource_type: Value,
    response: ReceivedResponse,
}

#[derive(Deserialize)]
struct ReceivedResponse {
    url: String,
    status: f64,
    #[serde(default)]
    headers: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBody {
    body: String,
    #[serde(default)]
    base64_encoded: bool,
}

fn resource_type_name(value: &Value) -> String {
    value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
}

/// Launches a dedicated Chrome process per session.
#[derive(Debug, Default, Clone)]
pub struct ChromeDriver;

impl ChromeDriver {
    pub fn new() -> Self {
        Self
    }
}

impl BrowserDriver for ChromeDriver {
    fn open(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let launch = LaunchOptions::default_builder()
            .headless(options.headless)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .proxy_server(options.proxy.as_deref())
            .idle_browser_timeout(options.timeout + Duration::from_secs(30))
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let browser = Browser::new(launch).map_err(|e| BrowserError::Launch(e.to_string()))?;
        let tab = browser.new_tab().map_err(|e| BrowserError::Launch(e.to_string()))?;
        tab.set_default_timeout(options.timeout);
        tab.set_user_agent(&options.user_agent, None, None)
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let traffic: Arc<Mutex<Vec<TrafficEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        tab.enable_fetch(None, None).map_err(|e| BrowserError::Protocol(e.to_string()))?;
        {
            let traffic = Arc::clone(&traffic);
            let last_activity = Arc::clone(&last_activity);
            tab.enable_request_interception(Arc::new(
                move |_transport: Arc<Transport>, _session: SessionId, paused: RequestPausedEvent| {
                    record_request(&traffic, &last_activity, &paused);
                    RequestPausedDecision::Continue(None)
                },
            ))
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        }
        {
            let traffic = Arc::clone(&traffic);
            let last_activity = Arc::clone(&last_activity);
            tab.register_response_handling(
                "traffic-recorder",
                Box::new(move |params: ResponseReceivedEventParams, _fetch_body| {
                    record_response(&traffic, &last_activity, &params);
                }),
            )
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        }

        debug!(proxy = ?options.proxy, headless = options.headless, "Chrome session opened.");
        Ok(Box::new(ChromeSession {
            _browser: browser,
            tab,
            traffic,
            last_activity,
            timeout: options.timeout,
            network_idle: options.network_idle,
        }))
    }
}

fn record_request(
    traffic: &Mutex<Vec<TrafficEvent>>,
    last_activity: &Mutex<Instant>,
    paused: &RequestPausedEvent,
) {
    let parsed = serde_json::to_value(&paused.params)
        .and_then(serde_json::from_value::<PausedParams>);
    let params = match parsed {
        Ok(params) => params,
        Err(e) => {
            warn!(error = %e, "Unreadable paused request.");
            return;
        }
    };
    let now = Instant::now();
    let event = TrafficEvent::Request(InterceptedRequest {
        id: params.network_id.unwrap_or(params.request_id),
        url: params.request.url,
        method: params.request.method,
        headers: headers_from_json(params.request.headers.as_ref()),
        post_data: params.request.post_data,
        resource_type: resource_type_name(&params.resource_type),
        at: now,
    });
    if let Ok(mut events) = traffic.lock() {
        events.push(event);
    }
    if let Ok(mut last) = last_activity.lock() {
        *last = now;
    }
}

fn record_response(
    traffic: &Mutex<Vec<TrafficEvent>>,
    last_activity: &Mutex<Instant>,
    received: &ResponseReceivedEventParams,
) {
    let parsed =
        serde_json::to_value(received).and_then(serde_json::from_value::<ReceivedParams>);
    let params = match parsed {
        Ok(params) => params,
        Err(e) => {
            warn!(error = %e, "Unreadable response event.");
            return;
        }
    };
    let now = Instant::now();
    let event = TrafficEvent::Response(ObservedResponse {
        id: params.request_id,
        url: params.response.url,
        status: params.response.status as u16,
        headers: headers_from_json(params.response.headers.as_ref()),
        resource_type: resource_type_name(&params.resource_type),
        at: now,
    });
    if let Ok(mut events) = traffic.lock() {
        events.push(event);
    }
    if let Ok(mut last) = last_activity.lock() {
        *last = now;
    }
}

pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
    traffic: Arc<Mutex<Vec<TrafficEvent>>>,
    last_activity: Arc<Mutex<Instant>>,
    timeout: Duration,
    network_idle: Duration,
}

impl ChromeSession {
    /// Blocks until no traffic has been seen for `network_idle`, or the timeout elapses.
    fn wait_for_network_idle(&self, started: Instant) {
        let deadline = started + self.timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!("Network never settled before the timeout.");
                return;
            }
            let quiet_for = self
                .last_activity
                .lock()
                .map(|last| now.saturating_duration_since(*last))
                .unwrap_or(self.network_idle);
            if quiet_for >= self.network_idle {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn main_document(&self, requested: &str) -> Option<Navigation> {
        let events = self.traffic.lock().ok()?;
        let documents: Vec<&ObservedResponse> = events
            .iter()
            .filter_map(|event| match event {
                TrafficEvent::Response(r) if r.resource_type == "Document" => Some(r),
                _ => None,
            })
            .collect();
        let current = self.tab.get_url();
        documents
            .iter()
            .rev()
            .find(|r| r.url == current || r.url == requested)
            .or_else(|| documents.last())
            .map(|r| Navigation { url: r.url.clone(), status: r.status, headers: r.headers.clone() })
    }

    fn evaluate_number(&self, expression: &str) -> Option<f64> {
        self.tab.evaluate(expression, false).ok()?.value?.as_f64()
    }
}

impl BrowserSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<Navigation, BrowserError> {
        let started = Instant::now();
        if let Ok(mut last) = self.last_activity.lock() {
            *last = started;
        }
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;
        self.wait_for_network_idle(started);

        Ok(self.main_document(url).unwrap_or_else(|| Navigation {
            url: self.tab.get_url(),
            ..Default::default()
        }))
    }

    fn evaluate(&mut self, expression: &str) -> Result<Value, BrowserError> {
        let remote = self
            .tab
            .evaluate(expression, false)
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        Ok(remote.value.unwrap_or(Value::Null))
    }

    fn content(&mut self) -> Result<String, BrowserError> {
        self.tab.get_content().map_err(|e| BrowserError::Evaluation(e.to_string()))
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        let width = self
            .evaluate_number("Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0)")
            .unwrap_or(1920.0)
            .max(1.0);
        let height = self
            .evaluate_number("Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)")
            .unwrap_or(1080.0)
            .clamp(1.0, MAX_SCREENSHOT_HEIGHT);
        let clip = Viewport { x: 0.0, y: 0.0, width, height, scale: 1.0 };
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, Some(clip), true)
            .map_err(|e| BrowserError::Screenshot(e.to_string()))
    }

    fn drain_traffic(&mut self) -> Vec<TrafficEvent> {
        self.traffic.lock().map(|mut events| std::mem::take(&mut *events)).unwrap_or_default()
    }

    fn response_body(&mut self, request_id: &str) -> Result<String, BrowserError> {
        let returned = self
            .tab
            .call_method(Network::GetResponseBody { request_id: request_id.to_string() })
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        let body: ResponseBody = serde_json::to_value(&returned)
            .and_then(serde_json::from_value)
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        if body.base64_encoded {
            let bytes = STANDARD
                .decode(body.body.as_bytes())
                .map_err(|e| BrowserError::Protocol(e.to_string()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Ok(body.body)
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            debug!(error = %e, "Tab already gone on session close.");
        }
    }
}
