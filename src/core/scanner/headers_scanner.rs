// src/core/scanner/headers_scanner.rs

use tracing::debug;

use crate::core::models::{Headers, Severity, Vulnerability};

/// Looks up a response header by its lower-cased name.
fn check_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    let value = headers.get(name).map(String::as_str);
    match value {
        Some(v) => debug!(header_name = name, value = v, "Header found."),
        None => debug!(header_name = name, "Header not found."),
    }
    value
}

/// Static checks over the main document's response headers.
///
/// Emits, in this order: missing clickjacking protection, wildcard CORS,
/// missing Content-Security-Policy. Each is Medium.
///
/// # Arguments
/// * `headers` - Response headers with lower-cased names.
///
/// # Returns
/// Zero to three `Vulnerability` entries.
pub fn analyze_headers(headers: &Headers) -> Vec<Vulnerability> {
    let mut findings = Vec::new();

    let x_frame_options = check_header(headers, "x-frame-options");
    let csp = check_header(headers, "content-security-policy");

    let has_frame_ancestors = csp.is_some_and(|policy| policy.contains("frame-ancestors"));
    if x_frame_options.is_none() && !has_frame_ancestors {
        findings.push(Vulnerability::new(
            "Clickjacking",
            "The page is missing the X-Frame-Options header or a Content-Security-Policy with frame-ancestors directive. This could allow the page to be embedded in an iframe on a malicious site.",
            Severity::Medium,
        ));
    }

    if check_header(headers, "access-control-allow-origin") == Some("*") {
        findings.push(Vulnerability::new(
            "CORS Misconfiguration",
            "The Access-Control-Allow-Origin header is set to \"*\", which is overly permissive. This could allow malicious websites to make requests to this page and read the response.",
            Severity::Medium,
        ));
    }

    if csp.is_none() {
        findings.push(Vulnerability::new(
            "Missing CSP Header",
            "The Content-Security-Policy (CSP) header is not set. A strong CSP can help prevent Cross-Site Scripting (XSS) and other injection attacks.",
            Severity::Medium,
        ));
    }

    findings
}
