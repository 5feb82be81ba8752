//! Static, read-only explanations for every finding the scanner can emit.
//! Keys are the `type` strings stored on vulnerabilities and sensitive pages,
//! so the UI can turn a raw finding into something a reader can act on.

use std::fmt;

/// Where a finding comes from, used to group findings in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FindingCategory {
    /// Response header checks.
    Headers,
    /// Static analysis of the rendered HTML.
    Content,
    /// URLs that look security-relevant.
    Exposure,
    /// The crawl itself did not complete.
    Crawl,
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingCategory::Headers => write!(f, "HTTP"),
            FindingCategory::Content => write!(f, "HTML"),
            FindingCategory::Exposure => write!(f, "Exposure"),
            FindingCategory::Crawl => write!(f, "Crawl"),
        }
    }
}

/// Everything needed to present one finding type to a user.
pub struct FindingDetail {
    /// The `type` string the detectors emit.
    pub kind: &'static str,
    pub title: &'static str,
    pub category: FindingCategory,
    pub description: &'static str,
    pub remediation: &'static str,
}

static FINDINGS: &[FindingDetail] = &[
    // --- Response headers ---
    FindingDetail {
        kind: "Clickjacking",
        title: "Clickjacking Protection Missing",
        category: FindingCategory::Headers,
        description: "The page sends neither X-Frame-Options nor a frame-ancestors policy, so any site can load it in an invisible iframe and trick visitors into clicking on it.",
        remediation: "Send 'X-Frame-Options: DENY' (or 'SAMEORIGIN'), or add 'frame-ancestors' to the Content-Security-Policy.",
    },
    FindingDetail {
        kind: "CORS Misconfiguration",
        title: "Wildcard CORS Policy",
        category: FindingCategory::Headers,
        description: "Access-Control-Allow-Origin is '*', which lets scripts on any origin read this response.",
        remediation: "Answer with an explicit allow-list of trusted origins instead of '*', and never combine a wildcard with credentials.",
    },
    FindingDetail {
        kind: "Missing CSP Header",
        title: "Content-Security-Policy Missing",
        category: FindingCategory::Headers,
        description: "Without a Content-Security-Policy the browser will run any script injected into the page, which makes XSS far easier to exploit.",
        remediation: "Add a Content-Security-Policy header that lists trusted script, style and frame sources. Start strict and relax it as needed.",
    },
    // --- HTML content ---
    FindingDetail {
        kind: "Sensitive Information Leakage",
        title: "Secret Exposed in Page Source",
        category: FindingCategory::Content,
        description: "The HTML contains something that looks like an API key, token or password. Anything shipped to the browser is readable by every visitor.",
        remediation: "Remove the value from the page, rotate the credential, and keep secrets on the server side behind an authenticated API.",
    },
    FindingDetail {
        kind: "Missing CSRF Token",
        title: "Form Without CSRF Token",
        category: FindingCategory::Content,
        description: "A form has no hidden anti-forgery field. Another site could submit it on behalf of a logged-in visitor.",
        remediation: "Add a per-session CSRF token to every state-changing form and verify it on the server, or rely on SameSite cookies where supported.",
    },
    FindingDetail {
        kind: "Potential XSS via innerHTML",
        title: "Inline Script Writes innerHTML",
        category: FindingCategory::Content,
        description: "An inline script assigns to innerHTML. If any part of that value comes from user input, markup and scripts can be injected into the page.",
        remediation: "Use textContent or DOM construction APIs for untrusted data, or sanitise the markup before assigning it.",
    },
    // --- Sensitive pages ---
    FindingDetail {
        kind: "Login Page",
        title: "Login Page Discovered",
        category: FindingCategory::Exposure,
        description: "An authentication entry point is reachable. These pages attract credential stuffing and brute-force attempts.",
        remediation: "Enforce rate limiting, account lockout and multi-factor authentication, and serve the page over HTTPS only.",
    },
    FindingDetail {
        kind: "Admin/Console Page",
        title: "Administrative Interface Exposed",
        category: FindingCategory::Exposure,
        description: "A link points to what looks like an administration panel or console reachable from the public site.",
        remediation: "Restrict the interface to a VPN or an IP allow-list and require strong authentication.",
    },
    FindingDetail {
        kind: "File Upload Page",
        title: "File Upload Endpoint",
        category: FindingCategory::Exposure,
        description: "Upload forms can be abused to store malware or web shells when file types and destinations are not controlled.",
        remediation: "Validate type and size on the server, store uploads outside the web root and scan them before use.",
    },
    FindingDetail {
        kind: "Configuration/Debug Page",
        title: "Configuration or Debug Page",
        category: FindingCategory::Exposure,
        description: "Debug and configuration pages often reveal versions, paths, environment variables or credentials.",
        remediation: "Disable debug endpoints in production and remove configuration files from publicly served directories.",
    },
    FindingDetail {
        kind: "API Endpoint",
        title: "API Endpoint Linked",
        category: FindingCategory::Exposure,
        description: "The site links directly to an API or its documentation, which maps out the attack surface for anyone reading it.",
        remediation: "Make sure every endpoint requires authentication where appropriate and that documentation is not public unless intended.",
    },
    FindingDetail {
        kind: "Database Access Page",
        title: "Database Tool Exposed",
        category: FindingCategory::Exposure,
        description: "A database administration tool such as phpMyAdmin or Adminer appears to be reachable from the internet.",
        remediation: "Remove the tool from the public server or put it behind a VPN and strong authentication.",
    },
    // --- Crawl ---
    FindingDetail {
        kind: "Crawl Error",
        title: "Page Could Not Be Crawled",
        category: FindingCategory::Crawl,
        description: "The browser failed to load this page, so none of the content checks ran against it.",
        remediation: "Check that the URL is reachable from the scanning host and re-run the scan.",
    },
];

/// Detail for a finding type, or `None` for types the knowledge base does not cover.
pub fn get_finding_detail(kind: &str) -> Option<&'static FindingDetail> {
    FINDINGS.iter().find(|f| f.kind == kind)
}
