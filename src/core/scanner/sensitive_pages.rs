// src/core/scanner/sensitive_pages.rs

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::core::models::{SensitivePage, Severity};

/// One keyword family and the classification it produces.
struct PageClass {
    kind: &'static str,
    risk: Severity,
    label: &'static str,
    pattern: Lazy<Regex>,
}

fn family(keywords: &[&str]) -> Regex {
    RegexBuilder::new(&keywords.join("|")).case_insensitive(true).build().unwrap()
}

/// Checked top to bottom; the first family that matches decides.
static PAGE_CLASSES: [PageClass; 6] = [
    PageClass {
        kind: "Login Page",
        risk: Severity::High,
        label: "login/authentication page",
        pattern: Lazy::new(|| {
            family(&[
                "login", "signin", "sign-in", "auth", "authentication", "logon", "user", "account",
                "portal", "dashboard", "登录", "登陆", "用户",
            ])
        }),
    },
    PageClass {
        kind: "Admin/Console Page",
        risk: Severity::Critical,
        label: "administrative or control panel page",
        pattern: Lazy::new(|| {
            family(&[
                "admin", "administrator", "console", "control", "panel", "manage", "manager",
                "backend", "cms", "cpanel", "phpmyadmin", "webmail", "管理", "后台", "控制台",
            ])
        }),
    },
    PageClass {
        kind: "File Upload Page",
        risk: Severity::High,
        label: "file upload page",
        pattern: Lazy::new(|| {
            family(&[
                "upload", "file", "attach", "attachment", "media", "documents", "files", "上传",
                "文件", "附件",
            ])
        }),
    },
    PageClass {
        kind: "Configuration/Debug Page",
        risk: Severity::Medium,
        label: "configuration or debug information page",
        pattern: Lazy::new(|| {
            family(&[
                "config", "configuration", "settings", "setup", "install", "debug", "test", "info",
                "status", "health", "version", "phpinfo", "server-info", "配置", "设置", "调试",
            ])
        }),
    },
    PageClass {
        kind: "API Endpoint",
        risk: Severity::Medium,
        label: "API endpoint",
        pattern: Lazy::new(|| {
            family(&["api", "rest", "graphql", "json", "xml", "swagger", "接口", "api文档"])
        }),
    },
    PageClass {
        kind: "Database Access Page",
        risk: Severity::Critical,
        label: "database access page",
        pattern: Lazy::new(|| {
            family(&["database", "db", "mysql", "postgres", "mongodb", "sql", "数据库"])
        }),
    },
];

/// Classifies a link by its absolute URL and label text.
///
/// Families are tried in a fixed order and the first match wins.
///
/// # Arguments
/// * `url` - The absolute link target.
/// * `label` - Anchor text, or its title/aria-label when the text is empty.
///
/// # Returns
/// A `SensitivePage` for the first matching family, or `None`.
pub fn classify(url: &str, label: &str) -> Option<SensitivePage> {
    let subject = format!("{} {}", url.to_lowercase(), label.to_lowercase());
    PAGE_CLASSES.iter().find(|class| class.pattern.is_match(&subject)).map(|class| SensitivePage {
        url: url.to_string(),
        kind: class.kind.to_string(),
        description: format!("Potential {} detected: {}", class.label, label),
        risk_level: class.risk,
    })
}
