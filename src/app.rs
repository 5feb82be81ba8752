// src/app.rs

use ratatui::widgets::ListState;
use strum::IntoEnumIterator;
use uuid::Uuid;

use crate::core::models::{CrawlDepth, ScanReport, ScanRequest, Severity, TaskExecution};

pub const SPINNER_CHARS: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

pub enum ExportStatus {
    Idle,
    Success(String),
    Error(String),
}

pub enum AppState {
    Disclaimer,
    Idle,
    Scanning,
    Finished,
}

/// One row of the findings browser.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub kind: String,
    pub url: String,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Default)]
pub struct ScanSummary {
    pub assets: usize,
    pub pages: usize,
    pub api_endpoints: usize,
    pub associations: usize,
    pub critical_issues: usize,
    pub high_issues: usize,
    pub medium_issues: usize,
    pub low_issues: usize,
    pub technologies: Vec<String>,
    pub open_ports: Vec<String>,
}

pub struct App {
    pub should_quit: bool,
    pub state: AppState,
    pub input: String,
    pub depth: CrawlDepth,
    pub execution_id: Option<Uuid>,
    pub execution: Option<TaskExecution>,
    pub error: Option<String>,
    pub scan_report: Option<ScanReport>,
    pub findings: Vec<Finding>,
    pub findings_state: ListState,
    pub summary: ScanSummary,
    pub spinner_frame: usize,
    pub export_status: ExportStatus,
}

impl App {
    pub fn new() -> Self {
        Self {
            should_quit: false,
            state: AppState::Disclaimer,
            input: String::new(),
            depth: CrawlDepth::default(),
            execution_id: None,
            execution: None,
            error: None,
            scan_report: None,
            findings: Vec::new(),
            findings_state: ListState::default(),
            summary: ScanSummary::default(),
            spinner_frame: 0,
            export_status: ExportStatus::Idle,
        }
    }

    pub fn acknowledge_disclaimer(&mut self) {
        self.state = AppState::Idle;
    }

    /// Moves to the next crawl tier, wrapping around.
    pub fn cycle_depth(&mut self) {
        let tiers: Vec<CrawlDepth> = CrawlDepth::iter().collect();
        let current = tiers.iter().position(|d| *d == self.depth).unwrap_or(0);
        self.depth = tiers[(current + 1) % tiers.len()];
    }

    /// Builds a request from the input box: addresses and CIDR ranges scan an IP range,
    /// anything else is treated as a URL and gets `https://` when no scheme is given.
    pub fn build_request(&self) -> Option<ScanRequest> {
        let raw = self.input.trim();
        if raw.is_empty() {
            return None;
        }
        let looks_like_range = raw.contains('/') && raw.split('/').next().is_some_and(|ip| ip.parse::<std::net::IpAddr>().is_ok());
        if looks_like_range || raw.parse::<std::net::IpAddr>().is_ok() {
            return Some(ScanRequest::for_ip_range(raw, self.depth));
        }
        let url = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };
        Some(ScanRequest::for_url(&url, self.depth))
    }

    pub fn start_scan(&mut self, execution_id: Uuid) {
        self.state = AppState::Scanning;
        self.execution_id = Some(execution_id);
        self.execution = None;
        self.error = None;
    }

    pub fn on_tick(&mut self) {
        if let AppState::Scanning = self.state {
            self.spinner_frame = (self.spinner_frame + 1) % SPINNER_CHARS.len();
        }
    }

    /// Current stage text, or an empty string before the first poll.
    pub fn stage(&self) -> &str {
        self.execution.as_ref().map(|e| e.stage.as_str()).unwrap_or_default()
    }

    pub fn load_report(&mut self, report: ScanReport) {
        let mut findings: Vec<Finding> = report
            .vulnerabilities()
            .map(|(page, v)| Finding { kind: v.kind, url: page.url.clone(), description: v.description, severity: v.severity })
            .chain(report.sensitive_pages().map(|p| Finding {
                kind: p.kind.clone(),
                url: p.url.clone(),
                description: p.description.clone(),
                severity: p.risk_level,
            }))
            .collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity));

        let count = |severity: Severity| findings.iter().filter(|f| f.severity == severity).count();
        self.summary = ScanSummary {
            assets: report.execution.assets_found,
            pages: report.assets.iter().map(|a| a.webpages.len()).sum(),
            api_endpoints: report.assets.iter().map(|a| a.api_endpoints).sum(),
            associations: report.assets.iter().map(|a| a.associations).sum(),
            critical_issues: count(Severity::Critical),
            high_issues: count(Severity::High),
            medium_issues: count(Severity::Medium),
            low_issues: count(Severity::Low),
            technologies: technologies(&report),
            open_ports: report
                .assets
                .iter()
                .filter(|a| !a.asset.open_ports.is_empty())
                .map(|a| format!("{}: {}", a.asset.ip, a.asset.open_ports))
                .collect(),
        };

        self.findings_state = ListState::default();
        if !findings.is_empty() {
            self.findings_state.select(Some(0));
        }
        self.findings = findings;
        self.execution = Some(report.execution.clone());
        self.scan_report = Some(report);
        self.state = AppState::Finished;
    }

    pub fn select_previous(&mut self) {
        if let Some(selected) = self.findings_state.selected() {
            self.findings_state.select(Some(selected.saturating_sub(1)));
        }
    }

    pub fn select_next(&mut self) {
        if let Some(selected) = self.findings_state.selected() {
            if selected + 1 < self.findings.len() {
                self.findings_state.select(Some(selected + 1));
            }
        }
    }

    pub fn selected_finding(&self) -> Option<&Finding> {
        self.findings_state.selected().and_then(|i| self.findings.get(i))
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn reset(&mut self) {
        self.state = AppState::Idle;
        self.input = String::new();
        self.execution_id = None;
        self.execution = None;
        self.error = None;
        self.scan_report = None;
        self.findings = Vec::new();
        self.findings_state = ListState::default();
        self.summary = ScanSummary::default();
        self.export_status = ExportStatus::Idle;
    }
}

/// Technology names pulled from the `  - name (vX)` lines of each tech report.
fn technologies(report: &ScanReport) -> Vec<String> {
    let mut names: Vec<String> = report
        .assets
        .iter()
        .flat_map(|a| a.asset.tech_report.lines())
        .filter_map(|line| line.strip_prefix("  - "))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Asset, AssetReport, SensitivePage, TaskStatus, Webpage};
    use chrono::Utc;

    fn report() -> ScanReport {
        let mut asset = Asset::new("https://a.example/", "10.0.0.1", "a.example");
        asset.tech_report = "Frameworks:\n  - React (v18.2.0)\n    Category: JS\nLibraries:\n  - jQuery\n".into();
        asset.open_ports = "80, 443".into();
        asset.sensitive_pages.push(SensitivePage {
            url: "https://a.example/admin".into(),
            kind: "Admin/Console Page".into(),
            description: "Potential admin".into(),
            risk_level: Severity::Critical,
        });
        let page = Webpage {
            id: Uuid::new_v4(),
            asset_id: asset.id,
            url: "https://a.example/".into(),
            html_content: String::new(),
            content: String::new(),
            title: String::new(),
            is_homepage: true,
            vulnerabilities: r#"[{"type":"Missing CSP Header","description":"no csp","severity":"Medium"}]"#.into(),
            metadata: Default::default(),
            image: None,
        };
        ScanReport {
            execution: TaskExecution {
                id: Uuid::new_v4(),
                scheduled_task_id: None,
                status: TaskStatus::Completed,
                stage: "Aggregating results".into(),
                start_time: Utc::now(),
                end_time: Some(Utc::now()),
                duration: Some(3),
                assets_found: 1,
            },
            assets: vec![AssetReport { asset, webpages: vec![page], api_endpoints: 2, associations: 0 }],
        }
    }

    #[test]
    fn input_becomes_url_or_ip_range_request() {
        let mut app = App::new();
        app.input = "example.com".into();
        assert_eq!(app.build_request().unwrap().url.as_deref(), Some("https://example.com"));
        app.input = "192.168.1.0/24".into();
        assert_eq!(app.build_request().unwrap().ip_range.as_deref(), Some("192.168.1.0/24"));
        app.input = "  ".into();
        assert!(app.build_request().is_none());
    }

    #[test]
    fn depth_cycles_through_all_tiers() {
        let mut app = App::new();
        assert_eq!(app.depth, CrawlDepth::Level2);
        app.cycle_depth();
        assert_eq!(app.depth, CrawlDepth::Level3);
        app.cycle_depth();
        app.cycle_depth();
        assert_eq!(app.depth, CrawlDepth::Level1);
    }

    #[test]
    fn loaded_report_is_sorted_by_severity() {
        let mut app = App::new();
        app.load_report(report());
        assert!(matches!(app.state, AppState::Finished));
        assert_eq!(app.findings.len(), 2);
        assert_eq!(app.selected_finding().unwrap().kind, "Admin/Console Page");
        assert_eq!(app.summary.critical_issues, 1);
        assert_eq!(app.summary.medium_issues, 1);
        assert_eq!(app.summary.api_endpoints, 2);
        assert_eq!(app.summary.technologies, vec!["React (v18.2.0)", "jQuery"]);
        assert_eq!(app.summary.open_ports, vec!["10.0.0.1: 80, 443"]);

        app.select_next();
        app.select_next();
        assert_eq!(app.selected_finding().unwrap().kind, "Missing CSP Header");
    }
}
