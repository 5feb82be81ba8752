// src/core/models.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Header maps are kept with lower-cased names so lookups are case-insensitive.
pub type Headers = BTreeMap<String, String>;

/// Flat `key -> value` metadata scraped from a page (OpenGraph properties and friends).
pub type PageMetadata = BTreeMap<String, String>;

// --- Shared risk scale ---

/// The closed four-value scale shared by vulnerabilities and sensitive pages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A heuristic finding on a single page. Stored serialized on the `Webpage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: Severity,
}

impl Vulnerability {
    pub fn new(kind: &str, description: impl Into<String>, severity: Severity) -> Self {
        Self { kind: kind.to_string(), description: description.into(), severity }
    }
}

/// A discovered URL classified as security-relevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivePage {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub risk_level: Severity,
}

// --- Scan request ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CrawlDepth {
    Level1,
    #[default]
    Level2,
    Level3,
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScanRate {
    Slow,
    #[default]
    Normal,
    Fast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScheduleType {
    #[default]
    Once,
    Daily,
    Weekly,
    Every3Days,
    Monthly,
}

impl ScheduleType {
    /// Time between two runs, `None` for one-shot schedules.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            ScheduleType::Once => None,
            ScheduleType::Daily => Some(Duration::days(1)),
            ScheduleType::Every3Days => Some(Duration::days(3)),
            ScheduleType::Weekly => Some(Duration::days(7)),
            ScheduleType::Monthly => Some(Duration::days(30)),
        }
    }
}

/// Inbound scan request. Exactly one of `url` / `ip_range` drives target derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanRequest {
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub ip_range: Option<String>,
    pub crawl_depth: CrawlDepth,
    pub extract_images: bool,
    pub value_keywords: Vec<String>,
    pub scan_rate: Option<ScanRate>,
    pub is_scheduled: bool,
    pub schedule_type: Option<ScheduleType>,
    pub custom_crawl_depth: Option<u32>,
    pub proxy: Option<String>,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            task_name: None,
            description: None,
            url: None,
            ip_range: None,
            crawl_depth: CrawlDepth::default(),
            extract_images: true,
            value_keywords: Vec::new(),
            scan_rate: None,
            is_scheduled: false,
            schedule_type: None,
            custom_crawl_depth: None,
            proxy: None,
        }
    }
}

impl ScanRequest {
    pub fn for_url(url: &str, crawl_depth: CrawlDepth) -> Self {
        Self { url: Some(url.to_string()), crawl_depth, ..Default::default() }
    }

    pub fn for_ip_range(ip_range: &str, crawl_depth: CrawlDepth) -> Self {
        Self { ip_range: Some(ip_range.to_string()), crawl_depth, ..Default::default() }
    }

    /// A blank proxy string means "no proxy".
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

/// What the initiating call hands back. `error` is set only when bookkeeping itself failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub task_execution_id: Option<Uuid>,
    pub error: Option<String>,
}

// --- Persisted records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub id: Uuid,
    pub scheduled_task_id: Option<Uuid>,
    pub status: TaskStatus,
    pub stage: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Whole seconds between start and end.
    pub duration: Option<i64>,
    pub assets_found: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub domain: String,
    pub ip_range: Option<String>,
    pub scan_rate: ScanRate,
    pub schedule_type: ScheduleType,
    pub is_active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A discovered endpoint, unique by `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: Uuid,
    pub url: String,
    pub ip: String,
    pub domain: String,
    pub name: String,
    pub description: String,
    pub status: String,
    /// Comma-separated list, empty when nothing answered.
    pub open_ports: String,
    pub value_proposition_score: u8,
    pub summary: String,
    pub geolocation: String,
    pub services: String,
    pub network_topology: String,
    pub tags: String,
    pub keywords: String,
    pub sitemap_xml: Option<String>,
    pub tech_report: String,
    pub sensitive_pages: Vec<SensitivePage>,
    pub image: Option<String>,
    pub metadata: PageMetadata,
    pub favicon: Option<String>,
    pub task_name: String,
    pub task_execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(url: &str, ip: &str, domain: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.to_string(),
            ip: ip.to_string(),
            domain: domain.to_string(),
            name: String::new(),
            description: String::new(),
            status: "Active".to_string(),
            open_ports: String::new(),
            value_proposition_score: 0,
            summary: String::new(),
            geolocation: String::new(),
            services: String::new(),
            network_topology: String::new(),
            tags: String::new(),
            keywords: String::new(),
            sitemap_xml: None,
            tech_report: String::new(),
            sensitive_pages: Vec::new(),
            image: None,
            metadata: PageMetadata::new(),
            favicon: None,
            task_name: String::new(),
            task_execution_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One crawled page, unique by `(asset_id, url)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webpage {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub url: String,
    pub html_content: String,
    /// Visible text.
    pub content: String,
    pub title: String,
    pub is_homepage: bool,
    /// JSON array of `Vulnerability`.
    pub vulnerabilities: String,
    pub metadata: PageMetadata,
    pub image: Option<String>,
}

impl Webpage {
    pub fn parsed_vulnerabilities(&self) -> Vec<Vulnerability> {
        serde_json::from_str(&self.vulnerabilities).unwrap_or_default()
    }
}

/// Directed edge between two assets living on different domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAssociation {
    pub id: Uuid,
    pub source_asset_id: Uuid,
    pub target_asset_id: Uuid,
    pub source_url: String,
    pub target_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub body: String,
    pub headers: Headers,
}

/// A request/response pair picked out of a page's traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub url: String,
    pub method: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub status: Option<u16>,
    pub headers: Headers,
    pub request_body: Option<serde_json::Value>,
    pub response: Option<CapturedResponse>,
    pub response_size: Option<u64>,
    /// Milliseconds between interception and response.
    pub duration: u64,
    pub from_page: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    pub id: Uuid,
    pub asset_id: Uuid,
    #[serde(flatten)]
    pub request: CapturedRequest,
}

// --- Technology fingerprint ---

/// A detected technology. `version` is the literal `"unknown"` when it could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TechItem {
    pub category: String,
    pub name: String,
    pub version: String,
    pub purpose: String,
    pub vendor: String,
}

pub const UNKNOWN_VERSION: &str = "unknown";

/// The eight fixed inventory sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TechSection {
    Software,
    WebServices,
    Frameworks,
    Libraries,
    Cms,
    Analytics,
    Security,
    Hosting,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechInventory {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub software: Vec<TechItem>,
    pub web_services: Vec<TechItem>,
    pub frameworks: Vec<TechItem>,
    pub libraries: Vec<TechItem>,
    pub cms: Vec<TechItem>,
    pub analytics: Vec<TechItem>,
    pub security: Vec<TechItem>,
    pub hosting: Vec<TechItem>,
}

impl TechInventory {
    pub fn section_mut(&mut self, section: TechSection) -> &mut Vec<TechItem> {
        match section {
            TechSection::Software => &mut self.software,
            TechSection::WebServices => &mut self.web_services,
            TechSection::Frameworks => &mut self.frameworks,
            TechSection::Libraries => &mut self.libraries,
            TechSection::Cms => &mut self.cms,
            TechSection::Analytics => &mut self.analytics,
            TechSection::Security => &mut self.security,
            TechSection::Hosting => &mut self.hosting,
        }
    }

    /// Sections in report order, with their display titles.
    pub fn sections(&self) -> [(&'static str, &[TechItem]); 8] {
        [
            ("Software", self.software.as_slice()),
            ("Web Services", self.web_services.as_slice()),
            ("Frameworks", self.frameworks.as_slice()),
            ("Libraries", self.libraries.as_slice()),
            ("CMS", self.cms.as_slice()),
            ("Analytics", self.analytics.as_slice()),
            ("Security", self.security.as_slice()),
            ("Hosting", self.hosting.as_slice()),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.sections().iter().all(|(_, items)| items.is_empty())
    }
}

// --- Pipeline results ---

/// Per-target result of the scan pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
    pub ip: String,
    pub asset_id: Uuid,
    pub crawled_urls: Vec<String>,
    pub sitemap_xml: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetReport {
    pub asset: Asset,
    pub webpages: Vec<Webpage>,
    pub api_endpoints: usize,
    pub associations: usize,
}

/// Read model gathered once an execution reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub execution: TaskExecution,
    pub assets: Vec<AssetReport>,
}

impl ScanReport {
    pub fn vulnerabilities(&self) -> impl Iterator<Item = (&Webpage, Vulnerability)> {
        self.assets
            .iter()
            .flat_map(|a| a.webpages.iter())
            .flat_map(|page| page.parsed_vulnerabilities().into_iter().map(move |v| (page, v)))
    }

    pub fn sensitive_pages(&self) -> impl Iterator<Item = &SensitivePage> {
        self.assets.iter().flat_map(|a| a.asset.sensitive_pages.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn crawl_depth_parses_tier_names() {
        assert_eq!(CrawlDepth::from_str("level1").unwrap(), CrawlDepth::Level1);
        assert_eq!(CrawlDepth::from_str("full").unwrap(), CrawlDepth::Full);
        assert_eq!(CrawlDepth::Level3.to_string(), "level3");
    }

    #[test]
    fn only_one_shot_schedules_have_no_interval() {
        assert!(ScheduleType::Once.interval().is_none());
        assert_eq!(ScheduleType::Every3Days.interval(), Some(Duration::days(3)));
        assert_eq!(ScheduleType::Monthly.interval(), Some(Duration::days(30)));
        assert_eq!(ScheduleType::from_str("every3days").unwrap(), ScheduleType::Every3Days);
    }

    #[test]
    fn scan_request_deserializes_with_defaults() {
        let request: ScanRequest =
            serde_json::from_str(r#"{"url":"https://example.com","crawlDepth":"level1"}"#).unwrap();
        assert_eq!(request.crawl_depth, CrawlDepth::Level1);
        assert!(request.extract_images);
        assert!(!request.is_scheduled);
        assert_eq!(request.proxy(), None);
    }

    #[test]
    fn blank_proxy_is_ignored() {
        let request = ScanRequest { proxy: Some("   ".into()), ..Default::default() };
        assert_eq!(request.proxy(), None);
    }

    #[test]
    fn vulnerability_serializes_with_type_key() {
        let v = Vulnerability::new("Clickjacking", "framed", Severity::Medium);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], "Clickjacking");
        assert_eq!(json["severity"], "Medium");
    }

    #[test]
    fn severity_scale_is_ordered() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn empty_inventory_reports_empty() {
        let mut inventory = TechInventory::default();
        assert!(inventory.is_empty());
        inventory.section_mut(TechSection::Hosting).push(TechItem {
            category: "Hosting".into(),
            name: "Vercel".into(),
            version: UNKNOWN_VERSION.into(),
            purpose: "Frontend deployment".into(),
            vendor: "Vercel Inc.".into(),
        });
        assert!(!inventory.is_empty());
        assert_eq!(inventory.sections()[7].1.len(), 1);
    }
}
