// src/core/orchestrator.rs

//! Top-level scan pipeline: target derivation, the detached multi-target run,
//! the per-target BFS crawl and the final aggregation onto each asset.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::core::browser::BrowserDriver;
use crate::core::config::ScannerConfig;
use crate::core::error::{ScanError, ScanResult, StoreError};
use crate::core::models::{
    ApiEndpoint, Asset, AssetAssociation, AssetReport, CapturedRequest, CrawlDepth, PageMetadata,
    ScanOutcome, ScanReport, ScanRequest, ScheduledTask, SensitivePage, TargetSummary, TaskExecution,
    TaskStatus, Webpage,
};
use crate::core::scanner::fingerprint_scanner::report as tech_report;
use crate::core::scanner::metadata_scanner::resolve_favicon;
use crate::core::scanner::port_scanner::format_ports;
use crate::core::scanner::{
    GeoLocator, HostResolver, PageCrawler, PortProber, TechFingerprinter, TechOptions, WebProbe,
};
use crate::core::store::Store;
use crate::core::tracker::TaskTracker;

/// Where one pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Url(String),
    Ip(IpAddr),
}

/// The detached pipeline of an accepted request.
pub struct ScanHandle {
    pub execution_id: Uuid,
    pub task: JoinHandle<()>,
}

/// Bookkeeping shared by every target of one execution.
struct ScanContext {
    execution_id: Uuid,
    scheduled_task_id: Uuid,
    task_name: String,
    request: ScanRequest,
    targets: Vec<Target>,
}

/// Headline data taken from the first page rendered at depth 0.
#[derive(Debug, Default)]
struct Homepage {
    title: String,
    text: String,
    image: Option<String>,
    metadata: PageMetadata,
}

#[derive(Debug, Default)]
struct SiteCrawl {
    urls: Vec<String>,
    sitemap_xml: String,
    homepage: Option<Homepage>,
    all_text: String,
    sensitive_pages: Vec<SensitivePage>,
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    tracker: TaskTracker,
    crawler: PageCrawler,
    fingerprinter: TechFingerprinter,
    resolver: Arc<dyn HostResolver>,
    geo: Arc<dyn GeoLocator>,
    probe: Arc<dyn WebProbe>,
    ports: PortProber,
    config: ScannerConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        driver: Arc<dyn BrowserDriver>,
        resolver: Arc<dyn HostResolver>,
        geo: Arc<dyn GeoLocator>,
        probe: Arc<dyn WebProbe>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            tracker: TaskTracker::new(Arc::clone(&store)),
            crawler: PageCrawler::new(Arc::clone(&driver), config.clone()),
            fingerprinter: TechFingerprinter::new(driver, &config),
            ports: PortProber::new(config.probe_ports.clone(), config.port_timeout),
            store,
            resolver,
            geo,
            probe,
            config,
        }
    }

    /// Accepts a request and returns as soon as its execution record exists.
    ///
    /// # Arguments
    /// * `request` - A URL or an IP range plus crawl options.
    ///
    /// # Returns
    /// A `ScanOutcome` carrying either the new execution id or the reason the
    /// request was refused. Pipeline progress is read back through `task_execution`.
    pub async fn scan(&self, request: ScanRequest) -> ScanOutcome {
        match self.launch(request).await {
            Ok(handle) => ScanOutcome { task_execution_id: Some(handle.execution_id), error: None },
            Err(e) => {
                error!(error = %e, "Scan request rejected.");
                ScanOutcome { task_execution_id: None, error: Some(e.to_string()) }
            }
        }
    }

    /// Like `scan`, but hands back the pipeline so callers may await it.
    pub async fn launch(&self, request: ScanRequest) -> ScanResult<ScanHandle> {
        let targets = self.derive_targets(&request)?;
        let task = self.create_scheduled_task(&request).await?;
        let execution = self.tracker.create(Some(task.id)).await?;
        info!(
            task_execution_id = %execution.id,
            targets = targets.len(),
            depth = %request.crawl_depth,
            "Scan accepted."
        );

        let context = ScanContext {
            execution_id: execution.id,
            scheduled_task_id: task.id,
            task_name: task.name,
            request,
            targets,
        };
        let this = self.clone();
        let task = tokio::spawn(async move { this.supervise(context).await });
        Ok(ScanHandle { execution_id: execution.id, task })
    }

    pub async fn task_execution(&self, id: Uuid) -> ScanResult<TaskExecution> {
        self.tracker.find(id).await
    }

    /// Everything persisted for one execution.
    ///
    /// # Arguments
    /// * `id` - The task execution id returned by `scan`.
    ///
    /// # Returns
    /// The execution with its assets, their webpages and per-asset counts of API
    /// endpoints and associations, or `ExecutionNotFound`.
    pub async fn report(&self, id: Uuid) -> ScanResult<ScanReport> {
        let execution = self.tracker.find(id).await?;
        let mut assets = Vec::new();
        for asset in self.store.assets_for_execution(id).await? {
            let webpages = self.store.webpages_for_asset(asset.id).await?;
            let api_endpoints = self.store.api_endpoints_for_asset(asset.id).await?.len();
            let associations = self.store.associations_from(asset.id).await?.len();
            assets.push(AssetReport { asset, webpages, api_endpoints, associations });
        }
        Ok(ScanReport { execution, assets })
    }

    /// Numeric BFS bound for the requested tier.
    pub fn depth_bound(&self, request: &ScanRequest) -> u32 {
        match request.crawl_depth {
            CrawlDepth::Level1 => 0,
            CrawlDepth::Level2 => 1,
            CrawlDepth::Level3 => request.custom_crawl_depth.unwrap_or(self.config.default_custom_depth),
            CrawlDepth::Full => self.config.full_crawl_depth,
        }
    }

    /// A URL yields itself; an IP range yields 3 to 5 addresses sampled from the pool.
    pub fn derive_targets(&self, request: &ScanRequest) -> ScanResult<Vec<Target>> {
        let url = request.url.as_deref().map(str::trim).filter(|u| !u.is_empty());
        let ip_range = request.ip_range.as_deref().map(str::trim).filter(|r| !r.is_empty());

        if let Some(url) = url {
            let parsed = Url::parse(url).map_err(|e| ScanError::Validation(format!("invalid URL {url}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(ScanError::Validation(format!("unsupported URL {url}")));
            }
            return Ok(vec![Target::Url(url.to_string())]);
        }

        if let Some(range) = ip_range {
            info!(ip_range = range, "Sampling addresses for IP range.");
            let pool = &self.config.ip_pool;
            if pool.is_empty() {
                return Err(ScanError::Validation("no addresses configured for IP-range scans".into()));
            }
            let mut rng = rand::thread_rng();
            let count = rng.gen_range(3..=5).min(pool.len());
            return Ok(pool.choose_multiple(&mut rng, count).copied().map(Target::Ip).collect());
        }

        Err(ScanError::Validation("either a URL or an IP range is required".into()))
    }

    async fn create_scheduled_task(&self, request: &ScanRequest) -> ScanResult<ScheduledTask> {
        let now = Utc::now();
        let name = request
            .task_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Scan_{}", now.to_rfc3339_opts(SecondsFormat::Millis, true)));
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            name,
            description: request.description.clone(),
            domain: request.url.as_deref().map(domain_of).unwrap_or_default(),
            ip_range: request.ip_range.clone(),
            scan_rate: request.scan_rate.unwrap_or_default(),
            schedule_type: request.schedule_type.unwrap_or_default(),
            is_active: true,
            next_run_at: None,
            last_run_at: None,
            created_at: now,
        };
        Ok(self.store.create_scheduled_task(task).await?)
    }

    /// Runs the pipeline in its own task so that errors and panics both end in a failed record.
    async fn supervise(self, context: ScanContext) {
        let id = context.execution_id;
        let this = self.clone();
        match tokio::spawn(async move { this.perform(Arc::new(context)).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(task_execution_id = %id, error = %e, "Scan failed.");
                self.tracker.fail(id).await;
            }
            Err(e) => {
                error!(task_execution_id = %id, error = %e, "Scan task aborted.");
                self.tracker.fail(id).await;
            }
        }
    }

    /// Runs every target in its own task; a target that errors or panics only loses itself.
    async fn perform(&self, context: Arc<ScanContext>) -> ScanResult<()> {
        let runs = context.targets.iter().cloned().map(|target| {
            let this = self.clone();
            let context = Arc::clone(&context);
            tokio::spawn(async move { this.run_target(&context, &target).await })
        });
        let results = join_all(runs).await;

        let mut completed = 0;
        for (target, joined) in context.targets.iter().zip(results) {
            match joined {
                Ok(Ok(summary)) => {
                    debug!(ip = %summary.ip, pages = summary.crawled_urls.len(), "Target finished.");
                    completed += 1;
                }
                Ok(Err(e)) => warn!(task_execution_id = %context.execution_id, target = ?target, error = %e, "Target aborted."),
                Err(e) => error!(task_execution_id = %context.execution_id, target = ?target, error = %e, "Target task panicked."),
            }
        }
        if completed == 0 && !context.targets.is_empty() {
            return Err(ScanError::Pipeline("every target failed".into()));
        }

        self.tracker.finalize(context.execution_id, TaskStatus::Completed, Some(completed)).await?;
        info!(task_execution_id = %context.execution_id, assets = completed, "Scan completed.");

        if context.request.is_scheduled {
            self.advance_schedule(context.scheduled_task_id).await;
        }
        Ok(())
    }

    async fn advance_schedule(&self, scheduled_task_id: Uuid) {
        let task = match self.store.find_scheduled_task(scheduled_task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                warn!(scheduled_task_id = %scheduled_task_id, error = %e, "Could not load scheduled task.");
                return;
            }
        };
        let Some(interval) = task.schedule_type.interval() else {
            return;
        };
        let now = Utc::now();
        let next_run_at = now + interval;
        let updated = ScheduledTask { next_run_at: Some(next_run_at), last_run_at: Some(now), ..task };
        match self.store.update_scheduled_task(updated).await {
            Ok(_) => info!(scheduled_task_id = %scheduled_task_id, next_run_at = %next_run_at, "Schedule advanced."),
            Err(e) => warn!(scheduled_task_id = %scheduled_task_id, error = %e, "Could not advance schedule."),
        }
    }

    async fn run_target(&self, context: &ScanContext, target: &Target) -> ScanResult<TargetSummary> {
        let id = context.execution_id;
        let (ip, display_url, domain) = match target {
            Target::Url(url) => {
                let domain = domain_of(url);
                let ip = self.resolver.resolve(&domain).await?;
                (ip, url.clone(), domain)
            }
            Target::Ip(ip) => (*ip, format!("http://{ip}"), String::new()),
        };

        let mut asset = Asset::new(&display_url, &ip.to_string(), &domain);
        asset.task_name = context.task_name.clone();
        asset.task_execution_id = Some(id);
        let mut asset = self.store.upsert_asset(asset).await?;

        self.tracker.update_stage(id, format!("Scanning {display_url}")).await;
        let max_depth = self.depth_bound(&context.request);
        let crawl = self.crawl_site(context, &asset, max_depth).await;

        asset.sitemap_xml = Some(crawl.sitemap_xml.clone());
        let mut asset = self.store.update_asset(asset).await?;

        self.tracker.update_stage(id, format!("Fingerprinting {display_url}")).await;
        let options = TechOptions {
            headless: true,
            timeout: self.config.fingerprint_timeout,
            proxy: context.request.proxy().map(str::to_string),
        };
        let tech = match self.fingerprinter.identify(&display_url, options).await {
            Ok(inventory) => tech_report(&inventory),
            Err(e) => {
                warn!(url = %display_url, error = %e, "Fingerprinting failed.");
                String::new()
            }
        };

        self.tracker.update_stage(id, format!("Resolving favicon for {display_url}")).await;
        let favicon = resolve_favicon(self.probe.as_ref(), &display_url).await;

        self.tracker.update_stage(id, format!("Resolving geolocation for {display_url}")).await;
        let host = host_of(&display_url);
        let geolocation = match self.resolver.resolve(&host).await {
            Ok(ip) => self.geo.locate(ip).await,
            Err(e) => {
                warn!(host = %host, error = %e, "Geolocation lookup skipped.");
                crate::core::scanner::geo_scanner::UNKNOWN_LOCATION.to_string()
            }
        };

        self.tracker.update_stage(id, format!("Probing ports of {host}")).await;
        let open_ports = match self.resolver.resolve(&host).await {
            Ok(ip) => self.ports.probe(ip).await,
            Err(e) => {
                warn!(host = %host, error = %e, "Port probe skipped.");
                Vec::new()
            }
        };

        self.tracker.update_stage(id, format!("Aggregating results for {display_url}")).await;
        let associations = self.store.associations_from(asset.id).await.map(|a| a.len()).unwrap_or_default();
        let homepage = crawl.homepage.unwrap_or_default();
        let (keywords, score) = match_keywords(&context.request.value_keywords, &crawl.all_text);

        asset.name = homepage.title.clone();
        asset.description = headline_description(&homepage);
        asset.summary = format!("Site analysis: {}", homepage.title);
        asset.value_proposition_score = score;
        asset.keywords = keywords.clone();
        asset.tags = keywords;
        asset.network_topology = format!("Linked to {associations} assets on other domains");
        asset.tech_report = tech;
        asset.sensitive_pages = crawl.sensitive_pages;
        asset.geolocation = geolocation;
        asset.open_ports = format_ports(&open_ports);
        asset.image = homepage.image;
        asset.metadata = homepage.metadata;
        asset.favicon = favicon;
        let asset = self.store.update_asset(asset).await?;

        info!(url = %display_url, asset_id = %asset.id, open_ports = %asset.open_ports, "Target aggregated.");
        Ok(TargetSummary { ip: ip.to_string(), asset_id: asset.id, crawled_urls: crawl.urls, sitemap_xml: crawl.sitemap_xml })
    }

    /// Breadth-first walk from the asset's URL, one page at a time.
    async fn crawl_site(&self, context: &ScanContext, asset: &Asset, max_depth: u32) -> SiteCrawl {
        let id = context.execution_id;
        let proxy = context.request.proxy();
        let mut queue = VecDeque::from([(asset.url.clone(), 0u32)]);
        let mut visited = HashSet::new();
        let mut crawl = SiteCrawl::default();
        let mut seen_sensitive = HashSet::new();
        let mut captured: Vec<CapturedRequest> = Vec::new();

        while let Some((url, depth)) = queue.pop_front() {
            if depth > max_depth || !visited.insert(url.clone()) {
                continue;
            }
            crawl.urls.push(url.clone());

            self.tracker.update_stage(id, format!("Fetching metadata for {url}")).await;
            let mut metadata = self.probe.metadata(&url, context.request.extract_images).await;
            let og_image = metadata.remove("image_base64").filter(|image| !image.is_empty());

            self.tracker.update_stage(id, format!("Scanning content of {url}")).await;
            let page = match self.crawler.crawl(&url, proxy).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(url = %url, error = %e, "Page skipped.");
                    continue;
                }
            };

            if !crawl.all_text.is_empty() {
                crawl.all_text.push('\n');
            }
            crawl.all_text.push_str(&page.text);
            for sensitive in &page.sensitive_pages {
                if seen_sensitive.insert(sensitive.url.clone()) {
                    crawl.sensitive_pages.push(sensitive.clone());
                }
            }

            if crawl.homepage.is_none() && depth == 0 {
                crawl.homepage = Some(Homepage {
                    title: page.title.clone(),
                    text: page.text.clone(),
                    image: og_image.clone().or_else(|| page.screenshot.clone()),
                    metadata: metadata.clone(),
                });
            }

            let page_domain = domain_of(&url);
            for link in page.links.iter().filter(|link| domain_of(link) != page_domain) {
                if let Err(e) = self.associate(context, asset, &url, link).await {
                    warn!(source = %url, target = %link, error = %e, "Association not recorded.");
                }
            }

            let webpage = Webpage {
                id: Uuid::new_v4(),
                asset_id: asset.id,
                url: url.clone(),
                html_content: page.html_content.replace('\0', ""),
                content: page.text.replace('\0', ""),
                title: page.title.clone(),
                is_homepage: depth == 0,
                vulnerabilities: page.vulnerabilities_json(),
                metadata,
                image: page.screenshot.clone().or(og_image),
            };
            if let Err(e) = self.store.upsert_webpage(webpage).await {
                warn!(url = %url, error = %e, "Webpage not persisted.");
            }

            if depth < max_depth {
                queue.extend(page.links.iter().map(|link| (link.clone(), depth + 1)));
            }
            captured.extend(page.api_requests);
        }

        for request in captured {
            let endpoint = ApiEndpoint { id: Uuid::new_v4(), asset_id: asset.id, request };
            if let Err(e) = self.store.create_api_endpoint(endpoint).await {
                warn!(asset_id = %asset.id, error = %e, "API endpoint not persisted.");
            }
        }

        crawl.sitemap_xml = sitemap(&crawl.urls);
        info!(url = %asset.url, pages = crawl.urls.len(), "Crawl finished.");
        crawl
    }

    /// Records `source -> target`, creating the target asset on first sight.
    async fn associate(&self, context: &ScanContext, source: &Asset, source_url: &str, target_url: &str) -> ScanResult<()> {
        let target = match self.store.find_asset_by_url(target_url).await? {
            Some(existing) => existing,
            None => {
                let domain = domain_of(target_url);
                let ip = match self.resolver.resolve(&domain).await {
                    Ok(ip) => ip.to_string(),
                    Err(e) => {
                        debug!(domain = %domain, error = %e, "Associated domain did not resolve.");
                        String::new()
                    }
                };
                let mut asset = Asset::new(target_url, &ip, &domain);
                asset.task_execution_id = Some(context.execution_id);
                match self.store.create_asset(asset).await {
                    Ok(created) => created,
                    Err(StoreError::UniqueViolation { .. }) => self
                        .store
                        .find_asset_by_url(target_url)
                        .await?
                        .ok_or_else(|| ScanError::Pipeline(format!("asset {target_url} vanished")))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        debug!(source = %source_url, target = %target_url, "Recording association.");
        self.store
            .create_association(AssetAssociation {
                id: Uuid::new_v4(),
                source_asset_id: source.id,
                target_asset_id: target.id,
                source_url: source_url.to_string(),
                target_url: target_url.to_string(),
            })
            .await?;
        Ok(())
    }
}

fn domain_of(url: &str) -> String {
    Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default()
}

/// Host without IPv6 brackets, as handed to the resolver.
fn host_of(url: &str) -> String {
    domain_of(url).trim_start_matches('[').trim_end_matches(']').to_string()
}

fn headline_description(homepage: &Homepage) -> String {
    if let Some(description) = homepage.metadata.get("description").filter(|d| !d.is_empty()) {
        return description.clone();
    }
    if !homepage.text.is_empty() {
        return homepage.text.chars().take(255).collect();
    }
    homepage.title.clone()
}

/// Value keywords present in the crawled text, and the matched share as 0 to 100.
fn match_keywords(keywords: &[String], text: &str) -> (String, u8) {
    let haystack = text.to_lowercase();
    let wanted: Vec<&String> = keywords.iter().filter(|k| !k.trim().is_empty()).collect();
    let found: Vec<&str> = wanted
        .iter()
        .filter(|k| haystack.contains(&k.trim().to_lowercase()))
        .map(|k| k.trim())
        .collect();
    let score = if wanted.is_empty() { 0 } else { (found.len() * 100 / wanted.len()) as u8 };
    (found.join(", "), score)
}

fn sitemap(urls: &[String]) -> String {
    let entries: Vec<String> = urls.iter().map(|u| format!("  <url><loc>{}</loc></url>", xml_escape(u))).collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n{}\n</urlset>",
        entries.join("\n")
    )
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::core::browser::fake::{FakeDriver, FakePage};
    use crate::core::models::{ScheduleType, Severity};
    use crate::core::scanner::dns_scanner::fake::StaticResolver;
    use crate::core::scanner::geo_scanner::fake::FixedLocator;
    use crate::core::scanner::metadata_scanner::fake::FakeProbe;
    use crate::core::store::MemoryStore;
    use crate::core::tracker::FAILED_STAGE;

    const SAFE: &[(&str, &str)] = &[("x-frame-options", "DENY"), ("content-security-policy", "default-src 'self'")];

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<MemoryStore>,
        visits: Arc<Mutex<Vec<String>>>,
    }

    fn test_config() -> ScannerConfig {
        ScannerConfig { probe_ports: Vec::new(), port_timeout: Duration::from_millis(100), ..Default::default() }
    }

    fn harness_with(driver: FakeDriver, resolver: StaticResolver, probe: FakeProbe, config: ScannerConfig) -> Harness {
        harness_located(driver, resolver, probe, Arc::new(FixedLocator("Testland")), config)
    }

    fn harness_located(
        driver: FakeDriver,
        resolver: StaticResolver,
        probe: FakeProbe,
        geo: Arc<dyn GeoLocator>,
        config: ScannerConfig,
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let visits = Arc::clone(&driver.visits);
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(driver), Arc::new(resolver), geo, Arc::new(probe), config);
        Harness { orchestrator, store, visits }
    }

    /// Locator whose lookup for one address panics.
    struct PanickingLocator(IpAddr);

    #[async_trait::async_trait]
    impl GeoLocator for PanickingLocator {
        async fn locate(&self, ip: IpAddr) -> String {
            if ip == self.0 {
                panic!("geolocation backend crashed for {ip}");
            }
            "Testland".to_string()
        }
    }

    /// Execution bookkeeping for an explicit list of targets.
    async fn context_for(h: &Harness, request: ScanRequest, targets: Vec<Target>) -> ScanContext {
        let task = h.orchestrator.create_scheduled_task(&request).await.unwrap();
        let execution = h.orchestrator.tracker.create(Some(task.id)).await.unwrap();
        ScanContext {
            execution_id: execution.id,
            scheduled_task_id: task.id,
            task_name: task.name,
            request,
            targets,
        }
    }

    fn harness(driver: FakeDriver) -> Harness {
        let resolver = StaticResolver::default()
            .with("example.com", "127.0.0.1")
            .with("a.example", "127.0.0.1")
            .with("b.example", "127.0.0.2");
        harness_with(driver, resolver, FakeProbe::default(), test_config())
    }

    fn page(url: &str, body: &str) -> FakePage {
        FakePage::html(url, &format!("<html><head><title>{url}</title></head><body>{body}</body></html>"), SAFE)
    }

    async fn run(h: &Harness, request: ScanRequest) -> TaskExecution {
        let handle = h.orchestrator.launch(request).await.unwrap();
        handle.task.await.unwrap();
        h.orchestrator.task_execution(handle.execution_id).await.unwrap()
    }

    /// Visits made by the crawler; the fingerprinter revisits the homepage once more.
    fn crawled(h: &Harness) -> Vec<String> {
        let mut visits = h.visits.lock().unwrap().clone();
        visits.pop();
        visits
    }

    #[tokio::test]
    async fn level1_scan_stores_exactly_the_homepage() {
        let seed = "https://example.com/";
        let h = harness(FakeDriver::default().with_page(seed, page(seed, "<a href='/about'>About</a>")));
        let execution = run(&h, ScanRequest::for_url(seed, CrawlDepth::Level1)).await;

        assert_eq!(execution.status, TaskStatus::Completed);
        assert_eq!(execution.assets_found, 1);
        assert!(execution.duration.is_some());

        let asset = h.store.find_asset_by_url(seed).await.unwrap().unwrap();
        let pages = h.store.webpages_for_asset(asset.id).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].is_homepage);
        assert!(h.store.associations_from(asset.id).await.unwrap().is_empty());
        assert_eq!(asset.open_ports, "");
        assert_eq!(asset.geolocation, "Testland");
        assert_eq!(asset.ip, "127.0.0.1");
        assert_eq!(asset.name, seed);
        assert!(asset.sitemap_xml.unwrap().contains("<loc>https://example.com/</loc>"));
    }

    #[tokio::test]
    async fn crawl_never_goes_past_the_depth_bound() {
        let (a, b, c) = ("https://a.example/", "https://a.example/b", "https://a.example/c");
        let driver = FakeDriver::default()
            .with_page(a, page(a, "<a href='/b'>b</a>"))
            .with_page(b, page(b, "<a href='/c'>c</a>"))
            .with_page(c, page(c, "<p>leaf</p>"));
        let h = harness(driver);
        run(&h, ScanRequest::for_url(a, CrawlDepth::Level2)).await;

        assert_eq!(crawled(&h), vec![a, b]);
        let asset = h.store.find_asset_by_url(a).await.unwrap().unwrap();
        let mut urls: Vec<_> = h.store.webpages_for_asset(asset.id).await.unwrap().into_iter().map(|p| p.url).collect();
        urls.sort();
        assert_eq!(urls, vec![a, b]);
    }

    #[tokio::test]
    async fn custom_depth_applies_to_level3() {
        let (a, b, c) = ("https://a.example/", "https://a.example/b", "https://a.example/c");
        let driver = FakeDriver::default()
            .with_page(a, page(a, "<a href='/b'>b</a>"))
            .with_page(b, page(b, "<a href='/c'>c</a>"))
            .with_page(c, page(c, "<p>leaf</p>"));
        let h = harness(driver);
        let request = ScanRequest { custom_crawl_depth: Some(2), ..ScanRequest::for_url(a, CrawlDepth::Level3) };
        run(&h, request).await;
        assert_eq!(crawled(&h), vec![a, b, c]);
    }

    #[tokio::test]
    async fn every_url_is_fetched_at_most_once() {
        let (a, b) = ("https://a.example/", "https://a.example/b");
        let driver = FakeDriver::default()
            .with_page(a, page(a, "<a href='/b'>b</a><a href='/'>home</a>"))
            .with_page(b, page(b, "<a href='/'>home</a><a href='/b'>self</a>"));
        let h = harness(driver);
        run(&h, ScanRequest::for_url(a, CrawlDepth::Full)).await;
        assert_eq!(crawled(&h), vec![a, b]);
    }

    #[tokio::test]
    async fn only_cross_domain_links_become_associations() {
        let a = "https://a.example/";
        let body = "<a href='/local'>local</a><a href='https://b.example/x'>partner</a>";
        let h = harness(FakeDriver::default().with_page(a, page(a, body)));
        run(&h, ScanRequest::for_url(a, CrawlDepth::Level1)).await;

        let source = h.store.find_asset_by_url(a).await.unwrap().unwrap();
        let edges = h.store.associations_from(source.id).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_url, a);
        assert_eq!(edges[0].target_url, "https://b.example/x");

        let target = h.store.find_asset_by_url("https://b.example/x").await.unwrap().unwrap();
        assert_eq!(edges[0].target_asset_id, target.id);
        assert_eq!(target.domain, "b.example");
        assert_eq!(target.ip, "127.0.0.2");
        assert!(h.store.find_asset_by_url("https://a.example/local").await.unwrap().is_none());
        assert_eq!(source.network_topology, "Linked to 1 assets on other domains");
    }

    #[tokio::test]
    async fn unresolvable_seed_fails_the_execution() {
        let h = harness(FakeDriver::default());
        let execution = run(&h, ScanRequest::for_url("https://nowhere.invalid/", CrawlDepth::Level1)).await;
        assert_eq!(execution.status, TaskStatus::Failed);
        assert_eq!(execution.stage, FAILED_STAGE);
        assert!(execution.end_time.is_some());
        assert!(h.visits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_unresolvable_target_does_not_fail_the_others() {
        let (good, bad) = ("https://a.example/", "https://nowhere.invalid/");
        let h = harness(FakeDriver::default().with_page(good, page(good, "<p>up</p>")));
        let targets = vec![Target::Url(bad.into()), Target::Url(good.into())];
        let context = context_for(&h, ScanRequest::for_url(good, CrawlDepth::Level1), targets).await;
        let id = context.execution_id;
        h.orchestrator.clone().supervise(context).await;

        let execution = h.orchestrator.task_execution(id).await.unwrap();
        assert_eq!(execution.status, TaskStatus::Completed);
        assert_eq!(execution.assets_found, 1);
        let assets = h.store.assets_for_execution(id).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].url, good);
    }

    #[tokio::test]
    async fn a_panicking_target_only_loses_itself() {
        let pool: Vec<IpAddr> = ["10.0.0.1", "10.0.0.2", "10.0.0.3"].iter().map(|ip| ip.parse().unwrap()).collect();
        let config = ScannerConfig { ip_pool: pool.clone(), ..test_config() };
        let h = harness_located(
            FakeDriver::default(),
            StaticResolver::default(),
            FakeProbe::default(),
            Arc::new(PanickingLocator(pool[1])),
            config,
        );
        let execution = run(&h, ScanRequest::for_ip_range("10.0.0.0/24", CrawlDepth::Level1)).await;

        assert_eq!(execution.status, TaskStatus::Completed);
        assert_eq!(execution.assets_found, 2);
        let located: Vec<_> = h
            .store
            .assets_for_execution(execution.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.geolocation == "Testland")
            .map(|a| a.ip)
            .collect();
        assert_eq!(located.len(), 2);
        assert!(!located.contains(&"10.0.0.2".to_string()));
    }

    #[tokio::test]
    async fn nul_bytes_are_stripped_before_storage() {
        let seed = "https://example.com/";
        let mut home = page(seed, "<p>a\0b</p>");
        home.visible_text = "a\0b".into();
        let h = harness(FakeDriver::default().with_page(seed, home));
        run(&h, ScanRequest::for_url(seed, CrawlDepth::Level1)).await;

        let asset = h.store.find_asset_by_url(seed).await.unwrap().unwrap();
        let pages = h.store.webpages_for_asset(asset.id).await.unwrap();
        assert!(!pages[0].html_content.contains('\0'));
        assert!(pages[0].html_content.contains("<p>ab</p>"));
        assert_eq!(pages[0].content, "ab");
    }

    #[tokio::test]
    async fn captured_api_traffic_is_stored_per_asset() {
        use crate::core::browser::fake;

        let seed = "https://example.com/";
        let mut home = page(seed, "<p>app</p>");
        home.traffic = vec![
            (fake::request("7", "https://example.com/api/items", "POST", Some("application/json"), Some("{}")), None),
            (
                fake::response("7", "https://example.com/api/items", 201, &[("content-type", "application/json")]),
                Some(r#"{"ok":true}"#.to_string()),
            ),
        ];
        let h = harness(FakeDriver::default().with_page(seed, home));
        let execution = run(&h, ScanRequest::for_url(seed, CrawlDepth::Level1)).await;

        let asset = h.store.find_asset_by_url(seed).await.unwrap().unwrap();
        let endpoints = h.store.api_endpoints_for_asset(asset.id).await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].request.method, "POST");
        assert_eq!(endpoints[0].request.status, Some(201));
        assert_eq!(endpoints[0].request.from_page, seed);

        let report = h.orchestrator.report(execution.id).await.unwrap();
        assert_eq!(report.assets[0].api_endpoints, 1);
    }

    #[tokio::test]
    async fn scan_returns_before_the_pipeline_and_polling_sees_the_end() {
        let seed = "https://example.com/";
        let h = harness(FakeDriver::default().with_page(seed, page(seed, "<p>hi</p>")));
        let outcome = h.orchestrator.scan(ScanRequest::for_url(seed, CrawlDepth::Level1)).await;
        assert!(outcome.error.is_none());
        let id = outcome.task_execution_id.unwrap();

        let mut execution = h.orchestrator.task_execution(id).await.unwrap();
        for _ in 0..200 {
            if execution.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            execution = h.orchestrator.task_execution(id).await.unwrap();
        }
        assert_eq!(execution.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn invalid_requests_are_reported_synchronously() {
        let h = harness(FakeDriver::default());
        let outcome = h.orchestrator.scan(ScanRequest::default()).await;
        assert!(outcome.task_execution_id.is_none());
        assert!(outcome.error.unwrap().contains("URL or an IP range"));

        let outcome = h.orchestrator.scan(ScanRequest::for_url("ftp://example.com", CrawlDepth::Level1)).await;
        assert!(outcome.error.is_some());
        assert!(h.store.snapshot().await.task_executions.is_empty());
    }

    #[tokio::test]
    async fn ip_range_scans_three_to_five_sampled_addresses() {
        let h = harness(FakeDriver::default());
        let execution = run(&h, ScanRequest::for_ip_range("192.168.1.0/24", CrawlDepth::Level1)).await;

        assert_eq!(execution.status, TaskStatus::Completed);
        assert!((3..=5).contains(&execution.assets_found));
        let assets = h.store.assets_for_execution(execution.id).await.unwrap();
        assert_eq!(assets.len(), execution.assets_found);
        for asset in assets {
            assert_eq!(asset.url, format!("http://{}", asset.ip));
            assert!(asset.domain.is_empty());
            let pages = h.store.webpages_for_asset(asset.id).await.unwrap();
            assert_eq!(pages[0].title, "Crawl Failed");
            assert_eq!(pages[0].parsed_vulnerabilities()[0].severity, Severity::Critical);
        }
    }

    #[tokio::test]
    async fn unlaunchable_browser_skips_pages_but_completes() {
        let seed = "https://example.com/";
        let driver = FakeDriver { fail_launch: true, ..Default::default() };
        let h = harness(driver);
        let execution = run(&h, ScanRequest::for_url(seed, CrawlDepth::Level2)).await;
        assert_eq!(execution.status, TaskStatus::Completed);
        let asset = h.store.find_asset_by_url(seed).await.unwrap().unwrap();
        assert!(h.store.webpages_for_asset(asset.id).await.unwrap().is_empty());
        assert!(asset.tech_report.is_empty());
    }

    #[tokio::test]
    async fn scheduled_scans_advance_their_next_run() {
        let seed = "https://example.com/";
        let h = harness(FakeDriver::default().with_page(seed, page(seed, "<p>hi</p>")));
        let request = ScanRequest {
            is_scheduled: true,
            schedule_type: Some(ScheduleType::Weekly),
            task_name: Some("weekly".into()),
            ..ScanRequest::for_url(seed, CrawlDepth::Level1)
        };
        let execution = run(&h, request).await;

        let task = h.store.find_scheduled_task(execution.scheduled_task_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(task.name, "weekly");
        assert_eq!(task.domain, "example.com");
        let (next, last) = (task.next_run_at.unwrap(), task.last_run_at.unwrap());
        assert_eq!((next - last).num_days(), 7);
    }

    #[tokio::test]
    async fn one_shot_scans_keep_their_schedule_empty() {
        let seed = "https://example.com/";
        let h = harness(FakeDriver::default().with_page(seed, page(seed, "<p>hi</p>")));
        let execution = run(&h, ScanRequest::for_url(seed, CrawlDepth::Level1)).await;
        let task = h.store.find_scheduled_task(execution.scheduled_task_id.unwrap()).await.unwrap().unwrap();
        assert!(task.name.starts_with("Scan_"));
        assert!(task.next_run_at.is_none());
    }

    #[tokio::test]
    async fn aggregation_fills_the_headline_fields() {
        let seed = "https://example.com/";
        let mut home = page(seed, "<a href='/admin'>Admin</a><a href='/admin'>Admin again</a>");
        home.visible_text = "Finance portal for the region".into();
        let probe = FakeProbe {
            metadata: [(seed.to_string(), PageMetadata::from([("description".to_string(), "Example corp".to_string())]))]
                .into(),
            existing: ["https://example.com/favicon.png".to_string()].into(),
            ..Default::default()
        };
        let resolver = StaticResolver::default().with("example.com", "127.0.0.1");
        let h = harness_with(FakeDriver::default().with_page(seed, home), resolver, probe, test_config());
        let request = ScanRequest {
            value_keywords: vec!["finance".into(), "government".into()],
            ..ScanRequest::for_url(seed, CrawlDepth::Level1)
        };
        run(&h, request).await;

        let asset = h.store.find_asset_by_url(seed).await.unwrap().unwrap();
        assert_eq!(asset.description, "Example corp");
        assert_eq!(asset.summary, format!("Site analysis: {seed}"));
        assert_eq!(asset.keywords, "finance");
        assert_eq!(asset.value_proposition_score, 50);
        assert_eq!(asset.favicon.as_deref(), Some("https://example.com/favicon.png"));
        assert!(asset.image.unwrap().starts_with("data:image/png;base64,"));
        assert_eq!(asset.sensitive_pages.len(), 1);
        assert_eq!(asset.sensitive_pages[0].kind, "Admin/Console Page");
        assert!(asset.tech_report.contains("Website Technology Report"));
    }

    #[tokio::test]
    async fn report_collects_pages_and_findings() {
        let seed = "https://example.com/";
        let home = FakePage::html(seed, "<html><body><p>hi</p></body></html>", &[("x-frame-options", "DENY")]);
        let h = harness(FakeDriver::default().with_page(seed, home));
        let execution = run(&h, ScanRequest::for_url(seed, CrawlDepth::Level1)).await;

        let report = h.orchestrator.report(execution.id).await.unwrap();
        assert_eq!(report.assets.len(), 1);
        assert_eq!(report.assets[0].webpages.len(), 1);
        let kinds: Vec<_> = report.vulnerabilities().map(|(_, v)| v.kind).collect();
        assert_eq!(kinds, vec!["Missing CSP Header"]);
    }

    #[tokio::test]
    async fn unknown_execution_is_not_found() {
        let h = harness(FakeDriver::default());
        assert!(matches!(h.orchestrator.report(Uuid::new_v4()).await, Err(ScanError::ExecutionNotFound(_))));
    }

    #[test]
    fn keyword_matching_is_case_insensitive() {
        let (found, score) = match_keywords(&["Bank".into(), "Crypto".into(), " ".into()], "the BANK of things");
        assert_eq!(found, "Bank");
        assert_eq!(score, 50);
        assert_eq!(match_keywords(&[], "anything"), (String::new(), 0));
    }

    #[test]
    fn sitemap_escapes_entities() {
        let xml = sitemap(&["https://a.example/?a=1&b=2".to_string()]);
        assert!(xml.contains("<loc>https://a.example/?a=1&amp;b=2</loc>"));
        assert!(xml.starts_with("<?xml"));
        assert!(xml.ends_with("</urlset>"));
    }
}
