// src/core/scanner/mod.rs

// Every probe and detector the orchestrator drives.
pub mod content_scanner;
pub mod dns_scanner;
pub mod fingerprint_scanner;
pub mod geo_scanner;
pub mod headers_scanner;
pub mod metadata_scanner;
pub mod page_crawler;
pub mod port_scanner;
pub mod sensitive_pages;

pub use dns_scanner::{DnsResolver, HostResolver};
pub use fingerprint_scanner::{TechFingerprinter, TechOptions};
pub use geo_scanner::{GeoLocator, IpApiLocator};
pub use metadata_scanner::{HttpProbe, WebProbe};
pub use page_crawler::{PageCrawl, PageCrawler, PageStatus};
pub use port_scanner::PortProber;
