// src/core/scanner/dns_scanner.rs

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use crate::core::error::{ScanError, ScanResult};

/// Hostname to address lookup.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolves a host to one address.
    ///
    /// # Arguments
    /// * `host` - A hostname or IP literal, optionally in IPv6 brackets.
    ///
    /// # Returns
    /// The address to scan, or `ScanError::Resolution` when the lookup yields nothing.
    async fn resolve(&self, host: &str) -> ScanResult<IpAddr>;
}

/// Resolver backed by hickory, using the system configuration when it can be read.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "System resolver configuration unavailable; using defaults.");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for DnsResolver {
    /// IP literals resolve to themselves. IPv4 answers are preferred.
    async fn resolve(&self, host: &str) -> ScanResult<IpAddr> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        debug!(host, "Resolving host.");
        let lookup = self.resolver.lookup_ip(host).await.map_err(|e| ScanError::Resolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        let addresses: Vec<IpAddr> = lookup.iter().collect();
        addresses
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addresses.first())
            .copied()
            .ok_or_else(|| ScanError::Resolution { host: host.to_string(), reason: "no addresses".into() })
    }
}
