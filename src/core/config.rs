// src/core/config.rs

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::logging::PROJECT_NAME;

/// Ports probed once per target.
pub const DEFAULT_PROBE_PORTS: &[u16] = &[21, 22, 80, 443, 3306, 8080, 5432, 6379];

/// Placeholder pool that IP-range targets are sampled from.
pub const DEFAULT_IP_POOL: &[&str] =
    &["192.168.1.23", "192.168.1.58", "192.168.1.102", "192.168.1.174", "192.168.1.219"];

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36";

/// Runtime knobs of the scan engine.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub user_agent: String,
    pub navigation_timeout: Duration,
    /// How long the traffic must stay silent before a page counts as settled.
    pub network_idle: Duration,
    pub fingerprint_timeout: Duration,
    pub http_timeout: Duration,
    pub port_timeout: Duration,
    pub probe_ports: Vec<u16>,
    pub geolocation_endpoint: String,
    pub response_body_cap: usize,
    pub full_crawl_depth: u32,
    pub default_custom_depth: u32,
    pub ip_pool: Vec<IpAddr>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            navigation_timeout: Duration::from_secs(30),
            network_idle: Duration::from_millis(500),
            fingerprint_timeout: Duration::from_secs(30),
            http_timeout: Duration::from_secs(15),
            port_timeout: Duration::from_millis(1000),
            probe_ports: DEFAULT_PROBE_PORTS.to_vec(),
            geolocation_endpoint: "http://ip-api.com/json".to_string(),
            response_body_cap: 1024 * 1024,
            full_crawl_depth: 99,
            default_custom_depth: 2,
            ip_pool: DEFAULT_IP_POOL.iter().filter_map(|ip| ip.parse().ok()).collect(),
        }
    }
}

impl ScannerConfig {
    /// Defaults overlaid with `<PROJECT>_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("NAV_TIMEOUT_SECS") {
            config.navigation_timeout = Duration::from_secs(secs);
            config.fingerprint_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("PORT_TIMEOUT_MS") {
            config.port_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(endpoint) = env_var("GEO_ENDPOINT") {
            config.geolocation_endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(user_agent) = env_var("USER_AGENT") {
            config.user_agent = user_agent;
        }
        if let Some(ports) = env_var("PORTS") {
            let parsed: Vec<u16> = ports.split(',').filter_map(|p| p.trim().parse().ok()).collect();
            if parsed.is_empty() {
                warn!(value = %ports, "Ignoring unparseable port list.");
            } else {
                config.probe_ports = parsed;
            }
        }

        config
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}_{}", PROJECT_NAME.as_str(), suffix))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(suffix: &str) -> Option<T> {
    let raw = env_var(suffix)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = suffix, value = %raw, "Ignoring unparseable configuration value.");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_probe_contract() {
        let config = ScannerConfig::default();
        assert_eq!(config.probe_ports, vec![21, 22, 80, 443, 3306, 8080, 5432, 6379]);
        assert_eq!(config.response_body_cap, 1_048_576);
        assert_eq!(config.ip_pool.len(), 5);
        assert_eq!(config.full_crawl_depth, 99);
    }
}
