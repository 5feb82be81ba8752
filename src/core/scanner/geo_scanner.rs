// src/core/scanner/geo_scanner.rs

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::error::ScanResult;

/// Value stored when the location cannot be determined.
pub const UNKNOWN_LOCATION: &str = "unknown";

/// IP geolocation lookup. Never fails: anything unexpected becomes `"unknown"`.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> String;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
}

impl IpApiResponse {
    fn render(&self) -> Option<String> {
        if self.status != "success" {
            return None;
        }
        let mut location = self.country.clone();
        for part in [&self.region_name, &self.city] {
            if !part.is_empty() {
                location.push_str(", ");
                location.push_str(part);
            }
        }
        Some(location)
    }
}

/// Client for an ip-api.com compatible `GET <endpoint>/<ip>` JSON service.
pub struct IpApiLocator {
    client: reqwest::Client,
    endpoint: String,
}

impl IpApiLocator {
    pub fn new(endpoint: &str, timeout: Duration) -> ScanResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint: endpoint.trim_end_matches('/').to_string() })
    }

    async fn lookup(&self, ip: IpAddr) -> ScanResult<IpApiResponse> {
        let url = format!("{}/{}", self.endpoint, ip);
        debug!(url = %url, "Requesting geolocation.");
        Ok(self.client.get(&url).send().await?.error_for_status()?.json().await?)
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn locate(&self, ip: IpAddr) -> String {
        match self.lookup(ip).await {
            Ok(response) => response.render().unwrap_or_else(|| {
                debug!(%ip, status = %response.status, "Geolocation lookup unsuccessful.");
                UNKNOWN_LOCATION.to_string()
            }),
            Err(e) => {
                warn!(%ip, error = %e, "Geolocation lookup failed.");
                UNKNOWN_LOCATION.to_string()
            }
        }
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;

    /// Always answers with the same location.
    pub struct FixedLocator(pub &'static str);

    #[async_trait]
    impl GeoLocator for FixedLocator {
        async fn locate(&self, _ip: IpAddr) -> String {
            self.0.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ScanError;

    fn parse(json: &str) -> IpApiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn successful_answers_join_the_present_parts() {
        let full = parse(r#"{"status":"success","country":"Germany","regionName":"Hesse","city":"Frankfurt"}"#);
        assert_eq!(full.render().unwrap(), "Germany, Hesse, Frankfurt");
        let partial = parse(r#"{"status":"success","country":"Iceland","regionName":"","city":""}"#);
        assert_eq!(partial.render().unwrap(), "Iceland");
    }

    #[test]
    fn failed_answers_render_nothing() {
        let failed = parse(r#"{"status":"fail","message":"private range"}"#);
        assert!(failed.render().is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_unknown() {
        let locator = IpApiLocator::new("http://127.0.0.1:9", Duration::from_millis(300)).unwrap();
        let ip = "8.8.8.8".parse().unwrap();
        assert!(matches!(locator.lookup(ip).await, Err(ScanError::Http(_))));
        assert_eq!(locator.locate(ip).await, UNKNOWN_LOCATION);
    }
}
