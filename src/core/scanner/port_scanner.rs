// src/core/scanner/port_scanner.rs

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Concurrent TCP-connect probe over a fixed port list.
#[derive(Debug, Clone)]
pub struct PortProber {
    ports: Vec<u16>,
    timeout: Duration,
}

impl PortProber {
    pub fn new(ports: Vec<u16>, timeout: Duration) -> Self {
        Self { ports, timeout }
    }

    /// Attempts a TCP connect to every configured port at once, each under its own timeout.
    ///
    /// # Arguments
    /// * `ip` - The address to probe.
    ///
    /// # Returns
    /// The open ports, in configuration order.
    pub async fn probe(&self, ip: IpAddr) -> Vec<u16> {
        info!(%ip, ports = self.ports.len(), "Probing ports.");
        let probes = self.ports.iter().map(|&port| probe_port(SocketAddr::new(ip, port), self.timeout));
        let open: Vec<u16> = join_all(probes)
            .await
            .into_iter()
            .zip(&self.ports)
            .filter_map(|(is_open, &port)| is_open.then_some(port))
            .collect();
        info!(%ip, open = ?open, "Port probe finished.");
        open
    }
}

async fn probe_port(addr: SocketAddr, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "Port closed.");
            false
        }
        Err(_) => {
            debug!(%addr, "Port probe timed out.");
            false
        }
    }
}

/// Comma-separated list stored on the asset; empty when nothing answered.
pub fn format_ports(ports: &[u16]) -> String {
    ports.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")
}
