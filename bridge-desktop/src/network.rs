//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::time::Duration;
use tracing::debug;

/// Reachability probe settings.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// `host:port` that must accept a TCP connection for the path to count as satisfied
    pub address: String,
    /// How long a single probe may take
    pub timeout: Duration,
    /// Delay between probes on the change stream
    pub interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            address: "8.8.8.8:53".to_string(),
            timeout: Duration::from_secs(5),
            interval: Duration::from_secs(5),
        }
    }
}

/// Desktop network monitor implementation
///
/// Desktop operating systems do not expose one portable path-monitoring API,
/// so this monitor probes reachability with a TCP connect. A successful probe
/// reports a connected path over [`NetworkType::Other`], which the core
/// classifies as an unknown interface.
#[derive(Debug, Clone, Default)]
pub struct DesktopNetworkMonitor {
    config: ProbeConfig,
}

impl DesktopNetworkMonitor {
    /// Create a new network monitor
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ProbeConfig) -> Self {
        Self { config }
    }

    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            self.config.timeout,
            tokio::net::TcpStream::connect(self.config.address.as_str()),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) | Err(_) => NetworkStatus::Disconnected,
        }
    }

    async fn probe(&self) -> NetworkInfo {
        let status = self.check_connectivity().await;
        debug!(status = ?status, address = %self.config.address, "Network probe finished");

        match status {
            NetworkStatus::Connected => NetworkInfo::connected(vec![NetworkType::Other]),
            _ => NetworkInfo::disconnected(),
        }
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        Ok(self.probe().await)
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(DesktopNetworkChangeStream {
            monitor: self.clone(),
            last: None,
        }))
    }
}

/// Polling stream: yields the first snapshot immediately, then only changes.
struct DesktopNetworkChangeStream {
    monitor: DesktopNetworkMonitor,
    last: Option<NetworkInfo>,
}

#[async_trait]
impl NetworkChangeStream for DesktopNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            if self.last.is_some() {
                tokio::time::sleep(self.monitor.config.interval).await;
            }

            let info = self.monitor.probe().await;
            if self.last.as_ref() != Some(&info) {
                self.last = Some(info.clone());
                return Some(info);
            }
        }
    }
}
