//! Network Monitoring Abstraction
//!
//! The platform's path-monitoring primitive. Implementations report raw path
//! snapshots; interpreting them (interface precedence, transition edges) is
//! the job of the connectivity monitor in the core.

use async_trait::async_trait;

use crate::error::Result;

/// Network interface type reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkType {
    /// WiFi connection
    WiFi,
    /// Cellular/mobile data connection
    Cellular,
    /// Ethernet connection
    Ethernet,
    /// Other or unknown connection type
    Other,
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Connected to network
    Connected,
    /// Not connected to any network
    Disconnected,
    /// Connection status unknown or indeterminate
    Indeterminate,
}

/// One path snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    /// Interface types the active path uses, in the order the platform lists them.
    pub interfaces: Vec<NetworkType>,
    /// Whether the OS considers the path expensive (cellular, hotspot)
    pub is_expensive: bool,
    /// Whether the OS asked apps to reduce data usage on this path
    pub is_constrained: bool,
}

impl NetworkInfo {
    /// Snapshot for a path with no usable interface.
    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            interfaces: Vec::new(),
            is_expensive: false,
            is_constrained: false,
        }
    }

    /// Snapshot for a satisfied path over the given interfaces.
    pub fn connected(interfaces: Vec<NetworkType>) -> Self {
        Self {
            status: NetworkStatus::Connected,
            interfaces,
            is_expensive: false,
            is_constrained: false,
        }
    }

    pub fn with_expensive(mut self, expensive: bool) -> Self {
        self.is_expensive = expensive;
        self
    }

    pub fn with_constrained(mut self, constrained: bool) -> Self {
        self.is_constrained = constrained;
        self
    }
}

/// Network monitor trait
///
/// Provides network connectivity information to allow the core to:
/// - Defer queued mutations while offline
/// - Report offline health to the UI
/// - Replay pending work as soon as the path is satisfied again
///
/// # Platform Support
///
/// - **Desktop**: reachability probe (see `bridge-desktop`)
/// - **iOS**: `NWPathMonitor`
/// - **Android**: `ConnectivityManager`
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::NetworkMonitor;
///
/// async fn should_replay(monitor: &dyn NetworkMonitor) -> bool {
///     monitor.is_connected().await
/// }
/// ```
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                ..
            })
        )
    }

    /// Subscribe to network status changes
    ///
    /// Returns a stream of path snapshots. Implementations should emit an
    /// event whenever the path changes.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Stream of network status changes
#[async_trait]
pub trait NetworkChangeStream: Send {
    /// Get the next network info update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<NetworkInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_info() {
        let info = NetworkInfo::connected(vec![NetworkType::WiFi]).with_expensive(true);

        assert_eq!(info.status, NetworkStatus::Connected);
        assert_eq!(info.interfaces, vec![NetworkType::WiFi]);
        assert!(info.is_expensive);
        assert!(!info.is_constrained);
    }

    #[test]
    fn test_disconnected_has_no_interfaces() {
        let info = NetworkInfo::disconnected();
        assert_eq!(info.status, NetworkStatus::Disconnected);
        assert!(info.interfaces.is_empty());
    }
}
