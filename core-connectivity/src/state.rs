use bridge_traits::{NetworkInfo, NetworkStatus, NetworkType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified kind of the active interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    Wifi,
    Cellular,
    Wired,
    Unknown,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Wifi => "wifi",
            InterfaceKind::Cellular => "cellular",
            InterfaceKind::Wired => "wired",
            InterfaceKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the interface kind with precedence wifi > cellular > wired > unknown.
///
/// The order the platform lists interfaces in does not matter: a path that
/// uses both wifi and cellular is wifi.
pub fn classify(interfaces: &[NetworkType]) -> InterfaceKind {
    const PRECEDENCE: [(NetworkType, InterfaceKind); 3] = [
        (NetworkType::WiFi, InterfaceKind::Wifi),
        (NetworkType::Cellular, InterfaceKind::Cellular),
        (NetworkType::Ethernet, InterfaceKind::Wired),
    ];

    PRECEDENCE
        .iter()
        .find(|(network_type, _)| interfaces.contains(network_type))
        .map(|(_, kind)| *kind)
        .unwrap_or(InterfaceKind::Unknown)
}

/// Current reachability as seen by the rest of the core.
///
/// Never persisted. A fresh process starts from [`ConnectivityState::offline`]
/// until the first path snapshot arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_connected: bool,
    pub interface_kind: InterfaceKind,
    pub is_expensive: bool,
    pub is_constrained: bool,
}

impl ConnectivityState {
    pub fn offline() -> Self {
        Self {
            is_connected: false,
            interface_kind: InterfaceKind::Unknown,
            is_expensive: false,
            is_constrained: false,
        }
    }

    pub fn online(interface_kind: InterfaceKind) -> Self {
        Self {
            is_connected: true,
            interface_kind,
            ..Self::offline()
        }
    }

    /// Interprets a raw path snapshot. Only a satisfied path with at least one
    /// interface counts as connected.
    pub fn from_network_info(info: &NetworkInfo) -> Self {
        let is_connected =
            info.status == NetworkStatus::Connected && !info.interfaces.is_empty();

        if !is_connected {
            return Self::offline();
        }

        Self {
            is_connected,
            interface_kind: classify(&info.interfaces),
            is_expensive: info.is_expensive,
            is_constrained: info.is_constrained,
        }
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::offline()
    }
}
