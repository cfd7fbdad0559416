//! Network Status Types
//!
//! Shared vocabulary for connectivity reporting. Reachability itself is
//! decided by the core's monitor via an HTTP probe; hosts only contribute the
//! physical link type when they can detect it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Physical link type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    None,
    Unknown,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Wifi => "wifi",
            ConnectionType::Cellular => "cellular",
            ConnectionType::Ethernet => "ethernet",
            ConnectionType::None => "none",
            ConnectionType::Unknown => "unknown",
        }
    }
}

/// Snapshot of connectivity.
///
/// Two snapshots are equal only when all three fields match; the monitor uses
/// this to decide whether subscribers need to hear about a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub is_connected: bool,
    pub is_internet_reachable: bool,
    pub connection_type: ConnectionType,
}

impl NetworkStatus {
    pub fn online(connection_type: ConnectionType) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: true,
            connection_type,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: false,
            connection_type: ConnectionType::None,
        }
    }

    /// Status before the first probe has completed.
    pub fn unknown() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: false,
            connection_type: ConnectionType::Unknown,
        }
    }

    /// Whether requests can be expected to reach the internet.
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Link type detection
///
/// # Platform Support
///
/// - **Desktop**: interface inspection or a TCP reachability check
/// - **iOS**: Network framework path monitor
/// - **Android**: ConnectivityManager
///
/// Hosts that cannot tell should return [`ConnectionType::Unknown`].
#[async_trait]
pub trait ConnectionTypeProvider: Send + Sync {
    async fn connection_type(&self) -> Result<ConnectionType>;
}
