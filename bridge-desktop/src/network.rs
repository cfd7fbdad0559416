//! Connection Type Detection

use async_trait::async_trait;
use bridge_traits::{error::Result, network::{ConnectionType, ConnectionTypeProvider}};
use std::time::Duration;
use tracing::debug;

/// Desktop connection type provider
///
/// Desktops rarely expose the link type without platform APIs, so this
/// reports `Ethernet` when a TCP connection to a well-known resolver succeeds
/// and `None` otherwise. Platform-specific implementations (Linux netlink,
/// macOS SystemConfiguration) could distinguish Wi-Fi.
pub struct DesktopConnectionTypeProvider {
    probe_addr: String,
    timeout: Duration,
}

impl DesktopConnectionTypeProvider {
    pub fn new() -> Self {
        Self {
            probe_addr: "8.8.8.8:53".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_probe_addr(mut self, addr: impl Into<String>) -> Self {
        self.probe_addr = addr.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for DesktopConnectionTypeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionTypeProvider for DesktopConnectionTypeProvider {
    async fn connection_type(&self) -> Result<ConnectionType> {
        let connected = matches!(
            tokio::time::timeout(
                self.timeout,
                tokio::net::TcpStream::connect(self.probe_addr.as_str())
            )
            .await,
            Ok(Ok(_))
        );

        let connection_type = if connected {
            ConnectionType::Ethernet
        } else {
            ConnectionType::None
        };
        debug!(connection_type = connection_type.as_str(), "Detected connection type");

        Ok(connection_type)
    }
}
