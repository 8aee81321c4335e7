//! Read-side views published by the engine

use crate::address::EthernetInterface;
use crate::supervisor::ProcessStatus;
use ipnet::Ipv4Net;
use serde::Serialize;
use std::time::Instant;

/// Observed state of one managed interface; derived, never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceStatus {
    /// The kernel link exists
    pub present: bool,
    /// Up with a cable attached
    pub carrier: bool,
    /// Every IPv4 address currently on the link
    pub bound: Vec<Ipv4Net>,
    /// Address installed by a DHCP client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<Ipv4Net>,
    /// BackupServer address the engine is holding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<Ipv4Net>,
    /// Desired statics left unbound because another link holds them
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Ipv4Net>,
    /// BackupServer candidates found in use on the network
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub occupied_backups: Vec<Ipv4Net>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp_client: Option<ProcessStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp_server: Option<ProcessStatus>,
    /// Most recent OS failure while reconciling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Desired configuration merged with live status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceView {
    #[serde(flatten)]
    pub config: EthernetInterface,
    pub status: InterfaceStatus,
}

/// Everything `get_interfaces` serves, as of `taken_at`
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub interfaces: Vec<InterfaceView>,
    pub taken_at: Instant,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            interfaces: Vec::new(),
            taken_at: Instant::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&InterfaceView> {
        self.interfaces.iter().find(|view| view.config.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddressMode, InterfaceAddress};

    #[test]
    fn test_view_serializes_flat() {
        let view = InterfaceView {
            config: EthernetInterface::new("usb0")
                .with_address(InterfaceAddress::parse("192.168.3.1", AddressMode::Server).unwrap()),
            status: InterfaceStatus {
                present: true,
                bound: vec!["192.168.3.1/24".parse().unwrap()],
                ..InterfaceStatus::default()
            },
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["name"], "usb0");
        assert_eq!(json["addresses"][0]["mode"], "server");
        assert_eq!(json["status"]["bound"][0], "192.168.3.1/24");
        assert!(json["status"].get("lease").is_none());
    }
}
