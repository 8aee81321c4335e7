//! Caller-facing handle to the engine task

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::address::{parse_address, AddressQuery, EthernetInterface};
use crate::error::{Error, Result};
use crate::manager::engine::{Reply, Request};
use crate::manager::status::{InterfaceView, Snapshot};

/// Cloneable handle onto a running [`Engine`](crate::manager::Engine)
///
/// Mutating calls resolve once the change is reconciled and persisted, or
/// rejected with desired state untouched.
#[derive(Clone)]
pub struct InterfaceManager {
    sender: mpsc::Sender<Request>,
    snapshot: watch::Receiver<Arc<Snapshot>>,
    snapshot_ttl: Duration,
}

impl InterfaceManager {
    pub(crate) fn new(
        sender: mpsc::Sender<Request>,
        snapshot: watch::Receiver<Arc<Snapshot>>,
        snapshot_ttl: Duration,
    ) -> Self {
        Self {
            sender,
            snapshot,
            snapshot_ttl,
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| Error::EngineClosed)?;
        response.await.map_err(|_| Error::EngineClosed)?
    }

    /// Desired state merged with live status
    ///
    /// Served from the last published snapshot unless it is older than the TTL.
    pub async fn get_interfaces(&self) -> Result<Vec<InterfaceView>> {
        let current = self.snapshot.borrow().clone();
        if current.taken_at.elapsed() <= self.snapshot_ttl {
            return Ok(current.interfaces.clone());
        }

        let fresh = self.request(|reply| Request::Snapshot { reply }).await?;
        Ok(fresh.interfaces.clone())
    }

    /// Create or replace an interface's configuration
    pub async fn set_configuration(&self, interface: EthernetInterface) -> Result<()> {
        self.request(|reply| Request::SetConfiguration { interface, reply })
            .await
    }

    /// Append a Server address; `ip` is CIDR or a bare address (/24)
    pub async fn add_static_ip(&self, interface: &str, ip: &str) -> Result<()> {
        let ip = parse_address(ip)?;
        self.request(|reply| Request::AddStaticIp {
            interface: interface.to_string(),
            ip,
            reply,
        })
        .await
    }

    /// Remove one address entry; a bare address matches any prefix
    pub async fn remove_ip(&self, interface: &str, ip: &str) -> Result<()> {
        let ip: AddressQuery = ip.parse()?;
        self.request(|reply| Request::RemoveIp {
            interface: interface.to_string(),
            ip,
            reply,
        })
        .await
    }

    pub async fn add_dhcp_server_to_interface(&self, interface: &str, gateway: &str) -> Result<()> {
        let gateway: Ipv4Addr = gateway
            .trim()
            .parse()
            .map_err(|e| Error::Validation(format!("Invalid gateway '{}': {}", gateway, e)))?;
        self.request(|reply| Request::AddDhcpServer {
            interface: interface.to_string(),
            gateway,
            reply,
        })
        .await
    }

    pub async fn remove_dhcp_server_from_interface(&self, interface: &str) -> Result<()> {
        self.request(|reply| Request::RemoveDhcpServer {
            interface: interface.to_string(),
            reply,
        })
        .await
    }

    /// Ensure a DHCP client entry exists and restart the client now
    pub async fn trigger_dynamic_ip_acquisition(&self, interface: &str) -> Result<()> {
        self.request(|reply| Request::TriggerDynamicIp {
            interface: interface.to_string(),
            reply,
        })
        .await
    }

    pub async fn save(&self) -> Result<()> {
        self.request(|reply| Request::Save { reply }).await
    }

    pub async fn reconcile_now(&self) -> Result<()> {
        self.request(|reply| Request::ReconcileNow { reply }).await
    }

    /// Tell the engine a link appeared, vanished or changed carrier
    ///
    /// Returns false when the notification was dropped by rate limiting.
    pub async fn notify_link_change(&self, interface: &str) -> Result<bool> {
        self.request(|reply| Request::LinkChanged {
            interface: interface.to_string(),
            reply,
        })
        .await
    }

    /// Stop subprocesses, persist, and end the engine task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Request::Shutdown { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddressMode, DesiredState};
    use crate::config::{default_managed_prefixes, EngineConfig};
    use crate::error::ErrorCategory;
    use crate::manager::Engine;
    use crate::profile::DefaultProfile;
    use crate::store::SettingsStore;
    use crate::testing::FakeHost;
    use tempfile::{tempdir, TempDir};

    fn start() -> (InterfaceManager, FakeHost, TempDir, tokio::task::JoinHandle<()>) {
        let dir = tempdir().unwrap();
        let host = FakeHost::with_links(&["eth0", "usb0"]);
        let store = SettingsStore::new(dir.path().join("settings.toml"), default_managed_prefixes());
        let (engine, handle) = Engine::new(
            DesiredState::from_interfaces(DefaultProfile::Bluerov2.interfaces()),
            host.platform(),
            store,
            EngineConfig::default(),
        );
        let task = tokio::spawn(engine.run());
        (handle, host, dir, task)
    }

    #[tokio::test]
    async fn test_operations_round_trip() {
        let (manager, host, dir, task) = start();

        manager.add_static_ip("eth0", "10.0.0.5/16").await.unwrap();
        manager
            .add_dhcp_server_to_interface("usb0", "192.168.3.1")
            .await
            .unwrap();

        let views = manager.get_interfaces().await.unwrap();
        let eth0 = views.iter().find(|v| v.config.name == "eth0").unwrap();
        assert_eq!(eth0.config.addresses.len(), 2);
        assert_eq!(eth0.config.addresses[1].mode, AddressMode::Server);
        assert!(eth0.status.present);

        let usb0 = views.iter().find(|v| v.config.name == "usb0").unwrap();
        assert!(usb0.status.dhcp_server.is_some());

        let settings = SettingsStore::new(dir.path().join("settings.toml"), default_managed_prefixes());
        let persisted = settings.load().unwrap();
        assert!(persisted.get("usb0").unwrap().dhcp_server.is_some());

        manager.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(host.launcher.live_count(), 0);
    }

    #[tokio::test]
    async fn test_bare_static_ip_is_slash_24() {
        let (manager, host, dir, _task) = start();

        manager.add_static_ip("eth0", "10.0.0.5").await.unwrap();

        let expected = crate::address::parse_address("10.0.0.5/24").unwrap();
        let views = manager.get_interfaces().await.unwrap();
        let eth0 = views.iter().find(|v| v.config.name == "eth0").unwrap();
        let added = eth0.config.addresses.last().unwrap();
        assert_eq!(added.mode, AddressMode::Server);
        assert_eq!(added.ip, Some(expected));
        assert!(eth0.status.bound.contains(&expected));
        assert!(host.links.addresses("eth0").contains(&expected));

        let settings = SettingsStore::new(dir.path().join("settings.toml"), default_managed_prefixes());
        let persisted = settings.load().unwrap();
        assert!(persisted.get("eth0").unwrap().addresses.contains(added));
    }

    #[tokio::test]
    async fn test_errors_carry_categories() {
        let (manager, _host, _dir, _task) = start();

        let err = manager.add_static_ip("eth0", "not-an-ip").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = manager.add_static_ip("eth5", "10.0.0.1").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);

        let err = manager.add_static_ip("eth0", "192.168.3.77").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err = manager.remove_ip("usb0", "192.168.9.9").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);

        let err = manager
            .add_dhcp_server_to_interface("usb0", "192.168.3.300")
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn test_trigger_keeps_single_client() {
        let (manager, host, _dir, _task) = start();

        manager.trigger_dynamic_ip_acquisition("eth0").await.unwrap();
        manager.trigger_dynamic_ip_acquisition("eth0").await.unwrap();
        manager.reconcile_now().await.unwrap();

        assert_eq!(host.launcher.live_with_arg("dhclient-eth0"), 1);
        let views = manager.get_interfaces().await.unwrap();
        let eth0 = views.iter().find(|v| v.config.name == "eth0").unwrap();
        let clients = eth0
            .config
            .addresses
            .iter()
            .filter(|a| a.mode == AddressMode::Client)
            .count();
        assert_eq!(clients, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multi_thread_runtime_serves_requests() {
        let (manager, host, _dir, task) = start();

        manager.reconcile_now().await.unwrap();
        manager.add_static_ip("eth0", "10.0.0.5").await.unwrap();
        assert_eq!(host.links.addresses("usb0").len(), 1);

        manager.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_engine_reports_closed() {
        let (manager, _host, _dir, task) = start();
        manager.shutdown().await.unwrap();
        task.await.unwrap();

        let err = manager.save().await.unwrap_err();
        assert!(matches!(err, Error::EngineClosed));
    }
}
