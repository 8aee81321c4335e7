//! Reconciliation engine
//!
//! The engine is the single owner of desired state. It runs as one tokio
//! task: requests arrive on a channel, a timer drives periodic passes, and
//! every kernel or subprocess effect happens inline on this task.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use ipnet::Ipv4Net;
use throttle_machines::token_bucket;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::address::{
    AddressMode, AddressQuery, DesiredState, DhcpServerConfig, EthernetInterface, InterfaceAddress,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::manager::handle::InterfaceManager;
use crate::manager::status::{InterfaceStatus, InterfaceView, Snapshot};
use crate::os::process::{dhcp_client_spec, dhcp_server_spec};
use crate::os::{Link, Platform};
use crate::resolver::{check_conflicts, overlaps, select_backup, validate_interface};
use crate::retry::RetryState;
use crate::store::SettingsStore;
use crate::supervisor::{ProcessKind, SupervisedProcess};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests queued to the engine task
pub(crate) enum Request {
    Snapshot { reply: Reply<Arc<Snapshot>> },
    SetConfiguration { interface: EthernetInterface, reply: Reply<()> },
    AddStaticIp { interface: String, ip: Ipv4Net, reply: Reply<()> },
    RemoveIp { interface: String, ip: AddressQuery, reply: Reply<()> },
    AddDhcpServer { interface: String, gateway: Ipv4Addr, reply: Reply<()> },
    RemoveDhcpServer { interface: String, reply: Reply<()> },
    TriggerDynamicIp { interface: String, reply: Reply<()> },
    Save { reply: Reply<()> },
    ReconcileNow { reply: Reply<()> },
    LinkChanged { interface: String, reply: Reply<bool> },
    Shutdown { reply: Reply<()> },
}

/// Token bucket guarding hot-plug driven passes
#[derive(Debug)]
struct HotplugLimiter {
    tokens: f64,
    last_refill: Instant,
    epoch: Instant,
    capacity: f64,
    refill_rate: f64,
}

impl HotplugLimiter {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity,
            last_refill: now,
            epoch: now,
            capacity,
            refill_rate,
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        let now_secs = now.duration_since(self.epoch).as_secs_f64();
        let last_refill_secs = self.last_refill.duration_since(self.epoch).as_secs_f64();

        let result = token_bucket::check(
            self.tokens,
            last_refill_secs,
            now_secs,
            self.capacity,
            self.refill_rate,
        );
        if result.allowed {
            self.tokens = result.new_tokens;
            self.last_refill = now;
        }
        result.allowed
    }
}

/// The interface manager's engine
pub struct Engine {
    state: DesiredState,
    platform: Platform,
    store: SettingsStore,
    config: EngineConfig,
    rx: mpsc::Receiver<Request>,
    snapshot: watch::Sender<Arc<Snapshot>>,
    /// Last successful link enumeration
    links: Vec<Link>,
    /// False once `links` may miss changes made since it was read
    links_current: bool,
    clients: HashMap<String, SupervisedProcess>,
    servers: HashMap<String, SupervisedProcess>,
    /// Addresses this engine bound (or adopted) per link; nothing else is ever removed
    owned: HashMap<String, BTreeSet<Ipv4Net>>,
    /// Backoff for failed binds, keyed by link and address
    binds: HashMap<(String, Ipv4Net), RetryState>,
    statuses: HashMap<String, InterfaceStatus>,
    hotplug: HotplugLimiter,
}

impl Engine {
    /// Build the engine and the handle callers use to reach it
    ///
    /// The engine does nothing until [`Engine::run`] is spawned.
    pub fn new(
        state: DesiredState,
        platform: Platform,
        store: SettingsStore,
        config: EngineConfig,
    ) -> (Self, InterfaceManager) {
        let (tx, rx) = mpsc::channel(64);
        let (snapshot, snapshot_rx) = watch::channel(Arc::new(Snapshot::empty()));
        let hotplug = HotplugLimiter::new(config.hotplug_capacity, config.hotplug_refill_rate);
        let handle = InterfaceManager::new(tx, snapshot_rx, config.snapshot_ttl());

        let engine = Self {
            state,
            platform,
            store,
            config,
            rx,
            snapshot,
            links: Vec::new(),
            links_current: false,
            clients: HashMap::new(),
            servers: HashMap::new(),
            owned: HashMap::new(),
            binds: HashMap::new(),
            statuses: HashMap::new(),
            hotplug,
        };
        engine.publish();
        (engine, handle)
    }

    pub fn state(&self) -> &DesiredState {
        &self.state
    }

    /// Run until shutdown is requested or every handle is dropped
    ///
    /// The first tick fires immediately, so startup reconciles right away.
    pub async fn run(mut self) {
        info!(interfaces = self.state.len(), "interface manager started");

        let mut ticker = tokio::time::interval(self.config.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => {
                        if !blocking(|| self.dispatch(request)) {
                            break;
                        }
                    }
                    None => {
                        debug!("all handles dropped");
                        if let Err(e) = self.shutdown() {
                            error!(error = %e, "shutdown failed");
                        }
                        break;
                    }
                },
                _ = ticker.tick() => blocking(|| self.reconcile_all()),
            }
        }

        info!("interface manager stopped");
    }

    /// Serve one request; false once the engine should stop
    fn dispatch(&mut self, request: Request) -> bool {
        match request {
            Request::Snapshot { reply } => {
                self.observe();
                let _ = reply.send(Ok(self.publish()));
            }
            Request::SetConfiguration { interface, reply } => {
                respond("set_configuration", reply, self.set_configuration(interface));
            }
            Request::AddStaticIp { interface, ip, reply } => {
                respond("add_static_ip", reply, self.add_static_ip(&interface, ip));
            }
            Request::RemoveIp { interface, ip, reply } => {
                respond("remove_ip", reply, self.remove_ip(&interface, ip));
            }
            Request::AddDhcpServer {
                interface,
                gateway,
                reply,
            } => {
                respond("add_dhcp_server", reply, self.add_dhcp_server(&interface, gateway));
            }
            Request::RemoveDhcpServer { interface, reply } => {
                respond("remove_dhcp_server", reply, self.remove_dhcp_server(&interface));
            }
            Request::TriggerDynamicIp { interface, reply } => {
                respond("trigger_dynamic_ip", reply, self.trigger_dynamic_ip(&interface));
            }
            Request::Save { reply } => {
                respond("save", reply, self.save());
            }
            Request::ReconcileNow { reply } => {
                self.reconcile_all();
                let _ = reply.send(Ok(()));
            }
            Request::LinkChanged { interface, reply } => {
                let _ = reply.send(Ok(self.link_changed(&interface)));
            }
            Request::Shutdown { reply } => {
                respond("shutdown", reply, self.shutdown());
                return false;
            }
        }
        true
    }

    pub(crate) fn set_configuration(&mut self, interface: EthernetInterface) -> Result<()> {
        validate_interface(&interface, &self.config.managed_prefixes)?;
        self.refresh_links();
        check_conflicts(&interface, &self.state, &self.links)?;

        let name = interface.name.clone();
        info!(interface = %name, addresses = interface.addresses.len(), "applying configuration");
        self.commit(&name, |state| {
            state.upsert(interface);
        })
    }

    pub(crate) fn add_static_ip(&mut self, name: &str, ip: Ipv4Net) -> Result<()> {
        let current = self.interface(name)?;

        if let Some(existing) = current
            .addresses
            .iter()
            .filter_map(|a| a.ip)
            .find(|net| net.addr() == ip.addr())
        {
            return Err(Error::Conflict(format!(
                "{} is already configured on '{}' as {}",
                ip.addr(),
                name,
                existing
            )));
        }
        if let Some((_, theirs)) = current
            .static_addresses()
            .find(|(_, net)| overlaps(net, &ip))
        {
            return Err(Error::Conflict(format!(
                "{} overlaps {} on '{}'",
                ip, theirs, name
            )));
        }

        let candidate = current
            .clone()
            .with_address(InterfaceAddress::new(ip, AddressMode::Server));
        self.refresh_links();
        check_conflicts(&candidate, &self.state, &self.links)?;
        validate_interface(&candidate, &self.config.managed_prefixes)?;

        info!(interface = name, address = %ip, "adding static address");
        self.commit(name, |state| {
            state.upsert(candidate);
        })
    }

    pub(crate) fn remove_ip(&mut self, name: &str, ip: AddressQuery) -> Result<()> {
        let mut candidate = self.interface(name)?.clone();

        let position = candidate
            .addresses
            .iter()
            .position(|a| a.ip.is_some_and(|net| ip.matches(&net)))
            .ok_or_else(|| Error::AddressNotFound {
                interface: name.to_string(),
                address: ip.to_string(),
            })?;
        let removed = candidate.addresses.remove(position);

        if let (Some(server), Some(host)) = (&candidate.dhcp_server, removed.host())
            && server.gateway == host
            && candidate.find_static(host).is_none()
        {
            info!(interface = name, gateway = %host, "gateway removed, dropping DHCP server");
            candidate.dhcp_server = None;
        }

        info!(interface = name, address = %ip, "removing address");
        self.commit(name, |state| {
            state.upsert(candidate);
        })
    }

    pub(crate) fn add_dhcp_server(&mut self, name: &str, gateway: Ipv4Addr) -> Result<()> {
        let current = self.interface(name)?;

        if current.find_static(gateway).is_none() {
            return Err(Error::Validation(format!(
                "DHCP server gateway {} is not a Server or BackupServer address of '{}'",
                gateway, name
            )));
        }

        let mut candidate = current.clone();
        candidate.dhcp_server = Some(DhcpServerConfig::new(gateway));
        validate_interface(&candidate, &self.config.managed_prefixes)?;

        info!(interface = name, %gateway, "registering DHCP server");
        self.commit(name, |state| {
            state.upsert(candidate);
        })
    }

    pub(crate) fn remove_dhcp_server(&mut self, name: &str) -> Result<()> {
        let current = self.interface(name)?;
        if current.dhcp_server.is_none() {
            debug!(interface = name, "no DHCP server registered");
            return Ok(());
        }

        let mut candidate = current.clone();
        candidate.dhcp_server = None;

        info!(interface = name, "unregistering DHCP server");
        self.commit(name, |state| {
            state.upsert(candidate);
        })
    }

    pub(crate) fn trigger_dynamic_ip(&mut self, name: &str) -> Result<()> {
        self.refresh_links();
        let current = self.interface(name)?;

        let appended = !current.has_client();
        if appended {
            let candidate = current.clone().with_address(InterfaceAddress::client());
            validate_interface(&candidate, &self.config.managed_prefixes)?;
            info!(interface = name, "adding DHCP client entry");
            self.commit(name, |state| {
                state.upsert(candidate);
            })?;
        }

        if !self.links.iter().any(|l| l.name == name) {
            info!(interface = name, "link absent, DHCP client starts once it appears");
            return Ok(());
        }

        let now = Instant::now();
        let spec = dhcp_client_spec(&self.platform.tools, name);
        let client = self
            .clients
            .entry(name.to_string())
            .or_insert_with(|| SupervisedProcess::new(ProcessKind::DhcpClient, name, &self.config));

        // A client the commit above just spawned is already fresh
        if !(appended && client.is_alive()) {
            info!(interface = name, "restarting DHCP client");
            client.restart_now(
                self.platform.launcher.as_ref(),
                &spec,
                self.config.stop_grace(),
                now,
            )?;
        }

        let status = client.status(now);
        self.statuses.entry(name.to_string()).or_default().dhcp_client = Some(status);
        self.publish();
        Ok(())
    }

    pub(crate) fn save(&mut self) -> Result<()> {
        self.store.save(&self.state)?;
        info!(path = %self.store.path().display(), "settings saved");
        Ok(())
    }

    /// Hot-plug notification; returns false when rate limited
    pub(crate) fn link_changed(&mut self, name: &str) -> bool {
        if !self.hotplug.allow(Instant::now()) {
            debug!(interface = name, "link change ignored, rate limited");
            return false;
        }

        info!(interface = name, "link changed");
        self.binds.retain(|(link, _), _| link != name);
        for process in [self.clients.get_mut(name), self.servers.get_mut(name)]
            .into_iter()
            .flatten()
        {
            process.mark_healthy();
        }

        self.refresh_links();
        if self.state.contains(name) {
            self.reconcile_interface(name, Instant::now());
        }
        self.publish();
        true
    }

    /// Stop every subprocess and persist
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        info!("stopping supervised processes");
        let grace = self.config.stop_grace();
        for (name, process) in self.clients.iter_mut().chain(self.servers.iter_mut()) {
            if let Err(e) = process.ensure_stopped(grace) {
                warn!(interface = %name, error = %e, "failed to stop process");
            }
        }
        self.save()
    }

    fn interface(&self, name: &str) -> Result<&EthernetInterface> {
        self.state
            .get(name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))
    }

    /// Apply a mutation, reconcile the interface and persist
    ///
    /// A failed save puts the previous state back and reconciles toward it.
    fn commit(&mut self, name: &str, mutate: impl FnOnce(&mut DesiredState)) -> Result<()> {
        let previous = self.state.clone();
        mutate(&mut self.state);

        self.refresh_links();
        self.reconcile_interface(name, Instant::now());

        if let Err(e) = self.store.save(&self.state) {
            error!(interface = name, error = %e, "failed to persist settings, rolling back");
            self.state = previous;
            self.refresh_links();
            self.reconcile_interface(name, Instant::now());
            self.publish();
            return Err(e);
        }

        self.publish();
        Ok(())
    }

    /// Re-enumerate links; a failure keeps the previous view
    fn refresh_links(&mut self) -> bool {
        match self.platform.links.links() {
            Ok(links) => {
                self.links = links;
                self.links_current = true;
            }
            Err(e) => {
                warn!(error = %e, "failed to enumerate links");
                self.links_current = false;
            }
        }
        self.links_current
    }

    /// Refresh live fields of every status without acting on them
    fn observe(&mut self) {
        self.refresh_links();
        for name in self.state.names() {
            let link = self.links.iter().find(|l| l.name == name);
            let status = self.statuses.entry(name).or_default();
            observe_link(status, link);
        }
    }

    /// One full pass over every managed interface
    pub(crate) fn reconcile_all(&mut self) {
        if !self.refresh_links() {
            return;
        }
        let now = Instant::now();
        for name in self.state.names() {
            self.reconcile_interface(&name, now);
        }
        self.publish();
    }

    /// Drive one interface toward its desired state
    ///
    /// Errors are recorded on the status and retried next pass; they never
    /// escape to the caller.
    fn reconcile_interface(&mut self, name: &str, now: Instant) {
        let Some(desired) = self.state.get(name).cloned() else {
            return;
        };

        let mut status = InterfaceStatus::default();
        let Some(link) = self.links.iter().find(|l| l.name == name).cloned() else {
            self.link_absent(name);
            self.statuses.insert(name.to_string(), status);
            return;
        };
        observe_link(&mut status, Some(&link));

        let mut present: BTreeSet<Ipv4Net> = link.addresses.iter().map(|a| a.net).collect();
        let mut wanted = BTreeSet::new();

        if desired.has_client() {
            self.reconcile_client(name, status.lease, now, &mut status);
        } else {
            self.stop_process(ProcessKind::DhcpClient, name);
        }

        for net in desired.addresses_with_mode(AddressMode::Server) {
            wanted.insert(net);
            self.bind(name, net, &mut present, now, &mut status);
        }

        if status.lease.is_none() {
            let candidates: Vec<Ipv4Net> =
                desired.addresses_with_mode(AddressMode::BackupServer).collect();
            self.reconcile_backup(name, &candidates, &mut present, &mut wanted, now, &mut status);
        } else if self.owns_any(name, desired.addresses_with_mode(AddressMode::BackupServer)) {
            info!(interface = name, "lease acquired, releasing backup address");
        }

        // Unmanaged entries and the lease stay on the link, but are no longer ours to remove
        if let Some(owned) = self.owned.get_mut(name) {
            let kept: Vec<Ipv4Addr> = desired
                .addresses_with_mode(AddressMode::Unmanaged)
                .chain(status.lease)
                .map(|net| net.addr())
                .collect();
            owned.retain(|net| !kept.contains(&net.addr()));
        }

        self.release_unwanted(name, &wanted, &mut present, &mut status);
        self.reconcile_server(name, &desired, &present, now, &mut status);

        status.bound = present.into_iter().collect();
        self.statuses.insert(name.to_string(), status);
    }

    fn link_absent(&mut self, name: &str) {
        if self.owned.remove(name).is_some() {
            debug!(interface = name, "link gone, forgetting bound addresses");
        }
        self.stop_process(ProcessKind::DhcpClient, name);
        self.stop_process(ProcessKind::DhcpServer, name);
    }

    fn reconcile_client(
        &mut self,
        name: &str,
        lease: Option<Ipv4Net>,
        now: Instant,
        status: &mut InterfaceStatus,
    ) {
        let grace = self.config.stop_grace();
        let spec = dhcp_client_spec(&self.platform.tools, name);
        let client = self
            .clients
            .entry(name.to_string())
            .or_insert_with(|| SupervisedProcess::new(ProcessKind::DhcpClient, name, &self.config));

        client.poll(now);
        if lease.is_some() {
            client.mark_healthy();
        } else if client
            .running_for(now)
            .is_some_and(|d| d >= self.config.acquisition_timeout())
            && let Err(e) = client.give_up("no lease within acquisition timeout", grace, now)
        {
            status.last_error = Some(e.to_string());
        }

        if let Err(e) = client.ensure_running(self.platform.launcher.as_ref(), &spec, grace, now) {
            warn!(interface = name, error = %e, "failed to start DHCP client");
            status.last_error = Some(e.to_string());
        }
        status.dhcp_client = Some(client.status(now));
    }

    fn reconcile_backup(
        &mut self,
        name: &str,
        candidates: &[Ipv4Net],
        present: &mut BTreeSet<Ipv4Net>,
        wanted: &mut BTreeSet<Ipv4Net>,
        now: Instant,
        status: &mut InterfaceStatus,
    ) {
        if candidates.is_empty() {
            return;
        }

        // Keep whichever candidate is already up rather than probing again
        if let Some(current) = candidates.iter().find(|c| present.contains(*c)) {
            self.owned.entry(name.to_string()).or_default().insert(*current);
            wanted.insert(*current);
            status.backup = Some(*current);
            return;
        }

        let selection = select_backup(name, candidates, self.platform.probe.as_ref());
        status.occupied_backups = selection.occupied;

        match selection.chosen {
            Some(chosen) => {
                info!(interface = name, address = %chosen, "selected backup address");
                wanted.insert(chosen);
                if self.bind(name, chosen, present, now, status) {
                    status.backup = Some(chosen);
                }
            }
            None => warn!(interface = name, "every backup candidate is in use"),
        }
    }

    /// Ensure `net` is on the link; returns whether it is bound afterwards
    fn bind(
        &mut self,
        name: &str,
        net: Ipv4Net,
        present: &mut BTreeSet<Ipv4Net>,
        now: Instant,
        status: &mut InterfaceStatus,
    ) -> bool {
        if present.contains(&net) {
            self.owned.entry(name.to_string()).or_default().insert(net);
            return true;
        }

        if let Some(other) = self
            .links
            .iter()
            .find(|l| l.name != name && l.has_host(net.addr()))
        {
            if self.owned.get(&other.name).is_some_and(|o| o.contains(&net)) {
                debug!(interface = name, address = %net, from = %other.name, "waiting for release");
            } else {
                warn!(interface = name, address = %net, holder = %other.name, "address held by another link");
                status.conflicts.push(net);
            }
            return false;
        }

        let key = (name.to_string(), net);
        let retry = self
            .binds
            .entry(key.clone())
            .or_insert_with(|| RetryState::new(&self.config.backoff));
        if !retry.ready(now) {
            return false;
        }

        match self.platform.links.add_address(name, net) {
            Ok(()) => {
                info!(interface = name, address = %net, "address bound");
                self.links_current = false;
                self.binds.remove(&key);
                self.owned.entry(name.to_string()).or_default().insert(net);
                present.insert(net);
                true
            }
            Err(e) => {
                let delay = retry.record_failure(now);
                warn!(
                    interface = name,
                    address = %net,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "failed to bind address"
                );
                status.last_error = Some(e.to_string());
                false
            }
        }
    }

    /// Remove addresses this engine bound that are no longer wanted
    fn release_unwanted(
        &mut self,
        name: &str,
        wanted: &BTreeSet<Ipv4Net>,
        present: &mut BTreeSet<Ipv4Net>,
        status: &mut InterfaceStatus,
    ) {
        let Some(owned) = self.owned.get_mut(name) else {
            return;
        };
        let stale: Vec<Ipv4Net> = owned.difference(wanted).copied().collect();

        for net in stale {
            if !present.contains(&net) {
                // Only a fresh view proves the address is really gone
                if self.links_current {
                    owned.remove(&net);
                }
                continue;
            }
            match self.platform.links.remove_address(name, net) {
                Ok(()) => {
                    info!(interface = name, address = %net, "address removed");
                    self.links_current = false;
                    owned.remove(&net);
                    present.remove(&net);
                }
                Err(e) => {
                    warn!(interface = name, address = %net, error = %e, "failed to remove address");
                    status.last_error = Some(e.to_string());
                }
            }
        }
    }

    fn reconcile_server(
        &mut self,
        name: &str,
        desired: &EthernetInterface,
        present: &BTreeSet<Ipv4Net>,
        now: Instant,
        status: &mut InterfaceStatus,
    ) {
        let serving = desired.dhcp_server.as_ref().and_then(|server| {
            desired
                .find_static(server.gateway)
                .filter(|subnet| present.contains(subnet))
                .map(|subnet| (server, subnet))
        });

        let Some((server, subnet)) = serving else {
            self.stop_process(ProcessKind::DhcpServer, name);
            if let Some(process) = self.servers.get(name) {
                status.dhcp_server = Some(process.status(now));
            }
            return;
        };

        let spec = match dhcp_server_spec(&self.platform.tools, name, server, subnet) {
            Ok(spec) => spec,
            Err(e) => {
                status.last_error = Some(e.to_string());
                return;
            }
        };

        let grace = self.config.stop_grace();
        let process = self
            .servers
            .entry(name.to_string())
            .or_insert_with(|| SupervisedProcess::new(ProcessKind::DhcpServer, name, &self.config));
        if let Err(e) = process.ensure_running(self.platform.launcher.as_ref(), &spec, grace, now) {
            warn!(interface = name, error = %e, "failed to start DHCP server");
            status.last_error = Some(e.to_string());
        }
        status.dhcp_server = Some(process.status(now));
    }

    fn stop_process(&mut self, kind: ProcessKind, name: &str) {
        let processes = match kind {
            ProcessKind::DhcpClient => &mut self.clients,
            ProcessKind::DhcpServer => &mut self.servers,
        };
        if let Some(process) = processes.get_mut(name)
            && let Err(e) = process.ensure_stopped(self.config.stop_grace())
        {
            warn!(interface = name, %kind, error = %e, "failed to stop process");
        }
    }

    fn owns_any(&self, name: &str, mut nets: impl Iterator<Item = Ipv4Net>) -> bool {
        self.owned
            .get(name)
            .is_some_and(|owned| nets.any(|net| owned.contains(&net)))
    }

    fn publish(&self) -> Arc<Snapshot> {
        let interfaces = self
            .state
            .iter()
            .map(|config| InterfaceView {
                config: config.clone(),
                status: self.statuses.get(&config.name).cloned().unwrap_or_default(),
            })
            .collect();

        let snapshot = Arc::new(Snapshot {
            interfaces,
            taken_at: Instant::now(),
        });
        self.snapshot.send_replace(Arc::clone(&snapshot));
        snapshot
    }
}

/// Run host work that may block on commands or probes
///
/// On a multi-thread runtime the worker is handed off first so other tasks
/// keep running; a current-thread runtime has nowhere to hand off to.
fn blocking<R>(work: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(work),
        _ => work(),
    }
}

/// Send an operation's outcome, logging host failures louder than rejections
fn respond<T>(operation: &str, reply: Reply<T>, result: Result<T>) {
    if let Err(e) = &result {
        if e.is_os() {
            warn!(operation, error = %e, "operation failed");
        } else {
            debug!(operation, error = %e, "operation rejected");
        }
    }
    let _ = reply.send(result);
}

fn observe_link(status: &mut InterfaceStatus, link: Option<&Link>) {
    match link {
        Some(link) => {
            status.present = true;
            status.carrier = link.flags.has_carrier();
            status.bound = link.addresses.iter().map(|a| a.net).collect();
            status.lease = link.addresses.iter().find(|a| a.dynamic).map(|a| a.net);
        }
        None => {
            status.present = false;
            status.carrier = false;
            status.bound.clear();
            status.lease = None;
        }
    }
}
