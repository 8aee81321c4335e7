//! Addressing model for managed Ethernet interfaces
//!
//! Provides:
//! - Address modes (unmanaged, DHCP client, static server, backup server)
//! - Per-interface ordered address lists with optional DHCP server
//! - The desired-state map owned by the interface manager

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Prefix length applied to bare addresses such as `192.168.2.2`
pub const DEFAULT_PREFIX_LEN: u8 = 24;

/// How the engine treats one address entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMode {
    /// Left alone: never bound, never removed
    Unmanaged,
    /// Acquired through a DHCP client
    Client,
    /// Fixed static address, may back a local DHCP server
    Server,
    /// Static fallback, only bound when the link has no lease and nobody else holds it
    BackupServer,
}

impl AddressMode {
    /// Server and BackupServer entries carry addresses the engine binds itself
    pub fn is_static(&self) -> bool {
        match self {
            AddressMode::Server | AddressMode::BackupServer => true,
            AddressMode::Unmanaged | AddressMode::Client => false,
        }
    }
}

impl fmt::Display for AddressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressMode::Unmanaged => "unmanaged",
            AddressMode::Client => "client",
            AddressMode::Server => "server",
            AddressMode::BackupServer => "backup_server",
        };
        write!(f, "{}", s)
    }
}

/// Parse an IPv4 address given either as CIDR or as a bare address
///
/// Bare addresses get [`DEFAULT_PREFIX_LEN`].
pub fn parse_address(input: &str) -> Result<Ipv4Net> {
    let input = input.trim();
    if input.contains('/') {
        return input
            .parse::<Ipv4Net>()
            .map_err(|e| Error::Validation(format!("Invalid address '{}': {}", input, e)));
    }

    let addr = input
        .parse::<Ipv4Addr>()
        .map_err(|e| Error::Validation(format!("Invalid address '{}': {}", input, e)))?;
    Ipv4Net::new(addr, DEFAULT_PREFIX_LEN)
        .map_err(|e| Error::Validation(format!("Invalid address '{}': {}", input, e)))
}

/// Address lookup used by removal: bare input matches the host part only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressQuery {
    /// Address and prefix must both match
    Exact(Ipv4Net),
    /// Any prefix with this host address matches
    Host(Ipv4Addr),
}

impl AddressQuery {
    pub fn matches(&self, net: &Ipv4Net) -> bool {
        match self {
            AddressQuery::Exact(wanted) => wanted == net,
            AddressQuery::Host(addr) => net.addr() == *addr,
        }
    }
}

impl FromStr for AddressQuery {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.contains('/') {
            parse_address(s).map(AddressQuery::Exact)
        } else {
            s.trim()
                .parse::<Ipv4Addr>()
                .map(AddressQuery::Host)
                .map_err(|e| Error::Validation(format!("Invalid address '{}': {}", s, e)))
        }
    }
}

impl fmt::Display for AddressQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressQuery::Exact(net) => write!(f, "{}", net),
            AddressQuery::Host(addr) => write!(f, "{}", addr),
        }
    }
}

mod net_serde {
    use super::parse_address;
    use ipnet::Ipv4Net;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Ipv4Net>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(net) => s.serialize_str(&net.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Ipv4Net>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => parse_address(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// One address entry of an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddress {
    /// Address with prefix. Absent only for a Client entry without a known lease.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "net_serde"
    )]
    pub ip: Option<Ipv4Net>,
    pub mode: AddressMode,
}

impl InterfaceAddress {
    pub fn new(ip: Ipv4Net, mode: AddressMode) -> Self {
        Self { ip: Some(ip), mode }
    }

    /// A DHCP client entry with no lease recorded yet
    pub fn client() -> Self {
        Self {
            ip: None,
            mode: AddressMode::Client,
        }
    }

    /// Parse `ip` (bare or CIDR) into an entry
    pub fn parse(ip: &str, mode: AddressMode) -> Result<Self> {
        Ok(Self::new(parse_address(ip)?, mode))
    }

    pub fn host(&self) -> Option<Ipv4Addr> {
        self.ip.map(|net| net.addr())
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(net) => write!(f, "{} ({})", net, self.mode),
            None => write!(f, "dynamic ({})", self.mode),
        }
    }
}

/// Local DHCP server registered on an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpServerConfig {
    /// Address the server advertises as router; one of the interface's statics
    pub gateway: Ipv4Addr,

    /// Lease duration in seconds
    #[serde(default = "default_lease_time")]
    pub lease_time_secs: u32,
}

fn default_lease_time() -> u32 {
    24 * 60 * 60
}

impl DhcpServerConfig {
    pub fn new(gateway: Ipv4Addr) -> Self {
        Self {
            gateway,
            lease_time_secs: default_lease_time(),
        }
    }

    /// Address range handed out to peers on `subnet`, never including the gateway
    pub fn lease_range(&self, subnet: Ipv4Net) -> Result<(Ipv4Addr, Ipv4Addr)> {
        if subnet.prefix_len() >= 31 {
            return Err(Error::Validation(format!(
                "Subnet {} is too small for a DHCP server",
                subnet
            )));
        }

        // u64 so the fractions of a /0 or /1 cannot overflow
        let first = u64::from(u32::from(subnet.network())) + 1;
        let last = u64::from(u32::from(subnet.broadcast())) - 1;
        let hosts = last - first + 1;

        let (mut start, end) = if hosts >= 8 {
            (first + hosts * 2 / 5, first + hosts * 4 / 5)
        } else {
            (first, last)
        };

        let gateway = u64::from(u32::from(self.gateway));
        if gateway >= start && gateway <= end {
            start = gateway + 1;
        }

        if start > end {
            return Err(Error::Validation(format!(
                "No lease range left in {} around gateway {}",
                subnet, self.gateway
            )));
        }

        let host = |n: u64| {
            u32::try_from(n)
                .map(Ipv4Addr::from)
                .map_err(|_| Error::Validation(format!("Lease range of {} is out of bounds", subnet)))
        };
        Ok((host(start)?, host(end)?))
    }
}

/// Desired configuration of one kernel link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetInterface {
    /// Kernel link name, e.g. "eth0"
    pub name: String,

    /// Ordered address entries; order sets BackupServer priority
    #[serde(default)]
    pub addresses: Vec<InterfaceAddress>,

    /// Local DHCP server, if registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_server: Option<DhcpServerConfig>,
}

impl EthernetInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
            dhcp_server: None,
        }
    }

    pub fn with_address(mut self, address: InterfaceAddress) -> Self {
        self.addresses.push(address);
        self
    }

    pub fn with_dhcp_server(mut self, gateway: Ipv4Addr) -> Self {
        self.dhcp_server = Some(DhcpServerConfig::new(gateway));
        self
    }

    /// Server and BackupServer entries, in list order
    pub fn static_addresses(&self) -> impl Iterator<Item = (&InterfaceAddress, Ipv4Net)> {
        self.addresses
            .iter()
            .filter(|a| a.mode.is_static())
            .filter_map(|a| a.ip.map(|net| (a, net)))
    }

    /// Addresses of a given mode, in list order
    pub fn addresses_with_mode(&self, mode: AddressMode) -> impl Iterator<Item = Ipv4Net> + '_ {
        self.addresses
            .iter()
            .filter(move |a| a.mode == mode)
            .filter_map(|a| a.ip)
    }

    pub fn has_client(&self) -> bool {
        self.addresses.iter().any(|a| a.mode == AddressMode::Client)
    }

    /// The static entry whose host part is `addr`
    pub fn find_static(&self, addr: Ipv4Addr) -> Option<Ipv4Net> {
        self.static_addresses()
            .map(|(_, net)| net)
            .find(|net| net.addr() == addr)
    }
}

/// Desired addressing for every managed interface, keyed by link name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    interfaces: BTreeMap<String, EthernetInterface>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list; a later entry with the same name replaces an earlier one
    pub fn from_interfaces(interfaces: impl IntoIterator<Item = EthernetInterface>) -> Self {
        let interfaces = interfaces
            .into_iter()
            .map(|iface| (iface.name.clone(), iface))
            .collect();
        Self { interfaces }
    }

    pub fn get(&self, name: &str) -> Option<&EthernetInterface> {
        self.interfaces.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.interfaces.contains_key(name)
    }

    /// Insert or replace by name, returning the previous configuration
    pub fn upsert(&mut self, interface: EthernetInterface) -> Option<EthernetInterface> {
        self.interfaces.insert(interface.name.clone(), interface)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EthernetInterface> {
        self.interfaces.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.interfaces.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn to_vec(&self) -> Vec<EthernetInterface> {
        self.interfaces.values().cloned().collect()
    }
}
