//! Addressing validation and conflict resolution
//!
//! Provides:
//! - Structural validation of one interface's desired addressing
//! - Cross-interface and live-network conflict checks
//! - Priority-ordered BackupServer selection behind a liveness probe

use crate::address::{AddressMode, DesiredState, EthernetInterface};
use crate::error::{Error, Result};
use crate::os::Link;
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Detects whether another host already answers for an address on a link
///
/// Implementations decide the probe protocol; the engine only needs a yes/no.
pub trait LivenessProbe: Send {
    fn is_occupied(&self, link: &str, address: Ipv4Addr) -> Result<bool>;
}

/// Whether two subnets share any address
pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Whether the link name belongs to a class the engine manages
pub fn is_managed_name(name: &str, prefixes: &[String]) -> bool {
    prefixes
        .iter()
        .any(|p| name.len() > p.len() && name.starts_with(p.as_str()))
}

/// Check one interface's addressing for internal consistency
pub fn validate_interface(interface: &EthernetInterface, prefixes: &[String]) -> Result<()> {
    let name = &interface.name;

    if name.is_empty() || name.len() > 15 || name.contains(['/', ' ']) {
        return Err(Error::Validation(format!("Invalid link name '{}'", name)));
    }

    if !is_managed_name(name, prefixes) {
        return Err(Error::Validation(format!(
            "Interface '{}' is not an Ethernet-class link (managed prefixes: {})",
            name,
            prefixes.join(", ")
        )));
    }

    let mut clients = 0;
    let mut hosts = HashSet::new();
    for address in &interface.addresses {
        match (address.mode, address.ip) {
            (AddressMode::Client, _) => clients += 1,
            (mode, None) => {
                return Err(Error::Validation(format!(
                    "{} address on '{}' needs an IP",
                    mode, name
                )));
            }
            (AddressMode::Unmanaged | AddressMode::Server | AddressMode::BackupServer, Some(_)) => {}
        }

        if let Some(net) = address.ip
            && address.mode != AddressMode::Client
            && !hosts.insert(net.addr())
        {
            return Err(Error::Validation(format!(
                "Address {} appears more than once on '{}'",
                net.addr(),
                name
            )));
        }
    }

    if clients > 1 {
        return Err(Error::Validation(format!(
            "Interface '{}' has {} DHCP client entries; a link holds a single lease",
            name, clients
        )));
    }

    let statics: Vec<Ipv4Net> = interface.static_addresses().map(|(_, net)| net).collect();
    for (i, a) in statics.iter().enumerate() {
        for b in &statics[i + 1..] {
            if overlaps(a, b) {
                return Err(Error::Validation(format!(
                    "Static addresses {} and {} on '{}' overlap",
                    a, b, name
                )));
            }
        }
    }

    if let Some(server) = &interface.dhcp_server {
        let subnet = interface.find_static(server.gateway).ok_or_else(|| {
            Error::Validation(format!(
                "DHCP server gateway {} is not a static address of '{}'",
                server.gateway, name
            ))
        })?;
        server.lease_range(subnet)?;
    }

    Ok(())
}

/// Check a candidate interface against every other managed interface and the live network
///
/// `live` is the most recent view of kernel links; addresses found on links
/// other than the candidate's own count as externally claimed.
pub fn check_conflicts(
    candidate: &EthernetInterface,
    state: &DesiredState,
    live: &[Link],
) -> Result<()> {
    let others: Vec<&EthernetInterface> = state
        .iter()
        .filter(|other| other.name != candidate.name)
        .collect();

    for (_, net) in candidate.static_addresses() {
        for other in &others {
            for (_, theirs) in other.static_addresses() {
                if overlaps(&net, &theirs) {
                    return Err(Error::Conflict(format!(
                        "{} on '{}' overlaps {} on '{}'",
                        net, candidate.name, theirs, other.name
                    )));
                }
            }

            if other.addresses.iter().any(|a| a.host() == Some(net.addr())) {
                return Err(Error::Conflict(format!(
                    "{} is already configured on '{}'",
                    net.addr(),
                    other.name
                )));
            }
        }

        if let Some(link) = live
            .iter()
            .find(|link| link.name != candidate.name && link.has_host(net.addr()))
        {
            return Err(Error::Conflict(format!(
                "{} is already bound on link '{}'",
                net.addr(),
                link.name
            )));
        }
    }

    Ok(())
}

/// Outcome of one BackupServer selection round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSelection {
    /// First free candidate in priority order
    pub chosen: Option<Ipv4Net>,
    /// Candidates found in use this round
    pub occupied: Vec<Ipv4Net>,
}

/// Pick the highest-priority BackupServer candidate nobody else holds
///
/// A probe error counts as occupied for this round; the next round probes again.
pub fn select_backup(
    link: &str,
    candidates: &[Ipv4Net],
    probe: &dyn LivenessProbe,
) -> BackupSelection {
    let mut selection = BackupSelection::default();

    for candidate in candidates {
        match probe.is_occupied(link, candidate.addr()) {
            Ok(false) => {
                debug!(interface = link, address = %candidate, "backup candidate free");
                selection.chosen = Some(*candidate);
                break;
            }
            Ok(true) => {
                debug!(interface = link, address = %candidate, "backup candidate occupied");
                selection.occupied.push(*candidate);
            }
            Err(e) => {
                warn!(interface = link, address = %candidate, error = %e, "backup probe failed");
                selection.occupied.push(*candidate);
            }
        }
    }

    selection
}
