//! Link and address management through iproute2
//!
//! Uses the JSON output of `ip -j addr show` for enumeration and
//! `ip addr add/del` for changes.

use crate::error::{Error, Result};
use crate::os::command;
use crate::os::{BoundAddress, Link, LinkControl, LinkFlags};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    #[serde(default)]
    family: String,
    #[serde(default)]
    local: Option<String>,
    #[serde(default)]
    prefixlen: Option<u8>,
    #[serde(default)]
    dynamic: bool,
}

/// Parse the output of `ip -j addr show`, keeping IPv4 addresses only
pub fn parse_links(json: &str) -> std::result::Result<Vec<Link>, serde_json::Error> {
    let raw: Vec<IpLink> = serde_json::from_str(json)?;

    Ok(raw
        .into_iter()
        .map(|link| {
            let addresses = link
                .addr_info
                .iter()
                .filter(|info| info.family == "inet")
                .filter_map(|info| {
                    let addr: Ipv4Addr = info.local.as_deref()?.parse().ok()?;
                    let net = Ipv4Net::new(addr, info.prefixlen?).ok()?;
                    Some(BoundAddress {
                        net,
                        dynamic: info.dynamic,
                    })
                })
                .collect();

            Link {
                name: link.ifname,
                flags: LinkFlags::from_names(link.flags.iter().map(String::as_str)),
                addresses,
            }
        })
        .collect())
}

/// iproute2-backed [`LinkControl`]
#[derive(Debug, Clone)]
pub struct IpRoute {
    program: PathBuf,
    timeout: Duration,
}

impl IpRoute {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// Check that the binary runs at all; used as a startup probe
    pub fn check_available(&self) -> Result<()> {
        command::run_checked(&self.program, &["-V".to_string()], self.timeout).map(|_| ())
    }

    fn addr_change(&self, verb: &str, link: &str, address: Ipv4Net) -> Result<()> {
        let args = vec![
            "addr".to_string(),
            verb.to_string(),
            address.to_string(),
            "dev".to_string(),
            link.to_string(),
        ];
        debug!(interface = link, %address, verb, "ip addr");
        command::run_checked(&self.program, &args, self.timeout).map(|_| ())
    }
}

impl LinkControl for IpRoute {
    fn links(&self) -> Result<Vec<Link>> {
        let args = vec!["-j".to_string(), "addr".to_string(), "show".to_string()];
        let output = command::run_checked(&self.program, &args, self.timeout)?;

        parse_links(&output.stdout).map_err(|source| Error::CommandOutput {
            command: format!("{} -j addr show", self.program.display()),
            source,
        })
    }

    fn add_address(&self, link: &str, address: Ipv4Net) -> Result<()> {
        self.addr_change("add", link, address)
    }

    fn remove_address(&self, link: &str, address: Ipv4Net) -> Result<()> {
        self.addr_change("del", link, address)
    }
}
