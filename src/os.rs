//! Operating system adapter
//!
//! Provides:
//! - Link enumeration and IPv4 address add/remove (iproute2)
//! - DHCP client and server subprocess launching
//! - Duplicate address probing (arping)
//! - Bounded-time execution of external commands
//!
//! The interface manager only sees the traits defined here, so tests can
//! drive it with an in-memory platform.

pub mod command;
pub mod iproute;
pub mod probe;
pub mod process;

use crate::config::{CableguyConfig, ToolsConfig};
use crate::error::Result;
use crate::resolver::LivenessProbe;
use bitflags::bitflags;
use ipnet::Ipv4Net;
use std::path::PathBuf;
use std::time::Duration;

pub use iproute::IpRoute;
pub use probe::Arping;
pub use process::Subprocess;

bitflags! {
    /// Kernel link flags as reported by `ip -j`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LinkFlags: u32 {
        const UP = 1 << 0;
        const BROADCAST = 1 << 1;
        const LOOPBACK = 1 << 2;
        const POINTOPOINT = 1 << 3;
        const MULTICAST = 1 << 4;
        const LOWER_UP = 1 << 5;
        const NO_CARRIER = 1 << 6;
    }
}

impl LinkFlags {
    /// Parse flag names, ignoring ones we do not track
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names
            .into_iter()
            .fold(LinkFlags::empty(), |flags, name| match name {
                "UP" => flags | LinkFlags::UP,
                "BROADCAST" => flags | LinkFlags::BROADCAST,
                "LOOPBACK" => flags | LinkFlags::LOOPBACK,
                "POINTOPOINT" => flags | LinkFlags::POINTOPOINT,
                "MULTICAST" => flags | LinkFlags::MULTICAST,
                "LOWER_UP" => flags | LinkFlags::LOWER_UP,
                "NO-CARRIER" => flags | LinkFlags::NO_CARRIER,
                _ => flags,
            })
    }

    /// Administratively up with a cable attached
    pub fn has_carrier(&self) -> bool {
        self.contains(LinkFlags::UP | LinkFlags::LOWER_UP) && !self.contains(LinkFlags::NO_CARRIER)
    }
}

/// An IPv4 address currently configured on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddress {
    pub net: Ipv4Net,
    /// Installed with a lifetime, i.e. by a DHCP client
    pub dynamic: bool,
}

/// A kernel link and its IPv4 addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub flags: LinkFlags,
    pub addresses: Vec<BoundAddress>,
}

impl Link {
    pub fn has_host(&self, addr: std::net::Ipv4Addr) -> bool {
        self.addresses.iter().any(|a| a.net.addr() == addr)
    }
}

/// Kernel link and address control
pub trait LinkControl: Send {
    /// All links with their IPv4 addresses
    fn links(&self) -> Result<Vec<Link>>;

    /// Bind an address to a link
    fn add_address(&self, link: &str, address: Ipv4Net) -> Result<()>;

    /// Remove an address from a link
    fn remove_address(&self, link: &str, address: Ipv4Net) -> Result<()>;
}

/// What to run for a supervised subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// Shell-like rendering for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How a subprocess ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    Signal(i32),
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessExit::Code(code) => write!(f, "exit code {}", code),
            ProcessExit::Signal(sig) => write!(f, "signal {}", sig),
        }
    }
}

/// A spawned subprocess
pub trait ChildProcess: Send {
    fn pid(&self) -> u32;

    /// Non-blocking liveness check; `Some` once the process has exited
    fn try_wait(&mut self) -> Result<Option<ProcessExit>>;

    /// SIGTERM, then SIGKILL after `grace`
    fn terminate(&mut self, grace: Duration) -> Result<()>;
}

/// Starts subprocesses
pub trait ProcessLauncher: Send {
    fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ChildProcess>>;
}

/// Everything the interface manager needs from the host
pub struct Platform {
    pub links: Box<dyn LinkControl>,
    pub launcher: Box<dyn ProcessLauncher>,
    pub probe: Box<dyn LivenessProbe>,
    pub tools: ToolsConfig,
}

impl Platform {
    /// Linux adapter built on iproute2, dhclient, dnsmasq and arping
    pub fn linux(config: &CableguyConfig) -> Self {
        let timeout = config.engine.command_timeout();
        Self {
            links: Box::new(IpRoute::new(config.tools.ip.clone(), timeout)),
            launcher: Box::new(Subprocess::new()),
            probe: Box::new(Arping::new(config.tools.arping.clone(), timeout)),
            tools: config.tools.clone(),
        }
    }
}
