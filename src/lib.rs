//! cableguy - Ethernet interface addressing daemon
//!
//! Keeps wired and USB Ethernet links on predictable IPv4 addresses whether
//! or not the network offers DHCP, and serves DHCP where the host is the
//! gateway.

pub mod address;
pub mod config;
pub mod error;
pub mod manager;
pub mod os;
pub mod profile;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use address::{AddressMode, DesiredState, EthernetInterface, InterfaceAddress};
pub use error::{Error, ErrorCategory, Result};
pub use manager::{Engine, InterfaceManager, InterfaceView};
