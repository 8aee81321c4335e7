//! Interface manager
//!
//! Owns desired addressing for every managed Ethernet interface and drives
//! the host toward it:
//! - Reconciliation of addresses, DHCP clients and DHCP servers
//! - Serialized mutations that persist before they are acknowledged
//! - Snapshot reads merged with live link status

mod engine;
mod handle;
mod status;

pub use engine::Engine;
pub use handle::InterfaceManager;
pub use status::{InterfaceStatus, InterfaceView, Snapshot};
