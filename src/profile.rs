//! Built-in default configurations
//!
//! Used when no settings file exists or it cannot be loaded.

use crate::address::{AddressMode, EthernetInterface, InterfaceAddress};
use clap::ValueEnum;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Named default profile, selected at process start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DefaultProfile {
    /// Tether over eth0, companion USB gadget network on usb0
    #[default]
    Bluerov2,
}

impl DefaultProfile {
    pub fn interfaces(&self) -> Vec<EthernetInterface> {
        match self {
            DefaultProfile::Bluerov2 => vec![
                EthernetInterface::new("eth0").with_address(InterfaceAddress::new(
                    net(Ipv4Addr::new(192, 168, 2, 2)),
                    AddressMode::Unmanaged,
                )),
                EthernetInterface::new("usb0").with_address(InterfaceAddress::new(
                    net(Ipv4Addr::new(192, 168, 3, 1)),
                    AddressMode::Server,
                )),
            ],
        }
    }
}

impl std::fmt::Display for DefaultProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultProfile::Bluerov2 => write!(f, "bluerov2"),
        }
    }
}

fn net(addr: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::new_assert(addr, crate::address::DEFAULT_PREFIX_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::validate_interface;

    #[test]
    fn test_bluerov2_profile() {
        let interfaces = DefaultProfile::Bluerov2.interfaces();
        assert_eq!(interfaces.len(), 2);

        assert_eq!(interfaces[0].name, "eth0");
        assert_eq!(interfaces[0].addresses[0].mode, AddressMode::Unmanaged);
        assert_eq!(
            interfaces[0].addresses[0].host(),
            Some(Ipv4Addr::new(192, 168, 2, 2))
        );

        assert_eq!(interfaces[1].name, "usb0");
        assert_eq!(interfaces[1].addresses[0].mode, AddressMode::Server);
        assert_eq!(
            interfaces[1].addresses[0].host(),
            Some(Ipv4Addr::new(192, 168, 3, 1))
        );
    }

    #[test]
    fn test_profiles_are_valid() {
        let prefixes = crate::config::default_managed_prefixes();
        for iface in DefaultProfile::Bluerov2.interfaces() {
            validate_interface(&iface, &prefixes).unwrap();
        }
    }
}
