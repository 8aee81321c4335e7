//! Durable desired-state snapshot
//!
//! Settings live in a versioned TOML file. Saves go through a temp file
//! and a rename so a crash never leaves a half-written snapshot behind.

use crate::address::{DesiredState, EthernetInterface};
use crate::error::{Error, Result};
use crate::resolver::{check_conflicts, validate_interface};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Current on-disk format version
pub const SETTINGS_VERSION: u32 = 1;

/// On-disk representation
#[derive(Debug, Serialize, Deserialize)]
struct SettingsFile {
    version: u32,
    #[serde(default, rename = "interface")]
    interfaces: Vec<EthernetInterface>,
}

/// Where a loaded desired state came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// Parsed from the settings file
    Settings,
    /// No settings file existed
    DefaultMissing,
    /// Settings file was unusable; the reason is kept for logging
    DefaultInvalid(String),
}

/// Settings file owner
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    managed_prefixes: Vec<String>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, managed_prefixes: Vec<String>) -> Self {
        Self {
            path: path.into(),
            managed_prefixes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse and validate the settings file without any fallback
    pub fn load(&self) -> Result<DesiredState> {
        let content = fs::read_to_string(&self.path).map_err(|e| Error::ConfigRead {
            path: self.path.clone(),
            source: e,
        })?;

        let file: SettingsFile = toml::from_str(&content)?;
        if file.version != SETTINGS_VERSION {
            return Err(Error::SettingsVersion {
                found: file.version,
                expected: SETTINGS_VERSION,
            });
        }

        let mut state = DesiredState::new();
        for interface in file.interfaces {
            if state.contains(&interface.name) {
                return Err(Error::Validation(format!(
                    "Duplicate interface '{}' in settings",
                    interface.name
                )));
            }
            validate_interface(&interface, &self.managed_prefixes)?;
            check_conflicts(&interface, &state, &[])?;
            state.upsert(interface);
        }

        Ok(state)
    }

    /// Load the settings file, falling back to `defaults` when it is missing or unusable
    ///
    /// Startup never fails here: some working configuration beats none.
    pub fn load_or_default(&self, defaults: Vec<EthernetInterface>) -> (DesiredState, LoadSource) {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no settings file, using default profile");
            return (
                DesiredState::from_interfaces(defaults),
                LoadSource::DefaultMissing,
            );
        }

        match self.load() {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    interfaces = state.len(),
                    "loaded settings"
                );
                (state, LoadSource::Settings)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "settings unusable, using default profile"
                );
                (
                    DesiredState::from_interfaces(defaults),
                    LoadSource::DefaultInvalid(e.to_string()),
                )
            }
        }
    }

    /// Atomically replace the settings file with `state`
    pub fn save(&self, state: &DesiredState) -> Result<()> {
        let file = SettingsFile {
            version: SETTINGS_VERSION,
            interfaces: state.to_vec(),
        };
        let content = toml::to_string_pretty(&file)?;

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.temp_path();
        {
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            out.write_all(content.as_bytes())?;
            out.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        // Make the rename itself durable
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
            && let Ok(handle) = File::open(dir)
        {
            let _ = handle.sync_all();
        }

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "settings".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddressMode, InterfaceAddress};
    use crate::config::default_managed_prefixes;
    use crate::profile::DefaultProfile;
    use std::net::Ipv4Addr;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> SettingsStore {
        SettingsStore::new(dir.join("settings.toml"), default_managed_prefixes())
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let state = DesiredState::from_interfaces([
            EthernetInterface::new("eth0")
                .with_address(InterfaceAddress::parse("192.168.2.2", AddressMode::Unmanaged).unwrap())
                .with_address(InterfaceAddress::client())
                .with_address(
                    InterfaceAddress::parse("172.16.7.2/16", AddressMode::BackupServer).unwrap(),
                )
                .with_address(
                    InterfaceAddress::parse("10.9.0.2/24", AddressMode::BackupServer).unwrap(),
                ),
            EthernetInterface::new("usb0")
                .with_address(InterfaceAddress::parse("192.168.3.1", AddressMode::Server).unwrap())
                .with_dhcp_server(Ipv4Addr::new(192, 168, 3, 1)),
        ]);

        store.save(&state).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);

        let eth0 = loaded.get("eth0").unwrap();
        assert_eq!(eth0.addresses[2].mode, AddressMode::BackupServer);
        assert_eq!(eth0.addresses[3].host(), Some(Ipv4Addr::new(10, 9, 0, 2)));
    }

    #[test]
    fn test_missing_file_uses_default_profile() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let (state, source) = store.load_or_default(DefaultProfile::Bluerov2.interfaces());
        assert_eq!(source, LoadSource::DefaultMissing);
        assert_eq!(state.len(), 2);

        let eth0 = state.get("eth0").unwrap();
        assert_eq!(eth0.addresses[0].mode, AddressMode::Unmanaged);
        assert_eq!(eth0.addresses[0].host(), Some(Ipv4Addr::new(192, 168, 2, 2)));

        let usb0 = state.get("usb0").unwrap();
        assert_eq!(usb0.addresses[0].mode, AddressMode::Server);
        assert_eq!(usb0.addresses[0].host(), Some(Ipv4Addr::new(192, 168, 3, 1)));
    }

    #[test]
    fn test_corrupt_file_uses_default_profile() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(store.path(), "version = 1\n[[interface]\nname = ").unwrap();

        let (state, source) = store.load_or_default(DefaultProfile::Bluerov2.interfaces());
        assert!(matches!(source, LoadSource::DefaultInvalid(_)));
        assert!(state.contains("usb0"));
    }

    #[test]
    fn test_invalid_addressing_falls_back() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(
            store.path(),
            r#"
version = 1

[[interface]]
name = "eth0"
addresses = [{ mode = "client" }, { mode = "client" }]
"#,
        )
        .unwrap();

        assert!(store.load().is_err());
        let (_, source) = store.load_or_default(DefaultProfile::Bluerov2.interfaces());
        assert!(matches!(source, LoadSource::DefaultInvalid(_)));
    }

    #[test]
    fn test_overlap_across_interfaces_falls_back() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(
            store.path(),
            r#"
version = 1

[[interface]]
name = "eth0"
addresses = [{ ip = "192.168.3.5", mode = "server" }]

[[interface]]
name = "usb0"
addresses = [{ ip = "192.168.3.1", mode = "server" }]
"#,
        )
        .unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let (state, source) = store.load_or_default(DefaultProfile::Bluerov2.interfaces());
        assert!(matches!(source, LoadSource::DefaultInvalid(_)));
        assert_eq!(state, DesiredState::from_interfaces(DefaultProfile::Bluerov2.interfaces()));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(store.path(), "version = 99\n").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, Error::SettingsVersion { found: 99, .. }));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path().join("nested").as_path());

        store
            .save(&DesiredState::from_interfaces(DefaultProfile::Bluerov2.interfaces()))
            .unwrap();

        assert!(store.path().exists());
        assert!(!store.temp_path().exists());
        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("version = 1"));
        assert!(content.contains("usb0"));
    }
}
