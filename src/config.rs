//! Daemon configuration for cableguy
//!
//! Parses the optional `cableguy.toml` using serde. Every field has a
//! default so a missing file yields a working configuration.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load configuration from a file
pub fn load(path: &Path) -> Result<CableguyConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: CableguyConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration if the file exists, defaults otherwise
pub fn load_or_default(path: &Path) -> Result<CableguyConfig> {
    if path.exists() {
        load(path)
    } else {
        Ok(CableguyConfig::default())
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CableguyConfig {
    /// Settings store location
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Reconciliation tunables
    #[serde(default)]
    pub engine: EngineConfig,

    /// External binaries
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl CableguyConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;

        if engine.reconcile_interval_secs == 0 {
            return Err(Error::ConfigValidation(
                "engine.reconcile_interval_secs must be greater than zero".into(),
            ));
        }

        if engine.command_timeout_secs == 0 {
            return Err(Error::ConfigValidation(
                "engine.command_timeout_secs must be greater than zero".into(),
            ));
        }

        if engine.backoff.base_delay_ms > engine.backoff.max_delay_ms {
            return Err(Error::ConfigValidation(format!(
                "engine.backoff.base_delay_ms ({}) exceeds max_delay_ms ({})",
                engine.backoff.base_delay_ms, engine.backoff.max_delay_ms
            )));
        }

        if engine.backoff.multiplier < 1.0 {
            return Err(Error::ConfigValidation(
                "engine.backoff.multiplier must be at least 1.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&engine.backoff.jitter) {
            return Err(Error::ConfigValidation(
                "engine.backoff.jitter must be between 0.0 and 1.0".into(),
            ));
        }

        if engine.managed_prefixes.iter().any(|p| p.is_empty()) {
            return Err(Error::ConfigValidation(
                "engine.managed_prefixes must not contain empty entries".into(),
            ));
        }

        Ok(())
    }
}

/// Where desired state is persisted
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsConfig {
    #[serde(default = "default_settings_path")]
    pub path: PathBuf,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: default_settings_path(),
        }
    }
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("/var/lib/cableguy/settings.toml")
}

/// Reconciliation loop tunables
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Seconds between full reconciliation passes
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Maximum staleness of the published interface snapshot
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_secs: u64,

    /// Timeout for each external command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// How long a DHCP client may run without a lease before it is restarted
    #[serde(default = "default_acquisition_timeout")]
    pub acquisition_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL when stopping subprocesses
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Link name prefixes the engine accepts
    #[serde(default = "default_managed_prefixes")]
    pub managed_prefixes: Vec<String>,

    /// Hot-plug notification burst size
    #[serde(default = "default_hotplug_capacity")]
    pub hotplug_capacity: f64,

    /// Hot-plug notifications refilled per second
    #[serde(default = "default_hotplug_refill_rate")]
    pub hotplug_refill_rate: f64,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl EngineConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_secs(self.acquisition_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            snapshot_ttl_secs: default_snapshot_ttl(),
            command_timeout_secs: default_command_timeout(),
            acquisition_timeout_secs: default_acquisition_timeout(),
            stop_grace_secs: default_stop_grace(),
            managed_prefixes: default_managed_prefixes(),
            hotplug_capacity: default_hotplug_capacity(),
            hotplug_refill_rate: default_hotplug_refill_rate(),
            backoff: BackoffConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

fn default_reconcile_interval() -> u64 {
    5
}

fn default_snapshot_ttl() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    5
}

fn default_acquisition_timeout() -> u64 {
    30
}

fn default_stop_grace() -> u64 {
    3
}

pub(crate) fn default_managed_prefixes() -> Vec<String> {
    ["eth", "en", "usb"].iter().map(|s| s.to_string()).collect()
}

fn default_hotplug_capacity() -> f64 {
    5.0
}

fn default_hotplug_refill_rate() -> f64 {
    1.0
}

/// Capped exponential backoff for failed binds and subprocess restarts
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Attempts before the backoff schedule is exhausted and restarts from the cap
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Fraction of each delay randomized
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    60000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u8 {
    10
}

fn default_jitter() -> f64 {
    0.5
}

/// Circuit breaker suspending restarts of a subprocess that keeps failing
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    #[serde(default = "default_half_open_timeout")]
    pub half_open_timeout_secs: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            half_open_timeout_secs: default_half_open_timeout(),
        }
    }
}

fn default_failure_threshold() -> usize {
    5
}

fn default_half_open_timeout() -> f64 {
    300.0
}

/// Paths of the external programs the Linux adapter drives
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ip")]
    pub ip: PathBuf,

    #[serde(default = "default_dhclient")]
    pub dhclient: PathBuf,

    #[serde(default = "default_dnsmasq")]
    pub dnsmasq: PathBuf,

    #[serde(default = "default_arping")]
    pub arping: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            dhclient: default_dhclient(),
            dnsmasq: default_dnsmasq(),
            arping: default_arping(),
        }
    }
}

fn default_ip() -> PathBuf {
    PathBuf::from("ip")
}

fn default_dhclient() -> PathBuf {
    PathBuf::from("dhclient")
}

fn default_dnsmasq() -> PathBuf {
    PathBuf::from("dnsmasq")
}

fn default_arping() -> PathBuf {
    PathBuf::from("arping")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: CableguyConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine.reconcile_interval_secs, 5);
        assert_eq!(config.engine.snapshot_ttl_secs, 10);
        assert_eq!(config.engine.backoff.max_delay_ms, 60000);
        assert_eq!(config.engine.managed_prefixes, vec!["eth", "en", "usb"]);
        assert_eq!(
            config.settings.path,
            PathBuf::from("/var/lib/cableguy/settings.toml")
        );
    }

    #[test]
    fn test_partial_override() {
        let toml = r#"
[settings]
path = "/tmp/cableguy.toml"

[engine]
reconcile_interval_secs = 2
managed_prefixes = ["eth"]

[engine.backoff]
base_delay_ms = 500

[tools]
dnsmasq = "/usr/sbin/dnsmasq"
"#;

        let config: CableguyConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine.reconcile_interval_secs, 2);
        assert_eq!(config.engine.backoff.base_delay_ms, 500);
        assert_eq!(config.engine.backoff.max_delay_ms, 60000);
        assert_eq!(config.tools.dnsmasq, PathBuf::from("/usr/sbin/dnsmasq"));
        assert_eq!(config.tools.ip, PathBuf::from("ip"));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let toml = r#"
[engine.backoff]
base_delay_ms = 90000
max_delay_ms = 1000
"#;
        let config: CableguyConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let toml = r#"
[engine]
reconcile_interval_secs = 0
"#;
        let config: CableguyConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
