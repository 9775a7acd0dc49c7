//! Daemon configuration.
//!
//! Loaded once at startup from a JSON file and layered with command-line
//! overrides; immutable for the remainder of the process's life.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::vg::EXTENT_SIZE_BYTES;

const MIB: i64 = 1024 * 1024;

/// The daemon's validated startup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// TCP port to accept RPC connections on, if any.
    #[serde(default)]
    pub listen_port: Option<u16>,
    /// Unix-domain socket path to accept RPC connections on, if any.
    #[serde(default)]
    pub listen_path: Option<String>,
    /// Extents granted to a host per top-up, expressed in MiB.
    pub host_allocation_quantum_mib: i64,
    /// Free-pool threshold below which a host is topped up, in MiB.
    pub host_low_water_mark_mib: i64,
    /// Name of the volume group this daemon owns.
    pub vg_name: String,
    /// Block devices contributing physical extents to the volume group.
    pub devices: Vec<String>,
}

/// Command-line overrides layered onto a loaded [`Configuration`]. Each
/// field, if set, replaces the corresponding configuration value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Overrides `listen_port`.
    pub listen_port: Option<u16>,
    /// Overrides `listen_path`.
    pub listen_path: Option<String>,
}

impl Configuration {
    /// Reads and parses a configuration file, then applies `overrides`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid JSON, or
    /// [`ConfigError::NoListener`]/[`ConfigError::NoDevices`] if the
    /// resulting configuration is invalid.
    pub fn load(path: impl AsRef<Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read { path: path.display().to_string(), source: e })?;
        let mut config: Self = serde_json::from_str(&data)
            .map_err(|e| ConfigError::Parse { path: path.display().to_string(), source: e })?;

        if let Some(port) = overrides.listen_port {
            config.listen_port = Some(port);
        }
        if let Some(path) = overrides.listen_path {
            config.listen_path = Some(path);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_port.is_none() && self.listen_path.is_none() {
            return Err(ConfigError::NoListener);
        }
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        Ok(())
    }

    /// The per-tick top-up quantum, in extents.
    pub fn allocation_quantum_extents(&self) -> u64 {
        mib_to_extents(self.host_allocation_quantum_mib)
    }

    /// The per-host low-water mark, in extents.
    pub fn low_water_mark_extents(&self) -> u64 {
        mib_to_extents(self.host_low_water_mark_mib)
    }
}

fn mib_to_extents(mib: i64) -> u64 {
    let bytes = mib.max(0) as u64 * MIB as u64;
    bytes / EXTENT_SIZE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_valid_config() {
        let file = write_config(
            r#"{
                "listen_port": 8080,
                "host_allocation_quantum_mib": 64,
                "host_low_water_mark_mib": 16,
                "vg_name": "vg0",
                "devices": ["/dev/sdb"]
            }"#,
        );
        let config = Configuration::load(file.path(), ConfigOverrides::default()).unwrap();
        assert_eq!(config.listen_port, Some(8080));
        assert_eq!(config.allocation_quantum_extents(), 16);
        assert_eq!(config.low_water_mark_extents(), 4);
    }

    #[test]
    fn rejects_missing_listener() {
        let file = write_config(
            r#"{
                "host_allocation_quantum_mib": 64,
                "host_low_water_mark_mib": 16,
                "vg_name": "vg0",
                "devices": ["/dev/sdb"]
            }"#,
        );
        let err = Configuration::load(file.path(), ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::NoListener));
    }

    #[test]
    fn rejects_empty_devices() {
        let file = write_config(
            r#"{
                "listen_port": 8080,
                "host_allocation_quantum_mib": 64,
                "host_low_water_mark_mib": 16,
                "vg_name": "vg0",
                "devices": []
            }"#,
        );
        let err = Configuration::load(file.path(), ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::NoDevices));
    }

    #[test]
    fn cli_override_supplies_missing_listener() {
        let file = write_config(
            r#"{
                "host_allocation_quantum_mib": 64,
                "host_low_water_mark_mib": 16,
                "vg_name": "vg0",
                "devices": ["/dev/sdb"]
            }"#,
        );
        let overrides = ConfigOverrides { listen_path: Some("/tmp/xenvm.sock".to_string()), ..Default::default() };
        let config = Configuration::load(file.path(), overrides).unwrap();
        assert_eq!(config.listen_path.as_deref(), Some("/tmp/xenvm.sock"));
    }
}
