//! Session configuration, loadable from TOML.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::constants::*;
use crate::report::AbsoluteLayout;
use crate::retry::RetryPolicy;

/// Top-level configuration for talking to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 7-bit I2C address of the device.
    pub device_address: u8,
    /// Largest input report read by `get_report`.
    pub max_report_len: usize,
    /// Which 30-byte absolute report the firmware sends.
    pub absolute_layout: AbsoluteLayout,
    pub bootloader: BootloaderConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_address: DEFAULT_I2C_ADDRESS,
            max_report_len: MAX_REPORT_LEN,
            absolute_layout: AbsoluteLayout::default(),
            bootloader: BootloaderConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Bootloader protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootloaderConfig {
    pub report_id: u8,
    /// Largest data payload per write chunk. Capped at 520.
    pub max_payload: usize,
    /// Descriptor register sent with format-image to pre-v9 parts.
    pub legacy_descriptor_address: u16,
    /// Bus address sent with format-image to pre-v9 parts.
    pub legacy_bus_address: u8,
    /// Image offset of the little-endian entry point word.
    pub entry_point_offset: usize,
    /// Busy-flag polling in `get_status`.
    pub retry: RetryPolicy,
    pub timing: StageTiming,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            report_id: REPORT_ID_BOOTLOADER,
            max_payload: MAX_WRITE_PAYLOAD,
            legacy_descriptor_address: HID_DESCRIPTOR_REGISTER,
            legacy_bus_address: DEFAULT_I2C_ADDRESS,
            entry_point_offset: 0,
            retry: RetryPolicy::default(),
            timing: StageTiming::default(),
        }
    }
}

/// Fixed waits between pipeline stages, in milliseconds.
///
/// The `legacy_*` values apply when the device reports no timing hints
/// (protocol version below 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTiming {
    pub reset_ms: u64,
    pub invoke_ms: u64,
    pub legacy_page_write_ms: u64,
    /// Per started kilobyte.
    pub legacy_format_region_ms: u64,
    pub flush_ms: u64,
    pub validate_ms: u64,
    pub final_reset_ms: u64,
}

impl Default for StageTiming {
    fn default() -> Self {
        Self {
            reset_ms: 100,
            invoke_ms: 100,
            legacy_page_write_ms: 100,
            legacy_format_region_ms: 50,
            flush_ms: 10,
            validate_ms: 100,
            final_reset_ms: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_round_trip() {
        let mut config = SessionConfig::default();
        config.device_address = 0x2A;
        config.bootloader.retry.deadline_ms = Some(2_000);
        config.bootloader.timing.flush_ms = 25;

        let text = toml::to_string_pretty(&config).unwrap();
        let back: SessionConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SessionConfig = toml::from_str(
            r#"
            device_address = 0x15
            absolute_layout = "alps"

            [bootloader.timing]
            validate_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.device_address, 0x15);
        assert_eq!(config.max_report_len, MAX_REPORT_LEN);
        assert_eq!(config.absolute_layout, AbsoluteLayout::Alps);
        assert_eq!(config.bootloader.timing.validate_ms, 250);
        assert_eq!(config.bootloader.timing.reset_ms, 100);
        assert_eq!(config.bootloader.retry.max_attempts, 50);
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("c3hid-config-{}.toml", std::process::id()));
        let config = SessionConfig::default();
        config.save_to_file(&path).unwrap();
        let loaded = SessionConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
