//! Engine configuration.

use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::protocol::constants::*;

/// Buffer sizes, deadlines and retry budgets for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output buffer size; the largest chunk one write transfer carries.
    pub out_buffer_size: usize,
    /// Input buffer size; the largest chunk one read transfer requests.
    pub in_buffer_size: usize,
    /// Deadline for a single bulk transfer.
    pub transfer_timeout_ms: u64,
    /// Wait between retries after a stall.
    pub nak_backoff_ms: u64,
    /// Consecutive stalls a write chunk may see before `Timeout`.
    pub write_max_stalls: u32,
    /// Consecutive stalls a read may see before `Timeout`.
    pub read_max_stalls: u32,
    /// Device status codes that a read treats like a stall.
    pub stall_status_codes: Vec<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            out_buffer_size: OUT_BUFFER_SIZE,
            in_buffer_size: IN_BUFFER_SIZE,
            transfer_timeout_ms: TRANSFER_TIMEOUT_MS,
            nak_backoff_ms: NAK_BACKOFF_MS,
            write_max_stalls: WRITE_MAX_STALLS,
            read_max_stalls: READ_MAX_STALLS,
            stall_status_codes: vec![QUIRK_STALL_STATUS],
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.out_buffer_size > 0, "out_buffer_size must be non-zero");
        ensure!(self.in_buffer_size > 0, "in_buffer_size must be non-zero");
        ensure!(self.write_max_stalls > 0, "write_max_stalls must be non-zero");
        ensure!(self.read_max_stalls > 0, "read_max_stalls must be non-zero");
        Ok(())
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn nak_backoff(&self) -> Duration {
        Duration::from_millis(self.nak_backoff_ms)
    }

    /// Whether a device status code counts as a stall on the read path.
    pub fn is_stall_status(&self, code: u32) -> bool {
        self.stall_status_codes.contains(&code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.out_buffer_size, 0x10000);
        assert_eq!(config.in_buffer_size, 0x500);
        assert_eq!(config.write_max_stalls, 5);
        assert_eq!(config.read_max_stalls, 10);
        assert!(config.is_stall_status(15));
        assert!(!config.is_stall_status(16));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            "nak_backoff_ms = 20\nstall_status_codes = []\n",
        )
        .unwrap();
        assert_eq!(config.nak_backoff(), Duration::from_millis(20));
        assert!(!config.is_stall_status(15));
        assert_eq!(config.in_buffer_size, IN_BUFFER_SIZE);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig {
            out_buffer_size: 4096,
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let config = EngineConfig {
            read_max_stalls: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
