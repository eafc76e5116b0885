//! Transport configuration.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::device::HeciDeviceId;
use crate::protocol::constants::*;

/// Configuration for the HECI transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeciConfig {
    /// Target HECI instance.
    pub device: HeciDeviceId,
    /// Explicit register base; resolved from PCI config space when unset.
    pub base_address: Option<u64>,
    /// Largest message accepted by `send`, in bytes.
    pub max_message_len: usize,
    /// Bound for waiting on the peer to drain the host ring between fragments.
    pub send_timeout_ms: u64,
    /// Bound for blocking `receive` and for frames after the first.
    pub receive_timeout_ms: u64,
    /// Bound for each step of the reset handshake.
    pub reset_timeout_ms: u64,
    /// Sleep between register polls, in microseconds.
    pub poll_interval_us: u64,
    /// Host client address.
    pub host_address: u8,
    /// ME client address for MKHI traffic.
    pub mkhi_address: u8,
}

impl Default for HeciConfig {
    fn default() -> Self {
        Self {
            device: HeciDeviceId::Heci1,
            base_address: None,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            send_timeout_ms: HECI_SEND_TIMEOUT_MS,
            receive_timeout_ms: HECI_READ_TIMEOUT_MS,
            reset_timeout_ms: HECI_INIT_TIMEOUT_MS,
            poll_interval_us: HECI_POLL_INTERVAL_US,
            host_address: BIOS_FIXED_HOST_ADDR,
            mkhi_address: HECI_MKHI_MESSAGE_ADDR,
        }
    }
}

impl HeciConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HeciConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}
