//! Configuration management for Printlink
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (PLK_* prefix, highest precedence)
//! 2. printlink.local.toml (local overrides, not deployed)
//! 3. printlink.toml (deployed device config)
//! 4. ~/.config/printlink/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Printlink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    pub printer: PrinterSection,
    pub connect: ConnectSection,
    pub network: NetworkSection,
    pub timing: TimingSection,
    pub transfer: TransferSection,
    pub commands: CommandSection,
}

impl SdkConfig {
    /// Rejects configurations that cannot possibly talk to the service.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.printer.serial_number.is_empty() {
            return Err(ConfigError::ValidationError(
                "printer.serial_number must not be empty".to_string(),
            ));
        }
        if let Some(url) = &self.connect.server_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "connect.server_url must be an http(s) URL, got {url}"
                )));
            }
        }
        if self.timing.telemetry_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timing.telemetry_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity of the printer this SDK instance speaks for
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterSection {
    /// Immutable serial number
    pub serial_number: String,
    /// Model name: MK3, MK4, MINI, CORE
    pub printer_type: String,
    /// Factory fingerprint; derived from the serial when absent
    pub fingerprint: Option<String>,
    /// Firmware version reported in SEND_INFO
    pub firmware_version: Option<String>,
}

impl Default for PrinterSection {
    fn default() -> Self {
        Self {
            serial_number: String::new(),
            printer_type: "MK4".to_string(),
            fingerprint: None,
            firmware_version: None,
        }
    }
}

/// Connect service endpoint and credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectSection {
    /// Base URL of the Connect service
    pub server_url: Option<String>,
    /// Device token; absent until registration completes
    pub token: Option<String>,
}

/// Network identity reported in SEND_INFO
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub hostname: Option<String>,
    pub ipv4: Option<String>,
    pub mac: Option<String>,
}

/// Loop cadence and HTTP timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    /// Minimum spacing of telemetry sends, seconds
    pub telemetry_interval_secs: u64,
    /// Initial retry backoff, seconds
    pub retry_backoff_secs: u64,
    /// Backoff ceiling, seconds
    pub max_backoff_secs: u64,
    /// Per-request HTTP timeout, seconds
    pub request_timeout_secs: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            telemetry_interval_secs: 1,
            retry_backoff_secs: 1,
            max_backoff_secs: 60,
            request_timeout_secs: 10,
        }
    }
}

/// Transfer worker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    /// Worker thread count
    pub workers: usize,
    /// Bytes per chunk
    pub chunk_size: usize,
    /// Fail a transfer after this many seconds without progress
    pub inactivity_timeout_secs: u64,
    /// Default throttle, bytes per second; absent means unthrottled
    pub throttle_bytes_per_second: Option<u64>,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            workers: 2,
            chunk_size: 64 * 1024,
            inactivity_timeout_secs: 30,
            throttle_bytes_per_second: None,
        }
    }
}

/// Command dispatch tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSection {
    /// Wire names of commands that preempt a running command
    pub priority: Vec<String>,
    /// Outbound event queue capacity
    pub event_queue_capacity: usize,
}

impl Default for CommandSection {
    fn default() -> Self {
        Self {
            priority: vec!["RESET_PRINTER".to_string()],
            event_queue_capacity: 100,
        }
    }
}
