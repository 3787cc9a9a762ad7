//! Configuration file support for mandiag.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MANDIAG_*)
//! 3. Local config file (./mandiag.toml)
//! 4. Global config file (~/.config/mandiag/config.toml)

use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{debug, warn};
use mandiag::{OpenOptions, RetryPolicy, SerialConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local configuration file.
pub(crate) const LOCAL_CONFIG_FILE: &str = "mandiag.toml";

/// Serial link configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSection {
    /// Serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Per-read timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Parity ("none", "odd", "even").
    pub parity: Option<String>,
    /// Stop bits (1 or 2).
    pub stop_bits: Option<u8>,
    /// Data bits (5 to 8).
    pub data_bits: Option<u8>,
    /// Open attempts before giving up.
    pub connect_retries: Option<u32>,
    /// Delay between open attempts in milliseconds.
    pub connect_delay_ms: Option<u64>,
}

/// Retry engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySection {
    /// Outer send attempts.
    pub attempts: Option<u32>,
    /// Scan window per attempt in milliseconds.
    pub scan_timeout_ms: Option<u64>,
    /// Budget for pending replies in milliseconds.
    pub pending_deadline_ms: Option<u64>,
    /// Sub-wait interval between pending scans in milliseconds.
    pub pending_interval_ms: Option<u64>,
    /// Number of sub-waits per pending scan.
    pub pending_checks: Option<u32>,
}

/// Frame prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSection {
    /// Token that starts every request line.
    pub request_prefix: Option<String>,
    /// Token that starts every response line.
    pub response_prefix: Option<String>,
}

/// CAN variant configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanSection {
    /// SocketCAN interface (e.g., "can0").
    pub interface: Option<String>,
    /// Receive timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Serial link settings.
    #[serde(default)]
    pub serial: SerialSection,
    /// Retry engine settings.
    #[serde(default)]
    pub retry: RetrySection,
    /// Frame prefixes.
    #[serde(default)]
    pub protocol: ProtocolSection,
    /// CAN settings.
    #[serde(default)]
    pub can: CanSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mandiag").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Absent values never overwrite.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        let Self {
            serial,
            retry,
            protocol,
            can,
        } = other;

        take(&mut self.serial.port, serial.port);
        take(&mut self.serial.baud, serial.baud);
        take(&mut self.serial.timeout_ms, serial.timeout_ms);
        take(&mut self.serial.parity, serial.parity);
        take(&mut self.serial.stop_bits, serial.stop_bits);
        take(&mut self.serial.data_bits, serial.data_bits);
        take(&mut self.serial.connect_retries, serial.connect_retries);
        take(&mut self.serial.connect_delay_ms, serial.connect_delay_ms);

        take(&mut self.retry.attempts, retry.attempts);
        take(&mut self.retry.scan_timeout_ms, retry.scan_timeout_ms);
        take(&mut self.retry.pending_deadline_ms, retry.pending_deadline_ms);
        take(&mut self.retry.pending_interval_ms, retry.pending_interval_ms);
        take(&mut self.retry.pending_checks, retry.pending_checks);

        take(&mut self.protocol.request_prefix, protocol.request_prefix);
        take(&mut self.protocol.response_prefix, protocol.response_prefix);

        take(&mut self.can.interface, can.interface);
        take(&mut self.can.timeout_ms, can.timeout_ms);
    }

    /// Build the serial settings for `port` at `baud`.
    pub fn serial_config(&self, port: &str, baud: u32) -> Result<SerialConfig> {
        let mut config = SerialConfig::new(port, baud);

        if let Some(ms) = self.serial.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(parity) = &self.serial.parity {
            config = config.with_parity(parity.parse().context("Invalid [serial] parity")?);
        }
        if let Some(bits) = self.serial.stop_bits {
            config = config.with_stop_bits(
                bits.to_string()
                    .parse()
                    .context("Invalid [serial] stop_bits")?,
            );
        }
        if let Some(bits) = self.serial.data_bits {
            config = config.with_data_bits(
                bits.to_string()
                    .parse()
                    .context("Invalid [serial] data_bits")?,
            );
        }

        Ok(config)
    }

    /// Connection retry settings.
    pub fn open_options(&self) -> OpenOptions {
        let mut options = OpenOptions::default();
        if let Some(retries) = self.serial.connect_retries {
            options = options.with_retries(retries);
        }
        if let Some(ms) = self.serial.connect_delay_ms {
            options = options.with_retry_delay(Duration::from_millis(ms));
        }
        options
    }

    /// Retry engine policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        if let Some(attempts) = self.retry.attempts {
            policy = policy.with_attempts(attempts);
        }
        if let Some(ms) = self.retry.scan_timeout_ms {
            policy = policy.with_scan_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.retry.pending_deadline_ms {
            policy = policy.with_pending_deadline(Duration::from_millis(ms));
        }
        if self.retry.pending_interval_ms.is_some() || self.retry.pending_checks.is_some() {
            let interval = self
                .retry
                .pending_interval_ms
                .map_or(policy.pending_interval, Duration::from_millis);
            let checks = self.retry.pending_checks.unwrap_or(policy.pending_checks);
            policy = policy.with_pending_wait(interval, checks);
        }
        policy
    }
}
