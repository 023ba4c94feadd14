//! Update engine configuration.

use std::time::Duration;

use anyhow::Result;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Default location of the firmware assets.
pub const DEFAULT_BASE_URL: &str = "https://assets.openterface.com/openterface/firmware/";
/// Default name of the "latest firmware" pointer file.
pub const DEFAULT_DESCRIPTOR_NAME: &str = "minikvm_latest_firmware2.txt";
/// Bytes per EEPROM write command.
pub const DEFAULT_CHUNK_SIZE: usize = 64;
/// Share of overall progress credited to the download.
pub const DEFAULT_DOWNLOAD_WEIGHT: f64 = 0.1;

/// How the image is handed to the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStrategy {
    /// The engine splits the image and issues one write per chunk.
    #[default]
    Chunked,
    /// The device splits the image itself and reports progress.
    Delegated,
}

/// Configuration for an update session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Base URL the descriptor and image are fetched from.
    pub base_url: String,
    /// Descriptor file name under `base_url`.
    pub descriptor_name: String,
    /// EEPROM address the image is written to.
    pub start_address: u16,
    /// Bytes per write command.
    pub chunk_size: usize,
    /// Settling delay between consecutive chunk writes.
    pub chunk_delay_ms: u64,
    /// Fraction of progress attributed to the download phase.
    pub download_weight: f64,
    /// Bound on each HTTP request.
    pub fetch_timeout_secs: u64,
    /// Bound on each device call; 0 disables the bound.
    pub write_timeout_ms: u64,
    /// Chunking strategy.
    pub strategy: WriteStrategy,
    /// Read the EEPROM back after writing and compare.
    pub verify: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            descriptor_name: DEFAULT_DESCRIPTOR_NAME.to_string(),
            start_address: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay_ms: 10,
            download_weight: DEFAULT_DOWNLOAD_WEIGHT,
            fetch_timeout_secs: 30,
            write_timeout_ms: 2000,
            strategy: WriteStrategy::Chunked,
            verify: false,
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UpdateConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the values the engine relies on.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.chunk_size == 0 {
            return Err(UpdateError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.download_weight) {
            return Err(UpdateError::InvalidConfig(format!(
                "download_weight must be in [0, 1), got {}",
                self.download_weight
            )));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(UpdateError::InvalidConfig(
                "fetch_timeout_secs must be > 0".into(),
            ));
        }
        self.base_url()?;
        Ok(())
    }

    /// The base URL, with a trailing slash so file names join beneath it.
    pub fn base_url(&self) -> Result<Url, UpdateError> {
        let mut base = self.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = Url::parse(&base).map_err(|e| UpdateError::InvalidUrl(format!("{}: {}", base, e)))?;
        if url.cannot_be_a_base() {
            return Err(UpdateError::InvalidUrl(base));
        }
        Ok(url)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}
