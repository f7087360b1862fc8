//! Tunable protocol parameters, loadable from a TOML file.
//!
//! Defaults match the protocol constants: MTU 248, 5s initial timeout, 2x
//! backoff, 5 retries, 30s fragment expiry, carrier codec off by default.

use serde::{Deserialize, Serialize};

use crate::reliable::ReliableConfig;

/// Top-level transport configuration, deserializable from TOML via the
/// `toml` crate and falling back to [`Default`] when absent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub mtu: u16,
    pub initial_timeout_ms: u64,
    pub backoff_factor: u32,
    pub max_retries: u32,
    pub fragment_timeout_ms: u64,
    pub carrier_codec_enabled: bool,
    pub carrier_payload_bytes: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            mtu: 248,
            initial_timeout_ms: 5_000,
            backoff_factor: 2,
            max_retries: 5,
            fragment_timeout_ms: 30_000,
            carrier_codec_enabled: false,
            carrier_payload_bytes: 26,
        }
    }
}

impl TransportConfig {
    /// Build the [`ReliableConfig`] this configuration describes.
    pub fn reliable_config(&self) -> ReliableConfig {
        ReliableConfig {
            mtu: self.mtu as usize,
            initial_timeout: std::time::Duration::from_millis(self.initial_timeout_ms),
            backoff_factor: self.backoff_factor,
            max_retries: self.max_retries,
            fragment_timeout: std::time::Duration::from_millis(self.fragment_timeout_ms),
            ticker_interval: std::time::Duration::from_millis(100),
        }
    }
}
