use serde_derive::{Deserialize, Serialize};

use crate::u2f::hid::hid_const::U2FHID_TRANS_TIMEOUT;
use crate::u2f::proto::constants::{AES_KEY_SIZE, U2F_V2_VERSION_STR};

pub const DEFAULT_MAX_CHANNELS: usize = 5;
pub const DEFAULT_RECV_TIMEOUT_MS: u32 = 1000;
pub const DEFAULT_SEND_TIMEOUT_MS: u32 = 1000;
pub const DEFAULT_COUNTER_PERSIST_RETRIES: u8 = 3;
pub const DEFAULT_FIRMWARE_VERSION: (u8, u8, u8) = (1, 0, 0);

/// Where the key handle wrapping secret comes from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrappingKeySource {
    /// Provisioned by the integrator
    Fixed([u8; AES_KEY_SIZE]),
    /// Generated on first start and kept in the record store
    Random,
}

/// Device tunables, loadable from JSON
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Number of channels that can be allocated besides the broadcast one
    pub max_channels: usize,
    /// Idle time after which an allocated channel is reclaimed
    pub transaction_timeout_ms: u32,
    /// Bound on the wait for continuation frames
    pub recv_timeout_ms: u32,
    /// Bound on the wait for the transport to accept a report
    pub send_timeout_ms: u32,
    pub firmware_version: (u8, u8, u8),
    pub version_string: String,
    pub counter_persist_retries: u8,
    pub wrapping_key: WrappingKeySource,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            max_channels: DEFAULT_MAX_CHANNELS,
            transaction_timeout_ms: U2FHID_TRANS_TIMEOUT,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            firmware_version: DEFAULT_FIRMWARE_VERSION,
            version_string: U2F_V2_VERSION_STR.to_string(),
            counter_persist_retries: DEFAULT_COUNTER_PERSIST_RETRIES,
            wrapping_key: WrappingKeySource::Random,
        }
    }
}

impl DeviceConfig {
    pub fn builder() -> DeviceConfigBuilder {
        DeviceConfigBuilder::new()
    }
}

#[derive(Default)]
pub struct DeviceConfigBuilder {
    max_channels: Option<usize>,
    transaction_timeout_ms: Option<u32>,
    recv_timeout_ms: Option<u32>,
    send_timeout_ms: Option<u32>,
    firmware_version: Option<(u8, u8, u8)>,
    version_string: Option<String>,
    counter_persist_retries: Option<u8>,
    wrapping_key: Option<WrappingKeySource>,
}

impl DeviceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_channels(mut self, n: usize) -> Self {
        self.max_channels = Some(n);
        self
    }

    pub fn transaction_timeout_ms(mut self, ms: u32) -> Self {
        self.transaction_timeout_ms = Some(ms);
        self
    }

    pub fn recv_timeout_ms(mut self, ms: u32) -> Self {
        self.recv_timeout_ms = Some(ms);
        self
    }

    pub fn send_timeout_ms(mut self, ms: u32) -> Self {
        self.send_timeout_ms = Some(ms);
        self
    }

    pub fn firmware_version(mut self, major: u8, minor: u8, build: u8) -> Self {
        self.firmware_version = Some((major, minor, build));
        self
    }

    pub fn version_string(mut self, version: &str) -> Self {
        self.version_string = Some(version.to_string());
        self
    }

    pub fn counter_persist_retries(mut self, retries: u8) -> Self {
        self.counter_persist_retries = Some(retries);
        self
    }

    pub fn wrapping_key(mut self, source: WrappingKeySource) -> Self {
        self.wrapping_key = Some(source);
        self
    }

    pub fn build(self) -> DeviceConfig {
        let DeviceConfigBuilder {
            max_channels,
            transaction_timeout_ms,
            recv_timeout_ms,
            send_timeout_ms,
            firmware_version,
            version_string,
            counter_persist_retries,
            wrapping_key,
        } = self;

        let default = DeviceConfig::default();

        DeviceConfig {
            max_channels: max_channels.unwrap_or(default.max_channels),
            transaction_timeout_ms: transaction_timeout_ms.unwrap_or(default.transaction_timeout_ms),
            recv_timeout_ms: recv_timeout_ms.unwrap_or(default.recv_timeout_ms),
            send_timeout_ms: send_timeout_ms.unwrap_or(default.send_timeout_ms),
            firmware_version: firmware_version.unwrap_or(default.firmware_version),
            version_string: version_string.unwrap_or(default.version_string),
            counter_persist_retries: counter_persist_retries.unwrap_or(default.counter_persist_retries),
            wrapping_key: wrapping_key.unwrap_or(default.wrapping_key),
        }
    }
}

#[test]
fn builder_falls_back_to_defaults() {
    let config = DeviceConfig::builder().max_channels(2).firmware_version(2, 1, 7).build();

    assert_eq!(config.max_channels, 2);
    assert_eq!(config.firmware_version, (2, 1, 7));
    assert_eq!(config.transaction_timeout_ms, 3000);
    assert_eq!(config.recv_timeout_ms, 1000);
    assert_eq!(config.version_string, "U2F_V2");
    assert_eq!(config.wrapping_key, WrappingKeySource::Random);
}

#[test]
fn config_from_json() {
    let config: DeviceConfig = serde_json::from_str(
        r#"{
            "max_channels": 8,
            "send_timeout_ms": 250,
            "wrapping_key": { "fixed": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16] }
        }"#,
    )
    .unwrap();

    assert_eq!(config.max_channels, 8);
    assert_eq!(config.send_timeout_ms, 250);
    assert_eq!(config.recv_timeout_ms, DEFAULT_RECV_TIMEOUT_MS);
    assert_eq!(
        config.wrapping_key,
        WrappingKeySource::Fixed([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16])
    );

    let random: DeviceConfig = serde_json::from_str(r#"{ "wrapping_key": "random" }"#).unwrap();
    assert_eq!(random.wrapping_key, WrappingKeySource::Random);
}
