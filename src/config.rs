use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use macaddr::MacAddr6;

use crate::bridge::BridgeSettings;
use crate::codec::{channel_to_frequency, parse_mac, RadioParameters};
use crate::error::ConfigError;
use crate::utils::{parse_bool, parse_number};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/xlinkbridge.conf";
const ENV_PREFIX: &str = "XLINKBRIDGE_";

const DEFAULT_CAPTURE_SOURCE: &str = "wlan0";
const DEFAULT_XLINK_PORT: u16 = 34523;
const DEFAULT_CHANNEL: i32 = 1;
const DEFAULT_DATA_RATE: u8 = 0x02;
const DEFAULT_CHANNEL_FLAGS: u16 = 0x00a0;
const DEFAULT_SNAP_LENGTH: usize = 4096;
const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(10);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_LOG_FILTER: &str = "info";

/// Every key that may appear in the file or as an environment override.
const KEYS: &[&str] = &[
    "capture_source",
    "offline",
    "xlink_ip",
    "xlink_port",
    "channel",
    "data_rate",
    "channel_flags",
    "radio_flags",
    "mcs_known",
    "mcs_flags",
    "mcs_index",
    "bssid",
    "acknowledge_data_frames",
    "snap_length",
    "capture_timeout_ms",
    "reconnect_delay_secs",
    "log_filter",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Adapter name, or pcap file path when `offline` is set.
    pub capture_source: String,
    pub offline: bool,
    pub xlink_ip: IpAddr,
    pub xlink_port: u16,
    pub channel: i32,
    pub data_rate: u8,
    pub channel_flags: u16,
    pub radio_flags: u8,
    pub mcs_known: u8,
    pub mcs_flags: u8,
    pub mcs_index: u8,
    pub bssid: MacAddr6,
    pub acknowledge_data_frames: bool,
    pub snap_length: usize,
    pub capture_timeout: Duration,
    pub reconnect_delay: Duration,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            capture_source: DEFAULT_CAPTURE_SOURCE.to_string(),
            offline: false,
            xlink_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            xlink_port: DEFAULT_XLINK_PORT,
            channel: DEFAULT_CHANNEL,
            data_rate: DEFAULT_DATA_RATE,
            channel_flags: DEFAULT_CHANNEL_FLAGS,
            radio_flags: 0,
            mcs_known: 0,
            mcs_flags: 0,
            mcs_index: 0,
            bssid: MacAddr6::nil(),
            acknowledge_data_frames: false,
            snap_length: DEFAULT_SNAP_LENGTH,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, then apply `XLINKBRIDGE_*` overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            config.apply_file(&content)?;
        }

        // Allow environment variable overrides
        for key in KEYS {
            let name = format!("{}{}", ENV_PREFIX, key.to_uppercase());
            if let Ok(val) = std::env::var(&name) {
                config.set(key, val.trim())?;
            }
        }

        Ok(config)
    }

    fn apply_file(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.set(key.trim(), value.trim())?;
            }
        }
        Ok(())
    }

    /// Set a single key. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "capture_source" => self.capture_source = value.to_string(),
            "offline" => self.offline = boolean(key, value)?,
            "xlink_ip" => self.xlink_ip = value.parse().map_err(|_| invalid(key, value))?,
            "xlink_port" => self.xlink_port = number(key, value)?,
            "channel" => self.channel = number(key, value)?,
            "data_rate" => self.data_rate = number(key, value)?,
            "channel_flags" => self.channel_flags = number(key, value)?,
            "radio_flags" => self.radio_flags = number(key, value)?,
            "mcs_known" => self.mcs_known = number(key, value)?,
            "mcs_flags" => self.mcs_flags = number(key, value)?,
            "mcs_index" => self.mcs_index = number(key, value)?,
            "bssid" => self.bssid = parse_mac(value).map_err(|_| invalid(key, value))?,
            "acknowledge_data_frames" => self.acknowledge_data_frames = boolean(key, value)?,
            "snap_length" => self.snap_length = number(key, value)?,
            "capture_timeout_ms" => {
                self.capture_timeout = Duration::from_millis(number(key, value)?)
            }
            "reconnect_delay_secs" => {
                self.reconnect_delay = Duration::from_secs(number(key, value)?)
            }
            "log_filter" => self.log_filter = value.to_string(),
            _ => {}
        }
        Ok(())
    }

    /// Address of the XLink Kai engine.
    pub fn xlink_address(&self) -> SocketAddr {
        SocketAddr::new(self.xlink_ip, self.xlink_port)
    }

    /// Radio parameters of injected frames.
    pub fn radio_parameters(&self) -> Result<RadioParameters, ConfigError> {
        let frequency =
            channel_to_frequency(self.channel).ok_or(ConfigError::UnsupportedChannel(self.channel))?;

        Ok(RadioParameters {
            flags: self.radio_flags,
            data_rate: self.data_rate,
            frequency,
            channel_flags: self.channel_flags,
            known_mcs_info: self.mcs_known,
            mcs_flags: self.mcs_flags,
            mcs_info: self.mcs_index,
        })
    }

    pub fn bridge_settings(&self) -> Result<BridgeSettings, ConfigError> {
        Ok(BridgeSettings {
            radio: self.radio_parameters()?,
            bssid: self.bssid,
            acknowledge_data_frames: self.acknowledge_data_frames,
        })
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn number<T: TryFrom<u64>>(key: &str, value: &str) -> Result<T, ConfigError> {
    parse_number(value)
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| invalid(key, value))
}

fn boolean(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| invalid(key, value))
}
