use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::serial::device::STDIO_DEVICE;
use crate::serial::reader::DEFAULT_READ_CHUNK;
use crate::settings::Settings;

/// Config file used when `WXBRIDGE_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "wxbridge.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub serial: SerialConfig,
    pub bridge: BridgeConfig,
    /// Initial values of the runtime variables.
    pub settings: Settings,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Controller channel device, or `-` for stdin/stdout.
    pub device: String,
    /// Channel carrying `reply` bodies.
    pub debug_device: Option<String>,
    pub read_chunk: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub connect_timeout_ms: u64,
    pub recv_timeout_ms: u64,
    /// Deadline for a `reply` body on the debug channel; unbounded when unset.
    pub reply_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            serial: SerialConfig::default(),
            bridge: BridgeConfig::default(),
            settings: Settings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: STDIO_DEVICE.to_string(),
            debug_device: None,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            recv_timeout_ms: 5_000,
            reply_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Loads the YAML file named by `WXBRIDGE_CONFIG` (falling back to
    /// defaults when the default file is absent), then applies the `LISTEN`,
    /// `SERIAL_DEVICE` and `DEBUG_DEVICE` environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let explicit = std::env::var("WXBRIDGE_CONFIG").ok();
        let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

        let mut cfg = if explicit.is_some() || Path::new(path).exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            Self::from_yaml(&text).with_context(|| format!("Invalid config file {}", path))?
        } else {
            Self::default()
        };

        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let cfg = serde_yaml::from_str(text)?;
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("LISTEN") {
            self.server.listen_addr = addr;
        }
        if let Ok(device) = std::env::var("SERIAL_DEVICE") {
            self.serial.device = device;
        }
        if let Ok(device) = std::env::var("DEBUG_DEVICE") {
            self.serial.debug_device = Some(device);
        }
    }
}
