//! JSON configuration of a controller and its universes.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ARTNET_PORT: u16 = 6454;

/// Largest net, subnet or universe number.
pub const MAX_ADDRESS_PART: u8 = 15;

/// The Art-Net node all senders and receivers are attached to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub name: String,
    pub bind: String,
    pub port: u16,
    pub short_name: String,
    pub long_name: String,
    pub oem_code: String,
    pub senders: Vec<SenderConfig>,
    pub receivers: Vec<ReceiverConfig>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            bind: "0.0.0.0".to_string(),
            port: ARTNET_PORT,
            short_name: "dmx-transitions".to_string(),
            long_name: "dmx-transitions Art-Net controller".to_string(),
            oem_code: "0x2908".to_string(),
            senders: Vec::new(),
            receivers: Vec::new(),
        }
    }
}

/// One outbound universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Identity of the sender; also the key its frame is persisted under.
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub net: u8,
    pub subnet: u8,
    pub universe: u8,
    /// Refresh interval of the transport in ms.
    pub refresh_ms: u64,
    /// Maximum spontaneous frames per second; 0 leaves sending to the refresh.
    pub max_rate: u32,
    pub save_values: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            address: "255.255.255.255".to_string(),
            port: ARTNET_PORT,
            net: 0,
            subnet: 0,
            universe: 0,
            refresh_ms: 1000,
            max_rate: 40,
            save_values: true,
        }
    }
}

impl SenderConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// `net:subnet:universe`, used as the log prefix of the sender.
    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.net, self.subnet, self.universe)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverOutput {
    #[default]
    Raw,
    Buckets,
}

/// One inbound universe.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub name: String,
    pub net: u8,
    pub subnet: u8,
    pub universe: u8,
    pub output: ReceiverOutput,
    /// Emit every frame, including ones identical to the previous.
    pub always_emit: bool,
}

fn check_address(what: &str, net: u8, subnet: u8, universe: u8) -> Result<(), ConfigError> {
    for (part, value) in [("net", net), ("subnet", subnet), ("universe", universe)] {
        if value > MAX_ADDRESS_PART {
            return Err(ConfigError::Invalid(format!(
                "{what}: {part} {value} is outside 0..={MAX_ADDRESS_PART}"
            )));
        }
    }
    Ok(())
}

impl ControllerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for sender in &self.senders {
            if sender.id.is_empty() {
                return Err(ConfigError::Invalid("sender without id".into()));
            }
            if !ids.insert(sender.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate sender id {}",
                    sender.id
                )));
            }
            if sender.refresh_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "sender {}: refresh_ms must be positive",
                    sender.id
                )));
            }
            check_address(
                &format!("sender {}", sender.id),
                sender.net,
                sender.subnet,
                sender.universe,
            )?;
        }
        for receiver in &self.receivers {
            check_address(
                &format!("receiver {}", receiver.name),
                receiver.net,
                receiver.subnet,
                receiver.universe,
            )?;
        }
        Ok(())
    }
}
