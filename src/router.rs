//! Routing of addressed payloads to the sender of another universe.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::command::Payload;
use crate::config::{SenderConfig, MAX_ADDRESS_PART};

/// Art-Net `net:subnet:universe` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UniverseAddress {
    pub net: u8,
    pub subnet: u8,
    pub universe: u8,
}

impl UniverseAddress {
    pub fn new(net: u8, subnet: u8, universe: u8) -> Self {
        Self {
            net,
            subnet,
            universe,
        }
    }

    pub fn of(config: &SenderConfig) -> Self {
        Self::new(config.net, config.subnet, config.universe)
    }
}

impl fmt::Display for UniverseAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.net, self.subnet, self.universe)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    address: String,
    port: u16,
    sender_id: String,
}

/// Senders by universe, then by destination `address:port`.
///
/// Built once when the controller is assembled and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    universes: BTreeMap<UniverseAddress, Vec<Endpoint>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_senders<'a>(senders: impl IntoIterator<Item = &'a SenderConfig>) -> Self {
        let mut table = Self::new();
        for sender in senders {
            table.register(sender);
        }
        table
    }

    /// Adds a sender; a later sender with the same universe and
    /// `address:port` replaces the earlier one.
    pub fn register(&mut self, sender: &SenderConfig) {
        let key = UniverseAddress::of(sender);
        let endpoints = self.universes.entry(key).or_default();
        let endpoint = Endpoint {
            address: sender.address.clone(),
            port: sender.port,
            sender_id: sender.id.clone(),
        };
        match endpoints
            .iter_mut()
            .find(|e| e.address == sender.address && e.port == sender.port)
        {
            Some(existing) => *existing = endpoint,
            None => endpoints.push(endpoint),
        }
        log::debug!(
            "[router] {} {}:{} -> sender {}",
            key,
            sender.address,
            sender.port,
            sender.id
        );
    }

    pub fn len(&self) -> usize {
        self.universes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.universes.is_empty()
    }

    /// Sender for `universe`, preferring an exact `address:port` match,
    /// then the first sender with the same address.
    pub fn lookup(&self, address: &str, port: u16, universe: UniverseAddress) -> Option<&str> {
        let endpoints = self.universes.get(&universe)?;
        endpoints
            .iter()
            .find(|e| e.address == address && e.port == port)
            .or_else(|| endpoints.iter().find(|e| e.address == address))
            .map(|e| e.sender_id.as_str())
    }

    /// Resolves which sender handles `payload` when it arrives at `default`.
    ///
    /// Payloads without `net`/`subnet`/`universe`, or with `ignore_address`
    /// set, stay on the default sender, as do payloads addressing a universe
    /// nobody serves. Out-of-range coordinates fall back to the default
    /// sender's own.
    pub fn route<'a>(
        &'a self,
        default: &'a SenderConfig,
        payload: &Payload,
        ignore_address: bool,
    ) -> &'a str {
        if ignore_address {
            return &default.id;
        }
        let (net, subnet, universe) = payload.address();
        if net.is_none() && subnet.is_none() && universe.is_none() {
            return &default.id;
        }

        let target = UniverseAddress::new(
            coordinate("net", net, default.net),
            coordinate("subnet", subnet, default.subnet),
            coordinate("universe", universe, default.universe),
        );
        match self.lookup(&default.address, default.port, target) {
            Some(id) => {
                log::debug!("[router] {} routed to sender {}", target, id);
                id
            }
            None => {
                log::warn!(
                    "[router] no sender for {}, routing to default sender {}",
                    target,
                    default.id
                );
                &default.id
            }
        }
    }
}

fn coordinate(part: &str, requested: Option<i64>, fallback: u8) -> u8 {
    match requested {
        None => fallback,
        Some(v) if (0..=i64::from(MAX_ADDRESS_PART)).contains(&v) => v as u8,
        Some(v) => {
            log::warn!("[router] invalid {part} in payload: {v}");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sender(id: &str, address: &str, port: u16, universe: u8) -> SenderConfig {
        SenderConfig {
            address: address.to_string(),
            port,
            universe,
            ..SenderConfig::new(id)
        }
    }

    fn payload(value: serde_json::Value) -> Payload {
        Payload::from_value(value).unwrap()
    }

    #[test]
    fn lookup_prefers_exact_then_same_address() {
        let table = RoutingTable::from_senders(&[
            sender("a", "10.0.0.1", 6454, 1),
            sender("b", "10.0.0.2", 7000, 1),
            sender("c", "10.0.0.2", 6454, 1),
        ]);
        assert_eq!(table.len(), 3);
        let u1 = UniverseAddress::new(0, 0, 1);
        assert_eq!(table.lookup("10.0.0.2", 6454, u1), Some("c"));
        assert_eq!(table.lookup("10.0.0.2", 9999, u1), Some("b"));
        assert_eq!(table.lookup("10.0.0.3", 6454, u1), None);
        assert_eq!(table.lookup("10.0.0.1", 6454, UniverseAddress::new(0, 0, 2)), None);
    }

    #[test]
    fn route_follows_payload_address() {
        let default = sender("main", "255.255.255.255", 6454, 0);
        let other = sender("other", "255.255.255.255", 6454, 3);
        let table = RoutingTable::from_senders(&[default.clone(), other]);

        let to_other = payload(json!({"universe": 3, "channel": 1, "value": 1}));
        assert_eq!(table.route(&default, &to_other, false), "other");
        assert_eq!(table.route(&default, &to_other, true), "main");

        let plain = payload(json!({"channel": 1, "value": 1}));
        assert_eq!(table.route(&default, &plain, false), "main");

        let nobody = payload(json!({"universe": 9}));
        assert_eq!(table.route(&default, &nobody, false), "main");
    }

    #[test]
    fn invalid_coordinates_fall_back_to_the_default() {
        let default = SenderConfig {
            subnet: 2,
            universe: 5,
            ..SenderConfig::new("main")
        };
        let neighbour = SenderConfig {
            subnet: 2,
            universe: 6,
            ..SenderConfig::new("neighbour")
        };
        let table = RoutingTable::from_senders(&[default.clone(), neighbour]);
        // subnet out of range keeps 2, missing net keeps 0
        let p = payload(json!({"subnet": 40, "universe": 6}));
        assert_eq!(table.route(&default, &p, false), "neighbour");
        assert_eq!(UniverseAddress::of(&default).to_string(), "0:2:5");
    }
}
