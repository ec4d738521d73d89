//! Persisted registry document.
//!
//! One JSON object per device:
//!
//! ```json
//! {
//!   "self": { "mac": "AA:BB:CC:DD:EE:FF", "role": "hub", "team": "RED", ... },
//!   "slots": [ { "slot": 0, "mac": "...", "team": "RED", "ip": "192.168.4.16", "id": 1 }, {}, {}, {} ],
//!   "hub": { "ssid": "clacker_RED_EF", "secured": false, "ip": "192.168.4.1" }
//! }
//! ```
//!
//! Empty slots are stored as `{}`. The `hub` object only exists on trigger
//! units and caches the last hub they joined.

use crate::indicator::Color;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use zeroize::Zeroizing;

/// Which kind of device wrote the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Hub,
    Trigger,
}

/// Identity of the device owning the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfIdentity {
    #[serde(default)]
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
}

/// One registered trigger unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(rename = "slot")]
    pub slot_index: usize,
    #[serde(rename = "mac")]
    pub hardware_address: String,
    pub team: Color,
    #[serde(rename = "ip", default, skip_serializing_if = "Option::is_none")]
    pub network_address: Option<Ipv4Addr>,
    #[serde(rename = "id")]
    pub assigned_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Body of a registration request from a trigger unit.
///
/// Unknown keys (e.g. `url`) are accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Color>,
    #[serde(rename = "ip", default, skip_serializing_if = "Option::is_none")]
    pub network_address: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Last hub a trigger unit joined, cached for reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubLink {
    pub ssid: String,
    /// Wiped from memory on drop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Zeroizing<String>>,
    #[serde(default)]
    pub secured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
}

/// The whole persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(rename = "self", default)]
    pub identity: SelfIdentity,
    #[serde(default, with = "slot_repr")]
    pub slots: Vec<Option<RegistryEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubLink>,
}

mod slot_repr {
    use super::RegistryEntry;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    #[serde(untagged)]
    enum SlotRef<'a> {
        Filled(&'a RegistryEntry),
        Empty {},
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SlotOwned {
        Filled(RegistryEntry),
        Empty {},
        Missing,
    }

    pub fn serialize<S: Serializer>(
        slots: &[Option<RegistryEntry>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(slots.iter().map(|slot| match slot {
            Some(entry) => SlotRef::Filled(entry),
            None => SlotRef::Empty {},
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Option<RegistryEntry>>, D::Error> {
        let raw = Vec::<SlotOwned>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|slot| match slot {
                SlotOwned::Filled(entry) => Some(entry),
                SlotOwned::Empty {} | SlotOwned::Missing => None,
            })
            .collect())
    }
}
