//! Registry of trigger units paired with a hub.
//!
//! A fixed number of slots, each empty or holding one [`RegistryEntry`]
//! keyed by hardware address. Every mutation is written through to stable
//! storage before it becomes visible; a failed write leaves the in-memory
//! registry unchanged.

mod document;
mod storage;

pub use document::{
    HubLink, RegistryDocument, RegistryEntry, Registration, Role, SelfIdentity,
};
pub use storage::{default_data_dir, registry_file_name, FileStorage, Storage};

#[cfg(test)]
pub(crate) use storage::test_support;

use crate::indicator::Color;
use log::{info, warn};
use std::fmt;
use std::io;

/// Result of looking up a hardware address.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// The address occupies `slot`.
    Found { slot: usize, entry: &'a RegistryEntry },
    /// Not registered; `slot` is the lowest empty slot.
    Vacant { slot: usize },
    /// Not registered and no slot is free.
    Full,
}

/// Registry errors.
#[derive(Debug)]
pub enum RegistryError {
    /// No free slot for a new registration.
    Full,
    /// The address is already registered.
    Conflict { slot: usize },
    /// The address is not registered.
    NotFound,
    /// Stable storage failed; nothing was changed.
    Storage(io::Error),
    /// The document could not be encoded.
    Encode(serde_json::Error),
}

impl RegistryError {
    /// HTTP status used when this error answers a peer request.
    pub fn status_code(&self) -> u16 {
        match self {
            RegistryError::Full => 405,
            RegistryError::Conflict { .. } => 403,
            RegistryError::NotFound => 404,
            RegistryError::Storage(_) | RegistryError::Encode(_) => 500,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Full => write!(f, "Maximum number of devices reached"),
            RegistryError::Conflict { slot } => write!(f, "Device already registered in slot {}", slot),
            RegistryError::NotFound => write!(f, "Device not registered"),
            RegistryError::Storage(e) => write!(f, "Registry storage error: {}", e),
            RegistryError::Encode(e) => write!(f, "Registry encode error: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Storage(e) => Some(e),
            RegistryError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RegistryError {
    fn from(e: io::Error) -> Self {
        RegistryError::Storage(e)
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Encode(e)
    }
}

/// Fixed-capacity, write-through device registry.
#[derive(Debug)]
pub struct DeviceRegistry<S: Storage> {
    storage: S,
    doc: RegistryDocument,
    capacity: usize,
}

impl<S: Storage> DeviceRegistry<S> {
    /// Load the registry from `storage`, or start empty.
    ///
    /// A document that fails to parse is logged and replaced by an empty
    /// one. Slots beyond `capacity` are dropped.
    pub fn open(storage: S, capacity: usize) -> Result<Self, RegistryError> {
        let mut doc = match storage.load()? {
            Some(bytes) => match serde_json::from_slice::<RegistryDocument>(&bytes) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Registry document unreadable ({}), starting empty", e);
                    RegistryDocument::default()
                }
            },
            None => RegistryDocument::default(),
        };

        if doc.slots.len() > capacity {
            let dropped = doc.slots[capacity..].iter().filter(|s| s.is_some()).count();
            if dropped > 0 {
                warn!("Dropping {} registrations beyond capacity {}", dropped, capacity);
            }
        }
        doc.slots.resize(capacity, None);
        for (index, slot) in doc.slots.iter_mut().enumerate() {
            if let Some(entry) = slot {
                entry.slot_index = index;
            }
        }

        let registered = doc.slots.iter().filter(|s| s.is_some()).count();
        info!("Registry open: {}/{} slots in use", registered, capacity);

        Ok(Self {
            storage,
            doc,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn document(&self) -> &RegistryDocument {
        &self.doc
    }

    /// All slots in index order.
    pub fn slots(&self) -> &[Option<RegistryEntry>] {
        &self.doc.slots
    }

    pub fn slot(&self, index: usize) -> Option<&RegistryEntry> {
        self.doc.slots.get(index).and_then(Option::as_ref)
    }

    /// Occupied slots in index order.
    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.doc.slots.iter().flatten()
    }

    /// Find `address` (case-insensitive).
    pub fn find_by_address(&self, address: &str) -> Lookup<'_> {
        let address = address.trim();
        let mut vacant = None;
        for (slot, entry) in self.doc.slots.iter().enumerate() {
            match entry {
                Some(entry) if entry.hardware_address.eq_ignore_ascii_case(address) => {
                    return Lookup::Found { slot, entry };
                }
                Some(_) => {}
                None => {
                    vacant.get_or_insert(slot);
                }
            }
        }
        match vacant {
            Some(slot) => Lookup::Vacant { slot },
            None => Lookup::Full,
        }
    }

    pub fn get(&self, address: &str) -> Option<&RegistryEntry> {
        match self.find_by_address(address) {
            Lookup::Found { entry, .. } => Some(entry),
            _ => None,
        }
    }

    /// Register a new device in the lowest empty slot.
    pub fn create(
        &mut self,
        address: &str,
        registration: &Registration,
    ) -> Result<RegistryEntry, RegistryError> {
        let slot = match self.find_by_address(address) {
            Lookup::Found { slot, .. } => return Err(RegistryError::Conflict { slot }),
            Lookup::Full => return Err(RegistryError::Full),
            Lookup::Vacant { slot } => slot,
        };

        let entry = self.build_entry(slot, address, registration);
        let stored = entry.clone();
        self.commit(|doc| doc.slots[slot] = Some(stored))?;
        info!(
            "Registered {} in slot {} as #{}",
            entry.hardware_address, slot, entry.assigned_id
        );
        Ok(entry)
    }

    /// Replace the data of a registered device, keeping its slot.
    pub fn update(
        &mut self,
        address: &str,
        registration: &Registration,
    ) -> Result<RegistryEntry, RegistryError> {
        let slot = match self.find_by_address(address) {
            Lookup::Found { slot, .. } => slot,
            _ => return Err(RegistryError::NotFound),
        };

        let entry = self.build_entry(slot, address, registration);
        let stored = entry.clone();
        self.commit(|doc| doc.slots[slot] = Some(stored))?;
        info!("Updated {} in slot {}", entry.hardware_address, slot);
        Ok(entry)
    }

    /// Clear the slot of a registered device.
    pub fn delete(&mut self, address: &str) -> Result<RegistryEntry, RegistryError> {
        let (slot, entry) = match self.find_by_address(address) {
            Lookup::Found { slot, entry } => (slot, entry.clone()),
            _ => return Err(RegistryError::NotFound),
        };

        self.commit(|doc| doc.slots[slot] = None)?;
        info!("Removed {} from slot {}", entry.hardware_address, slot);
        Ok(entry)
    }

    pub fn identity(&self) -> &SelfIdentity {
        &self.doc.identity
    }

    /// Change the device's own identity and persist it.
    pub fn update_identity(
        &mut self,
        f: impl FnOnce(&mut SelfIdentity),
    ) -> Result<(), RegistryError> {
        self.commit(|doc| f(&mut doc.identity))
    }

    pub fn hub_link(&self) -> Option<&HubLink> {
        self.doc.hub.as_ref()
    }

    /// Cache (or forget) the hub this device last joined.
    pub fn set_hub_link(&mut self, link: Option<HubLink>) -> Result<(), RegistryError> {
        if self.doc.hub == link {
            return Ok(());
        }
        self.commit(|doc| doc.hub = link)
    }

    /// Delete the stored document and forget everything.
    pub fn wipe(&mut self) -> Result<(), RegistryError> {
        self.storage.remove()?;
        self.doc = RegistryDocument::default();
        self.doc.slots.resize(self.capacity, None);
        warn!("Registry wiped");
        Ok(())
    }

    /// Write the current document to storage.
    pub fn flush(&mut self) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec(&self.doc)?;
        self.storage.store(&bytes)?;
        Ok(())
    }

    fn build_entry(&self, slot: usize, address: &str, registration: &Registration) -> RegistryEntry {
        // A hub assigns its own team to every unit it pairs with.
        let team = self
            .doc
            .identity
            .team
            .or(registration.team)
            .unwrap_or(Color::default());

        RegistryEntry {
            slot_index: slot,
            hardware_address: address.trim().to_ascii_uppercase(),
            team,
            network_address: registration.network_address,
            assigned_id: assigned_id(slot),
            hostname: registration.hostname.clone(),
        }
    }

    fn commit(&mut self, f: impl FnOnce(&mut RegistryDocument)) -> Result<(), RegistryError> {
        let mut next = self.doc.clone();
        f(&mut next);
        let bytes = serde_json::to_vec(&next)?;
        if let Err(e) = self.storage.store(&bytes) {
            warn!("Registry write failed, keeping previous state: {}", e);
            return Err(RegistryError::Storage(e));
        }
        self.doc = next;
        Ok(())
    }
}

/// Small identifier shown on a trigger unit's indicator.
pub fn assigned_id(slot: usize) -> u8 {
    u8::try_from(slot + 1).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::test_support::unique_path;
    use super::*;
    use std::net::Ipv4Addr;
    use zeroize::Zeroizing;

    const CAPACITY: usize = 4;

    /// Storage whose writes can be made to fail.
    #[derive(Default)]
    struct FlakyStorage {
        bytes: Option<Vec<u8>>,
        fail: bool,
    }

    impl Storage for FlakyStorage {
        fn load(&self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.bytes.clone())
        }

        fn store(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "flash worn out"));
            }
            self.bytes = Some(bytes.to_vec());
            Ok(())
        }

        fn remove(&mut self) -> io::Result<()> {
            self.bytes = None;
            Ok(())
        }
    }

    fn reg(ip: [u8; 4]) -> Registration {
        Registration {
            team: Some(Color::Green),
            network_address: Some(Ipv4Addr::from(ip)),
            hostname: None,
        }
    }

    fn empty() -> DeviceRegistry<FlakyStorage> {
        DeviceRegistry::open(FlakyStorage::default(), CAPACITY).unwrap()
    }

    #[test]
    fn test_create_then_find() {
        let mut registry = empty();
        assert_eq!(registry.find_by_address("AA:BB"), Lookup::Vacant { slot: 0 });

        let entry = registry.create("AA:BB", &reg([192, 168, 4, 16])).unwrap();
        assert_eq!(entry.slot_index, 0);
        assert_eq!(entry.assigned_id, 1);

        match registry.find_by_address("aa:bb") {
            Lookup::Found { slot, entry } => {
                assert_eq!(slot, 0);
                assert_eq!(entry.network_address, Some(Ipv4Addr::new(192, 168, 4, 16)));
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_delete_then_find_is_vacant() {
        let mut registry = empty();
        registry.create("AA", &reg([10, 0, 0, 1])).unwrap();
        registry.create("BB", &reg([10, 0, 0, 2])).unwrap();

        registry.delete("AA").unwrap();
        assert_eq!(registry.find_by_address("AA"), Lookup::Vacant { slot: 0 });
        assert!(matches!(registry.delete("AA"), Err(RegistryError::NotFound)));

        // Lowest empty slot is reused.
        let entry = registry.create("CC", &reg([10, 0, 0, 3])).unwrap();
        assert_eq!(entry.slot_index, 0);
        assert_eq!(registry.slot(1).unwrap().hardware_address, "BB");
    }

    #[test]
    fn test_full_registry_rejects() {
        let mut registry = empty();
        for (i, addr) in ["A1", "A2", "A3", "A4"].iter().enumerate() {
            let entry = registry.create(addr, &reg([10, 0, 0, i as u8])).unwrap();
            assert_eq!(entry.assigned_id as usize, i + 1);
        }
        assert_eq!(registry.find_by_address("A5"), Lookup::Full);

        let err = registry.create("A5", &reg([10, 0, 0, 9])).unwrap_err();
        assert!(matches!(err, RegistryError::Full));
        assert_eq!(err.status_code(), 405);
        assert_eq!(registry.entries().count(), CAPACITY);
    }

    #[test]
    fn test_duplicate_create_conflicts() {
        let mut registry = empty();
        registry.create("AA", &reg([10, 0, 0, 1])).unwrap();
        let err = registry.create("aa", &reg([10, 0, 0, 2])).unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { slot: 0 }));
        assert_eq!(err.status_code(), 403);
        assert_eq!(registry.entries().count(), 1);
    }

    #[test]
    fn test_update_keeps_slot() {
        let mut registry = empty();
        registry.create("AA", &reg([10, 0, 0, 1])).unwrap();
        registry.create("BB", &reg([10, 0, 0, 2])).unwrap();

        let entry = registry.update("BB", &reg([10, 0, 0, 42])).unwrap();
        assert_eq!(entry.slot_index, 1);
        assert_eq!(entry.network_address, Some(Ipv4Addr::new(10, 0, 0, 42)));

        let err = registry.update("ZZ", &reg([10, 0, 0, 5])).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_hub_team_overrides_request() {
        let mut registry = empty();
        registry
            .update_identity(|id| {
                id.role = Some(Role::Hub);
                id.team = Some(Color::Red);
            })
            .unwrap();

        let entry = registry.create("AA", &reg([10, 0, 0, 1])).unwrap();
        assert_eq!(entry.team, Color::Red);
    }

    #[test]
    fn test_failed_write_leaves_registry_unchanged() {
        let mut registry = empty();
        registry.create("AA", &reg([10, 0, 0, 1])).unwrap();

        registry.storage.fail = true;
        let err = registry.create("BB", &reg([10, 0, 0, 2])).unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(registry.find_by_address("BB"), Lookup::Vacant { slot: 1 });

        assert!(registry.delete("AA").is_err());
        assert!(registry.get("AA").is_some());
    }

    #[test]
    fn test_reload_from_file_is_identical() {
        let path = unique_path("registry");
        let mut registry = DeviceRegistry::open(FileStorage::new(&path), CAPACITY).unwrap();
        registry
            .update_identity(|id| {
                id.mac = "11:22:33:44:55:66".to_string();
                id.role = Some(Role::Hub);
                id.team = Some(Color::Green);
            })
            .unwrap();
        registry.create("AA", &reg([192, 168, 4, 16])).unwrap();
        registry.create("BB", &reg([192, 168, 4, 17])).unwrap();
        registry.delete("AA").unwrap();

        let reopened = DeviceRegistry::open(FileStorage::new(&path), CAPACITY).unwrap();
        assert_eq!(reopened.document(), registry.document());
        assert_eq!(reopened.slots().len(), CAPACITY);
        assert!(reopened.slot(0).is_none());
        assert_eq!(reopened.slot(1).unwrap().hardware_address, "BB");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_open_truncates_and_pads() {
        let mut storage = FlakyStorage::default();
        storage.bytes = Some(
            br#"{"slots":[{},{"slot":9,"mac":"AA","team":"RED","id":2},{},{},{"slot":4,"mac":"EE","team":"RED","id":5}]}"#
                .to_vec(),
        );
        let registry = DeviceRegistry::open(storage, CAPACITY).unwrap();
        assert_eq!(registry.slots().len(), CAPACITY);
        assert_eq!(registry.slot(1).unwrap().slot_index, 1);
        assert!(registry.get("EE").is_none());
    }

    #[test]
    fn test_unreadable_document_starts_empty() {
        let storage = FlakyStorage {
            bytes: Some(b"{not json".to_vec()),
            fail: false,
        };
        let registry = DeviceRegistry::open(storage, CAPACITY).unwrap();
        assert_eq!(registry.entries().count(), 0);
    }

    #[test]
    fn test_wipe_clears_storage() {
        let mut registry = empty();
        registry.create("AA", &reg([10, 0, 0, 1])).unwrap();
        registry.wipe().unwrap();
        assert!(registry.storage.bytes.is_none());
        assert_eq!(registry.find_by_address("AA"), Lookup::Vacant { slot: 0 });
    }

    #[test]
    fn test_hub_link_cached() {
        let mut registry = empty();
        let link = HubLink {
            ssid: "clacker_RED_EF".to_string(),
            password: None,
            secured: false,
            ip: Some(Ipv4Addr::new(192, 168, 4, 1)),
        };
        registry.set_hub_link(Some(link.clone())).unwrap();
        assert_eq!(registry.hub_link(), Some(&link));

        let bytes = registry.storage.bytes.clone().unwrap();
        let doc: RegistryDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc.hub, Some(link));
    }

    #[test]
    fn test_hub_password_persisted_and_zeroizing() {
        let mut registry = empty();
        let link = HubLink {
            ssid: "clacker_RED_EF".to_string(),
            password: Some(Zeroizing::new("clacker_RED".to_string())),
            secured: true,
            ip: None,
        };
        registry.set_hub_link(Some(link)).unwrap();

        let bytes = registry.storage.bytes.clone().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["hub"]["password"], "clacker_RED");

        let storage = FlakyStorage {
            bytes: Some(bytes),
            fail: false,
        };
        let reopened = DeviceRegistry::open(storage, CAPACITY).unwrap();
        let link = reopened.hub_link().unwrap();
        let password: &Zeroizing<String> = link.password.as_ref().unwrap();
        assert_eq!(password.as_str(), "clacker_RED");
    }
}
