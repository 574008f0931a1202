// In-memory working set of the policy.
//
// Mirrors the last durably saved PolicySets plus ephemeral per-process data
// (names seen on pairing attempts). Connection state is never stored here;
// it is derived from the bonded snapshot passed to `snapshot`.

use crate::device::{clean_name, BondedDevice, Classification, DeviceIdentity, UNKNOWN_DEVICE_NAME};
use crate::policy::PolicySets;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// One row of the presentation view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEntry {
    pub identity: DeviceIdentity,
    pub name: String,
    pub classification: Classification,
    pub is_connected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    trusted: HashSet<DeviceIdentity>,
    blocked: HashSet<DeviceIdentity>,
    seen_names: HashMap<DeviceIdentity, String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from stored sets. Identities present in both sets
    /// are kept as Blocked only and returned so the caller can warn.
    pub fn from_sets(sets: PolicySets) -> (Self, Vec<DeviceIdentity>) {
        let blocked: HashSet<DeviceIdentity> = sets.blocked.into_iter().collect();
        let mut conflicts = Vec::new();
        let trusted = sets
            .trusted
            .into_iter()
            .filter(|id| {
                if blocked.contains(id) {
                    conflicts.push(id.clone());
                    false
                } else {
                    true
                }
            })
            .collect();

        (
            Self {
                trusted,
                blocked,
                seen_names: HashMap::new(),
            },
            conflicts,
        )
    }

    /// Swap in freshly loaded sets, keeping names seen this process.
    pub fn reset_to(&mut self, sets: PolicySets) -> Vec<DeviceIdentity> {
        let (fresh, conflicts) = Self::from_sets(sets);
        self.trusted = fresh.trusted;
        self.blocked = fresh.blocked;
        conflicts
    }

    /// Total lookup. Blocked is checked first so deny always wins.
    pub fn classify(&self, identity: &DeviceIdentity) -> Classification {
        if self.blocked.contains(identity) {
            Classification::Blocked
        } else if self.trusted.contains(identity) {
            Classification::Trusted
        } else {
            Classification::Unclassified
        }
    }

    /// Puts `identity` in exactly the set for `to` (neither for Unclassified)
    /// and returns what it was before. In-memory only; the caller persists.
    pub fn promote(&mut self, identity: &DeviceIdentity, to: Classification) -> Classification {
        let previous = self.classify(identity);
        match to {
            Classification::Trusted => {
                self.blocked.remove(identity);
                self.trusted.insert(identity.clone());
            }
            Classification::Blocked => {
                self.trusted.remove(identity);
                self.blocked.insert(identity.clone());
            }
            Classification::Unclassified => {
                self.trusted.remove(identity);
                self.blocked.remove(identity);
            }
        }
        previous
    }

    /// Remember the label a peer announced. Never used for decisions.
    pub fn observe_name(&mut self, identity: &DeviceIdentity, name: Option<&str>) {
        if let Some(name) = clean_name(name) {
            self.seen_names.insert(identity.clone(), name);
        }
    }

    pub fn seen_name(&self, identity: &DeviceIdentity) -> Option<&str> {
        self.seen_names.get(identity).map(String::as_str)
    }

    pub fn to_sets(&self) -> PolicySets {
        PolicySets {
            trusted: self.trusted.iter().cloned().collect(),
            blocked: self.blocked.iter().cloned().collect(),
        }
    }

    pub fn trusted_count(&self) -> usize {
        self.trusted.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_disjoint(&self) -> bool {
        self.trusted.is_disjoint(&self.blocked)
    }

    /// Every classified device, sorted by display name then identity.
    pub fn snapshot(&self, bonded: &[BondedDevice]) -> Vec<DeviceEntry> {
        let bonded: HashMap<&DeviceIdentity, Option<&str>> = bonded
            .iter()
            .map(|d| (&d.identity, d.name.as_deref()))
            .collect();

        let mut entries: Vec<DeviceEntry> = self
            .blocked
            .iter()
            .chain(self.trusted.iter())
            .map(|identity| {
                let bonded_name = bonded.get(identity).copied().flatten();
                let name = clean_name(bonded_name)
                    .or_else(|| self.seen_names.get(identity).cloned())
                    .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
                DeviceEntry {
                    identity: identity.clone(),
                    name,
                    classification: self.classify(identity),
                    is_connected: bonded.contains_key(identity),
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.identity.as_str().cmp(b.identity.as_str()))
        });
        entries
    }

    pub fn trusted_entries(&self, bonded: &[BondedDevice]) -> Vec<DeviceEntry> {
        self.snapshot(bonded)
            .into_iter()
            .filter(|e| e.classification == Classification::Trusted)
            .collect()
    }

    pub fn blocked_entries(&self, bonded: &[BondedDevice]) -> Vec<DeviceEntry> {
        self.snapshot(bonded)
            .into_iter()
            .filter(|e| e.classification == Classification::Blocked)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DeviceIdentity {
        DeviceIdentity::parse(s).unwrap()
    }

    fn bonded(addr: &str, name: Option<&str>) -> BondedDevice {
        BondedDevice {
            identity: id(addr),
            name: name.map(ToString::to_string),
        }
    }

    #[test]
    fn unknown_identity_is_unclassified() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.classify(&id("AA:BB")), Classification::Unclassified);
    }

    #[test]
    fn promote_moves_between_sets() {
        let mut registry = DeviceRegistry::new();
        let dev = id("AA:BB");

        assert_eq!(
            registry.promote(&dev, Classification::Trusted),
            Classification::Unclassified
        );
        assert_eq!(
            registry.promote(&dev, Classification::Blocked),
            Classification::Trusted
        );
        assert_eq!(registry.classify(&dev), Classification::Blocked);
        assert_eq!(registry.trusted_count(), 0);
        assert!(registry.is_disjoint());

        assert_eq!(
            registry.promote(&dev, Classification::Unclassified),
            Classification::Blocked
        );
        assert_eq!(registry.classify(&dev), Classification::Unclassified);
    }

    #[test]
    fn promote_is_idempotent() {
        let mut once = DeviceRegistry::new();
        once.promote(&id("AA:BB"), Classification::Trusted);

        let mut twice = DeviceRegistry::new();
        twice.promote(&id("AA:BB"), Classification::Trusted);
        let prev = twice.promote(&id("AA:BB"), Classification::Trusted);

        assert_eq!(prev, Classification::Trusted);
        assert_eq!(once.to_sets(), twice.to_sets());
    }

    #[test]
    fn sets_stay_disjoint_under_mixed_mutations() {
        let mut registry = DeviceRegistry::new();
        let ids = ["A", "B", "C", "D"];
        let moves = [
            Classification::Trusted,
            Classification::Blocked,
            Classification::Unclassified,
        ];
        for (step, to) in moves.iter().cycle().take(40).enumerate() {
            registry.promote(&id(ids[step % ids.len()]), *to);
            assert!(registry.is_disjoint(), "overlap after step {step}");
        }
    }

    #[test]
    fn overlapping_store_is_repaired_to_blocked() {
        let mut sets = PolicySets::default();
        sets.trusted.insert(id("11:22"));
        sets.trusted.insert(id("AA:BB"));
        sets.blocked.insert(id("11:22"));

        let (registry, conflicts) = DeviceRegistry::from_sets(sets);
        assert_eq!(conflicts, vec![id("11:22")]);
        assert_eq!(registry.classify(&id("11:22")), Classification::Blocked);
        assert_eq!(registry.classify(&id("AA:BB")), Classification::Trusted);
        assert!(registry.is_disjoint());
    }

    #[test]
    fn snapshot_orders_by_name_then_identity() {
        let mut registry = DeviceRegistry::new();
        registry.promote(&id("03"), Classification::Trusted);
        registry.promote(&id("02"), Classification::Blocked);
        registry.promote(&id("01"), Classification::Trusted);

        let bonded_devices = vec![
            bonded("03", Some("Speaker")),
            bonded("02", Some("Keyboard")),
            bonded("01", Some("Speaker")),
        ];
        let order: Vec<String> = registry
            .snapshot(&bonded_devices)
            .into_iter()
            .map(|e| e.identity.to_string())
            .collect();
        assert_eq!(order, vec!["02", "01", "03"]);
    }

    #[test]
    fn snapshot_name_fallbacks() {
        let mut registry = DeviceRegistry::new();
        registry.promote(&id("A"), Classification::Trusted);
        registry.promote(&id("B"), Classification::Trusted);
        registry.promote(&id("C"), Classification::Trusted);
        registry.observe_name(&id("B"), Some("Seen Name"));
        registry.observe_name(&id("C"), Some(""));

        let entries = registry.snapshot(&[bonded("A", Some("Bonded Name"))]);
        let name_of = |addr: &str| {
            entries
                .iter()
                .find(|e| e.identity.as_str() == addr)
                .map(|e| e.name.clone())
                .unwrap()
        };
        assert_eq!(name_of("A"), "Bonded Name");
        assert_eq!(name_of("B"), "Seen Name");
        assert_eq!(name_of("C"), UNKNOWN_DEVICE_NAME);
    }

    #[test]
    fn connected_flag_comes_from_bonded_snapshot() {
        let mut registry = DeviceRegistry::new();
        registry.promote(&id("A"), Classification::Trusted);
        registry.promote(&id("B"), Classification::Blocked);

        let entries = registry.snapshot(&[bonded("A", None)]);
        assert!(entries.iter().any(|e| e.identity == id("A") && e.is_connected));
        assert!(entries.iter().any(|e| e.identity == id("B") && !e.is_connected));

        let entries = registry.snapshot(&[]);
        assert!(entries.iter().all(|e| !e.is_connected));
    }

    #[test]
    fn reset_keeps_seen_names() {
        let mut registry = DeviceRegistry::new();
        registry.promote(&id("A"), Classification::Trusted);
        registry.observe_name(&id("A"), Some("Headset"));

        let mut sets = PolicySets::default();
        sets.blocked.insert(id("B"));
        let conflicts = registry.reset_to(sets);

        assert!(conflicts.is_empty());
        assert_eq!(registry.classify(&id("A")), Classification::Unclassified);
        assert_eq!(registry.classify(&id("B")), Classification::Blocked);
        assert_eq!(registry.seen_name(&id("A")), Some("Headset"));
    }

    #[test]
    fn per_list_views() {
        let mut registry = DeviceRegistry::new();
        registry.promote(&id("A"), Classification::Trusted);
        registry.promote(&id("B"), Classification::Blocked);
        registry.promote(&id("C"), Classification::Blocked);

        assert_eq!(registry.trusted_entries(&[]).len(), 1);
        assert_eq!(registry.blocked_entries(&[]).len(), 2);
    }
}
