use crate::bluetooth::PermissionState;
use crate::device::Classification;
use crate::engine::PairingAttempt;
use crate::registry::DeviceRegistry;
use serde::Serialize;
use std::fmt;

/// What to do with a pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Reject,
    Defer,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Reject => write!(f, "reject"),
            Self::Defer => write!(f, "defer"),
        }
    }
}

/// Pure policy lookup. Blocked wins over Trusted because the registry
/// reports Blocked for an identity present in both sets.
pub fn classify_attempt(attempt: &PairingAttempt, registry: &DeviceRegistry) -> Action {
    match registry.classify(&attempt.identity) {
        Classification::Blocked => Action::Reject,
        Classification::Trusted => Action::Allow,
        Classification::Unclassified => Action::Defer,
    }
}

/// Without connect permission the identity in the notification is
/// unverified, so nothing is decided automatically.
pub fn classify_with_permission(
    attempt: &PairingAttempt,
    registry: &DeviceRegistry,
    permission: PermissionState,
) -> Action {
    if permission.is_granted() {
        classify_attempt(attempt, registry)
    } else {
        Action::Defer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use crate::policy::PolicySets;
    use chrono::Utc;

    fn id(s: &str) -> DeviceIdentity {
        DeviceIdentity::parse(s).unwrap()
    }

    fn attempt(s: &str) -> PairingAttempt {
        PairingAttempt {
            identity: id(s),
            display_name: None,
            sequence: 1,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn maps_each_classification() {
        let mut registry = DeviceRegistry::new();
        registry.promote(&id("T"), Classification::Trusted);
        registry.promote(&id("B"), Classification::Blocked);

        assert_eq!(classify_attempt(&attempt("T"), &registry), Action::Allow);
        assert_eq!(classify_attempt(&attempt("B"), &registry), Action::Reject);
        assert_eq!(classify_attempt(&attempt("U"), &registry), Action::Defer);
    }

    #[test]
    fn overlap_resolves_to_reject() {
        let mut sets = PolicySets::default();
        sets.trusted.insert(id("X"));
        sets.blocked.insert(id("X"));
        let (registry, _) = DeviceRegistry::from_sets(sets);
        assert_eq!(classify_attempt(&attempt("X"), &registry), Action::Reject);
    }

    #[test]
    fn blocked_rejects_regardless_of_history() {
        let mut registry = DeviceRegistry::new();
        let dev = attempt("AA:BB");
        assert_eq!(classify_attempt(&dev, &registry), Action::Defer);

        registry.promote(&dev.identity, Classification::Trusted);
        registry.promote(&dev.identity, Classification::Blocked);
        for _ in 0..3 {
            assert_eq!(classify_attempt(&dev, &registry), Action::Reject);
        }
    }

    #[test]
    fn display_name_never_matters() {
        let mut registry = DeviceRegistry::new();
        registry.promote(&id("B"), Classification::Blocked);
        let mut spoof = attempt("B");
        spoof.display_name = Some("Trusted Headphones".into());
        assert_eq!(classify_attempt(&spoof, &registry), Action::Reject);
    }

    #[test]
    fn denied_permission_defers_everything() {
        let mut registry = DeviceRegistry::new();
        registry.promote(&id("T"), Classification::Trusted);
        registry.promote(&id("B"), Classification::Blocked);

        for dev in ["T", "B", "U"] {
            assert_eq!(
                classify_with_permission(&attempt(dev), &registry, PermissionState::Denied),
                Action::Defer
            );
        }
        assert_eq!(
            classify_with_permission(&attempt("B"), &registry, PermissionState::Granted),
            Action::Reject
        );
    }
}
