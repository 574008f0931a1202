use crate::device::{BondedDevice, DeviceIdentity};
use async_trait::async_trait;
use serde::Deserialize;

/// A raw pairing-request notification as delivered by the OS side.
///
/// Fields are optional because the OS may withhold them; the engine decides
/// what an unusable notification means.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PairingNotification {
    #[serde(default, alias = "address")]
    pub identity: Option<String>,
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
}

impl PairingNotification {
    pub fn new(identity: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            identity: Some(identity.into()),
            display_name: display_name.map(ToString::to_string),
        }
    }

    /// A notification with nothing usable in it.
    pub fn malformed() -> Self {
        Self::default()
    }
}

/// Whether the process may read peer details and control bonding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

impl PermissionState {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

/// Typed capabilities of the OS bonding stack.
#[async_trait]
pub trait BluetoothAdapter: Send + Sync {
    /// Adapter backend name
    fn name(&self) -> &str;

    /// Current connect permission. Must not block.
    fn permission(&self) -> PermissionState;

    /// Cancel/deny an in-progress bonding with `identity`. Best-effort.
    async fn cancel_bond(&self, identity: &DeviceIdentity) -> anyhow::Result<()>;

    /// Devices the OS has already bonded with
    async fn bonded_devices(&self) -> anyhow::Result<Vec<BondedDevice>>;
}

/// Producer of pairing notifications for the engine inbox.
#[async_trait]
pub trait PairingSource: Send + Sync {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Forward notifications into `tx` (long-running). `Ok` means the input
    /// is finished for good and the source should not be restarted.
    async fn listen(
        &self,
        tx: tokio::sync::mpsc::Sender<PairingNotification>,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_accepts_aliases() {
        let n: PairingNotification =
            serde_json::from_str(r#"{"address":"AA:BB","name":"Phone"}"#).unwrap();
        assert_eq!(n, PairingNotification::new("AA:BB", Some("Phone")));
    }

    #[test]
    fn notification_fields_are_optional() {
        let n: PairingNotification = serde_json::from_str("{}").unwrap();
        assert_eq!(n, PairingNotification::malformed());
    }

    #[test]
    fn permission_granted_check() {
        assert!(PermissionState::Granted.is_granted());
        assert!(!PermissionState::Denied.is_granted());
    }
}
