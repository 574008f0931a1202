use super::traits::{BluetoothAdapter, PermissionState};
use crate::device::{BondedDevice, DeviceIdentity};
use async_trait::async_trait;

/// No OS binding. Notifications are taken at face value, nothing is bonded,
/// and cancel always fails so rejections show up as `PairingCancelFailed`.
pub struct NoneAdapter;

#[async_trait]
impl BluetoothAdapter for NoneAdapter {
    fn name(&self) -> &str {
        "none"
    }

    fn permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn cancel_bond(&self, identity: &DeviceIdentity) -> anyhow::Result<()> {
        anyhow::bail!("no bluetooth adapter configured; cannot cancel bonding with {identity}")
    }

    async fn bonded_devices(&self) -> anyhow::Result<Vec<BondedDevice>> {
        Ok(Vec::new())
    }
}
