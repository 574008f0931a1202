pub mod bluetoothctl;
pub mod none;
pub mod source;
pub mod traits;

pub use bluetoothctl::BluetoothctlAdapter;
pub use none::NoneAdapter;
pub use source::{JsonLinesSource, SourceInput};
pub use traits::{BluetoothAdapter, PairingNotification, PairingSource, PermissionState};

use crate::config::{AdapterConfig, SourceConfig};
use std::sync::Arc;

/// Factory: create the OS adapter named in config. `bluetoothctl` is probed
/// once here so `permission()` reflects whether the controller is reachable.
pub async fn create_adapter(config: &AdapterConfig) -> Arc<dyn BluetoothAdapter> {
    match config.backend.as_str() {
        "bluetoothctl" => {
            let adapter =
                BluetoothctlAdapter::new(&config.bluetoothctl_path, config.command_timeout_secs);
            if !adapter.probe().await.is_granted() {
                tracing::warn!(
                    "Bluetooth controller not reachable; every attempt will be deferred"
                );
            }
            Arc::new(adapter)
        }
        "none" => Arc::new(NoneAdapter),
        other => {
            tracing::warn!("Unknown adapter backend '{other}', falling back to none");
            Arc::new(NoneAdapter)
        }
    }
}

/// Factory: create the notification source named in config.
pub fn create_source(config: &SourceConfig) -> Box<dyn PairingSource> {
    match (config.backend.as_str(), config.path.as_deref()) {
        ("file", Some(path)) => Box::new(JsonLinesSource::new(SourceInput::Path(
            shellexpand::tilde(path).into_owned().into(),
        ))),
        ("file", None) => {
            tracing::warn!("source.backend = \"file\" without source.path; reading stdin");
            Box::new(JsonLinesSource::new(SourceInput::Stdin))
        }
        ("stdin", _) => Box::new(JsonLinesSource::new(SourceInput::Stdin)),
        (other, _) => {
            tracing::warn!("Unknown source backend '{other}', falling back to stdin");
            Box::new(JsonLinesSource::new(SourceInput::Stdin))
        }
    }
}
