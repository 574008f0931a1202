use super::traits::{BluetoothAdapter, PermissionState};
use crate::device::{clean_name, BondedDevice, DeviceIdentity};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Maximum captured output per command (64KB).
const MAX_OUTPUT_BYTES: usize = 65_536;

/// BlueZ adapter driven through the `bluetoothctl` CLI.
pub struct BluetoothctlAdapter {
    program: String,
    timeout: Duration,
    permitted: AtomicBool,
}

impl BluetoothctlAdapter {
    pub fn new(program: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
            permitted: AtomicBool::new(false),
        }
    }

    /// Checks that the controller is reachable and caches the answer for
    /// [`BluetoothAdapter::permission`].
    pub async fn probe(&self) -> PermissionState {
        let ok = match self.run(&["show"]).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("bluetoothctl probe failed: {e:#}");
                false
            }
        };
        self.permitted.store(ok, Ordering::Relaxed);
        self.permission()
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let child = tokio::process::Command::new(&self.program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "{} {} timed out after {}s",
                    self.program,
                    args.join(" "),
                    self.timeout.as_secs()
                )
            })??;

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.len() > MAX_OUTPUT_BYTES {
            let mut cut = MAX_OUTPUT_BYTES;
            while !stdout.is_char_boundary(cut) {
                cut -= 1;
            }
            stdout.truncate(cut);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                stderr.trim()
            );
        }
        Ok(stdout)
    }
}

#[async_trait]
impl BluetoothAdapter for BluetoothctlAdapter {
    fn name(&self) -> &str {
        "bluetoothctl"
    }

    fn permission(&self) -> PermissionState {
        if self.permitted.load(Ordering::Relaxed) {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        }
    }

    async fn cancel_bond(&self, identity: &DeviceIdentity) -> anyhow::Result<()> {
        let out = self.run(&["cancel-pairing", identity.as_str()]).await?;
        if let Some(line) = out.lines().find(|l| l.contains("Failed")) {
            anyhow::bail!("bluetoothctl refused cancel-pairing: {}", line.trim());
        }
        Ok(())
    }

    async fn bonded_devices(&self) -> anyhow::Result<Vec<BondedDevice>> {
        let out = self.run(&["devices", "Paired"]).await?;
        Ok(parse_device_list(&out))
    }
}

/// Parses `Device <addr> <name...>` lines; anything else is ignored.
pub fn parse_device_list(output: &str) -> Vec<BondedDevice> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (addr, name) = match rest.split_once(' ') {
                Some((addr, name)) => (addr, Some(name)),
                None => (rest, None),
            };
            let identity = DeviceIdentity::parse(addr)?;
            // bluetoothctl prints the address again when a device has no name
            let name = clean_name(name).filter(|n| n.replace('-', ":") != identity.as_str());
            Some(BondedDevice { identity, name })
        })
        .collect()
}
