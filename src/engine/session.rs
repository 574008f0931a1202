// Pairing-session memory: the last resolution per identity and when it
// happened. A repeat attempt that resolves the same way inside the window is
// the same pairing session (OS retransmits) and must not be announced twice.

use crate::device::DeviceIdentity;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Allowed,
    Rejected,
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct SessionEntry {
    resolution: Resolution,
    at: Instant,
}

#[derive(Debug)]
pub(crate) struct SessionLog {
    window: Duration,
    entries: HashMap<DeviceIdentity, SessionEntry>,
}

impl SessionLog {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn is_repeat(
        &self,
        identity: &DeviceIdentity,
        resolution: Resolution,
        now: Instant,
    ) -> bool {
        self.entries.get(identity).is_some_and(|entry| {
            entry.resolution == resolution && now.saturating_duration_since(entry.at) <= self.window
        })
    }

    /// Sliding: every resolution restarts the window.
    pub(crate) fn record(&mut self, identity: &DeviceIdentity, resolution: Resolution, now: Instant) {
        self.entries
            .insert(identity.clone(), SessionEntry { resolution, at: now });
    }

    pub(crate) fn forget(&mut self, identity: &DeviceIdentity) {
        self.entries.remove(identity);
    }

    pub(crate) fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.at) <= window);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
