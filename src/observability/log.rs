use super::traits::{Observer, ObserverEvent};

/// Writes every event as a tracing record.
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for LogObserver {
    fn record_event(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::AttemptDropped { reason } => {
                tracing::warn!(reason = %reason, "Pairing notification dropped");
            }
            ObserverEvent::AutoAllowed { identity, name } => {
                tracing::info!(identity = %identity, name = %name, "Trusted device allowed");
            }
            ObserverEvent::AutoRejected {
                identity,
                name,
                cancelled,
            } => {
                tracing::info!(
                    identity = %identity,
                    name = %name,
                    cancelled,
                    "Blocked device rejected"
                );
            }
            ObserverEvent::PromptOpened { identity, name } => {
                tracing::info!(identity = %identity, name = %name, "Unknown device, awaiting decision");
            }
            ObserverEvent::PromptCoalesced { identity, repeats } => {
                tracing::debug!(identity = %identity, repeats, "Repeat attempt joined open prompt");
            }
            ObserverEvent::DecisionApplied { identity, decision } => {
                tracing::info!(identity = %identity, decision = %decision, "Decision applied");
            }
            ObserverEvent::PolicyChanged { identity, from, to } => {
                tracing::info!(identity = %identity, from = %from, to = %to, "Policy changed");
            }
            ObserverEvent::CancelFailed { identity, reason } => {
                tracing::warn!(identity = %identity, reason = %reason, "Pairing cancel failed");
            }
            ObserverEvent::PersistFailed { identity, reason } => {
                tracing::error!(identity = %identity, reason = %reason, "Policy change not saved");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;

    #[test]
    fn handles_every_event_without_panicking() {
        let obs = LogObserver::new();
        let id = DeviceIdentity::parse("AA:BB").unwrap();
        obs.record_event(&ObserverEvent::AttemptDropped {
            reason: "no identity".into(),
        });
        obs.record_event(&ObserverEvent::AutoRejected {
            identity: id.clone(),
            name: "Phone".into(),
            cancelled: false,
        });
        obs.record_event(&ObserverEvent::CancelFailed {
            identity: id,
            reason: "refused".into(),
        });
        assert_eq!(obs.name(), "log");
    }
}
