use crate::device::{Classification, DeviceIdentity};
use crate::prompt::Decision;

/// User-visible engine events. Each one is a notification the user should
/// see once; duplicates within a pairing session are never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    AttemptDropped {
        reason: String,
    },
    AutoAllowed {
        identity: DeviceIdentity,
        name: String,
    },
    AutoRejected {
        identity: DeviceIdentity,
        name: String,
        cancelled: bool,
    },
    PromptOpened {
        identity: DeviceIdentity,
        name: String,
    },
    PromptCoalesced {
        identity: DeviceIdentity,
        repeats: u32,
    },
    DecisionApplied {
        identity: DeviceIdentity,
        decision: Decision,
    },
    PolicyChanged {
        identity: DeviceIdentity,
        from: Classification,
        to: Classification,
    },
    CancelFailed {
        identity: DeviceIdentity,
        reason: String,
    },
    PersistFailed {
        identity: DeviceIdentity,
        reason: String,
    },
}

/// Sink for engine events; implement for any notification surface
pub trait Observer: Send + Sync {
    fn record_event(&self, event: &ObserverEvent);

    /// Backend name
    fn name(&self) -> &str;
}
