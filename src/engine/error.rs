use crate::device::DeviceIdentity;
use crate::policy::PolicyError;

/// Errors crossing the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Policy could not be read; the engine runs with an empty policy and
    /// refuses durable changes until a reload succeeds.
    #[error("policy storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// A change could not be saved; the in-memory policy was rolled back.
    #[error("policy change was not saved: {reason}")]
    StorageWrite { reason: String },

    #[error("malformed pairing event: {reason}")]
    MalformedEvent { reason: String },

    #[error("cancel pairing with {identity} failed: {reason}")]
    PairingCancelFailed {
        identity: DeviceIdentity,
        reason: String,
    },

    #[error("bluetooth connect permission not granted; peer identity is unverified")]
    PermissionDenied,

    #[error("no pending prompt for {identity}")]
    NoPendingPrompt { identity: DeviceIdentity },

    #[error("invalid device identity {0:?}")]
    InvalidIdentity(String),
}

impl EngineError {
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. } | Self::StorageWrite { .. })
    }
}

impl From<PolicyError> for EngineError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Unavailable { .. } => Self::StorageUnavailable {
                reason: e.to_string(),
            },
            PolicyError::Write { .. } => Self::StorageWrite {
                reason: e.to_string(),
            },
        }
    }
}
