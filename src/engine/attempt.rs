use super::error::EngineError;
use crate::bluetooth::PairingNotification;
use crate::classifier::Action;
use crate::device::{clean_name, Classification, DeviceIdentity, UNKNOWN_DEVICE_NAME};
use crate::prompt::Decision;
use chrono::{DateTime, Utc};

/// One pairing request, alive from notification until a terminal action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingAttempt {
    pub identity: DeviceIdentity,
    /// Untrusted peer-supplied label
    pub display_name: Option<String>,
    /// Arrival order within this engine
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
}

impl PairingAttempt {
    pub fn from_notification(
        notification: &PairingNotification,
        sequence: u64,
        received_at: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let raw = notification
            .identity
            .as_deref()
            .ok_or_else(|| EngineError::MalformedEvent {
                reason: "notification carried no device identity".into(),
            })?;
        let identity = DeviceIdentity::parse(raw).ok_or_else(|| EngineError::MalformedEvent {
            reason: "device identity is blank".into(),
        })?;

        Ok(Self {
            identity,
            display_name: clean_name(notification.display_name.as_deref()),
            sequence,
            received_at,
        })
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

/// Lifecycle of one attempt.
///
/// `Received → Classified → {Allowed | Rejected | AwaitingDecision} → Resolved`,
/// plus `Received → Resolved` for notifications that are dropped or folded
/// into an open prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Received,
    Classified,
    Allowed,
    Rejected,
    AwaitingDecision,
    Resolved,
}

impl AttemptState {
    pub fn can_advance_to(self, next: Self) -> bool {
        use AttemptState::{Allowed, AwaitingDecision, Classified, Received, Rejected, Resolved};
        matches!(
            (self, next),
            (Received, Classified | Resolved)
                | (Classified, Allowed | Rejected | AwaitingDecision)
                | (Allowed | Rejected | AwaitingDecision, Resolved)
        )
    }
}

/// Walks one attempt through its states, tracing each step.
#[derive(Debug)]
pub(crate) struct AttemptTrace {
    sequence: u64,
    state: AttemptState,
}

impl AttemptTrace {
    pub(crate) fn new(sequence: u64) -> Self {
        Self {
            sequence,
            state: AttemptState::Received,
        }
    }

    pub(crate) fn advance(&mut self, next: AttemptState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal attempt transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(sequence = self.sequence, from = ?self.state, to = ?next, "Attempt transition");
        self.state = next;
    }

    pub(crate) fn state(&self) -> AttemptState {
        self.state
    }
}

/// How the handler disposed of one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Unusable notification; nothing was done.
    Dropped { error: EngineError },
    Allowed {
        identity: DeviceIdentity,
        duplicate: bool,
    },
    Rejected {
        identity: DeviceIdentity,
        duplicate: bool,
        cancel_error: Option<EngineError>,
    },
    /// A prompt was opened. `unverified` is set when the permission check
    /// forced the deferral.
    AwaitingDecision {
        identity: DeviceIdentity,
        unverified: bool,
    },
    /// Folded into the prompt already open for this identity.
    Coalesced {
        identity: DeviceIdentity,
        repeats: u32,
    },
    /// Same pairing session as an attempt the user chose to ignore.
    PassedOnce { identity: DeviceIdentity },
}

impl AttemptOutcome {
    /// The action taken, if the attempt got as far as classification.
    pub fn action(&self) -> Option<Action> {
        match self {
            Self::Dropped { .. } | Self::Coalesced { .. } => None,
            Self::Allowed { .. } => Some(Action::Allow),
            Self::Rejected { .. } => Some(Action::Reject),
            Self::AwaitingDecision { .. } | Self::PassedOnce { .. } => Some(Action::Defer),
        }
    }

    pub fn final_state(&self) -> AttemptState {
        match self {
            Self::AwaitingDecision { .. } => AttemptState::AwaitingDecision,
            _ => AttemptState::Resolved,
        }
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        match self {
            Self::Dropped { .. } => None,
            Self::Allowed { identity, .. }
            | Self::Rejected { identity, .. }
            | Self::AwaitingDecision { identity, .. }
            | Self::Coalesced { identity, .. }
            | Self::PassedOnce { identity } => Some(identity),
        }
    }
}

/// Result of applying an answer to an open prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub identity: DeviceIdentity,
    pub decision: Decision,
    pub previous: Classification,
    pub current: Classification,
    pub cancel_error: Option<EngineError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_attempt_from_notification() {
        let n = PairingNotification::new(" AA:BB ", Some("  "));
        let attempt = PairingAttempt::from_notification(&n, 7, Utc::now()).unwrap();
        assert_eq!(attempt.identity.as_str(), "AA:BB");
        assert_eq!(attempt.display_name, None);
        assert_eq!(attempt.label(), UNKNOWN_DEVICE_NAME);
        assert_eq!(attempt.sequence, 7);
    }

    #[test]
    fn missing_identity_is_malformed() {
        let err = PairingAttempt::from_notification(&PairingNotification::malformed(), 1, Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedEvent { .. }));
    }

    #[test]
    fn blank_identity_is_malformed() {
        let n = PairingNotification::new("   ", Some("Phone"));
        assert!(PairingAttempt::from_notification(&n, 1, Utc::now()).is_err());
    }

    #[test]
    fn legal_transitions() {
        use AttemptState::*;
        assert!(Received.can_advance_to(Classified));
        assert!(Received.can_advance_to(Resolved));
        assert!(Classified.can_advance_to(Rejected));
        assert!(AwaitingDecision.can_advance_to(Resolved));

        assert!(!Received.can_advance_to(Allowed));
        assert!(!Resolved.can_advance_to(Classified));
        assert!(!AwaitingDecision.can_advance_to(Classified));
        assert!(!Allowed.can_advance_to(Rejected));
    }

    #[test]
    fn trace_follows_reject_path() {
        let mut trace = AttemptTrace::new(1);
        trace.advance(AttemptState::Classified);
        trace.advance(AttemptState::Rejected);
        trace.advance(AttemptState::Resolved);
        assert_eq!(trace.state(), AttemptState::Resolved);
    }

    #[test]
    fn outcome_helpers() {
        let id = DeviceIdentity::parse("AA:BB").unwrap();
        let waiting = AttemptOutcome::AwaitingDecision {
            identity: id.clone(),
            unverified: false,
        };
        assert_eq!(waiting.action(), Some(Action::Defer));
        assert_eq!(waiting.final_state(), AttemptState::AwaitingDecision);
        assert_eq!(waiting.identity(), Some(&id));

        let dropped = AttemptOutcome::Dropped {
            error: EngineError::PermissionDenied,
        };
        assert_eq!(dropped.action(), None);
        assert_eq!(dropped.final_state(), AttemptState::Resolved);
    }
}
