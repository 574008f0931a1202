use crate::device::DeviceIdentity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Answer to a deferred pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Trust this device from now on
    AddTrusted,
    /// Block this device from now on and cancel the current bonding
    AddBlockedAndReject,
    /// Let this attempt through once without recording anything
    Ignore,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddTrusted => write!(f, "trust"),
            Self::AddBlockedAndReject => write!(f, "block"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trust" | "add_trusted" | "allow" => Ok(Self::AddTrusted),
            "block" | "add_blocked_and_reject" | "reject" => Ok(Self::AddBlockedAndReject),
            "ignore" | "skip" => Ok(Self::Ignore),
            other => Err(format!("unknown decision '{other}' (expected trust, block or ignore)")),
        }
    }
}

/// What the responder is shown. The name is untrusted peer input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptRequest {
    pub identity: DeviceIdentity,
    pub display_name: String,
}

/// Produces answers for deferred attempts, from a human or an automated policy.
#[async_trait]
pub trait DecisionResponder: Send + Sync {
    /// Responder name
    fn name(&self) -> &str;

    /// Wait for an answer. `Ok(None)` means the prompt was dismissed, which
    /// the engine treats as [`Decision::Ignore`].
    async fn decide(&self, request: &PromptRequest) -> anyhow::Result<Option<Decision>>;
}
