use super::traits::{Decision, DecisionResponder, PromptRequest};
use async_trait::async_trait;

/// Answers every prompt the same way. Used for unattended hosts.
pub struct FixedResponder {
    decision: Decision,
}

impl FixedResponder {
    pub fn new(decision: Decision) -> Self {
        Self { decision }
    }
}

#[async_trait]
impl DecisionResponder for FixedResponder {
    fn name(&self) -> &str {
        match self.decision {
            Decision::AddTrusted => "trust",
            Decision::AddBlockedAndReject => "block",
            Decision::Ignore => "ignore",
        }
    }

    async fn decide(&self, request: &PromptRequest) -> anyhow::Result<Option<Decision>> {
        tracing::debug!(identity = %request.identity, decision = %self.decision, "Automatic decision");
        Ok(Some(self.decision))
    }
}
