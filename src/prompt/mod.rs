pub mod fixed;
pub mod interactive;
pub mod traits;

pub use fixed::FixedResponder;
pub use interactive::InteractiveResponder;
pub use traits::{Decision, DecisionResponder, PromptRequest};

use crate::config::PromptConfig;
use std::sync::Arc;

/// Factory: create the responder named in config. `external` (and anything
/// unknown) yields no responder; prompts then wait for `resolve_prompt`,
/// which `pairguard resolve` reaches over the daemon's control socket.
pub fn create_responder(config: &PromptConfig) -> Option<Arc<dyn DecisionResponder>> {
    match config.backend.as_str() {
        "interactive" => Some(Arc::new(InteractiveResponder::new())),
        "external" => None,
        other => match other.parse::<Decision>() {
            Ok(decision) => Some(Arc::new(FixedResponder::new(decision))),
            Err(_) => {
                tracing::warn!(
                    "Unknown prompt backend '{other}'; prompts will wait for `pairguard resolve`"
                );
                None
            }
        },
    }
}
