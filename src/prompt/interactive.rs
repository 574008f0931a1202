// Terminal prompt for deferred pairing attempts.
//
// One menu at a time: concurrent prompts for different devices queue on
// `screen` so answers can't be attributed to the wrong device.

use super::traits::{Decision, DecisionResponder, PromptRequest};
use anyhow::Context;
use async_trait::async_trait;
use console::{style, Term};
use dialoguer::theme::ColorfulTheme;
use dialoguer::Select;
use tokio::sync::Mutex;

const CHOICES: [(&str, Decision); 3] = [
    ("Trust this device", Decision::AddTrusted),
    ("Block and reject", Decision::AddBlockedAndReject),
    ("Ignore (allow once)", Decision::Ignore),
];

pub struct InteractiveResponder {
    screen: Mutex<()>,
}

impl InteractiveResponder {
    pub fn new() -> Self {
        Self {
            screen: Mutex::new(()),
        }
    }
}

impl Default for InteractiveResponder {
    fn default() -> Self {
        Self::new()
    }
}

/// Peer names are attacker-controlled; keep them from driving the terminal.
pub fn printable_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_control()).take(64).collect()
}

fn ask(request: &PromptRequest) -> anyhow::Result<Option<Decision>> {
    let term = Term::stderr();
    term.write_line(&format!(
        "\n{}\n  Name:    {}\n  Address: {}",
        style("Pairing attempt from an unregistered device").yellow().bold(),
        printable_name(&request.display_name),
        request.identity
    ))?;

    let labels: Vec<&str> = CHOICES.iter().map(|(label, _)| *label).collect();
    let picked = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("What should happen to this device?")
        .items(&labels)
        .default(2)
        .interact_on_opt(&term)
        .context("Prompt failed")?;

    Ok(picked.map(|i| CHOICES[i].1))
}

#[async_trait]
impl DecisionResponder for InteractiveResponder {
    fn name(&self) -> &str {
        "interactive"
    }

    async fn decide(&self, request: &PromptRequest) -> anyhow::Result<Option<Decision>> {
        let _screen = self.screen.lock().await;
        let request = request.clone();
        tokio::task::spawn_blocking(move || ask(&request))
            .await
            .context("Prompt task panicked")?
    }
}
