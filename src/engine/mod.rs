// Pairing event handler: the only owner of the device registry and the
// policy store.
//
// Every {classify → act → persist} step runs under one async mutex. The
// responder wait happens on a spawned task and never holds that lock.

pub mod attempt;
pub mod error;
mod session;

pub use attempt::{AttemptOutcome, AttemptState, DecisionOutcome, PairingAttempt};
pub use error::EngineError;

use crate::bluetooth::{BluetoothAdapter, PairingNotification};
use crate::classifier::{classify_with_permission, Action};
use crate::config::EngineConfig;
use crate::device::{BondedDevice, Classification, DeviceIdentity};
use crate::health::{self, AttemptKind};
use crate::observability::{Observer, ObserverEvent};
use crate::policy::PolicyStore;
use crate::prompt::{Decision, DecisionResponder, PromptRequest};
use crate::registry::{DeviceEntry, DeviceRegistry};
use attempt::AttemptTrace;
use chrono::Utc;
use serde::Serialize;
use session::{Resolution, SessionLog};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// Health component name for the policy store.
pub const STORE_COMPONENT: &str = "policy-store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub seed_bonded_as_trusted: bool,
    pub duplicate_window: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            seed_bonded_as_trusted: config.seed_bonded_as_trusted,
            duplicate_window: Duration::from_secs(config.duplicate_window_secs),
        }
    }
}

/// Collaborators the engine is built from.
pub struct EngineDeps {
    pub store: PolicyStore,
    pub adapter: Arc<dyn BluetoothAdapter>,
    /// `None` leaves prompts open until `resolve_prompt` is called.
    pub responder: Option<Arc<dyn DecisionResponder>>,
    pub observer: Arc<dyn Observer>,
}

/// An outstanding prompt as shown to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingPromptInfo {
    pub identity: DeviceIdentity,
    pub name: String,
    /// Further attempts folded into this prompt
    pub repeats: u32,
    pub opened_at: String,
    pub unverified: bool,
}

/// Both management lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceLists {
    pub trusted: Vec<DeviceEntry>,
    pub blocked: Vec<DeviceEntry>,
}

#[derive(Debug)]
struct PendingPrompt {
    name: String,
    repeats: u32,
    sequence: u64,
    opened_at: chrono::DateTime<Utc>,
    unverified: bool,
}

struct EngineState {
    registry: DeviceRegistry,
    prompts: HashMap<DeviceIdentity, PendingPrompt>,
    sessions: SessionLog,
    /// Set while the last load failed; durable mutations are refused.
    degraded: Option<String>,
}

struct Inner {
    store: PolicyStore,
    adapter: Arc<dyn BluetoothAdapter>,
    responder: Option<Arc<dyn DecisionResponder>>,
    observer: Arc<dyn Observer>,
    settings: EngineSettings,
    state: Mutex<EngineState>,
    sequence: AtomicU64,
}

/// Trust decision engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TrustEngine {
    inner: Arc<Inner>,
}

/// Parse user input into an identity.
pub fn parse_identity(raw: &str) -> Result<DeviceIdentity, EngineError> {
    DeviceIdentity::parse(raw).ok_or_else(|| EngineError::InvalidIdentity(raw.to_string()))
}

fn resolution_for(decision: Decision) -> Resolution {
    match decision {
        Decision::AddTrusted => Resolution::Allowed,
        Decision::AddBlockedAndReject => Resolution::Rejected,
        Decision::Ignore => Resolution::Ignored,
    }
}

impl TrustEngine {
    /// Load policy and come up. Never fails: an unreadable store leaves the
    /// engine degraded (empty policy, every attempt deferred).
    pub async fn start(deps: EngineDeps, settings: EngineSettings) -> Self {
        // bonded enrollment only seeds a store nobody has written yet
        let first_run = matches!(deps.store.is_initialized().await, Ok(false));
        let (registry, degraded) = match deps.store.load().await {
            Ok(sets) => {
                let (registry, conflicts) = DeviceRegistry::from_sets(sets);
                for identity in &conflicts {
                    tracing::warn!(
                        identity = %identity,
                        "Identity stored as both trusted and blocked; keeping it blocked"
                    );
                }
                health::mark_component_ok(STORE_COMPONENT);
                (registry, None)
            }
            Err(e) => {
                tracing::error!(
                    backend = deps.store.backend_name(),
                    "Policy load failed, deferring every attempt until reload: {e}"
                );
                health::mark_component_degraded(STORE_COMPONENT, &e);
                (DeviceRegistry::new(), Some(e.to_string()))
            }
        };

        let engine = Self {
            inner: Arc::new(Inner {
                store: deps.store,
                adapter: deps.adapter,
                responder: deps.responder,
                observer: deps.observer,
                settings,
                state: Mutex::new(EngineState {
                    registry,
                    prompts: HashMap::new(),
                    sessions: SessionLog::new(settings.duplicate_window),
                    degraded,
                }),
                sequence: AtomicU64::new(0),
            }),
        };

        if settings.seed_bonded_as_trusted && first_run {
            engine.seed_bonded().await;
        }

        let state = engine.inner.state.lock().await;
        tracing::info!(
            backend = engine.inner.store.backend_name(),
            adapter = engine.inner.adapter.name(),
            responder = engine.inner.responder.as_ref().map_or("external", |r| r.name()),
            trusted = state.registry.trusted_count(),
            blocked = state.registry.blocked_count(),
            degraded = state.degraded.is_some(),
            "Trust engine started"
        );
        drop(state);
        engine
    }

    /// Enroll devices the OS already bonded with into a fresh store. One
    /// write for the whole batch.
    async fn seed_bonded(&self) {
        let mut state = self.inner.state.lock().await;
        if state.degraded.is_some() {
            return;
        }
        let bonded = self.bonded_devices().await;

        let mut added = Vec::new();
        for device in &bonded {
            state
                .registry
                .observe_name(&device.identity, device.name.as_deref());
            if state.registry.classify(&device.identity) == Classification::Unclassified {
                state
                    .registry
                    .promote(&device.identity, Classification::Trusted);
                added.push(device.identity.clone());
            }
        }
        if added.is_empty() {
            return;
        }

        match self.inner.store.save(&state.registry.to_sets()).await {
            Ok(()) => {
                tracing::info!(count = added.len(), "Enrolled bonded devices as trusted");
            }
            Err(e) => {
                for identity in &added {
                    state
                        .registry
                        .promote(identity, Classification::Unclassified);
                }
                tracing::error!("Could not save bonded-device enrollment: {e}");
                health::mark_component_error(STORE_COMPONENT, &e);
            }
        }
    }

    /// Process one OS notification through the attempt state machine.
    pub async fn handle_notification(&self, notification: PairingNotification) -> AttemptOutcome {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let mut trace = AttemptTrace::new(sequence);

        let attempt = match PairingAttempt::from_notification(&notification, sequence, Utc::now()) {
            Ok(attempt) => attempt,
            Err(error) => {
                tracing::debug!(sequence, "Dropping pairing notification: {error}");
                health::record_attempt(AttemptKind::Dropped);
                self.inner.observer.record_event(&ObserverEvent::AttemptDropped {
                    reason: error.to_string(),
                });
                trace.advance(AttemptState::Resolved);
                return AttemptOutcome::Dropped { error };
            }
        };
        let identity = attempt.identity.clone();
        let label = attempt.label().to_string();

        let mut state = self.inner.state.lock().await;
        let now = Instant::now();
        state.sessions.prune(now);
        state
            .registry
            .observe_name(&identity, attempt.display_name.as_deref());

        let coalesced = state.prompts.get_mut(&identity).map(|prompt| {
            prompt.repeats = prompt.repeats.saturating_add(1);
            prompt.repeats
        });
        if let Some(repeats) = coalesced {
            drop(state);
            health::record_attempt(AttemptKind::Coalesced);
            self.inner.observer.record_event(&ObserverEvent::PromptCoalesced {
                identity: identity.clone(),
                repeats,
            });
            trace.advance(AttemptState::Resolved);
            return AttemptOutcome::Coalesced { identity, repeats };
        }

        let permission = self.inner.adapter.permission();
        let action = classify_with_permission(&attempt, &state.registry, permission);
        trace.advance(AttemptState::Classified);
        tracing::debug!(identity = %identity, sequence, action = %action, "Attempt classified");

        match action {
            Action::Allow => {
                let duplicate = state.sessions.is_repeat(&identity, Resolution::Allowed, now);
                state.sessions.record(&identity, Resolution::Allowed, now);
                drop(state);
                trace.advance(AttemptState::Allowed);

                health::record_attempt(AttemptKind::Allowed);
                if duplicate {
                    tracing::debug!(identity = %identity, "Repeat allow in same pairing session");
                } else {
                    self.inner.observer.record_event(&ObserverEvent::AutoAllowed {
                        identity: identity.clone(),
                        name: label,
                    });
                }
                trace.advance(AttemptState::Resolved);
                AttemptOutcome::Allowed {
                    identity,
                    duplicate,
                }
            }
            Action::Reject => {
                let duplicate = state.sessions.is_repeat(&identity, Resolution::Rejected, now);
                state.sessions.record(&identity, Resolution::Rejected, now);
                trace.advance(AttemptState::Rejected);

                let cancel_error = self.cancel(&identity, !duplicate).await;
                drop(state);

                health::record_attempt(AttemptKind::Rejected);
                if duplicate {
                    tracing::debug!(identity = %identity, "Repeat reject in same pairing session");
                } else {
                    self.inner.observer.record_event(&ObserverEvent::AutoRejected {
                        identity: identity.clone(),
                        name: label,
                        cancelled: cancel_error.is_none(),
                    });
                }
                trace.advance(AttemptState::Resolved);
                AttemptOutcome::Rejected {
                    identity,
                    duplicate,
                    cancel_error,
                }
            }
            Action::Defer => {
                trace.advance(AttemptState::AwaitingDecision);
                if state.sessions.is_repeat(&identity, Resolution::Ignored, now) {
                    state.sessions.record(&identity, Resolution::Ignored, now);
                    drop(state);
                    tracing::debug!(identity = %identity, "Repeat attempt in ignored pairing session");
                    trace.advance(AttemptState::Resolved);
                    return AttemptOutcome::PassedOnce { identity };
                }

                let unverified = !permission.is_granted();
                if unverified {
                    tracing::warn!(
                        identity = %identity,
                        "Deferring without policy lookup: {}",
                        EngineError::PermissionDenied
                    );
                }
                state.prompts.insert(
                    identity.clone(),
                    PendingPrompt {
                        name: label.clone(),
                        repeats: 0,
                        sequence,
                        opened_at: attempt.received_at,
                        unverified,
                    },
                );
                drop(state);

                health::record_attempt(AttemptKind::Deferred);
                self.inner.observer.record_event(&ObserverEvent::PromptOpened {
                    identity: identity.clone(),
                    name: label.clone(),
                });
                if let Some(responder) = &self.inner.responder {
                    self.spawn_responder(
                        Arc::clone(responder),
                        PromptRequest {
                            identity: identity.clone(),
                            display_name: label,
                        },
                    );
                }
                AttemptOutcome::AwaitingDecision {
                    identity,
                    unverified,
                }
            }
        }
    }

    /// Answer the outstanding prompt for `identity`.
    ///
    /// If the decision cannot be saved the prompt stays open and the caller
    /// gets the storage error.
    pub async fn resolve_prompt(
        &self,
        identity: &DeviceIdentity,
        decision: Decision,
    ) -> Result<DecisionOutcome, EngineError> {
        let mut state = self.inner.state.lock().await;
        let prompt = state
            .prompts
            .remove(identity)
            .ok_or_else(|| EngineError::NoPendingPrompt {
                identity: identity.clone(),
            })?;
        self.apply_decision(&mut state, identity, prompt, decision)
            .await
    }

    async fn apply_decision(
        &self,
        state: &mut EngineState,
        identity: &DeviceIdentity,
        prompt: PendingPrompt,
        decision: Decision,
    ) -> Result<DecisionOutcome, EngineError> {
        let target = match decision {
            Decision::AddTrusted => Some(Classification::Trusted),
            Decision::AddBlockedAndReject => Some(Classification::Blocked),
            Decision::Ignore => None,
        };

        let previous = match target {
            Some(to) => match self.persist_change(state, identity, to).await {
                Ok(previous) => previous,
                Err(error) => {
                    state.prompts.insert(identity.clone(), prompt);
                    return Err(error);
                }
            },
            None => state.registry.classify(identity),
        };

        state
            .sessions
            .record(identity, resolution_for(decision), Instant::now());
        tracing::debug!(
            identity = %identity,
            decision = %decision,
            repeats = prompt.repeats,
            "Prompt resolved"
        );
        self.inner.observer.record_event(&ObserverEvent::DecisionApplied {
            identity: identity.clone(),
            decision,
        });

        let cancel_error = if decision == Decision::AddBlockedAndReject {
            self.cancel(identity, true).await
        } else {
            None
        };

        Ok(DecisionOutcome {
            identity: identity.clone(),
            decision,
            previous,
            current: state.registry.classify(identity),
            cancel_error,
        })
    }

    /// Mark `identity` trusted. Resolves its open prompt if there is one.
    pub async fn trust(&self, identity: &DeviceIdentity) -> Result<Classification, EngineError> {
        self.set_classification(identity, Classification::Trusted)
            .await
    }

    /// Mark `identity` blocked. Resolves its open prompt if there is one,
    /// which also cancels the bonding in progress.
    pub async fn block(&self, identity: &DeviceIdentity) -> Result<Classification, EngineError> {
        self.set_classification(identity, Classification::Blocked)
            .await
    }

    async fn set_classification(
        &self,
        identity: &DeviceIdentity,
        to: Classification,
    ) -> Result<Classification, EngineError> {
        let mut state = self.inner.state.lock().await;
        if let Some(prompt) = state.prompts.remove(identity) {
            let decision = match to {
                Classification::Blocked => Decision::AddBlockedAndReject,
                _ => Decision::AddTrusted,
            };
            return self
                .apply_decision(&mut state, identity, prompt, decision)
                .await
                .map(|outcome| outcome.previous);
        }
        self.persist_change(&mut state, identity, to).await
    }

    /// Trusted → Unclassified. Anything else is left as is.
    pub async fn remove_trusted(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Classification, EngineError> {
        self.remove_from(identity, Classification::Trusted).await
    }

    /// Blocked → Unclassified. Anything else is left as is.
    pub async fn remove_blocked(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Classification, EngineError> {
        self.remove_from(identity, Classification::Blocked).await
    }

    async fn remove_from(
        &self,
        identity: &DeviceIdentity,
        list: Classification,
    ) -> Result<Classification, EngineError> {
        let mut state = self.inner.state.lock().await;
        let current = state.registry.classify(identity);
        if current != list {
            tracing::debug!(identity = %identity, current = %current, list = %list, "Not in list");
            return Ok(current);
        }
        self.persist_change(&mut state, identity, Classification::Unclassified)
            .await
    }

    /// Promote in memory, save, roll back on failure. Returns the previous
    /// classification.
    async fn persist_change(
        &self,
        state: &mut EngineState,
        identity: &DeviceIdentity,
        to: Classification,
    ) -> Result<Classification, EngineError> {
        if let Some(reason) = &state.degraded {
            return Err(EngineError::StorageUnavailable {
                reason: reason.clone(),
            });
        }

        let previous = state.registry.promote(identity, to);
        if previous == to {
            return Ok(previous);
        }

        if let Err(e) = self.inner.store.save(&state.registry.to_sets()).await {
            state.registry.promote(identity, previous);
            let error = EngineError::from(e);
            tracing::error!(identity = %identity, "Policy change rolled back: {error}");
            health::mark_component_error(STORE_COMPONENT, &error);
            self.inner.observer.record_event(&ObserverEvent::PersistFailed {
                identity: identity.clone(),
                reason: error.to_string(),
            });
            return Err(error);
        }

        health::mark_component_ok(STORE_COMPONENT);
        state.sessions.forget(identity);
        self.inner.observer.record_event(&ObserverEvent::PolicyChanged {
            identity: identity.clone(),
            from: previous,
            to,
        });
        Ok(previous)
    }

    /// Best-effort OS cancel. Failures are absorbed and returned for the
    /// outcome only.
    async fn cancel(&self, identity: &DeviceIdentity, notify: bool) -> Option<EngineError> {
        let err = self.inner.adapter.cancel_bond(identity).await.err()?;
        let error = EngineError::PairingCancelFailed {
            identity: identity.clone(),
            reason: format!("{err:#}"),
        };
        health::record_attempt(AttemptKind::CancelFailed);
        if notify {
            self.inner.observer.record_event(&ObserverEvent::CancelFailed {
                identity: identity.clone(),
                reason: format!("{err:#}"),
            });
        } else {
            tracing::debug!(identity = %identity, "{error}");
        }
        Some(error)
    }

    fn spawn_responder(&self, responder: Arc<dyn DecisionResponder>, request: PromptRequest) {
        let engine = self.clone();
        tokio::spawn(async move {
            let decision = match responder.decide(&request).await {
                Ok(Some(decision)) => decision,
                Ok(None) => {
                    tracing::debug!(identity = %request.identity, "Prompt dismissed");
                    Decision::Ignore
                }
                Err(e) => {
                    tracing::warn!(
                        identity = %request.identity,
                        responder = responder.name(),
                        "Responder failed, treating as dismissed: {e:#}"
                    );
                    Decision::Ignore
                }
            };

            match engine.resolve_prompt(&request.identity, decision).await {
                Ok(_) => {}
                Err(EngineError::NoPendingPrompt { .. }) => {
                    tracing::debug!(identity = %request.identity, "Prompt already resolved");
                }
                Err(error) if error.is_storage() => {
                    // Nobody is left to retry; let this attempt through.
                    tracing::warn!(
                        identity = %request.identity,
                        "Decision not saved, ignoring this attempt instead: {error}"
                    );
                    if let Err(e) = engine
                        .resolve_prompt(&request.identity, Decision::Ignore)
                        .await
                    {
                        tracing::debug!(identity = %request.identity, "Fallback ignore failed: {e}");
                    }
                }
                Err(error) => {
                    tracing::warn!(identity = %request.identity, "Decision not applied: {error}");
                }
            }
        });
    }

    pub async fn classification(&self, identity: &DeviceIdentity) -> Classification {
        self.inner.state.lock().await.registry.classify(identity)
    }

    /// Every classified device, sorted by name then identity.
    pub async fn get_snapshot(&self) -> Vec<DeviceEntry> {
        let bonded = self.bonded_devices().await;
        let state = self.inner.state.lock().await;
        state.registry.snapshot(&bonded)
    }

    pub async fn get_lists(&self) -> DeviceLists {
        let bonded = self.bonded_devices().await;
        let state = self.inner.state.lock().await;
        DeviceLists {
            trusted: state.registry.trusted_entries(&bonded),
            blocked: state.registry.blocked_entries(&bonded),
        }
    }

    /// Outstanding prompts in the order they were opened.
    pub async fn pending_prompts(&self) -> Vec<PendingPromptInfo> {
        let state = self.inner.state.lock().await;
        let mut prompts: Vec<(&DeviceIdentity, &PendingPrompt)> = state.prompts.iter().collect();
        prompts.sort_by_key(|(_, p)| p.sequence);
        prompts
            .into_iter()
            .map(|(identity, p)| PendingPromptInfo {
                identity: identity.clone(),
                name: p.name.clone(),
                repeats: p.repeats,
                opened_at: p.opened_at.to_rfc3339(),
                unverified: p.unverified,
            })
            .collect()
    }

    /// Re-read the store. Success clears degraded mode.
    pub async fn reload(&self) -> Result<(), EngineError> {
        let mut state = self.inner.state.lock().await;
        let sets = self.inner.store.load().await.map_err(|e| {
            tracing::error!("Policy reload failed: {e}");
            health::mark_component_degraded(STORE_COMPONENT, &e);
            EngineError::from(e)
        })?;

        for identity in state.registry.reset_to(sets) {
            tracing::warn!(
                identity = %identity,
                "Identity stored as both trusted and blocked; keeping it blocked"
            );
        }
        if state.degraded.take().is_some() {
            tracing::info!("Policy store reachable again, leaving degraded mode");
        }
        health::mark_component_ok(STORE_COMPONENT);
        tracing::info!(
            trusted = state.registry.trusted_count(),
            blocked = state.registry.blocked_count(),
            "Policy reloaded"
        );
        Ok(())
    }

    /// Probe the backend without touching engine state.
    pub async fn store_healthy(&self) -> bool {
        self.inner.store.health_check().await
    }

    pub async fn is_degraded(&self) -> bool {
        self.inner.state.lock().await.degraded.is_some()
    }

    /// Abandon every outstanding prompt as Ignore. Returns how many there were.
    pub async fn shutdown(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let abandoned: Vec<DeviceIdentity> = state.prompts.drain().map(|(id, _)| id).collect();
        drop(state);

        for identity in &abandoned {
            tracing::debug!(identity = %identity, "Abandoning prompt");
            self.inner.observer.record_event(&ObserverEvent::DecisionApplied {
                identity: identity.clone(),
                decision: Decision::Ignore,
            });
        }
        if !abandoned.is_empty() {
            tracing::info!(count = abandoned.len(), "Abandoned outstanding prompts");
        }
        abandoned.len()
    }

    /// Single consumer of the notification inbox, in arrival order.
    pub async fn run_inbox(&self, mut rx: mpsc::Receiver<PairingNotification>) {
        while let Some(notification) = rx.recv().await {
            let outcome = self.handle_notification(notification).await;
            tracing::trace!(?outcome, "Notification handled");
        }
        tracing::debug!("Notification inbox closed");
    }

    pub fn settings(&self) -> EngineSettings {
        self.inner.settings
    }

    async fn bonded_devices(&self) -> Vec<BondedDevice> {
        if !self.inner.adapter.permission().is_granted() {
            return Vec::new();
        }
        match self.inner.adapter.bonded_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(adapter = self.inner.adapter.name(), "Bonded device query failed: {e:#}");
                Vec::new()
            }
        }
    }
}
