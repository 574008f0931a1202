// Process health: component status plus pairing-attempt counters.
//
// Holds no policy data; trusted/blocked state lives only in the engine.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Starting,
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub updated_at: String,
    pub last_ok: Option<String>,
    pub last_error: Option<String>,
    pub restart_count: u64,
}

/// How pairing attempts were resolved since process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttemptCounters {
    pub allowed: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub coalesced: u64,
    pub dropped: u64,
    pub cancel_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    Allowed,
    Rejected,
    Deferred,
    Coalesced,
    Dropped,
    CancelFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub pid: u32,
    pub updated_at: String,
    pub uptime_seconds: u64,
    pub components: BTreeMap<String, ComponentHealth>,
    pub attempts: AttemptCounters,
}

struct HealthRegistry {
    started_at: Instant,
    components: Mutex<BTreeMap<String, ComponentHealth>>,
    attempts: Mutex<AttemptCounters>,
}

static REGISTRY: OnceLock<HealthRegistry> = OnceLock::new();

fn registry() -> &'static HealthRegistry {
    REGISTRY.get_or_init(|| HealthRegistry {
        started_at: Instant::now(),
        components: Mutex::new(BTreeMap::new()),
        attempts: Mutex::new(AttemptCounters::default()),
    })
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn upsert_component<F>(component: &str, update: F)
where
    F: FnOnce(&mut ComponentHealth),
{
    let mut map = registry().components.lock();
    let now = now_rfc3339();
    let entry = map
        .entry(component.to_string())
        .or_insert_with(|| ComponentHealth {
            status: ComponentStatus::Starting,
            updated_at: now.clone(),
            last_ok: None,
            last_error: None,
            restart_count: 0,
        });
    update(entry);
    entry.updated_at = now;
}

pub fn mark_component_ok(component: &str) {
    upsert_component(component, |entry| {
        entry.status = ComponentStatus::Ok;
        entry.last_ok = Some(now_rfc3339());
        entry.last_error = None;
    });
}

/// Running, but with reduced guarantees (e.g. policy store unreadable).
#[allow(clippy::needless_pass_by_value)]
pub fn mark_component_degraded(component: &str, reason: impl ToString) {
    let reason = reason.to_string();
    upsert_component(component, move |entry| {
        entry.status = ComponentStatus::Degraded;
        entry.last_error = Some(reason);
    });
}

#[allow(clippy::needless_pass_by_value)]
pub fn mark_component_error(component: &str, error: impl ToString) {
    let err = error.to_string();
    upsert_component(component, move |entry| {
        entry.status = ComponentStatus::Error;
        entry.last_error = Some(err);
    });
}

pub fn bump_component_restart(component: &str) {
    upsert_component(component, |entry| {
        entry.restart_count = entry.restart_count.saturating_add(1);
    });
}

pub fn record_attempt(kind: AttemptKind) {
    let mut counters = registry().attempts.lock();
    let slot = match kind {
        AttemptKind::Allowed => &mut counters.allowed,
        AttemptKind::Rejected => &mut counters.rejected,
        AttemptKind::Deferred => &mut counters.deferred,
        AttemptKind::Coalesced => &mut counters.coalesced,
        AttemptKind::Dropped => &mut counters.dropped,
        AttemptKind::CancelFailed => &mut counters.cancel_failures,
    };
    *slot = slot.saturating_add(1);
}

pub fn snapshot() -> HealthSnapshot {
    let components = registry().components.lock().clone();
    let attempts = *registry().attempts.lock();

    HealthSnapshot {
        pid: std::process::id(),
        updated_at: now_rfc3339(),
        uptime_seconds: registry().started_at.elapsed().as_secs(),
        components,
        attempts,
    }
}

/// Structured error message: what happened, why, and how to fix it.
pub fn structured_error(what: &str, why: &str, fix: &str) -> String {
    format!("{what}\n  Cause: {why}\n  Fix: {fix}")
}

pub fn snapshot_json() -> serde_json::Value {
    serde_json::to_value(snapshot()).unwrap_or_else(|_| {
        serde_json::json!({
            "status": "error",
            "message": "failed to serialize health snapshot"
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_error_format() {
        let msg = structured_error("what", "why", "fix");
        assert_eq!(msg, "what\n  Cause: why\n  Fix: fix");
    }

    #[test]
    fn component_status_transitions_show_in_snapshot() {
        mark_component_ok("health-test-store");
        mark_component_degraded("health-test-store", "disk gone");

        let json = snapshot_json();
        let component = &json["components"]["health-test-store"];
        assert_eq!(component["status"], "degraded");
        assert_eq!(component["last_error"], "disk gone");

        mark_component_ok("health-test-store");
        let json = snapshot_json();
        assert_eq!(json["components"]["health-test-store"]["status"], "ok");
        assert!(json["components"]["health-test-store"]["last_error"].is_null());
    }

    #[test]
    fn attempt_counters_only_grow() {
        let before = snapshot().attempts;
        record_attempt(AttemptKind::Rejected);
        record_attempt(AttemptKind::CancelFailed);
        let after = snapshot().attempts;
        assert!(after.rejected > before.rejected);
        assert!(after.cancel_failures > before.cancel_failures);
    }

    #[test]
    fn restart_count_increments() {
        bump_component_restart("health-test-restart");
        bump_component_restart("health-test-restart");
        let json = snapshot_json();
        assert_eq!(json["components"]["health-test-restart"]["restart_count"], 2);
    }
}
