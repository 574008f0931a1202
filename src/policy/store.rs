use super::traits::{KeyValueStore, StringSet};
use crate::device::DeviceIdentity;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Namespace the policy keys live under.
pub const DEFAULT_NAMESPACE: &str = "bluetooth_security_prefs";
pub const TRUSTED_KEY: &str = "trusted";
pub const BLOCKED_KEY: &str = "blocked";

/// The persisted policy: two identity sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySets {
    pub trusted: BTreeSet<DeviceIdentity>,
    pub blocked: BTreeSet<DeviceIdentity>,
}

impl PolicySets {
    pub fn is_empty(&self) -> bool {
        self.trusted.is_empty() && self.blocked.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy storage unavailable ({backend}): {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("policy write failed ({backend}): {reason}")]
    Write { backend: String, reason: String },
}

/// Durable trusted/blocked sets on top of a [`KeyValueStore`].
///
/// Only the engine holds one of these; everything else goes through the
/// engine's mutation API.
#[derive(Clone)]
pub struct PolicyStore {
    backend: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl PolicyStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }

    /// Reads both sets. Absent keys are empty sets; blank entries are dropped
    /// and padding is trimmed, so `save(load())` reproduces the stored bytes
    /// only for documents written by `save`.
    pub async fn load(&self) -> Result<PolicySets, PolicyError> {
        let trusted = self.read_key(TRUSTED_KEY).await?;
        let blocked = self.read_key(BLOCKED_KEY).await?;
        Ok(PolicySets { trusted, blocked })
    }

    /// Whether either policy key has ever been written.
    pub async fn is_initialized(&self) -> Result<bool, PolicyError> {
        for key in [TRUSTED_KEY, BLOCKED_KEY] {
            let present = self
                .backend
                .get_string_set(&self.namespace, key)
                .await
                .map_err(|e| PolicyError::Unavailable {
                    backend: self.backend.name().to_string(),
                    reason: format!("{e:#}"),
                })?
                .is_some();
            if present {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Writes both sets in one atomic put.
    pub async fn save(&self, sets: &PolicySets) -> Result<(), PolicyError> {
        let entries = [
            (TRUSTED_KEY, to_strings(&sets.trusted)),
            (BLOCKED_KEY, to_strings(&sets.blocked)),
        ];
        self.backend
            .put_string_sets(&self.namespace, &entries)
            .await
            .map_err(|e| PolicyError::Write {
                backend: self.backend.name().to_string(),
                reason: format!("{e:#}"),
            })
    }

    async fn read_key(&self, key: &str) -> Result<BTreeSet<DeviceIdentity>, PolicyError> {
        let raw = self
            .backend
            .get_string_set(&self.namespace, key)
            .await
            .map_err(|e| PolicyError::Unavailable {
                backend: self.backend.name().to_string(),
                reason: format!("{e:#}"),
            })?
            .unwrap_or_default();

        let mut out = BTreeSet::new();
        for value in &raw {
            match DeviceIdentity::parse(value) {
                Some(id) => {
                    out.insert(id);
                }
                None => tracing::warn!(key, "Dropping blank identity from stored policy"),
            }
        }
        Ok(out)
    }
}

fn to_strings(ids: &BTreeSet<DeviceIdentity>) -> StringSet {
    ids.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{FileStore, InMemoryStore};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn id(s: &str) -> DeviceIdentity {
        DeviceIdentity::parse(s).unwrap()
    }

    fn sets(trusted: &[&str], blocked: &[&str]) -> PolicySets {
        PolicySets {
            trusted: trusted.iter().map(|s| id(s)).collect(),
            blocked: blocked.iter().map(|s| id(s)).collect(),
        }
    }

    struct OfflineStore;

    #[async_trait]
    impl KeyValueStore for OfflineStore {
        fn name(&self) -> &str {
            "offline"
        }

        async fn get_string_set(&self, _: &str, _: &str) -> anyhow::Result<Option<StringSet>> {
            anyhow::bail!("disk not mounted")
        }

        async fn put_string_sets(&self, _: &str, _: &[(&str, StringSet)]) -> anyhow::Result<()> {
            anyhow::bail!("read-only filesystem")
        }
    }

    #[tokio::test]
    async fn first_run_loads_empty_policy() {
        let store = PolicyStore::new(Arc::new(InMemoryStore::new()), DEFAULT_NAMESPACE);
        let loaded = store.load().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = PolicyStore::new(Arc::new(InMemoryStore::new()), DEFAULT_NAMESPACE);
        let policy = sets(&["AA:BB"], &["11:22", "33:44"]);
        store.save(&policy).await.unwrap();
        assert_eq!(store.load().await.unwrap(), policy);
    }

    #[tokio::test]
    async fn load_then_save_is_byte_identical() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.json");
        let store = PolicyStore::new(Arc::new(FileStore::new(&path)), DEFAULT_NAMESPACE);

        store
            .save(&sets(&["CC:DD", "AA:BB"], &["11:22"]))
            .await
            .unwrap();
        let before = std::fs::read(&path).unwrap();

        let loaded = store.load().await.unwrap();
        store.save(&loaded).await.unwrap();
        let after = std::fs::read(&path).unwrap();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn initialized_once_any_key_written() {
        let store = PolicyStore::new(Arc::new(InMemoryStore::new()), DEFAULT_NAMESPACE);
        assert!(!store.is_initialized().await.unwrap());

        store.save(&PolicySets::default()).await.unwrap();
        assert!(store.is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn health_follows_file_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.json");
        let store = PolicyStore::new(Arc::new(FileStore::new(&path)), DEFAULT_NAMESPACE);
        assert!(store.health_check().await);

        std::fs::write(&path, b"{ not json").unwrap();
        assert!(!store.health_check().await);
    }

    #[tokio::test]
    async fn blank_entries_are_dropped() {
        let backend = Arc::new(InMemoryStore::new());
        let raw: StringSet = ["AA:BB".to_string(), "   ".to_string()].into_iter().collect();
        backend
            .put_string_sets(DEFAULT_NAMESPACE, &[(TRUSTED_KEY, raw)])
            .await
            .unwrap();

        let store = PolicyStore::new(backend, DEFAULT_NAMESPACE);
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.trusted.len(), 1);
        assert!(loaded.blocked.is_empty());
    }

    #[tokio::test]
    async fn hand_edited_entries_are_normalized_on_save() {
        let backend = Arc::new(InMemoryStore::new());
        let raw: StringSet = [" AA:BB".to_string(), String::new()].into_iter().collect();
        backend
            .put_string_sets(DEFAULT_NAMESPACE, &[(TRUSTED_KEY, raw)])
            .await
            .unwrap();

        let store = PolicyStore::new(backend.clone(), DEFAULT_NAMESPACE);
        let loaded = store.load().await.unwrap();
        store.save(&loaded).await.unwrap();

        let written = backend
            .get_string_set(DEFAULT_NAMESPACE, TRUSTED_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written.into_iter().collect::<Vec<_>>(), vec!["AA:BB".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_backend_reports_unavailable() {
        let store = PolicyStore::new(Arc::new(OfflineStore), DEFAULT_NAMESPACE);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, PolicyError::Unavailable { .. }));
        assert!(err.to_string().contains("disk not mounted"));
    }

    #[tokio::test]
    async fn failed_save_reports_write_error() {
        let store = PolicyStore::new(Arc::new(OfflineStore), DEFAULT_NAMESPACE);
        let err = store.save(&PolicySets::default()).await.unwrap_err();
        assert!(matches!(err, PolicyError::Write { .. }));
        assert!(err.to_string().contains("offline"));
    }
}
