use super::traits::{KeyValueStore, StringSet};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<(String, String), StringSet>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_string_set(
        &self,
        namespace: &str,
        key: &str,
    ) -> anyhow::Result<Option<StringSet>> {
        let data = self.data.read();
        Ok(data
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put_string_sets(
        &self,
        namespace: &str,
        entries: &[(&str, StringSet)],
    ) -> anyhow::Result<()> {
        let mut data = self.data.write();
        for (key, values) in entries {
            data.insert((namespace.to_string(), (*key).to_string()), values.clone());
        }
        Ok(())
    }
}
