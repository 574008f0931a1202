// JSON-file key-value backend.
//
// The whole store is one document `{ namespace: { key: [values...] } }`.
// Maps and sets are ordered, so serializing an unchanged document reproduces
// the same bytes. Writes go through `atomic_write`, so a concurrent reader
// sees either the old or the new document.

use super::atomic_write::atomic_write_async;
use super::traits::{KeyValueStore, StringSet};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::Mutex;

type Document = BTreeMap<String, BTreeMap<String, StringSet>>;

pub struct FileStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_document(&self) -> anyhow::Result<Document> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Document::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Corrupt policy file: {}", self.path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read policy file: {}", self.path.display())),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_string_set(
        &self,
        namespace: &str,
        key: &str,
    ) -> anyhow::Result<Option<StringSet>> {
        let doc = self.read_document().await?;
        Ok(doc.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn put_string_sets(
        &self,
        namespace: &str,
        entries: &[(&str, StringSet)],
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut doc = self.read_document().await?;
        let ns = doc.entry(namespace.to_string()).or_default();
        for (key, values) in entries {
            ns.insert((*key).to_string(), values.clone());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create policy directory: {}", parent.display())
                })?;
            }
        }

        let mut data = serde_json::to_vec_pretty(&doc).context("Failed to encode policy")?;
        data.push(b'\n');
        atomic_write_async(&self.path, data).await
    }

    async fn health_check(&self) -> bool {
        self.read_document().await.is_ok()
    }
}
