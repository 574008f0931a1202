use async_trait::async_trait;
use std::collections::BTreeSet;

/// A string-set value stored under a key.
pub type StringSet = BTreeSet<String>;

/// Durable key-value persistence; implement for any backend.
///
/// Values are string sets grouped under a namespace. Absent keys read as
/// `None`; callers decide what that means (the policy store treats it as an
/// empty set).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Read one string set
    async fn get_string_set(&self, namespace: &str, key: &str)
        -> anyhow::Result<Option<StringSet>>;

    /// Replace several keys in one atomic step. Readers never observe a state
    /// where only some of `entries` were applied.
    async fn put_string_sets(
        &self,
        namespace: &str,
        entries: &[(&str, StringSet)],
    ) -> anyhow::Result<()>;

    /// Health check
    async fn health_check(&self) -> bool {
        true
    }
}
