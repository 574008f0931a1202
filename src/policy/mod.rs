pub mod atomic_write;
pub mod file;
pub mod memory;
pub mod store;
pub mod traits;

pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{PolicyError, PolicySets, PolicyStore, DEFAULT_NAMESPACE};
pub use traits::{KeyValueStore, StringSet};

use crate::config::StoreConfig;
use std::path::Path;
use std::sync::Arc;

/// Factory: create the key-value backend named in config.
pub fn create_backend(config: &StoreConfig, default_dir: &Path) -> Arc<dyn KeyValueStore> {
    match config.backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new()),
        "file" => Arc::new(FileStore::new(config.resolve_path(default_dir))),
        other => {
            tracing::warn!("Unknown store backend '{other}', falling back to file");
            Arc::new(FileStore::new(config.resolve_path(default_dir)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(backend: &str) -> StoreConfig {
        StoreConfig {
            backend: backend.into(),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn factory_memory() {
        assert_eq!(create_backend(&cfg("memory"), Path::new("/tmp")).name(), "memory");
    }

    #[test]
    fn factory_file() {
        assert_eq!(create_backend(&cfg("file"), Path::new("/tmp")).name(), "file");
    }

    #[test]
    fn factory_unknown_falls_back_to_file() {
        assert_eq!(create_backend(&cfg("sqlite"), Path::new("/tmp")).name(), "file");
    }
}
