pub mod schema;

pub use schema::{
    AdapterConfig, Config, EngineConfig, LogConfig, ObservabilityConfig, PromptConfig,
    ReliabilityConfig, SourceConfig, StoreConfig,
};
