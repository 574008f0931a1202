use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = ".pairguard";
const CONFIG_FILE_NAME: &str = "config.toml";
const POLICY_FILE_NAME: &str = "policy.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where this config was loaded from; the directory also holds runtime
    /// files (lock, state snapshot, default policy file).
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub adapter: AdapterConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub prompt: PromptConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: default_config_dir().join(CONFIG_FILE_NAME),
            log: LogConfig::default(),
            store: StoreConfig::default(),
            engine: EngineConfig::default(),
            adapter: AdapterConfig::default(),
            source: SourceConfig::default(),
            prompt: PromptConfig::default(),
            observability: ObservabilityConfig::default(),
            reliability: ReliabilityConfig::default(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    UserDirs::new().map_or_else(
        || PathBuf::from(CONFIG_DIR_NAME),
        |dirs| dirs.home_dir().join(CONFIG_DIR_NAME),
    )
}

impl Config {
    /// Loads `path` (or the default location), writing a default config
    /// there first if none exists.
    pub fn load_or_init(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned()),
            None => default_config_dir().join(CONFIG_FILE_NAME),
        };

        if !config_path.exists() {
            let config = Self {
                config_path: config_path.clone(),
                ..Self::default()
            };
            config.save()?;
            tracing::info!("Wrote default config to {}", config_path.display());
            return Ok(config);
        }

        let text = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
        let mut config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", config_path.display()))?;
        config.config_path = config_path;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("Failed to encode config")?;
        std::fs::write(&self.config_path, text)
            .with_context(|| format!("Failed to write config: {}", self.config_path.display()))
    }

    /// Refuse a daemon setup where the notification reader and the
    /// interactive menu would both read the same terminal.
    pub fn check_terminal_sharing(&self, stdin_is_terminal: bool) -> Result<()> {
        if stdin_is_terminal && self.source.reads_stdin() && self.prompt.backend == "interactive" {
            anyhow::bail!(
                "{}",
                crate::health::structured_error(
                    "Notification input and prompt menu share the terminal",
                    "source.backend reads stdin while prompt.backend = \"interactive\"",
                    "pipe notifications in (bridge | pairguard daemon), set source.backend = \"file\", \
                     or set prompt.backend = \"external\" and answer with `pairguard resolve`"
                )
            );
        }
        Ok(())
    }

    /// Directory holding the config and runtime files.
    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// trace | debug | info | warn | error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "file" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// Policy file; defaults to `policy.json` next to the config.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_store_backend() -> String {
    "file".into()
}

fn default_namespace() -> String {
    crate::policy::DEFAULT_NAMESPACE.into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
            namespace: default_namespace(),
        }
    }
}

impl StoreConfig {
    pub fn resolve_path(&self, default_dir: &Path) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).into_owned()),
            None => default_dir.join(POLICY_FILE_NAME),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Enroll devices the OS already bonded with as trusted at startup.
    #[serde(default = "default_true")]
    pub seed_bonded_as_trusted: bool,
    /// Repeat attempts within this window count as the same pairing session.
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_secs: u64,
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_duplicate_window() -> u64 {
    10
}

fn default_inbox_capacity() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed_bonded_as_trusted: true,
            duplicate_window_secs: default_duplicate_window(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// "bluetoothctl" or "none"
    #[serde(default = "default_adapter_backend")]
    pub backend: String,
    #[serde(default = "default_bluetoothctl_path")]
    pub bluetoothctl_path: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_adapter_backend() -> String {
    "bluetoothctl".into()
}

fn default_bluetoothctl_path() -> String {
    "bluetoothctl".into()
}

fn default_command_timeout() -> u64 {
    5
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            backend: default_adapter_backend(),
            bluetoothctl_path: default_bluetoothctl_path(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// "stdin" or "file" (a regular file or FIFO at `path`)
    #[serde(default = "default_source_backend")]
    pub backend: String,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_source_backend() -> String {
    "stdin".into()
}

impl SourceConfig {
    /// Whether the source ends up on stdin, including the fallbacks for an
    /// unknown backend or a file backend without a path.
    pub fn reads_stdin(&self) -> bool {
        !(self.backend == "file" && self.path.is_some())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            backend: default_source_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// "interactive", "trust", "block", "ignore" or "external"
    #[serde(default = "default_prompt_backend")]
    pub backend: String,
}

fn default_prompt_backend() -> String {
    "interactive".into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            backend: default_prompt_backend(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// "log" or "none"
    #[serde(default = "default_observability_backend")]
    pub backend: String,
}

fn default_observability_backend() -> String {
    "log".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            backend: default_observability_backend(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_initial_backoff")]
    pub source_initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub source_max_backoff_secs: u64,
    #[serde(default = "default_status_flush")]
    pub status_flush_secs: u64,
}

fn default_initial_backoff() -> u64 {
    2
}

fn default_max_backoff() -> u64 {
    60
}

fn default_status_flush() -> u64 {
    5
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            source_initial_backoff_secs: default_initial_backoff(),
            source_max_backoff_secs: default_max_backoff(),
            status_flush_secs: default_status_flush(),
        }
    }
}
