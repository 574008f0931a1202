use crate::bluetooth;
use crate::config::Config;
use crate::control;
use crate::engine::{EngineDeps, EngineSettings, TrustEngine};
use crate::observability;
use crate::policy::{self, PolicyStore};
use crate::prompt;
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use std::fs::File;
use std::future::Future;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Duration;

/// How the engine is being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Long-running: configured responder, bonded-device enrollment.
    Daemon,
    /// One-shot management command: no responder, no enrollment.
    Management,
}

/// Exclusive hold on the policy store. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
    path: PathBuf,
}

impl StoreLock {
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

pub fn policy_path(config: &Config) -> PathBuf {
    config.store.resolve_path(&config.config_dir())
}

/// Lock file sitting next to the policy file.
pub fn lock_file_path(config: &Config) -> PathBuf {
    let policy = policy_path(config);
    let name = policy
        .file_name()
        .map_or_else(|| "policy".into(), |n| n.to_string_lossy().into_owned());
    policy.with_file_name(format!("{name}.lock"))
}

pub fn state_file_path(config: &Config) -> PathBuf {
    config.config_dir().join("daemon_state.json")
}

pub fn control_socket_path(config: &Config) -> PathBuf {
    config.config_dir().join("control.sock")
}

/// Take the single-owner lock on the policy store, or fail if another
/// daemon or management command holds it.
pub fn acquire_lock(config: &Config) -> Result<StoreLock> {
    let path = lock_file_path(config);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(&path).context("Failed to create store lock file")?;
    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "{}",
            crate::health::structured_error(
                "Policy store is in use",
                &format!("another pairguard process holds the lock ({})", path.display()),
                "stop the running daemon with Ctrl+C, then retry"
            )
        )
    })?;
    Ok(StoreLock { _file: file, path })
}

/// Build collaborators from config and start the engine.
pub async fn open_engine(config: &Config, mode: EngineMode) -> TrustEngine {
    let backend = policy::create_backend(&config.store, &config.config_dir());
    let store = PolicyStore::new(backend, config.store.namespace.clone());
    let adapter = bluetooth::create_adapter(&config.adapter).await;
    let observer: Arc<dyn observability::Observer> =
        Arc::from(observability::create_observer(&config.observability));

    let mut settings = EngineSettings::from(&config.engine);
    let responder = match mode {
        EngineMode::Daemon => prompt::create_responder(&config.prompt),
        EngineMode::Management => {
            settings.seed_bonded_as_trusted = false;
            None
        }
    };

    TrustEngine::start(
        EngineDeps {
            store,
            adapter,
            responder,
            observer,
        },
        settings,
    )
    .await
}

pub async fn run(config: Config) -> Result<()> {
    config.check_terminal_sharing(std::io::stdin().is_terminal())?;
    let lock = acquire_lock(&config)?;
    tracing::debug!(lock = %lock.path().display(), "Store lock acquired");

    let initial_backoff = config.reliability.source_initial_backoff_secs.max(1);
    let max_backoff = config
        .reliability
        .source_max_backoff_secs
        .max(initial_backoff);

    crate::health::mark_component_ok("daemon");

    let engine = open_engine(&config, EngineMode::Daemon).await;
    if engine.is_degraded().await {
        tracing::warn!("Policy store unreadable; every attempt will be deferred");
    }

    let (tx, rx) = mpsc::channel(config.engine.inbox_capacity.max(1));

    let mut tasks = JoinSet::new();
    tasks.spawn(run_state_writer(config.clone(), engine.clone()));
    {
        let engine = engine.clone();
        tasks.spawn(async move {
            crate::health::mark_component_ok("engine");
            engine.run_inbox(rx).await;
        });
    }

    {
        let engine = engine.clone();
        tasks.spawn(run_store_recovery(engine, max_backoff));
    }

    let socket = control_socket_path(&config);
    match control::bind(&socket) {
        Ok(listener) => {
            let engine = engine.clone();
            tasks.spawn(async move {
                if let Err(e) = control::serve(listener, engine).await {
                    tracing::error!("Control socket stopped: {e:#}");
                }
            });
        }
        Err(e) => tracing::error!("Control socket unavailable: {e:#}"),
    }

    let pairing_source: Arc<dyn bluetooth::PairingSource> =
        Arc::from(bluetooth::create_source(&config.source));
    let source = spawn_component_supervisor("source", initial_backoff, max_backoff, move || {
        let source = pairing_source.clone();
        let tx = tx.clone();
        async move {
            tracing::info!(source = source.name(), "Listening for pairing notifications");
            source.listen(tx).await
        }
    });

    println!("🔒 pairguard daemon started");
    println!("   Policy:    {}", policy_path(&config).display());
    println!("   Adapter:   {}", config.adapter.backend);
    println!("   Source:    {}", config.source.backend);
    println!("   Prompt:    {}", config.prompt.backend);
    println!("   Control:   {}", socket.display());
    println!("   Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    crate::health::mark_component_error("daemon", "shutdown requested");

    source.abort();
    let abandoned = engine.shutdown().await;
    if abandoned > 0 {
        println!("   {abandoned} open prompt(s) left undecided");
    }

    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    let _ = source.await;

    let _ = std::fs::remove_file(&socket);
    drop(lock);
    Ok(())
}

async fn run_state_writer(config: Config, engine: TrustEngine) {
    let path = state_file_path(&config);
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }

    let flush = config.reliability.status_flush_secs.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(flush));
    loop {
        interval.tick().await;
        let mut json = crate::health::snapshot_json();
        if let Some(obj) = json.as_object_mut() {
            obj.insert(
                "written_at".into(),
                serde_json::json!(Utc::now().to_rfc3339()),
            );
            obj.insert(
                "pending_prompts".into(),
                serde_json::to_value(engine.pending_prompts().await)
                    .unwrap_or(serde_json::Value::Null),
            );
            obj.insert("degraded".into(), serde_json::json!(engine.is_degraded().await));
        }
        let data = serde_json::to_vec_pretty(&json).unwrap_or_else(|_| b"{}".to_vec());
        if let Err(e) = policy::atomic_write::atomic_write_async(&path, data).await {
            tracing::debug!("State file write failed: {e:#}");
        }
    }
}

/// Retry the policy load while the engine is degraded.
async fn run_store_recovery(engine: TrustEngine, every_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(every_secs.max(1)));
    interval.tick().await;
    loop {
        interval.tick().await;
        if engine.is_degraded().await
            && engine.store_healthy().await
            && engine.reload().await.is_ok()
        {
            crate::health::mark_component_ok("daemon");
        }
    }
}

async fn run_supervised_component<F, Fut>(
    name: &'static str,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
    mut run_component: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut backoff = initial_backoff_secs.max(1);
    let max_backoff = max_backoff_secs.max(backoff);

    loop {
        crate::health::mark_component_ok(name);
        match run_component().await {
            Ok(()) => {
                tracing::info!("Daemon component '{name}' finished");
                return;
            }
            Err(e) => {
                crate::health::mark_component_error(name, format!("{e:#}"));
                tracing::error!("Daemon component '{name}' failed: {e:#}");
            }
        }

        crate::health::bump_component_restart(name);
        // +/-25% jitter
        let jitter_bytes = uuid::Uuid::new_v4();
        let raw = u32::from_le_bytes([
            jitter_bytes.as_bytes()[0],
            jitter_bytes.as_bytes()[1],
            jitter_bytes.as_bytes()[2],
            jitter_bytes.as_bytes()[3],
        ]);
        let factor = 0.75 + (f64::from(raw) / f64::from(u32::MAX)) * 0.5;
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let jittered = ((backoff as f64) * factor) as u64;
        tokio::time::sleep(Duration::from_secs(jittered.max(1))).await;
        backoff = backoff.saturating_mul(2).min(max_backoff);
    }
}

fn spawn_component_supervisor<F, Fut>(
    name: &'static str,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
    run_component: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(run_supervised_component(
        name,
        initial_backoff_secs,
        max_backoff_secs,
        run_component,
    ))
}
