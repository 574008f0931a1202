// Local control socket.
//
// One JSON request per line in, one JSON response per line out. While the
// daemon holds the store lock, management commands and prompt answers from
// other processes reach its engine through here.

use crate::device::{Classification, DeviceIdentity};
use crate::engine::{parse_identity, DeviceLists, EngineError, PendingPromptInfo, TrustEngine};
use crate::prompt::Decision;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;

const SOCKET_MODE: u32 = 0o600;
const MAX_REQUEST_BYTES: u64 = 16 * 1024;
const IO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    List,
    Pending,
    Check { identity: String },
    Trust { identity: String },
    Block { identity: String },
    Untrust { identity: String },
    Unblock { identity: String },
    Resolve { identity: String, decision: Decision },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    /// Human-readable result, ready to print
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ControlResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: None,
        }
    }

    fn with_data(message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            ..Self::ok(message)
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Run one request against the engine. Engine errors become `ok: false`.
pub async fn dispatch(engine: &TrustEngine, request: ControlRequest) -> ControlResponse {
    match execute(engine, request).await {
        Ok(response) => response,
        Err(e) => ControlResponse::error(e.to_string()),
    }
}

async fn execute(
    engine: &TrustEngine,
    request: ControlRequest,
) -> Result<ControlResponse, EngineError> {
    match request {
        ControlRequest::List => {
            let lists = engine.get_lists().await;
            Ok(ControlResponse::with_data(render_lists(&lists), &lists))
        }
        ControlRequest::Pending => {
            let prompts = engine.pending_prompts().await;
            Ok(ControlResponse::with_data(render_pending(&prompts), &prompts))
        }
        ControlRequest::Check { identity } => {
            let id = parse_identity(&identity)?;
            let current = engine.classification(&id).await;
            Ok(ControlResponse::ok(format!("{id}: {current}")))
        }
        ControlRequest::Trust { identity } => {
            let id = parse_identity(&identity)?;
            let previous = engine.trust(&id).await?;
            Ok(ControlResponse::ok(describe_change(&id, previous, Classification::Trusted)))
        }
        ControlRequest::Block { identity } => {
            let id = parse_identity(&identity)?;
            let previous = engine.block(&id).await?;
            Ok(ControlResponse::ok(describe_change(&id, previous, Classification::Blocked)))
        }
        ControlRequest::Untrust { identity } => {
            let id = parse_identity(&identity)?;
            let previous = engine.remove_trusted(&id).await?;
            Ok(ControlResponse::ok(describe_removal(&id, previous, Classification::Trusted)))
        }
        ControlRequest::Unblock { identity } => {
            let id = parse_identity(&identity)?;
            let previous = engine.remove_blocked(&id).await?;
            Ok(ControlResponse::ok(describe_removal(&id, previous, Classification::Blocked)))
        }
        ControlRequest::Resolve { identity, decision } => {
            let id = parse_identity(&identity)?;
            let outcome = engine.resolve_prompt(&id, decision).await?;
            let mut message = format!(
                "{}: {} ({} → {})",
                outcome.identity, outcome.decision, outcome.previous, outcome.current
            );
            if let Some(e) = outcome.cancel_error {
                message.push_str(&format!("; bonding not cancelled: {e}"));
            }
            Ok(ControlResponse::ok(message))
        }
    }
}

pub fn render_lists(lists: &DeviceLists) -> String {
    let mut out = String::new();
    for (title, entries) in [("Trusted", &lists.trusted), ("Blocked", &lists.blocked)] {
        out.push_str(&format!("{title} ({}):\n", entries.len()));
        if entries.is_empty() {
            out.push_str("   (none)\n");
        }
        for entry in entries {
            let marker = if entry.is_connected { "●" } else { " " };
            out.push_str(&format!("   {marker} {:<24} {}\n", entry.name, entry.identity));
        }
    }
    out.truncate(out.trim_end().len());
    out
}

pub fn render_pending(prompts: &[PendingPromptInfo]) -> String {
    if prompts.is_empty() {
        return "No open prompts".into();
    }
    let mut out = format!("Open prompts ({}):", prompts.len());
    for prompt in prompts {
        out.push_str(&format!(
            "\n   {:<24} {}  since {}",
            prompt.name, prompt.identity, prompt.opened_at
        ));
        if prompt.repeats > 0 {
            out.push_str(&format!("  (+{} repeats)", prompt.repeats));
        }
        if prompt.unverified {
            out.push_str("  [unverified]");
        }
    }
    out
}

fn describe_change(id: &DeviceIdentity, previous: Classification, now: Classification) -> String {
    if previous == now {
        format!("{id} was already {now}")
    } else {
        format!("{id}: {previous} → {now}")
    }
}

fn describe_removal(id: &DeviceIdentity, previous: Classification, list: Classification) -> String {
    if previous == list {
        format!("{id}: {previous} → {}", Classification::Unclassified)
    } else {
        format!("{id} is not {list} (currently {previous})")
    }
}

/// Bind the control socket, replacing a stale one. Callers hold the store
/// lock, so no live daemon owns the old path.
pub fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            anyhow::bail!("Control socket path {} is a symlink; refusing", path.display());
        }
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind control socket {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("Failed to restrict {}", path.display()))?;
    Ok(listener)
}

/// Accept clients until the task is aborted.
pub async fn serve(listener: UnixListener, engine: TrustEngine) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Control socket accept failed")?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, &engine).await {
                tracing::debug!("Control client dropped: {e:#}");
            }
        });
    }
}

async fn handle_client(stream: UnixStream, engine: &TrustEngine) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader.take(MAX_REQUEST_BYTES)).lines();

    while let Some(line) = timeout(IO_TIMEOUT, lines.next_line())
        .await
        .context("Control client timed out")?
        .context("Failed to read control request")?
    {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => {
                tracing::debug!(?request, "Control request");
                dispatch(engine, request).await
            }
            Err(e) => ControlResponse::error(format!("invalid request: {e}")),
        };

        let mut out = serde_json::to_vec(&response).context("Failed to encode response")?;
        out.push(b'\n');
        timeout(IO_TIMEOUT, writer.write_all(&out))
            .await
            .context("Control client timed out")??;
    }
    Ok(())
}

/// Send one request to a running daemon and wait for its answer.
pub async fn send(path: &Path, request: &ControlRequest) -> anyhow::Result<ControlResponse> {
    let stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("Failed to connect to daemon at {}", path.display()))?;
    let (reader, mut writer) = stream.into_split();

    let mut line = serde_json::to_vec(request).context("Failed to encode request")?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .context("Failed to send request")?;
    writer.shutdown().await.context("Failed to send request")?;

    let reply = timeout(IO_TIMEOUT, BufReader::new(reader).lines().next_line())
        .await
        .context("Daemon did not answer in time")?
        .context("Failed to read daemon reply")?
        .ok_or_else(|| anyhow::anyhow!("Daemon closed the connection without answering"))?;
    serde_json::from_str(&reply).context("Failed to parse daemon reply")
}
