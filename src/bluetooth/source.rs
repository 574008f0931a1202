// JSON-lines pairing notification source.
//
// Each input line is one notification: {"identity": "...", "name": "..."}.
// An external bridge (a BlueZ agent, a test harness) writes lines to stdin,
// to a FIFO or appends them to a regular file. Unparseable lines are
// forwarded as malformed notifications so the engine logs and drops them the
// same way it drops any unusable event.
//
// A regular file is followed like `tail -f`. The read offset lives in the
// source, so a restarted `listen` resumes after the last delivered line.

use super::traits::{PairingNotification, PairingSource};
use anyhow::Context;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;

const FOLLOW_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    Stdin,
    Path(PathBuf),
}

pub struct JsonLinesSource {
    input: SourceInput,
    poll_interval: Duration,
    // bytes of the followed file already delivered
    offset: AtomicU64,
}

impl JsonLinesSource {
    pub fn new(input: SourceInput) -> Self {
        Self {
            input,
            poll_interval: FOLLOW_POLL,
            offset: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Deliver complete lines appended to a regular file, starting at the
    /// remembered offset. Returns only when the inbox is gone.
    async fn follow_file(
        &self,
        path: &Path,
        tx: &mpsc::Sender<PairingNotification>,
    ) -> anyhow::Result<()> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();

        let mut offset = self.offset.load(Ordering::Relaxed);
        if offset > len {
            tracing::info!(path = %path.display(), "Notification file shrank; reading from the start");
            offset = 0;
            self.offset.store(0, Ordering::Relaxed);
        }
        file.seek(SeekFrom::Start(offset))
            .await
            .context("Failed to seek notification file")?;

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            let read = reader
                .read_line(&mut line)
                .await
                .context("Failed to read notification")?;
            // partial lines stay buffered until their newline arrives
            if read == 0 || !line.ends_with('\n') {
                if tx.is_closed() {
                    return Ok(());
                }
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            offset += line.len() as u64;
            self.offset.store(offset, Ordering::Relaxed);
            if let Some(notification) = parse_line(&line) {
                if tx.send(notification).await.is_err() {
                    tracing::debug!("Engine inbox closed; stopping source");
                    return Ok(());
                }
            }
            line.clear();
        }
    }

    /// Read a FIFO, reopening it each time the writer side closes.
    async fn read_fifo(
        &self,
        path: &Path,
        tx: &mpsc::Sender<PairingNotification>,
    ) -> anyhow::Result<()> {
        loop {
            let fifo = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            pump_lines(BufReader::new(fifo), tx).await?;
            if tx.is_closed() {
                return Ok(());
            }
            tracing::debug!(path = %path.display(), "Notification writer closed; reopening");
        }
    }
}

/// Decodes one line. Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<PairingNotification> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<PairingNotification>(line) {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::debug!("Unparseable pairing notification: {e}");
            Some(PairingNotification::malformed())
        }
    }
}

/// Forwards every line of `reader` into `tx`. Returns when input ends or the
/// receiver is gone.
pub async fn pump_lines<R>(reader: R, tx: &mpsc::Sender<PairingNotification>) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read notification")? {
        if let Some(notification) = parse_line(&line) {
            if tx.send(notification).await.is_err() {
                tracing::debug!("Engine inbox closed; stopping source");
                return Ok(());
            }
        }
    }
    Ok(())
}

#[async_trait]
impl PairingSource for JsonLinesSource {
    fn name(&self) -> &str {
        match self.input {
            SourceInput::Stdin => "stdin",
            SourceInput::Path(_) => "file",
        }
    }

    async fn listen(&self, tx: mpsc::Sender<PairingNotification>) -> anyhow::Result<()> {
        match &self.input {
            SourceInput::Stdin => {
                pump_lines(BufReader::new(tokio::io::stdin()), &tx).await?;
                tracing::info!("Notification input on stdin ended");
                Ok(())
            }
            SourceInput::Path(path) => {
                let meta = tokio::fs::metadata(path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                if meta.is_file() {
                    self.follow_file(path, &tx).await
                } else {
                    self.read_fifo(path, &tx).await
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn garbage_becomes_malformed() {
        assert_eq!(parse_line("not json"), Some(PairingNotification::malformed()));
    }

    #[test]
    fn parses_identity_and_name() {
        let n = parse_line(r#"{"identity":"AA:BB","name":"Watch"}"#).unwrap();
        assert_eq!(n.identity.as_deref(), Some("AA:BB"));
        assert_eq!(n.display_name.as_deref(), Some("Watch"));
    }

    #[tokio::test]
    async fn pumps_all_lines_in_order() {
        let input = b"{\"identity\":\"A\"}\n\n{\"identity\":\"B\"}\n" as &[u8];
        let (tx, mut rx) = mpsc::channel(8);
        pump_lines(input, &tx).await.unwrap();
        drop(tx);

        let mut seen = Vec::new();
        while let Some(n) = rx.recv().await {
            seen.push(n.identity.unwrap());
        }
        assert_eq!(seen, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn closed_inbox_stops_quietly() {
        let input = b"{\"identity\":\"A\"}\n{\"identity\":\"B\"}\n" as &[u8];
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(pump_lines(input, &tx).await.is_ok());
    }

    async fn next(rx: &mut mpsc::Receiver<PairingNotification>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .identity
            .unwrap()
    }

    fn append(path: &Path, text: &str) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn file_source_follows_appended_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        std::fs::write(&path, "{\"address\":\"11:22\"}\n").unwrap();

        let source = Arc::new(
            JsonLinesSource::new(SourceInput::Path(path.clone()))
                .with_poll_interval(Duration::from_millis(10)),
        );
        assert_eq!(source.name(), "file");
        let (tx, mut rx) = mpsc::channel(4);
        let task = {
            let source = source.clone();
            tokio::spawn(async move { source.listen(tx).await })
        };

        assert_eq!(next(&mut rx).await, "11:22");
        append(&path, "{\"identity\":\"33:");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        append(&path, "44\"}\n");
        assert_eq!(next(&mut rx).await, "33:44");

        drop(rx);
        let result = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap();
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn restarted_file_source_does_not_replay() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        std::fs::write(&path, "{\"identity\":\"AA:BB\"}\n").unwrap();
        let source = Arc::new(
            JsonLinesSource::new(SourceInput::Path(path.clone()))
                .with_poll_interval(Duration::from_millis(10)),
        );

        for expected in ["AA:BB", "CC:DD"] {
            let (tx, mut rx) = mpsc::channel(4);
            let task = {
                let source = source.clone();
                tokio::spawn(async move { source.listen(tx).await })
            };
            assert_eq!(next(&mut rx).await, expected);
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(rx.try_recv().is_err());
            task.abort();
            let _ = task.await;
            append(&path, "{\"identity\":\"CC:DD\"}\n");
        }
    }

    #[tokio::test]
    async fn truncated_file_is_read_from_the_start() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        std::fs::write(&path, "{\"identity\":\"AA:BB\"}\n{\"identity\":\"CC:DD\"}\n").unwrap();
        let source = JsonLinesSource::new(SourceInput::Path(path.clone()));
        source.offset.store(1024, Ordering::Relaxed);

        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(async move { source.listen(tx).await });
        assert_eq!(next(&mut rx).await, "AA:BB");
        assert_eq!(next(&mut rx).await, "CC:DD");
        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn missing_path_is_error() {
        let source = JsonLinesSource::new(SourceInput::Path("/nonexistent/events".into()));
        let (tx, _rx) = mpsc::channel(1);
        assert!(source.listen(tx).await.is_err());
    }
}
