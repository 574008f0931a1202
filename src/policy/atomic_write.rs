// Atomic policy file replacement: write a sibling temp file, fsync, rename.
//
// Readers either see the previous document or the new one, never a torn
// write. The temp name is unique per call so two writers racing on the same
// directory cannot clobber each other's temp file.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map_or_else(|| "policy".into(), |n| n.to_string_lossy().into_owned());
    let suffix = uuid::Uuid::new_v4().as_simple().to_string();
    path.with_file_name(format!(".{file_name}.{}.tmp", &suffix[..8]))
}

/// Atomically replaces `path` with `data`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = temp_path_for(path);

    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp file: {}", tmp_path.display()))?;
        file.write_all(data)
            .context("Failed to write data to temp file")?;
        file.sync_all().context("Failed to fsync temp file")?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path).with_context(|| {
        let _ = fs::remove_file(&tmp_path);
        format!(
            "Failed to rename {} -> {}",
            tmp_path.display(),
            path.display()
        )
    })
}

/// Runs [`atomic_write`] on the blocking pool.
pub async fn atomic_write_async(path: &Path, data: Vec<u8>) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || atomic_write(&path, &data))
        .await
        .context("Atomic write task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftover_temps(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[test]
    fn replaces_existing_document() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        atomic_write(&path, b"{\"a\":2}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":2}");
    }

    #[test]
    fn temp_file_is_hidden_sibling() {
        let path = Path::new("/var/lib/pairguard/policy.json");
        let tmp = temp_path_for(path);
        assert_eq!(tmp.parent(), path.parent());
        let name = tmp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".policy.json."));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn no_temp_left_behind() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("policy.json");
        atomic_write(&path, b"data").unwrap();
        assert_eq!(leftover_temps(tmp.path()), 0);
    }

    #[test]
    fn missing_parent_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("no_such_dir").join("policy.json");
        assert!(atomic_write(&path, b"data").is_err());
    }

    #[tokio::test]
    async fn async_variant_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        atomic_write_async(&path, b"{}".to_vec()).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }
}
