use std::path::Path;

use serde::Serialize;
use taskforge_types::OrchestratorError;
use tokio::fs;

/// Write-to-temp-then-rename: the same discipline the rest of this codebase
/// uses for guarded file installs, generalised from whole-directory copy to
/// a single-file write. The temp file lives next to the target so the
/// rename stays within one filesystem (no cross-device rename failures).
pub async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), OrchestratorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let text = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension(format!(
        "{}.tmp-{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json"),
        std::process::id()
    ));
    fs::write(&tmp_path, format!("{text}\n")).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, OrchestratorError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        value: u32,
    }

    #[tokio::test]
    async fn round_trip_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let sample = Sample { value: 42 };
        atomic_write_json(&path, &sample).await.unwrap();
        let loaded: Sample = read_json(&path).await.unwrap().unwrap();
        assert_eq!(sample, loaded);
    }

    #[tokio::test]
    async fn no_leftover_temp_file_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        atomic_write_json(&path, &Sample { value: 1 }).await.unwrap();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert_eq!(entry.file_name().to_string_lossy(), "sample.json");
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
