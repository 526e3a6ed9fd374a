//! Transient report files: written once per run, attached, then removed.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("{action} {}: {source}", .path.display())]
pub struct StoreError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl StoreError {
    fn new(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredReport {
    pub path: PathBuf,
    pub sha256: String,
    pub byte_size: usize,
}

#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Write the report through a temp file and rename, so a reader never sees
    /// a half-written file under the final name.
    pub async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<StoredReport, StoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::new("creating report directory", &self.dir, e))?;

        let path = self.dir.join(file_name);
        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|e| StoreError::new("opening temp report file", &temp_path, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StoreError::new("writing temp report file", &temp_path, e))?;
        file.flush()
            .await
            .map_err(|e| StoreError::new("flushing temp report file", &temp_path, e))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::new("renaming temp report into", &path, err));
        }

        Ok(StoredReport {
            path,
            sha256: Self::sha256_hex(bytes),
            byte_size: bytes.len(),
        })
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        fs::read(path)
            .await
            .map_err(|e| StoreError::new("reading report", path, e))
    }

    pub async fn remove(&self, path: &Path) -> Result<(), StoreError> {
        fs::remove_file(path)
            .await
            .map_err(|e| StoreError::new("deleting report", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn stored_digest_matches_the_written_bytes() {
        let dir = tempdir().expect("tempdir");
        let store = ReportStore::new(dir.path());
        let header = b"Name,Email,Title,Department,Manager,ManagerEmail,Status\n";

        let stored = store.write("header_only.csv", header).await.expect("write");
        assert_eq!(
            stored.sha256,
            "355d1f22f894a054c1a30eacbabd514df3198e8e32e5957c8455c532c804a4b5"
        );
        assert_eq!(
            ReportStore::sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn write_read_remove_cycle() {
        let dir = tempdir().expect("tempdir");
        let store = ReportStore::new(dir.path().join("reports"));

        let stored = store
            .write("profile_updates.csv", b"Name,Status\n")
            .await
            .expect("write");
        assert_eq!(stored.path, dir.path().join("reports/profile_updates.csv"));
        assert_eq!(stored.byte_size, 12);
        assert_eq!(store.read(&stored.path).await.expect("read"), b"Name,Status\n");

        store.remove(&stored.path).await.expect("remove");
        assert!(!stored.path.exists());
        let leftovers = std::fs::read_dir(store.dir()).expect("dir").count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn removing_missing_report_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let store = ReportStore::new(dir.path());
        let err = store
            .remove(&dir.path().join("absent.csv"))
            .await
            .expect_err("missing file");
        assert_eq!(err.action, "deleting report");
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }
}
