use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{
    BackendError, CheckReport, ObjectMetadata, StorageBackend, StoredObject, validate_target_path,
};

const CHECK_FILE: &str = ".songdrop-check";

/// Writes files into a local directory served under `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn store(
        &self,
        target_path: &str,
        bytes: &[u8],
        _metadata: &ObjectMetadata,
    ) -> Result<StoredObject, BackendError> {
        validate_target_path(target_path)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let dest = self.root.join(target_path);
        tokio::fs::write(&dest, bytes).await?;

        info!(path = %dest.display(), size = bytes.len(), "stored locally");
        Ok(StoredObject::new(format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            target_path
        )))
    }

    /// Write and remove a marker file in the storage directory.
    async fn check(&self) -> Result<CheckReport, BackendError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let marker = self.root.join(CHECK_FILE);
        tokio::fs::write(&marker, b"ok").await?;
        tokio::fs::remove_file(&marker).await?;

        Ok(CheckReport {
            backend: self.name(),
            ok: true,
            status: None,
            message: format!("{} is writable", self.root.display()),
            hint: None,
            test_url: None,
        })
    }
}
