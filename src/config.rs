//! Server configuration, filled in by the CLI from flags and environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::storage::{GitHubBackend, InternetArchiveBackend, LocalBackend, StorageBackend};
use crate::upload::UploadConfig;

/// Room left in the request body limit for multipart framing and text fields.
pub const FORM_OVERHEAD: usize = 64 * 1024;

const BACKEND_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration errors detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{backend} backend needs {setting}")]
    Missing {
        backend: &'static str,
        setting: &'static str,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Where uploads are stored, with the credentials each host needs.
#[derive(Clone)]
pub enum BackendConfig {
    GitHub {
        token: Option<String>,
        owner: Option<String>,
        repo: String,
        branch: String,
        api_base: Option<String>,
    },
    InternetArchive {
        access_key: Option<String>,
        secret_key: Option<String>,
        endpoint: Option<String>,
    },
    Local {
        root: Option<PathBuf>,
        public_base_url: Option<String>,
    },
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GitHub {
                owner, repo, branch, ..
            } => f
                .debug_struct("GitHub")
                .field("owner", owner)
                .field("repo", repo)
                .field("branch", branch)
                .finish_non_exhaustive(),
            Self::InternetArchive { endpoint, .. } => f
                .debug_struct("InternetArchive")
                .field("endpoint", endpoint)
                .finish_non_exhaustive(),
            Self::Local {
                root,
                public_base_url,
            } => f
                .debug_struct("Local")
                .field("root", root)
                .field("public_base_url", public_base_url)
                .finish(),
        }
    }
}

impl BackendConfig {
    /// Check the required settings and construct the backend.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] names the first absent setting.
    pub fn build(&self) -> Result<Arc<dyn StorageBackend>, ConfigError> {
        match self {
            Self::GitHub {
                token,
                owner,
                repo,
                branch,
                api_base,
            } => {
                let token = require(token, "github", "GITHUB_TOKEN")?;
                let owner = require(owner, "github", "GITHUB_USERNAME")?;
                let mut backend = GitHubBackend::new(http_client()?, token, owner)
                    .with_repo(repo.as_str())
                    .with_branch(branch.as_str());
                if let Some(api_base) = api_base {
                    backend = backend.with_api_base(api_base.as_str());
                }
                Ok(Arc::new(backend))
            }
            Self::InternetArchive {
                access_key,
                secret_key,
                endpoint,
            } => {
                let access_key = require(access_key, "internet-archive", "IA_ACCESS_KEY")?;
                let secret_key = require(secret_key, "internet-archive", "IA_SECRET_KEY")?;
                let mut backend =
                    InternetArchiveBackend::new(http_client()?, access_key, secret_key);
                if let Some(endpoint) = endpoint {
                    backend = backend.with_endpoint(endpoint.as_str());
                }
                Ok(Arc::new(backend))
            }
            Self::Local {
                root,
                public_base_url,
            } => {
                let root = root.clone().ok_or(ConfigError::Missing {
                    backend: "local",
                    setting: "--storage-dir",
                })?;
                let public_base_url = require(public_base_url, "local", "--public-url")?;
                Ok(Arc::new(LocalBackend::new(root, public_base_url)))
            }
        }
    }
}

fn require<'a>(
    value: &'a Option<String>,
    backend: &'static str,
    setting: &'static str,
) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { backend, setting })
}

fn http_client() -> Result<reqwest::Client, ConfigError> {
    Ok(reqwest::Client::builder().timeout(BACKEND_TIMEOUT).build()?)
}

/// Everything `serve` needs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Largest request body read from a client.
    pub max_body_size: usize,
    pub upload: UploadConfig,
    pub backend: BackendConfig,
}

impl ServerConfig {
    /// Derive body limits from the upload file limit.
    pub fn new(listen: SocketAddr, mut upload: UploadConfig, backend: BackendConfig) -> Self {
        let max_body_size = upload.max_file_size.saturating_add(FORM_OVERHEAD);
        upload.multipart.max_bytes = max_body_size;
        Self {
            listen,
            max_body_size,
            upload,
            backend,
        }
    }
}
