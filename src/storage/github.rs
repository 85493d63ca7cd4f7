use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    BackendError, CheckReport, ObjectMetadata, StorageBackend, StoredObject, validate_target_path,
};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com";
const AGENT: &str = "songdrop-uploader";

/// Stores files in a GitHub repository through the contents API.
///
/// Files are served back from `raw.githubusercontent.com`, which streams
/// them with a plain GET.
#[derive(Debug, Clone)]
pub struct GitHubBackend {
    client: Client,
    token: String,
    owner: String,
    repo: String,
    branch: String,
    api_base: String,
    raw_base: String,
}

impl GitHubBackend {
    pub const DEFAULT_REPO: &'static str = "tws-music-storage";
    pub const DEFAULT_BRANCH: &'static str = "main";

    pub fn new(client: Client, token: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
            owner: owner.into(),
            repo: Self::DEFAULT_REPO.to_owned(),
            branch: Self::DEFAULT_BRANCH.to_owned(),
            api_base: DEFAULT_API_BASE.to_owned(),
            raw_base: DEFAULT_RAW_BASE.to_owned(),
        }
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = repo.into();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Point API calls elsewhere, e.g. at GitHub Enterprise.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo,
            path
        )
    }

    pub fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    /// Public streaming URL of a stored file.
    pub fn raw_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.raw_base, self.owner, self.repo, self.branch, path
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(USER_AGENT, AGENT)
            .header(ACCEPT, "application/vnd.github+json")
    }

    fn hint(&self, status: u16, message: &str) -> Option<String> {
        let lower = message.to_ascii_lowercase();
        if status == 401 || status == 403 || lower.contains("bad credentials") {
            Some("Generate a new token with \"repo\" scope at https://github.com/settings/tokens".into())
        } else if status == 404 || lower.contains("not found") {
            Some(format!(
                "Make sure the repository {}/{} exists",
                self.owner, self.repo
            ))
        } else if status == 413 || lower.contains("large") {
            Some("Use MP3 files under 100MB".into())
        } else if lower.contains("sha") {
            Some("A song with this short name already exists; pick another name".into())
        } else {
            None
        }
    }
}

#[derive(Serialize)]
struct PutContents<'a> {
    message: String,
    content: String,
    branch: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ContentsReply {
    message: Option<String>,
    content: Option<ContentInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentInfo {
    html_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RepoReply {
    message: Option<String>,
    html_url: Option<String>,
    permissions: Option<RepoPermissions>,
}

#[derive(Debug, Default, Deserialize)]
struct RepoPermissions {
    #[serde(default)]
    push: bool,
}

#[async_trait]
impl StorageBackend for GitHubBackend {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn store(
        &self,
        target_path: &str,
        bytes: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<StoredObject, BackendError> {
        validate_target_path(target_path)?;

        let url = self.contents_url(target_path);
        debug!(%url, size = bytes.len(), "uploading to GitHub");

        let payload = PutContents {
            message: format!("Upload: {} by {}", metadata.title, metadata.creator),
            content: STANDARD.encode(bytes),
            branch: &self.branch,
        };

        let response = self
            .authorized(self.client.put(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                backend: self.name(),
                source,
            })?;

        let status = response.status();
        let reply: ContentsReply = response.json().await.unwrap_or_default();

        if !status.is_success() {
            let message = reply
                .message
                .unwrap_or_else(|| format!("GitHub upload failed ({status})"));
            return Err(BackendError::Rejected {
                backend: self.name(),
                status: status.as_u16(),
                hint: self.hint(status.as_u16(), &message),
                message,
            });
        }

        let html_url = reply.content.and_then(|c| c.html_url);
        info!(path = target_path, html_url = html_url.as_deref(), "stored on GitHub");

        let stored = StoredObject::new(self.raw_url(target_path));
        Ok(match html_url {
            Some(html_url) => stored.with_page_url(html_url),
            None => stored,
        })
    }

    /// Read the repository and confirm the token may push to it.
    async fn check(&self) -> Result<CheckReport, BackendError> {
        let url = self.repo_url();
        debug!(%url, "checking GitHub access");

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| BackendError::Transport {
                backend: self.name(),
                source,
            })?;

        let status = response.status();
        let reply: RepoReply = response.json().await.unwrap_or_default();
        let repo = format!("{}/{}", self.owner, self.repo);

        let (ok, message, hint) = if !status.is_success() {
            let message = reply
                .message
                .unwrap_or_else(|| format!("GitHub answered {status}"));
            let hint = self.hint(status.as_u16(), &message);
            (false, message, hint)
        } else if reply.permissions.is_some_and(|p| !p.push) {
            (
                false,
                format!("token cannot push to {repo}"),
                Some("Give the token write access to the repository".to_owned()),
            )
        } else {
            (true, format!("{repo} is reachable and writable"), None)
        };

        Ok(CheckReport {
            backend: self.name(),
            ok,
            status: Some(status.as_u16()),
            message,
            hint,
            test_url: reply.html_url,
        })
    }
}
