//! GitHub REST client.
//!
//! Every response body is parsed into an explicit type at this boundary; a
//! body that does not match yields `GithubError::Decode` naming the endpoint.
//! Requests are never retried: a failure is reported once and abandoned.

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::GithubConfig;
use crate::content::decode_content;
use crate::models::{
    ContentEntry, Contents, FileContent, FileUpdate, GithubUser, Repository, WriteResult,
};

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum GithubError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Write to {path} rejected: the file changed since it was read")]
    Conflict { path: String },

    #[error("Unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} is not a regular file")]
    NotAFile { path: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid content encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("File content is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct GithubErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: ShaRef,
    commit: ShaRef,
}

// ============================================================================
// GithubClient
// ============================================================================

/// GitHub never returns more than this many items per page.
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone)]
pub struct GithubClient {
    client: Client,
    config: GithubConfig,
    base_url: String,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Result<Self, GithubError> {
        let base_url = config.api_base.clone();
        Self::with_base_url(config, base_url)
    }

    /// Create a client against a custom API root (GitHub Enterprise, tests).
    pub fn with_base_url(mut config: GithubConfig, base_url: String) -> Result<Self, GithubError> {
        let per_page = config.per_page.clamp(1, MAX_PER_PAGE);
        if per_page != config.per_page {
            tracing::warn!(
                configured = config.per_page,
                using = per_page,
                "github.per_page out of range"
            );
            config.per_page = per_page;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn per_page(&self) -> u32 {
        self.config.per_page
    }

    fn request(&self, method: Method, url: Url, token: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("token {}", token))
            .header(ACCEPT, "application/vnd.github+json")
    }

    fn url(&self, segments: &[&str]) -> Result<Url, GithubError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| GithubError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| GithubError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments.iter().filter(|s| !s.is_empty()));
        Ok(url)
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        endpoint: &str,
    ) -> Result<T, GithubError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<GithubErrorBody>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            tracing::warn!(status = status.as_u16(), endpoint, message = %message, "GitHub API error");
            return Err(GithubError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|source| GithubError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    /// `GET /user`
    pub async fn current_user(&self, token: &str) -> Result<GithubUser, GithubError> {
        let url = self.url(&["user"])?;
        let response = self.request(Method::GET, url, token).send().await?;
        Self::read_json(response, "GET /user").await
    }

    /// `GET /user/repos?per_page=N&page=P`
    pub async fn list_repos_page(
        &self,
        token: &str,
        page: u32,
    ) -> Result<Vec<Repository>, GithubError> {
        let mut url = self.url(&["user", "repos"])?;
        url.query_pairs_mut()
            .append_pair("per_page", &self.config.per_page.to_string())
            .append_pair("page", &page.to_string());
        let response = self.request(Method::GET, url, token).send().await?;
        Self::read_json(response, "GET /user/repos").await
    }

    /// Walk `/user/repos` until a page comes back shorter than `per_page`.
    pub async fn list_all_repos(&self, token: &str) -> Result<Vec<Repository>, GithubError> {
        let per_page = self.config.per_page as usize;
        let mut repos = Vec::new();
        let mut page = 1;

        loop {
            let batch = self.list_repos_page(token, page).await?;
            let fetched = batch.len();
            repos.extend(batch);
            tracing::debug!(page, fetched, total = repos.len(), "Fetched repository page");

            if fetched < per_page {
                break;
            }
            page += 1;
        }

        Ok(repos)
    }

    /// `GET /repos/{owner}/{repo}/contents[/{path}]`
    pub async fn get_contents(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Contents, GithubError> {
        let mut segments = vec!["repos", owner, repo, "contents"];
        segments.extend(path.split('/'));
        let url = self.url(&segments)?;
        let response = self.request(Method::GET, url, token).send().await?;
        let endpoint = "GET /repos/{owner}/{repo}/contents";
        let body: serde_json::Value = Self::read_json(response, endpoint).await?;

        if body.is_array() {
            let entries: Vec<ContentEntry> =
                serde_json::from_value(body).map_err(|source| GithubError::Decode {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            return Ok(Contents::Directory { entries });
        }

        let raw: RawFile = serde_json::from_value(body).map_err(|source| GithubError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let encoded = match (raw.kind.as_str(), raw.content) {
            ("file", Some(c)) => c,
            _ => return Err(GithubError::NotAFile { path: raw.path }),
        };

        Ok(Contents::File(FileContent {
            name: raw.name,
            path: raw.path,
            sha: raw.sha,
            content: decode_content(&encoded)?,
        }))
    }

    /// Fetch a path that must be a regular file.
    pub async fn get_file(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<FileContent, GithubError> {
        match self.get_contents(token, owner, repo, path).await? {
            Contents::File(file) => Ok(file),
            Contents::Directory { .. } => Err(GithubError::NotAFile {
                path: path.to_string(),
            }),
        }
    }

    /// `PUT /repos/{owner}/{repo}/contents/{path}`
    ///
    /// A stale `sha` is answered with 409; that maps to `GithubError::Conflict`.
    pub async fn put_contents(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        update: &FileUpdate,
    ) -> Result<WriteResult, GithubError> {
        let mut segments = vec!["repos", owner, repo, "contents"];
        segments.extend(path.split('/'));
        let url = self.url(&segments)?;
        let response = self
            .request(Method::PUT, url, token)
            .json(update)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            tracing::warn!(owner, repo, path, "GitHub rejected write with stale sha");
            return Err(GithubError::Conflict {
                path: path.to_string(),
            });
        }

        let body: PutResponse =
            Self::read_json(response, "PUT /repos/{owner}/{repo}/contents").await?;
        tracing::info!(owner, repo, path, commit = %body.commit.sha, "Committed file edit");

        Ok(WriteResult {
            content_sha: body.content.sha,
            commit_sha: body.commit.sha,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
