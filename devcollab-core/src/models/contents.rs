use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    File,
    Dir,
    Symlink,
    Submodule,
}

/// One row of a directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntry {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub name: String,
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub size: u64,
}

/// A single file, with `content` already decoded from the transport encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub content: String,
}

/// `GET /repos/{owner}/{repo}/contents[/{path}]` answers with either shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Contents {
    Directory { entries: Vec<ContentEntry> },
    File(FileContent),
}

/// Body of `PUT /repos/{owner}/{repo}/contents/{path}`. `content` is already
/// base64; `sha` is the blob sha of the version being replaced.
#[derive(Debug, Clone, Serialize)]
pub struct FileUpdate {
    pub message: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

/// What a successful write hands back.
#[derive(Debug, Clone, Serialize)]
pub struct WriteResult {
    pub content_sha: String,
    pub commit_sha: String,
}
