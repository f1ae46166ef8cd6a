use crate::content::encode_content;
use crate::github::{GithubClient, GithubError};
use crate::models::{FileUpdate, WriteResult};

/// Read-modify-write handle on one repository file.
///
/// A `FileEditor` only exists after a successful read, so every write carries
/// the sha of the most recent read (or of the last successful write).
#[derive(Debug, Clone)]
pub struct FileEditor {
    owner: String,
    repo: String,
    path: String,
    text: String,
    sha: String,
}

impl FileEditor {
    pub async fn open(
        client: &GithubClient,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Self, GithubError> {
        let file = client.get_file(token, owner, repo, path).await?;
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            path: path.to_string(),
            text: file.content,
            sha: file.sha,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Re-read the file, replacing both the text and the held sha.
    pub async fn reload(&mut self, client: &GithubClient, token: &str) -> Result<(), GithubError> {
        let file = client
            .get_file(token, &self.owner, &self.repo, &self.path)
            .await?;
        self.text = file.content;
        self.sha = file.sha;
        Ok(())
    }

    /// Commit `text` on top of the held sha. On failure nothing changes and
    /// nothing is retried.
    pub async fn save(
        &mut self,
        client: &GithubClient,
        token: &str,
        text: &str,
        message: &str,
    ) -> Result<WriteResult, GithubError> {
        let update = FileUpdate {
            message: message.to_string(),
            content: encode_content(text),
            sha: Some(self.sha.clone()),
        };
        let result = client
            .put_contents(token, &self.owner, &self.repo, &self.path, &update)
            .await?;
        self.text = text.to_string();
        self.sha = result.content_sha.clone();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GithubConfig;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn file_body(sha: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "file",
            "name": "notes.md",
            "path": "docs/notes.md",
            "sha": sha,
            "content": encode_content(text)
        })
    }

    fn put_ok(content_sha: &str) -> ResponseTemplate {
        ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "content": { "sha": content_sha },
            "commit": { "sha": format!("commit-{}", content_sha) }
        }))
    }

    #[tokio::test]
    async fn test_save_uses_sha_of_latest_read() {
        let server = MockServer::start().await;
        let client = GithubClient::with_base_url(GithubConfig::default(), server.uri()).unwrap();

        Mock::given(method("GET"))
            .and(path("/repos/octo/app/contents/docs/notes.md"))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_body("sha-1", "v1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/app/contents/docs/notes.md"))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_body("sha-2", "v2")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(body_partial_json(serde_json::json!({ "sha": "sha-2" })))
            .respond_with(put_ok("sha-3"))
            .expect(1)
            .mount(&server)
            .await;

        let mut editor = FileEditor::open(&client, "t", "octo", "app", "docs/notes.md")
            .await
            .unwrap();
        assert_eq!(editor.sha(), "sha-1");
        assert_eq!(editor.text(), "v1");

        // someone else committed in between; reloading picks up the new sha
        editor.reload(&client, "t").await.unwrap();
        assert_eq!(editor.sha(), "sha-2");

        let result = editor.save(&client, "t", "v3", "edit").await.unwrap();
        assert_eq!(result.content_sha, "sha-3");
        assert_eq!(editor.sha(), "sha-3");
        assert_eq!(editor.text(), "v3");
    }

    #[tokio::test]
    async fn test_consecutive_saves_chain_shas() {
        let server = MockServer::start().await;
        let client = GithubClient::with_base_url(GithubConfig::default(), server.uri()).unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_body("a", "x")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(body_partial_json(serde_json::json!({ "sha": "a" })))
            .respond_with(put_ok("b"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(body_partial_json(serde_json::json!({ "sha": "b" })))
            .respond_with(put_ok("c"))
            .expect(1)
            .mount(&server)
            .await;

        let mut editor = FileEditor::open(&client, "t", "octo", "app", "docs/notes.md")
            .await
            .unwrap();
        editor.save(&client, "t", "y", "first").await.unwrap();
        editor.save(&client, "t", "z", "second").await.unwrap();
        assert_eq!(editor.sha(), "c");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_sha() {
        let server = MockServer::start().await;
        let client = GithubClient::with_base_url(GithubConfig::default(), server.uri()).unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_body("a", "x")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "message": "conflict"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut editor = FileEditor::open(&client, "t", "octo", "app", "docs/notes.md")
            .await
            .unwrap();
        let result = editor.save(&client, "t", "y", "edit").await;
        assert!(matches!(result, Err(GithubError::Conflict { .. })));
        assert_eq!(editor.sha(), "a");
        assert_eq!(editor.text(), "x");
    }
}
