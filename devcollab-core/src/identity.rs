use crate::github::GithubClient;
use crate::models::Identity;

/// Turns a provider token into an `Identity` via `GET /user`.
///
/// The lookup happens at most once per enricher. A failure leaves the identity
/// unset and is only logged.
pub struct IdentityEnricher {
    client: GithubClient,
    attempted: bool,
    identity: Option<Identity>,
}

impl IdentityEnricher {
    pub fn new(client: GithubClient) -> Self {
        Self {
            client,
            attempted: false,
            identity: None,
        }
    }

    pub async fn enrich(&mut self, provider_token: &str) -> Option<&Identity> {
        if !self.attempted {
            self.attempted = true;
            match self.client.current_user(provider_token).await {
                Ok(user) => {
                    tracing::info!(login = %user.login, "Identity resolved");
                    self.identity = Some(user.into());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Identity lookup failed, continuing without identity");
                }
            }
        }
        self.identity.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GithubConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_enrich_maps_profile_and_runs_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 583231,
                "login": "octocat",
                "avatar_url": "https://avatars.githubusercontent.com/u/583231"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GithubClient::with_base_url(GithubConfig::default(), server.uri()).unwrap();
        let mut enricher = IdentityEnricher::new(client);

        let identity = enricher.enrich("gho_1").await.cloned().unwrap();
        assert_eq!(identity.id, "583231");
        assert_eq!(identity.display_name, "octocat");
        assert_eq!(
            identity.avatar_url,
            "https://avatars.githubusercontent.com/u/583231"
        );

        // a rotated token does not trigger a second lookup
        assert!(enricher.enrich("gho_2").await.is_some());
    }

    #[tokio::test]
    async fn test_enrich_failure_is_silent_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "message": "Bad credentials"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GithubClient::with_base_url(GithubConfig::default(), server.uri()).unwrap();
        let mut enricher = IdentityEnricher::new(client);

        assert!(enricher.enrich("bad").await.is_none());
        assert!(enricher.enrich("bad").await.is_none());
        assert!(enricher.identity().is_none());
    }
}
