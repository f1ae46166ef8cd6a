//! Auth/session boundary.
//!
//! Token issuance and persistence belong to the backend service; this module
//! only consumes it: reading the current session, following change
//! notifications, building the OAuth sign-in URL, and signing out.

use async_trait::async_trait;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::BackendConfig;
use crate::models::Session;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Auth API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Redirect carries no session: {0}")]
    InvalidRedirect(String),

    #[error("No active session")]
    NoSession,

    #[error("Session has no provider access token")]
    MissingProviderToken,
}

#[derive(Debug, Clone)]
pub struct SignInOptions {
    pub redirect_url: String,
    pub scopes: String,
}

/// The external identity/session provider.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Change notifications; dropping the receiver unsubscribes.
    fn on_session_change(&self) -> watch::Receiver<Option<Session>>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    fn sign_in_url(&self, provider: &str, options: &SignInOptions) -> Result<Url, AuthError>;
}

// ============================================================================
// GoTrueSessionProvider
// ============================================================================

/// Session provider backed by the backend service's auth API (`/auth/v1`).
pub struct GoTrueSessionProvider {
    client: Client,
    backend: BackendConfig,
    state: watch::Sender<Option<Session>>,
}

impl GoTrueSessionProvider {
    pub fn new(backend: BackendConfig) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let (state, _) = watch::channel(None);
        Ok(Self {
            client,
            backend,
            state,
        })
    }

    /// Replace the current session and notify subscribers.
    pub fn set_session(&self, session: Option<Session>) {
        let signed_in = session.is_some();
        self.state.send_replace(session);
        tracing::info!(signed_in, "Session changed");
    }

    /// Adopt the session carried in an OAuth redirect URL fragment.
    pub fn complete_sign_in(&self, redirect: &str) -> Result<Session, AuthError> {
        let session = session_from_redirect(redirect)?;
        self.set_session(Some(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl SessionProvider for GoTrueSessionProvider {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.state.borrow().clone())
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.state.send_replace(None);
        let Some(session) = previous else {
            return Ok(());
        };

        let url = format!("{}/auth/v1/logout", self.backend.url);
        let result = self
            .client
            .post(&url)
            .header("apikey", &self.backend.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await;

        // the local session is gone either way
        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = response.status().as_u16(), "Remote sign-out rejected");
            }
            Err(e) => tracing::warn!(error = %e, "Remote sign-out failed"),
            Ok(_) => tracing::info!("Signed out"),
        }
        Ok(())
    }

    fn sign_in_url(&self, provider: &str, options: &SignInOptions) -> Result<Url, AuthError> {
        let mut url = Url::parse(&format!("{}/auth/v1/authorize", self.backend.url))
            .map_err(|e| AuthError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", &options.redirect_url)
            .append_pair("scopes", &options.scopes);
        Ok(url)
    }
}

/// Parse `#access_token=..&provider_token=..` from an OAuth redirect.
pub fn session_from_redirect(redirect: &str) -> Result<Session, AuthError> {
    let url = Url::parse(redirect).map_err(|e| AuthError::InvalidUrl(e.to_string()))?;
    let fragment = url
        .fragment()
        .ok_or_else(|| AuthError::InvalidRedirect("missing fragment".to_string()))?;

    let mut access_token = None;
    let mut provider_token = None;
    let mut refresh_token = None;
    let mut expires_in = None;
    for (key, value) in fragment_pairs(fragment) {
        match key.as_str() {
            "access_token" => access_token = Some(value),
            "provider_token" => provider_token = Some(value),
            "refresh_token" => refresh_token = Some(value),
            "expires_in" => expires_in = value.parse().ok(),
            "error_description" => return Err(AuthError::InvalidRedirect(value)),
            _ => {}
        }
    }

    let access_token = access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::InvalidRedirect("missing access_token".to_string()))?;

    Ok(Session {
        access_token,
        provider_token: provider_token.filter(|t| !t.is_empty()),
        refresh_token,
        expires_in,
    })
}

/// Percent-decoded `key=value` pairs of a form-encoded fragment.
fn fragment_pairs(fragment: &str) -> Vec<(String, String)> {
    match Url::parse(&format!("http://fragment.invalid/?{}", fragment)) {
        Ok(parsed) => parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

// ============================================================================
// SessionResolver
// ============================================================================

/// Tracks whether a session exists and which provider token it carries.
///
/// No retries: a failed lookup leaves the resolver unauthenticated until the
/// next change notification.
pub struct SessionResolver {
    provider: Arc<dyn SessionProvider>,
    changes: watch::Receiver<Option<Session>>,
    session: Option<Session>,
}

impl SessionResolver {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        let changes = provider.on_session_change();
        Self {
            provider,
            changes,
            session: None,
        }
    }

    pub async fn resolve(&mut self) -> bool {
        self.session = match self.provider.get_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed, treating as signed out");
                None
            }
        };
        self.has_session()
    }

    /// Wait for the next change notification and apply it. Returns `false`
    /// once the provider is gone.
    pub async fn next_change(&mut self) -> bool {
        if self.changes.changed().await.is_err() {
            return false;
        }
        self.session = self.changes.borrow_and_update().clone();
        true
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn provider_access_token(&self) -> Option<&str> {
        self.session
            .as_ref()
            .and_then(|s| s.provider_token.as_deref())
    }

    pub fn require_provider_token(&self) -> Result<&str, AuthError> {
        match &self.session {
            None => Err(AuthError::NoSession),
            Some(s) => s.provider_token.as_deref().ok_or(AuthError::MissingProviderToken),
        }
    }
}

/// Session provider holding a fixed token, for CLIs and servers that receive
/// the provider token directly.
pub struct StaticSessionProvider {
    state: watch::Sender<Option<Session>>,
}

impl StaticSessionProvider {
    pub fn new(session: Option<Session>) -> Self {
        let (state, _) = watch::channel(session);
        Self { state }
    }

    pub fn from_token(token: Option<String>) -> Self {
        Self::new(token.filter(|t| !t.is_empty()).map(Session::with_provider_token))
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.state.borrow().clone())
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.state.send_replace(None);
        Ok(())
    }

    fn sign_in_url(&self, provider: &str, _options: &SignInOptions) -> Result<Url, AuthError> {
        Err(AuthError::InvalidUrl(format!(
            "static sessions cannot sign in with {}",
            provider
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(url: &str) -> BackendConfig {
        BackendConfig {
            url: url.to_string(),
            anon_key: "anon-key".to_string(),
        }
    }

    struct FailingProvider {
        state: watch::Sender<Option<Session>>,
    }

    #[async_trait]
    impl SessionProvider for FailingProvider {
        async fn get_session(&self) -> Result<Option<Session>, AuthError> {
            Err(AuthError::Api {
                status: 503,
                message: "unavailable".to_string(),
            })
        }
        fn on_session_change(&self) -> watch::Receiver<Option<Session>> {
            self.state.subscribe()
        }
        async fn sign_out(&self) -> Result<(), AuthError> {
            Ok(())
        }
        fn sign_in_url(&self, _: &str, _: &SignInOptions) -> Result<Url, AuthError> {
            Err(AuthError::NoSession)
        }
    }

    #[test]
    fn test_sign_in_url_carries_provider_redirect_and_scopes() {
        let provider = GoTrueSessionProvider::new(backend("https://abc.supabase.co")).unwrap();
        let url = provider
            .sign_in_url(
                "github",
                &SignInOptions {
                    redirect_url: "http://localhost:8780/dashboard".to_string(),
                    scopes: "repo read:user".to_string(),
                },
            )
            .unwrap();

        assert_eq!(url.path(), "/auth/v1/authorize");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("provider".to_string(), "github".to_string())));
        assert!(pairs.contains(&(
            "redirect_to".to_string(),
            "http://localhost:8780/dashboard".to_string()
        )));
        assert!(pairs.contains(&("scopes".to_string(), "repo read:user".to_string())));
    }

    #[test]
    fn test_session_from_redirect_fragment() {
        let session = session_from_redirect(
            "http://localhost:8780/dashboard#access_token=jwt123&expires_in=3600&provider_token=gho_x&refresh_token=r1&token_type=bearer",
        )
        .unwrap();
        assert_eq!(session.access_token, "jwt123");
        assert_eq!(session.provider_token.as_deref(), Some("gho_x"));
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
        assert_eq!(session.expires_in, Some(3600));
    }

    #[test]
    fn test_session_from_redirect_error() {
        let result = session_from_redirect(
            "http://localhost/#error=access_denied&error_description=User+denied",
        );
        match result {
            Err(AuthError::InvalidRedirect(msg)) => assert_eq!(msg, "User denied"),
            other => panic!("Expected InvalidRedirect, got {:?}", other),
        }
        assert!(session_from_redirect("http://localhost/dashboard").is_err());
    }

    #[tokio::test]
    async fn test_resolver_follows_change_notifications() {
        let provider = Arc::new(GoTrueSessionProvider::new(backend("http://unused")).unwrap());
        let mut resolver = SessionResolver::new(provider.clone());

        assert!(!resolver.resolve().await);
        assert!(resolver.provider_access_token().is_none());
        assert!(matches!(
            resolver.require_provider_token(),
            Err(AuthError::NoSession)
        ));

        provider.set_session(Some(Session::with_provider_token("gho_1")));
        assert!(resolver.next_change().await);
        assert!(resolver.has_session());
        assert_eq!(resolver.provider_access_token(), Some("gho_1"));
    }

    #[tokio::test]
    async fn test_resolver_treats_lookup_failure_as_signed_out() {
        let (state, _) = watch::channel(None);
        let mut resolver = SessionResolver::new(Arc::new(FailingProvider { state }));
        assert!(!resolver.resolve().await);
        assert!(!resolver.has_session());
    }

    #[tokio::test]
    async fn test_session_without_provider_token() {
        let provider = Arc::new(StaticSessionProvider::new(Some(Session {
            access_token: "jwt".to_string(),
            provider_token: None,
            refresh_token: None,
            expires_in: None,
        })));
        let mut resolver = SessionResolver::new(provider);
        assert!(resolver.resolve().await);
        assert!(matches!(
            resolver.require_provider_token(),
            Err(AuthError::MissingProviderToken)
        ));
    }

    #[tokio::test]
    async fn test_sign_out_calls_logout_and_clears_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer jwt123"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let provider = GoTrueSessionProvider::new(backend(&server.uri())).unwrap();
        provider
            .complete_sign_in("http://localhost/#access_token=jwt123&provider_token=gho")
            .unwrap();
        let mut changes = provider.on_session_change();
        assert!(provider.get_session().await.unwrap().is_some());

        provider.sign_out().await.unwrap();
        assert!(provider.get_session().await.unwrap().is_none());
        assert!(changes.has_changed().unwrap());
        assert!(changes.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_session_even_if_remote_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = GoTrueSessionProvider::new(backend(&server.uri())).unwrap();
        provider.set_session(Some(Session::with_provider_token("gho")));
        provider.sign_out().await.unwrap();
        assert!(provider.get_session().await.unwrap().is_none());
    }
}
