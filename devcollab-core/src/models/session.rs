use serde::{Deserialize, Serialize};

/// Proof of authentication issued by the backend service.
///
/// `provider_token` is the GitHub OAuth token; it is absent when the provider
/// did not hand one back (e.g. a refreshed session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub provider_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

impl Session {
    pub fn with_provider_token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            access_token: token.clone(),
            provider_token: Some(token),
            refresh_token: None,
            expires_in: None,
        }
    }
}
