use serde::{Deserialize, Serialize};

/// Profile returned by `GET /user`.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubUser {
    pub id: u64,
    pub login: String,
    pub avatar_url: String,
}

/// The signed-in user for the current session. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
}

impl From<GithubUser> for Identity {
    fn from(user: GithubUser) -> Self {
        Self {
            id: user.id.to_string(),
            display_name: user.login,
            avatar_url: user.avatar_url,
        }
    }
}
