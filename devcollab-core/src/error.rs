use thiserror::Error;

use crate::auth::AuthError;
use crate::chat::ChatError;
use crate::github::GithubError;
use crate::realtime::RealtimeError;

#[derive(Error, Debug)]
pub enum DevcollabError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("GitHub error: {0}")]
    Github(#[from] GithubError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),
}

pub type Result<T> = std::result::Result<T, DevcollabError>;
