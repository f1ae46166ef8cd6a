pub mod auth;
pub mod chat;
pub mod config;
pub mod content;
pub mod editor;
pub mod error;
pub mod github;
pub mod identity;
pub mod models;
pub mod realtime;
pub mod routes;

pub use auth::{
    AuthError, GoTrueSessionProvider, SessionProvider, SessionResolver, SignInOptions,
    StaticSessionProvider,
};
pub use chat::{channel_name, ChatError, ChatSurface, Composer, MessageStore, SurfaceState};
pub use config::{DevcollabConfig, RealtimeMode};
pub use content::{decode_content, encode_content};
pub use editor::FileEditor;
pub use error::DevcollabError;
pub use github::{GithubClient, GithubError};
pub use identity::IdentityEnricher;
pub use realtime::{LocalHub, RealtimeClient, RealtimeError, SupabaseRealtime};
pub use routes::{Navigation, Route};
pub use reqwest::Url;

use std::sync::Arc;

/// Build the realtime client selected by configuration. `access_token` is
/// the backend session JWT; without one, channels are joined with the
/// public key.
pub fn create_realtime(
    config: &DevcollabConfig,
    access_token: Option<&str>,
) -> Arc<dyn RealtimeClient> {
    match config.realtime.mode {
        RealtimeMode::Supabase => {
            let mut client =
                SupabaseRealtime::new(config.backend.clone(), config.realtime.clone());
            if let Some(token) = access_token {
                client = client.with_access_token(token);
            }
            Arc::new(client)
        }
        RealtimeMode::Local => Arc::new(LocalHub::new()),
    }
}
