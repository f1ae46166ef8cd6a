use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Process environment variable holding the backend service URL.
pub const BACKEND_URL_ENV: &str = "SUPABASE_URL";

/// Process environment variable holding the backend public client key.
pub const BACKEND_KEY_ENV: &str = "SUPABASE_ANON_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct DevcollabConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Connection parameters for the auth/realtime backend service.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
}

impl BackendConfig {
    /// Fill empty fields from the process environment and reject the config
    /// if either parameter is still missing.
    pub fn resolve_env(mut self) -> Result<Self, ConfigError> {
        if self.url.is_empty() {
            self.url = std::env::var(BACKEND_URL_ENV).unwrap_or_default();
        }
        if self.anon_key.is_empty() {
            self.anon_key = std::env::var(BACKEND_KEY_ENV).unwrap_or_default();
        }
        if self.url.is_empty() {
            return Err(ConfigError::NotFound(format!(
                "backend.url (or {})",
                BACKEND_URL_ENV
            )));
        }
        if self.anon_key.is_empty() {
            return Err(ConfigError::NotFound(format!(
                "backend.anon_key (or {})",
                BACKEND_KEY_ENV
            )));
        }
        self.url = self.url.trim_end_matches('/').to_string();
        Ok(self)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: String,
    pub user_agent: String,
    pub per_page: u32,
    pub timeout_seconds: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            user_agent: "DevCollab/0.1".to_string(),
            per_page: 100,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeMode {
    #[default]
    Supabase,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RealtimeConfig {
    pub mode: RealtimeMode,
    pub heartbeat_seconds: u64,
    pub connect_retries: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            mode: RealtimeMode::Supabase,
            heartbeat_seconds: 30,
            connect_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub redirect_url: String,
    pub scopes: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
            redirect_url: "http://127.0.0.1:8780/dashboard".to_string(),
            scopes: "repo read:user".to_string(),
        }
    }
}

impl DevcollabConfig {
    /// Load from a TOML file (optional) with `DEVCOLLAB__SECTION__KEY`
    /// environment overrides, then resolve the backend parameters.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config = Self::load_unresolved(path)?;
        config.backend = config.backend.resolve_env()?;
        Ok(config)
    }

    /// Same sources as [`DevcollabConfig::load`], without requiring the
    /// backend parameters. For callers that only talk to GitHub.
    pub fn load_unresolved(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("DEVCOLLAB").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let s = Config::builder()
            .add_source(File::from_str(
                "[backend]\nurl = \"https://x.supabase.co/\"\nanon_key = \"k\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: DevcollabConfig = s.try_deserialize().unwrap();
        assert_eq!(config.github.per_page, 100);
        assert_eq!(config.github.api_base, "https://api.github.com");
        assert_eq!(config.realtime.mode, RealtimeMode::Supabase);
        assert_eq!(config.http.port, 8780);

        let backend = config.backend.resolve_env().unwrap();
        assert_eq!(backend.url, "https://x.supabase.co");
    }

    #[test]
    fn test_load_reads_toml_file() {
        let dir = std::env::temp_dir().join(format!("devcollab-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("devcollab.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[backend]\nurl = \"https://abc.supabase.co\"\nanon_key = \"anon\"\n\n[realtime]\nmode = \"local\"\nheartbeat_seconds = 5\nconnect_retries = 1\n"
        )
        .unwrap();

        let config = DevcollabConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.backend.anon_key, "anon");
        assert_eq!(config.realtime.mode, RealtimeMode::Local);
        assert_eq!(config.realtime.heartbeat_seconds, 5);

        std::fs::remove_dir_all(&dir).ok();
    }
}
