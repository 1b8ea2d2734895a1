//! Configuration management for genresort.
//!
//! Values come from environment variables, optionally seeded from a `.env`
//! file in the local data directory:
//! 1. Environment variables (highest priority)
//! 2. `.env` file in the local data directory
//! 3. Application defaults (where applicable)
//!
//! Tunables of the cache and session substrate are not read from the
//! environment; they live in the `Default` impls of the respective config
//! structs and are collected in [`Settings`].

use std::{env, path::PathBuf, time::Duration};

use crate::{
    error::ConfigError,
    kv::{BatchConfig, CacheConfig},
    management::{GenreCacheConfig, SessionConfig},
};

const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8080";
const DEFAULT_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const DEFAULT_API_URL: &str = "https://api.spotify.com/v1";
const DEFAULT_SCOPE: &str = "user-library-read user-read-private";

/// Loads environment variables from a `.env` file in the local data directory.
///
/// The function looks for the `.env` file in:
/// - Linux: `~/.local/share/genresort/.env`
/// - macOS: `~/Library/Application Support/genresort/.env`
/// - Windows: `%LOCALAPPDATA%/genresort/.env`
///
/// A missing file is not an error, variables may come from the process
/// environment alone.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created.
pub async fn load_env() -> Result<(), String> {
    let path = data_dir().join(".env");
    if let Some(parent) = path.parent() {
        async_fs::create_dir_all(parent)
            .await
            .map_err(|e| e.to_string())?;
    }

    if dotenv::from_path(&path).is_err() {
        tracing::debug!(path = %path.display(), "no .env file loaded");
    }
    Ok(())
}

/// `<data_local_dir>/genresort`
pub fn data_dir() -> PathBuf {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("genresort");
    path
}

/// Which backing store the server runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvBackend {
    /// One file per key under the given directory.
    File(PathBuf),
    /// Process-local, lost on exit.
    Memory,
}

/// OAuth client and API endpoints of the music provider.
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scope: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
}

/// Cookie attributes shared by the session and login-state cookies.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self { secure: true }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_address: String,
    pub public_url: String,
    pub spotify: SpotifyConfig,
    pub kv_backend: KvBackend,
    pub admin_user_ids: Vec<String>,
    pub cookies: CookieSettings,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub session: SessionConfig,
    pub genre_cache: GenreCacheConfig,
    pub oauth_state_ttl: Duration,
}

impl Settings {
    /// Defaults for everything except the provider client: local address,
    /// in-memory store, no admins, secure cookies.
    pub fn new(spotify: SpotifyConfig) -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.into(),
            public_url: format!("http://{DEFAULT_SERVER_ADDRESS}"),
            spotify,
            kv_backend: KvBackend::Memory,
            admin_user_ids: Vec::new(),
            cookies: CookieSettings::default(),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            session: SessionConfig::default(),
            genre_cache: GenreCacheConfig::default(),
            oauth_state_ttl: Duration::from_secs(600),
        }
    }

    /// Builds settings from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when `SPOTIFY_API_AUTH_CLIENT_ID` or `SPOTIFY_API_REDIRECT_URI`
    /// is missing, or when `KV_BACKEND` / `COOKIE_SECURE` hold unknown values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let spotify = SpotifyConfig {
            client_id: required("SPOTIFY_API_AUTH_CLIENT_ID")?,
            client_secret: optional("SPOTIFY_API_AUTH_CLIENT_SECRET"),
            redirect_uri: required("SPOTIFY_API_REDIRECT_URI")?,
            scope: optional("SPOTIFY_API_AUTH_SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.into()),
            auth_url: optional("SPOTIFY_API_AUTH_URL").unwrap_or_else(|| DEFAULT_AUTH_URL.into()),
            token_url: optional("SPOTIFY_API_TOKEN_URL")
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.into()),
            api_url: optional("SPOTIFY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
        };
        let mut settings = Self::new(spotify);

        if let Some(address) = optional("SERVER_ADDRESS") {
            settings.server_address = address;
        }
        settings.public_url = optional("PUBLIC_URL")
            .unwrap_or_else(|| format!("http://{}", settings.server_address));

        settings.kv_backend = match optional("KV_BACKEND").as_deref() {
            None | Some("file") => KvBackend::File(
                optional("KV_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| data_dir().join("kv")),
            ),
            Some("memory") => KvBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "KV_BACKEND",
                    message: format!("expected `file` or `memory`, got `{other}`"),
                });
            }
        };

        settings.admin_user_ids = optional("ADMIN_USER_IDS")
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        if let Some(secure) = parse_bool("COOKIE_SECURE", optional("COOKIE_SECURE"))? {
            settings.set_secure_cookies(secure);
        }

        Ok(settings)
    }

    /// Applies to both the session and the login-state cookie.
    pub fn set_secure_cookies(&mut self, secure: bool) {
        self.cookies.secure = secure;
        self.session.secure_cookie = secure;
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.iter().any(|id| id == user_id)
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parse_bool(name: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(None),
        Some("1" | "true" | "yes") => Ok(Some(true)),
        Some("0" | "false" | "no") => Ok(Some(false)),
        Some(other) => Err(ConfigError::Invalid {
            name,
            message: format!("expected a boolean, got `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spotify() -> SpotifyConfig {
        SpotifyConfig {
            client_id: "id".into(),
            client_secret: None,
            redirect_uri: "http://localhost/auth/callback".into(),
            scope: DEFAULT_SCOPE.into(),
            auth_url: DEFAULT_AUTH_URL.into(),
            token_url: DEFAULT_TOKEN_URL.into(),
            api_url: DEFAULT_API_URL.into(),
        }
    }

    #[test]
    fn test_secure_cookie_flag_reaches_sessions() {
        let mut settings = Settings::new(spotify());
        assert!(settings.session.secure_cookie);

        settings.set_secure_cookies(false);
        assert!(!settings.cookies.secure);
        assert!(!settings.session.secure_cookie);
    }

    #[test]
    fn test_admin_lookup() {
        let mut settings = Settings::new(spotify());
        settings.admin_user_ids = vec!["root".into()];
        assert!(settings.is_admin("root"));
        assert!(!settings.is_admin("guest"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("X", None).unwrap(), None);
        assert_eq!(parse_bool("X", Some("TRUE".into())).unwrap(), Some(true));
        assert_eq!(parse_bool("X", Some("0".into())).unwrap(), Some(false));
        assert!(parse_bool("X", Some("maybe".into())).is_err());
    }
}
