//! Bearer token providers.
//!
//! The coordinator never reads tokens from ambient state; the transport is
//! handed a [`CredentialProvider`] and asks it before every request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::CredentialError;

/// Supplies the bearer token attached to every service request.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Result<String, CredentialError>;
}

/// A fixed token, e.g. passed on the command line.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Result<String, CredentialError> {
        Ok(self.0.clone())
    }
}

/// Persistent token store keyed by upload URL.
///
/// Tokens are cached in memory and persisted to a JSON file.
pub struct TokenStore {
    path: PathBuf,
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenStore {
    /// Creates a store backed by `path`, loading existing tokens from disk.
    pub fn new(path: PathBuf) -> Result<Self, CredentialError> {
        let tokens = load_tokens(&path)?;
        Ok(Self {
            path,
            tokens: RwLock::new(tokens),
        })
    }

    /// Returns the token for an upload URL, if any.
    pub fn get_token(&self, endpoint: &str) -> Option<String> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(normalize(endpoint))
            .cloned()
    }

    /// Saves a token for an upload URL and persists the store.
    pub fn save_token(&self, endpoint: &str, token: &str) -> Result<(), CredentialError> {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(endpoint).to_string(), token.to_string());
        self.persist()
    }

    /// Removes the token for an upload URL. Returns whether one existed.
    pub fn remove_token(&self, endpoint: &str) -> Result<bool, CredentialError> {
        let removed = self
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(normalize(endpoint))
            .is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Returns a provider bound to one upload URL.
    pub fn for_endpoint(self: &Arc<Self>, endpoint: &str) -> EndpointCredentials {
        EndpointCredentials {
            store: Arc::clone(self),
            endpoint: normalize(endpoint).to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), CredentialError> {
        let map = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        set_permissions_0600(&self.path);
        debug!("persisted {} token(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

/// [`TokenStore`] view for a single upload URL.
///
/// Looks the token up on every call so a `login` during a long upload is
/// picked up by the next request.
pub struct EndpointCredentials {
    store: Arc<TokenStore>,
    endpoint: String,
}

impl CredentialProvider for EndpointCredentials {
    fn bearer_token(&self) -> Result<String, CredentialError> {
        self.store
            .get_token(&self.endpoint)
            .ok_or_else(|| CredentialError::Missing(self.endpoint.clone()))
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

fn normalize(endpoint: &str) -> &str {
    endpoint.trim_end_matches('/')
}

fn load_tokens(path: &Path) -> Result<HashMap<String, String>, CredentialError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let tokens: HashMap<String, String> = serde_json::from_str(&data)?;
    debug!("loaded {} token(s) from {:?}", tokens.len(), path);
    Ok(tokens)
}

/// Returns the default token store path.
pub fn default_token_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("chunklift").join("tokens.json"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token() {
        let creds = StaticToken::new("abc");
        assert_eq!(creds.bearer_token().unwrap(), "abc");
    }

    #[test]
    fn store_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.json");

        let store = TokenStore::new(path.clone()).unwrap();
        assert!(store.get_token("https://files.example.com/upload").is_none());
        store
            .save_token("https://files.example.com/upload/", "tok-1")
            .unwrap();

        let reloaded = TokenStore::new(path).unwrap();
        assert_eq!(
            reloaded.get_token("https://files.example.com/upload").as_deref(),
            Some("tok-1")
        );
    }

    #[cfg(unix)]
    #[test]
    fn store_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = TokenStore::new(path.clone()).unwrap();
        store.save_token("https://a", "t").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn store_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("tokens.json")).unwrap();
        store.save_token("https://a", "t").unwrap();

        assert!(store.remove_token("https://a").unwrap());
        assert!(!store.remove_token("https://a").unwrap());
        assert!(store.get_token("https://a").is_none());
    }

    #[test]
    fn endpoint_credentials_follow_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path().join("tokens.json")).unwrap());
        let creds = store.for_endpoint("https://files.example.com/upload");

        assert!(matches!(
            creds.bearer_token(),
            Err(CredentialError::Missing(_))
        ));

        store
            .save_token("https://files.example.com/upload", "fresh")
            .unwrap();
        assert_eq!(creds.bearer_token().unwrap(), "fresh");
    }

    #[test]
    fn corrupt_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(TokenStore::new(path), Err(CredentialError::Json(_))));
    }
}
