//! Persistence for OAuth tokens.
//!
//! Refresh tokens rotate on every refresh, so the latest token must be saved
//! each time one is issued or the next run cannot authenticate.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::auth::{delete_secret, find_secret, store_secret, SecretKind};
use super::error::{ApiError, Result};
use super::oauth::OAuthToken;

/// Somewhere an OAuth token can be saved and loaded.
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// Load the saved token, if any.
    fn load(&self) -> Result<Option<OAuthToken>>;

    /// Replace the saved token.
    fn save(&self, token: &OAuthToken) -> Result<()>;

    /// Forget the saved token.
    fn clear(&self) -> Result<()>;
}

/// Stores the token as JSON in a file readable only by the owner.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "token".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn file_error(&self, operation: &'static str, source: std::io::Error) -> ApiError {
        ApiError::File {
            path: self.path.clone(),
            operation,
            source,
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<OAuthToken>> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) => OAuthToken::from_json(&json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.file_error("read", e)),
        }
    }

    /// Writes an owner-only sibling temp file, then renames it over the
    /// target; an interrupted save leaves the previous token in place.
    fn save(&self, token: &OAuthToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.file_error("create directory for", e))?;
            }
        }

        let json = token.to_json()?;
        let tmp = self.temp_path();
        if let Err(e) = write_private(&tmp, json.as_bytes()) {
            let _ = std::fs::remove_file(&tmp);
            return Err(self.file_error("write", e));
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(self.file_error("replace", e));
        }

        debug!(path = %self.path.display(), "Saved OAuth token");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.file_error("delete", e)),
        }
    }
}

/// Create `path` afresh, owner-only on Unix, and flush `data` to disk.
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Stores the token in the OS keyring under a profile.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    profile_name: String,
}

impl KeyringTokenStore {
    pub fn new(profile_name: impl Into<String>) -> Self {
        Self {
            profile_name: profile_name.into(),
        }
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<OAuthToken>> {
        match find_secret(&self.profile_name, SecretKind::OAuthToken)? {
            Some(json) => OAuthToken::from_json(&json).map(Some),
            None => {
                debug!(profile = %self.profile_name, "No OAuth token in keyring");
                Ok(None)
            }
        }
    }

    fn save(&self, token: &OAuthToken) -> Result<()> {
        store_secret(&self.profile_name, SecretKind::OAuthToken, &token.to_json()?)
    }

    fn clear(&self) -> Result<()> {
        delete_secret(&self.profile_name, SecretKind::OAuthToken)
    }
}

/// Keeps the token in memory only.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<OAuthToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: OAuthToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<OAuthToken>>> {
        self.token
            .lock()
            .map_err(|_| ApiError::TokenStore("token store lock poisoned".to_string()))
    }
}

impl fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_token = self.token.lock().map(|t| t.is_some()).unwrap_or(false);
        f.debug_struct("MemoryTokenStore")
            .field("has_token", &has_token)
            .finish()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<OAuthToken>> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, token: &OAuthToken) -> Result<()> {
        *self.lock()? = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn token(access: &str) -> OAuthToken {
        OAuthToken {
            access_token: access.to_string(),
            refresh_token: Some("refresh".to_string()),
            token_type: "Bearer".to_string(),
            scope: "offline_access".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            base_url: Some("https://api.atlassian.com/ex/jira/1".to_string()),
            instance_name: Some("alpha".to_string()),
            cloud_id: Some("1".to_string()),
        }
    }

    #[test]
    fn test_file_store_missing_file_loads_none() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_save_and_reload() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("token.json"));

        store.save(&token("a1")).unwrap();
        store.save(&token("a2")).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "a2");
        assert_eq!(loaded.instance_name.as_deref(), Some("alpha"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.save(&token("a1")).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.save(&token("a1")).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("token.json")]);
    }

    #[test]
    fn test_file_store_replaces_stale_temp_file() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.save(&token("a1")).unwrap();
        std::fs::write(dir.path().join("token.json.tmp"), "half-written").unwrap();

        store.save(&token("a2")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().access_token, "a2");
        assert!(!dir.path().join("token.json.tmp").exists());
    }

    #[test]
    fn test_file_store_clear() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.save(&token("a1")).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();
        let err = FileTokenStore::new(path).load().unwrap_err();
        assert!(matches!(err, ApiError::TokenStore(_)));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&token("a1")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().access_token, "a1");
        assert!(format!("{:?}", store).contains("has_token: true"));
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
