// Token file persistence.
//
// One JSON file per auth flow, readable only by the owner. Loading never
// fails: anything unusable on disk is reported as "no credentials".

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::tokens::TokenSet;
use crate::error::Error;

/// Persists a [`TokenSet`] to a single file path.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored record.
    ///
    /// Returns `None` when the file is missing, unreadable, not JSON, or
    /// lacks a non-empty `access_token` / `token_type`.
    pub async fn load(&self) -> Option<TokenSet> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no token file");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file unreadable");
                return None;
            }
        };

        let tokens: TokenSet = match serde_json::from_slice(&bytes) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file is not a credential record");
                return None;
            }
        };

        if let Err(e) = tokens.validate() {
            warn!(path = %self.path.display(), error = %e, "token file failed validation");
            return None;
        }

        debug!(path = %self.path.display(), "loaded stored credentials");
        Some(tokens)
    }

    /// Write the record as JSON with owner-only permissions.
    pub async fn save(&self, tokens: &TokenSet) -> Result<(), Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.storage_error(e))?;
        }

        let json = serde_json::to_vec_pretty(tokens).map_err(|e| Error::Validation {
            message: format!("cannot serialize credentials: {e}"),
        })?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&self.path)
            .await
            .map_err(|e| self.storage_error(e))?;
        file.write_all(&json)
            .await
            .map_err(|e| self.storage_error(e))?;
        file.flush().await.map_err(|e| self.storage_error(e))?;

        // `mode` only applies on creation; tighten files that already existed.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| self.storage_error(e))?;
        }

        debug!(path = %self.path.display(), "persisted credentials");
        Ok(())
    }

    /// Remove the file. A file that is already gone counts as success.
    pub async fn delete(&self) -> Result<(), Error> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "deleted token file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_error(e)),
        }
    }

    fn storage_error(&self, source: std::io::Error) -> Error {
        Error::Storage {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> TokenStore {
        TokenStore::new(dir.path().join("nested").join("tokens.json"))
    }

    #[tokio::test]
    async fn load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).load().await.is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let tokens = TokenSet::bearer("access", Some(3600)).with_refresh_token("refresh");
        store.save(&tokens).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.access_token.expose_secret(), "access");
        assert_eq!(
            loaded.refresh_token.as_ref().map(|t| t.expose_secret().to_owned()),
            Some("refresh".to_owned())
        );
        assert_eq!(loaded.expires_in, Some(3600));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn save_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        // Pre-existing world-readable file gets tightened.
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{}").unwrap();
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        store.save(&TokenSet::bearer("access", None)).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn malformed_json_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "not json {").unwrap();

        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn record_without_token_type_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), r#"{"access_token":"abc"}"#).unwrap();

        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn record_with_empty_token_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), r#"{"access_token":"","token_type":"Bearer"}"#).unwrap();

        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.save(&TokenSet::bearer("access", None)).await.unwrap();
        store.delete().await.unwrap();
        assert!(store.load().await.is_none());
        store.delete().await.unwrap();
    }
}
