//! Credential Store
//!
//! Durable, encrypted storage for authentication tokens and small secrets.
//! Values never reach a log line: [`Credential`] redacts itself in `Debug`
//! and the store only logs the token kind.

pub mod secure;

pub use secure::{
    EncryptedFileStorage, MasterKey, MemorySecureStorage, SecureStorage, MASTER_KEY_LEN,
};

use crate::config::ResilienceConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const SECRET_PREFIX: &str = "secret:";

// =============================================================================
// Credential
// =============================================================================

/// Kind of authentication token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    /// Every kind, for deterministic clearing
    pub const ALL: [TokenKind; 2] = [TokenKind::Access, TokenKind::Refresh];

    /// Name under which the token is stored
    pub fn storage_name(&self) -> &'static str {
        match self {
            TokenKind::Access => "access_token",
            TokenKind::Refresh => "refresh_token",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// A stored authentication token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub kind: TokenKind,
    value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(
        kind: TokenKind,
        value: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            expires_at,
        }
    }

    /// The raw token
    pub fn value(&self) -> &str {
        &self.value
    }

    /// True once `expires_at` has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Credential Store
// =============================================================================

/// Store for tokens and secrets over a [`SecureStorage`] backend
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn SecureStorage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Open the encrypted file store in the data directory
    ///
    /// The master key comes from the environment variable named in the
    /// credential config.
    pub fn open(config: &ResilienceConfig) -> Result<Self> {
        let key = MasterKey::from_env(&config.credentials.key_env)?;
        Ok(Self::with_key(config, &key))
    }

    /// Open the encrypted file store with an explicit key
    pub fn with_key(config: &ResilienceConfig, key: &MasterKey) -> Self {
        let storage = EncryptedFileStorage::new(config.credentials_path(), key);
        Self::new(Arc::new(storage))
    }

    /// Unencrypted in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySecureStorage::new()))
    }

    /// Save a token, replacing any previous one of the same kind
    pub async fn save(
        &self,
        kind: TokenKind,
        value: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let credential = Credential::new(kind, value, expires_at);
        let raw = serde_json::to_vec(&credential)?;
        self.storage.write(kind.storage_name(), &raw).await?;
        debug!(kind = %kind, "Saved credential");
        Ok(())
    }

    /// Read a token
    pub async fn read(&self, kind: TokenKind) -> Result<Option<Credential>> {
        let Some(raw) = self.storage.read(kind.storage_name()).await? else {
            return Ok(None);
        };
        let credential: Credential = serde_json::from_slice(&raw)?;
        if credential.kind != kind {
            return Err(Error::Crypto(format!(
                "Stored {} credential is labelled {}",
                kind, credential.kind
            )));
        }
        Ok(Some(credential))
    }

    /// Raw access token, if any
    pub async fn access_token(&self) -> Result<Option<String>> {
        Ok(self
            .read(TokenKind::Access)
            .await?
            .map(|c| c.value().to_string()))
    }

    /// Raw refresh token, if any
    pub async fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self
            .read(TokenKind::Refresh)
            .await?
            .map(|c| c.value().to_string()))
    }

    /// Remove a token
    pub async fn delete(&self, kind: TokenKind) -> Result<()> {
        self.storage.delete(kind.storage_name()).await?;
        debug!(kind = %kind, "Deleted credential");
        Ok(())
    }

    /// Save a named secret
    pub async fn save_secret(&self, name: &str, value: &str) -> Result<()> {
        self.storage
            .write(&secret_name(name), value.as_bytes())
            .await
    }

    /// Read a named secret
    pub async fn read_secret(&self, name: &str) -> Result<Option<String>> {
        match self.storage.read(&secret_name(name)).await? {
            Some(raw) => String::from_utf8(raw)
                .map(Some)
                .map_err(|_| Error::Crypto(format!("Secret {} is not UTF-8", name))),
            None => Ok(None),
        }
    }

    /// Remove a named secret
    pub async fn delete_secret(&self, name: &str) -> Result<()> {
        self.storage.delete(&secret_name(name)).await
    }

    /// Remove every credential and secret
    pub async fn clear_all(&self) -> Result<()> {
        for kind in TokenKind::ALL {
            self.storage.delete(kind.storage_name()).await?;
        }
        for name in self.storage.names().await? {
            if name.starts_with(SECRET_PREFIX) {
                self.storage.delete(&name).await?;
            }
        }
        info!("Cleared all credentials");
        Ok(())
    }
}

fn secret_name(name: &str) -> String {
    format!("{}{}", SECRET_PREFIX, name)
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_store(tmp: &TempDir) -> CredentialStore {
        let config = ResilienceConfig {
            data_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        CredentialStore::with_key(&config, &MasterKey::new([3u8; 32]))
    }

    #[tokio::test]
    async fn test_save_and_read() {
        let store = CredentialStore::in_memory();
        let expires = Utc::now() + chrono::Duration::hours(1);

        store.save(TokenKind::Access, "abc", Some(expires)).await.unwrap();

        let credential = store.read(TokenKind::Access).await.unwrap().unwrap();
        assert_eq!(credential.value(), "abc");
        assert_eq!(credential.expires_at, Some(expires));
        assert!(!credential.is_expired());
        assert!(store.read(TokenKind::Refresh).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_all_removes_every_kind() {
        let tmp = TempDir::new().unwrap();
        let store = file_store(&tmp);

        store.save(TokenKind::Access, "a", None).await.unwrap();
        store.save(TokenKind::Refresh, "r", None).await.unwrap();
        store.save_secret("api_key", "k").await.unwrap();

        store.clear_all().await.unwrap();

        for kind in TokenKind::ALL {
            assert!(store.read(kind).await.unwrap().is_none());
        }
        assert!(store.read_secret("api_key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secrets_are_separate_from_tokens() {
        let store = CredentialStore::in_memory();
        store.save_secret("access_token", "not-a-token").await.unwrap();

        assert!(store.read(TokenKind::Access).await.unwrap().is_none());
        assert_eq!(
            store.read_secret("access_token").await.unwrap().as_deref(),
            Some("not-a-token")
        );

        store.delete_secret("access_token").await.unwrap();
        assert!(store.read_secret("access_token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        file_store(&tmp)
            .save(TokenKind::Refresh, "persisted", None)
            .await
            .unwrap();

        let reopened = file_store(&tmp);
        assert_eq!(
            reopened.refresh_token().await.unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[test]
    fn test_debug_is_redacted() {
        let credential = Credential::new(TokenKind::Access, "very-secret", None);
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_expiry() {
        let past = Credential::new(
            TokenKind::Access,
            "x",
            Some(Utc::now() - chrono::Duration::seconds(1)),
        );
        assert!(past.is_expired());
        assert!(!Credential::new(TokenKind::Access, "x", None).is_expired());
    }
}
