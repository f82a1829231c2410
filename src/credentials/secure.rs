//! Secure Storage Backends
//!
//! Encrypted-at-rest key/value storage for credentials and small secrets.
//! [`EncryptedFileStorage`] seals every value with ChaCha20-Poly1305 under a
//! 32-byte master key, using a fresh random nonce per write and the entry
//! name as associated data so ciphertexts cannot be swapped between names.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Length of the master key in bytes
pub const MASTER_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const ENVELOPE_VERSION: u32 = 1;

// =============================================================================
// SecureStorage Trait
// =============================================================================

/// Encrypted key/value storage
#[async_trait]
pub trait SecureStorage: Send + Sync {
    /// Store `value` under `name`, replacing any previous value
    async fn write(&self, name: &str, value: &[u8]) -> Result<()>;

    /// Read the value stored under `name`
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `name`; removing a missing name is not an error
    async fn delete(&self, name: &str) -> Result<()>;

    /// Names currently stored
    async fn names(&self) -> Result<Vec<String>>;
}

// =============================================================================
// Master Key
// =============================================================================

/// 32-byte master key
#[derive(Clone)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    pub fn new(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded key
    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw.trim())
            .map_err(|e| Error::Configuration(format!("Credential key is not hex: {}", e)))?;
        let bytes: [u8; MASTER_KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::Configuration(format!(
                "Credential key must be {} bytes, got {}",
                MASTER_KEY_LEN,
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Read a hex-encoded key from the environment variable `var`
    pub fn from_env(var: &str) -> Result<Self> {
        let raw = std::env::var(var)
            .map_err(|_| Error::Configuration(format!("Credential key not set (set {})", var)))?;
        Self::from_hex(&raw)
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; MASTER_KEY_LEN];
        bytes.copy_from_slice(&ChaCha20Poly1305::generate_key(&mut OsRng));
        Self(bytes)
    }

    /// Hex encoding, for provisioning
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

// =============================================================================
// Encrypted File Storage
// =============================================================================

/// On-disk envelope
#[derive(Debug, Default, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    entries: BTreeMap<String, SealedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedValue {
    nonce: String,
    ciphertext: String,
}

/// Single-file encrypted store
pub struct EncryptedFileStorage {
    path: PathBuf,
    cipher: ChaCha20Poly1305,
    /// Serializes read-modify-write cycles on the file
    io_lock: Mutex<()>,
}

impl EncryptedFileStorage {
    /// Open (or lazily create) the store at `path`
    pub fn new(path: impl Into<PathBuf>, key: &MasterKey) -> Self {
        Self {
            path: path.into(),
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key.0)),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seal(&self, name: &str, value: &[u8]) -> Result<SealedValue> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: value,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| Error::Crypto(format!("Failed to encrypt {}", name)))?;
        Ok(SealedValue {
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        })
    }

    fn open(&self, name: &str, sealed: &SealedValue) -> Result<Vec<u8>> {
        let nonce = hex::decode(&sealed.nonce)
            .map_err(|_| Error::Crypto(format!("Corrupt nonce for {}", name)))?;
        if nonce.len() != NONCE_LEN {
            return Err(Error::Crypto(format!("Corrupt nonce for {}", name)));
        }
        let ciphertext = hex::decode(&sealed.ciphertext)
            .map_err(|_| Error::Crypto(format!("Corrupt ciphertext for {}", name)))?;

        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| Error::Crypto(format!("Failed to decrypt {}", name)))
    }

    async fn load(&self) -> Result<Envelope> {
        match fs::read(&self.path).await {
            Ok(raw) => {
                let envelope: Envelope = serde_json::from_slice(&raw)?;
                if envelope.version != ENVELOPE_VERSION {
                    return Err(Error::Crypto(format!(
                        "Unsupported credential file version {}",
                        envelope.version
                    )));
                }
                Ok(envelope)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Envelope {
                version: ENVELOPE_VERSION,
                entries: BTreeMap::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the envelope atomically: temp file then rename
    async fn store(&self, envelope: &Envelope) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(envelope)?).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SecureStorage for EncryptedFileStorage {
    async fn write(&self, name: &str, value: &[u8]) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut envelope = self.load().await?;
        envelope.entries.insert(name.to_string(), self.seal(name, value)?);
        self.store(&envelope).await?;
        debug!(name, "Stored secure value");
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.io_lock.lock().await;
        let envelope = self.load().await?;
        envelope
            .entries
            .get(name)
            .map(|sealed| self.open(name, sealed))
            .transpose()
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut envelope = self.load().await?;
        if envelope.entries.remove(name).is_some() {
            self.store(&envelope).await?;
            debug!(name, "Removed secure value");
        }
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        let _guard = self.io_lock.lock().await;
        Ok(self.load().await?.entries.into_keys().collect())
    }
}

impl std::fmt::Debug for EncryptedFileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStorage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Memory Storage
// =============================================================================

/// Unencrypted in-process storage for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemorySecureStorage {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySecureStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStorage for MemorySecureStorage {
    async fn write(&self, name: &str, value: &[u8]) -> Result<()> {
        self.values.write().insert(name.to_string(), value.to_vec());
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.read().get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.values.write().remove(name);
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        Ok(self.values.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn file_storage(tmp: &TempDir) -> EncryptedFileStorage {
        EncryptedFileStorage::new(
            tmp.path().join("credentials.enc"),
            &MasterKey::new([7u8; 32]),
        )
    }

    #[tokio::test]
    async fn test_roundtrip_and_at_rest_encryption() {
        let tmp = TempDir::new().unwrap();
        let storage = file_storage(&tmp);

        storage.write("access_token", b"super-secret-token").await.unwrap();
        assert_eq!(
            storage.read("access_token").await.unwrap().as_deref(),
            Some(&b"super-secret-token"[..])
        );

        let raw = std::fs::read_to_string(storage.path()).unwrap();
        assert!(!raw.contains("super-secret-token"));
        assert!(raw.contains("access_token"));
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        file_storage(&tmp).write("name", b"value").await.unwrap();

        let reopened = file_storage(&tmp);
        assert_eq!(reopened.read("name").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(reopened.names().await.unwrap(), vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn test_wrong_key_is_crypto_error() {
        let tmp = TempDir::new().unwrap();
        file_storage(&tmp).write("name", b"value").await.unwrap();

        let other = EncryptedFileStorage::new(
            tmp.path().join("credentials.enc"),
            &MasterKey::new([8u8; 32]),
        );
        assert_matches!(other.read("name").await, Err(Error::Crypto(_)));
    }

    #[tokio::test]
    async fn test_swapped_ciphertext_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let storage = file_storage(&tmp);
        storage.write("a", b"alpha").await.unwrap();
        storage.write("b", b"beta").await.unwrap();

        // Move b's sealed value under a: the associated data no longer matches
        let mut envelope: Envelope =
            serde_json::from_slice(&std::fs::read(storage.path()).unwrap()).unwrap();
        let sealed_b = envelope.entries["b"].clone();
        envelope.entries.insert("a".to_string(), sealed_b);
        std::fs::write(storage.path(), serde_json::to_vec(&envelope).unwrap()).unwrap();

        assert_matches!(storage.read("a").await, Err(Error::Crypto(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let tmp = TempDir::new().unwrap();
        let storage = file_storage(&tmp);
        storage.delete("never-written").await.unwrap();
        assert!(storage.read("never-written").await.unwrap().is_none());
    }

    #[test]
    fn test_master_key_parsing() {
        let key = MasterKey::generate();
        let parsed = MasterKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(parsed.0, key.0);

        assert_matches!(MasterKey::from_hex("zz"), Err(Error::Configuration(_)));
        assert_matches!(MasterKey::from_hex("abcd"), Err(Error::Configuration(_)));
        assert_eq!(format!("{:?}", key), "MasterKey(<redacted>)");
    }
}
