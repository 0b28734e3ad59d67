//! Local persisted secret files
//!
//! Secrets live under a root directory with one subdirectory per secret
//! name and one file per key, e.g. `token/vault-token`. The filesystem is
//! the lowest-level source of truth for material that must survive process
//! restarts: the credential bundle from backend initialization and the CA
//! certificate/key pair the PKI engine is configured with.
//!
//! Values may contain literal `\n` sequences (as produced by tools that
//! flatten multi-line material into one line); these are unescaped to real
//! newlines on read. Files are written owner-read/write only.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::Result;

/// Secret name for the backend credential bundle
pub const SECRET_TOKEN: &str = "token";
/// Key holding the root token under [`SECRET_TOKEN`]
pub const KEY_ROOT_TOKEN: &str = "vault-token";
/// Key holding the unseal key material under [`SECRET_TOKEN`]
pub const KEY_UNSEAL_KEYS: &str = "vault-unseal-keys";
/// Key holding the operational token under [`SECRET_TOKEN`]
pub const KEY_OPERATIONAL_TOKEN: &str = "certmgr-token";

/// Secret name for the root CA certificate
pub const SECRET_CA_CERTIFICATE: &str = "vault-root-ca-certificate";
/// Key holding the certificate PEM under [`SECRET_CA_CERTIFICATE`]
pub const KEY_CERTIFICATE: &str = "certificate";

/// Secret name for the root CA private key
pub const SECRET_CA_PRIVATE_KEY: &str = "vault-root-ca-private-key";
/// Key holding the private key PEM under [`SECRET_CA_PRIVATE_KEY`]
pub const KEY_PRIVATE_KEY: &str = "privatekey";

/// File-backed secret store rooted at a single directory
#[derive(Debug, Clone)]
pub struct SecretStore {
    root: PathBuf,
}

impl SecretStore {
    /// Create a store rooted at the given directory.
    ///
    /// The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str, key: &str) -> PathBuf {
        self.root.join(name).join(key)
    }

    /// Read the value of `key` under secret `name`.
    ///
    /// Literal `\n` sequences are unescaped and trailing whitespace is
    /// stripped. Missing files surface as io errors.
    pub async fn read(&self, name: &str, key: &str) -> Result<String> {
        let raw = tokio::fs::read_to_string(self.path(name, key)).await?;
        Ok(raw.replace("\\n", "\n").trim_end().to_string())
    }

    /// Read the value of `key` under secret `name`, or None when absent
    pub async fn try_read(&self, name: &str, key: &str) -> Result<Option<String>> {
        match self.read(name, key).await {
            Ok(value) => Ok(Some(value)),
            Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write `value` as `key` under secret `name`.
    ///
    /// The secret directory is created owner-only; the file is created
    /// owner-read/write only before any bytes are written.
    pub async fn write(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await?;

        let path = dir.join(key);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .await?;
        file.write_all(value.as_bytes()).await?;
        file.flush().await?;

        debug!(secret = %name, key = %key, "persisted secret value");
        Ok(())
    }

    /// True when `key` exists under secret `name`
    pub async fn exists(&self, name: &str, key: &str) -> bool {
        tokio::fs::try_exists(self.path(name, key))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SecretStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn round_trips_a_value() {
        let (_dir, store) = store();
        store.write("token", "vault-token", "s.root123").await.unwrap();
        let value = store.read("token", "vault-token").await.unwrap();
        assert_eq!(value, "s.root123");
    }

    #[tokio::test]
    async fn unescapes_literal_newline_sequences() {
        let (_dir, store) = store();
        store
            .write("vault-root-ca-certificate", "certificate", "line one\\nline two")
            .await
            .unwrap();
        let value = store
            .read("vault-root-ca-certificate", "certificate")
            .await
            .unwrap();
        assert_eq!(value, "line one\nline two");
    }

    #[tokio::test]
    async fn strips_trailing_newline() {
        let (_dir, store) = store();
        store.write("token", "certmgr-token", "s.op456\n").await.unwrap();
        assert_eq!(store.read("token", "certmgr-token").await.unwrap(), "s.op456");
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let (_dir, store) = store();
        assert!(store.try_read("token", "vault-token").await.unwrap().is_none());
        assert!(!store.exists("token", "vault-token").await);
    }

    #[tokio::test]
    async fn files_are_owner_read_write_only() {
        let (_dir, store) = store();
        store.write("token", "vault-token", "s.root123").await.unwrap();

        let path = store.root().join("token").join("vault-token");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "secret files must be 0600");

        let dir_mode = std::fs::metadata(store.root().join("token"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700, "secret directories must be 0700");
    }

    #[tokio::test]
    async fn overwrite_replaces_previous_value() {
        let (_dir, store) = store();
        store.write("token", "vault-token", "first").await.unwrap();
        store.write("token", "vault-token", "second").await.unwrap();
        assert_eq!(store.read("token", "vault-token").await.unwrap(), "second");
    }
}
