//! Vault directory handle and per-account façade.
//!
//! A [`Vault`] owns a directory of keystore files. Listing or importing
//! yields [`Account`] values, each binding an address to the keystore that
//! currently represents it and the file backing that keystore. Because file
//! names embed a content checksum, replacing the keystore moves the account to
//! a new file; the old one is removed only after the new one is on disk.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{ScryptConfig, VaultConfig};
use crate::error::{KeyvaultError, Result};
use crate::key::{Address, PrivateKey};
use crate::keystore::{self, Keystore, Meta};
use crate::storage;

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// A directory of keystore files.
#[derive(Debug, Clone)]
pub struct Vault {
    dir: PathBuf,
    scrypt: ScryptConfig,
}

impl Vault {
    /// Open the vault at `dir` with default scrypt parameters.
    ///
    /// Nothing touches the filesystem until the first operation.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            scrypt: ScryptConfig::default(),
        }
    }

    /// Open the vault described by `config`.
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            scrypt: config.scrypt,
        }
    }

    /// Directory holding the keystore files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All accounts whose keystore files load cleanly.
    ///
    /// Unreadable, tampered or invalid files are skipped. The directory is
    /// created (owner-only) if missing.
    pub async fn list(&self) -> Result<Vec<Account>> {
        let entries = storage::list(&self.dir).await?;
        let mut accounts = Vec::with_capacity(entries.len());
        for (path, keystore) in entries {
            match Account::new(path, keystore) {
                Ok(account) => accounts.push(account),
                Err(e) => debug!(error = %e, "skipping keystore with unusable address"),
            }
        }
        debug!(dir = %self.dir.display(), count = accounts.len(), "listed accounts");
        Ok(accounts)
    }

    /// Persist `keystore` as a new account.
    pub async fn import(&self, keystore: Keystore) -> Result<Account> {
        keystore::validate(&keystore)?;
        storage::ensure_dir(&self.dir).await?;
        let path = storage::save(&self.dir, &keystore).await?;
        let account = Account::new(path, keystore)?;
        info!(address = %account.address, path = %account.path.display(), "imported account");
        Ok(account)
    }

    /// Encrypt `key` with this vault's scrypt parameters.
    ///
    /// Scrypt runs on the blocking thread pool.
    pub async fn encrypt(
        &self,
        key: &PrivateKey,
        password: &str,
        meta: Option<Meta>,
    ) -> Result<Keystore> {
        let key = key.clone();
        let password = Zeroizing::new(password.to_owned());
        let scrypt = self.scrypt;
        tokio::task::spawn_blocking(move || keystore::encrypt_with(&key, &password, meta, &scrypt))
            .await
            .map_err(|e| KeyvaultError::Internal(format!("encrypt task failed: {e}")))?
    }

    /// Encrypt `key` and import the result as a new account.
    pub async fn create(
        &self,
        key: &PrivateKey,
        password: &str,
        meta: Option<Meta>,
    ) -> Result<Account> {
        let keystore = self.encrypt(key, password, meta).await?;
        self.import(keystore).await
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// One stored key: its address, its current keystore and the backing file.
#[derive(Debug, Clone)]
pub struct Account {
    address: Address,
    keystore: Keystore,
    path: PathBuf,
}

impl Account {
    fn new(path: PathBuf, keystore: Keystore) -> Result<Self> {
        let address = Address::from_hex(&keystore.address)?;
        Ok(Self {
            address,
            keystore,
            path,
        })
    }

    /// Address of the stored key, parsed from the keystore.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The encrypted keystore currently representing this account.
    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    /// The file currently backing this account.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the keystore, e.g. after a password change.
    ///
    /// The new keystore is written next to the current file. If its content
    /// hash differs, the old file is removed afterwards; failing to remove it
    /// is logged and not returned, since the new file is already authoritative.
    pub async fn update(&mut self, keystore: Keystore) -> Result<()> {
        keystore::validate(&keystore)?;
        let address = Address::from_hex(&keystore.address)?;

        let dir = self
            .path
            .parent()
            .ok_or_else(|| KeyvaultError::Internal("account path has no parent".into()))?
            .to_path_buf();
        let new_path = storage::save(&dir, &keystore).await?;

        if new_path != self.path {
            if let Err(e) = tokio::fs::remove_file(&self.path).await {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove superseded keystore file"
                );
            }
        }

        info!(address = %address, path = %new_path.display(), "updated account");
        *self = Self {
            address,
            keystore,
            path: new_path,
        };
        Ok(())
    }

    /// Delete the backing file. The account is consumed.
    pub async fn unlink(self) -> Result<()> {
        tokio::fs::remove_file(&self.path).await?;
        info!(address = %self.address, path = %self.path.display(), "unlinked account");
        Ok(())
    }

    /// Decrypt the current keystore on the blocking thread pool.
    pub async fn decrypt(&self, password: &str) -> Result<PrivateKey> {
        let keystore = self.keystore.clone();
        let password = Zeroizing::new(password.to_owned());
        tokio::task::spawn_blocking(move || keystore::decrypt(&keystore, &password))
            .await
            .map_err(|e| KeyvaultError::Internal(format!("decrypt task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_vault(dir: &Path) -> Vault {
        Vault::from_config(
            &VaultConfig::new(dir).with_scrypt(ScryptConfig::new().with_n(1024)),
        )
    }

    #[tokio::test]
    async fn create_and_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let vault = fast_vault(dir.path());
        let key = PrivateKey::from_bytes([0x07; 32]);

        let account = vault.create(&key, "pw", None).await.unwrap();
        assert_eq!(account.address(), key.address().unwrap());
        assert!(account.path().starts_with(dir.path()));
        assert_eq!(account.decrypt("pw").await.unwrap(), key);
        assert!(matches!(
            account.decrypt("nope").await,
            Err(KeyvaultError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn import_rejects_invalid_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let vault = fast_vault(dir.path());
        let mut ks = vault
            .encrypt(&PrivateKey::from_bytes([0x07; 32]), "pw", None)
            .await
            .unwrap();
        ks.address = "zz".into();

        assert!(matches!(
            vault.import(ks).await,
            Err(KeyvaultError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn update_with_same_content_keeps_path() {
        let dir = tempfile::tempdir().unwrap();
        let vault = fast_vault(dir.path());
        let mut account = vault
            .create(&PrivateKey::from_bytes([0x07; 32]), "pw", None)
            .await
            .unwrap();
        let before = account.path().to_path_buf();

        let same = account.keystore().clone();
        account.update(same).await.unwrap();

        assert_eq!(account.path(), before);
        assert!(before.exists());
    }

    #[tokio::test]
    async fn unlink_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let vault = fast_vault(dir.path());
        let account = vault
            .create(&PrivateKey::from_bytes([0x07; 32]), "pw", None)
            .await
            .unwrap();
        let path = account.path().to_path_buf();

        account.unlink().await.unwrap();
        assert!(!path.exists());
        assert!(vault.list().await.unwrap().is_empty());
    }
}
