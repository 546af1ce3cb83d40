//! Local custody of secp256k1 private keys.
//!
//! Keys are sealed into password-protected JSON keystores (scrypt +
//! AES-128-CTR + Keccak MAC), derived deterministically from BIP-39 recovery
//! phrases, and persisted as checksummed files written atomically into an
//! owner-only directory.
//!
//! # Modules
//!
//! - [`keystore`]: encrypt, decrypt and validate keystore containers.
//! - [`mnemonic`]: recovery phrase generation and key derivation.
//! - [`storage`]: file naming, atomic save, integrity-checked load and listing.
//! - [`account`]: the [`Vault`] directory handle and [`Account`] façade.
//! - [`key`]: private keys and addresses.
//! - [`config`]: scrypt cost and vault directory settings.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use keyvault::{mnemonic, Vault};
//!
//! # async fn example() -> keyvault::Result<()> {
//! // Create a recovery phrase and the key behind it.
//! let words = mnemonic::generate()?;
//! let key = mnemonic::derive_private_key(&words)?;
//!
//! // Seal the key and store it.
//! let vault = Vault::new("data/keys");
//! let account = vault.create(&key, "correct horse", None).await?;
//! println!("stored {} at {}", account.address(), account.path().display());
//!
//! // Later: find it again and unlock it.
//! for account in vault.list().await? {
//!     let key = account.decrypt("correct horse").await?;
//!     assert_eq!(key.address()?, account.address());
//! }
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod config;
pub mod error;
pub mod key;
pub mod keystore;
pub mod mnemonic;
pub mod storage;

// Re-export the most commonly used types at the crate root for convenience.
pub use account::{Account, Vault};
pub use config::{ScryptConfig, VaultConfig};
pub use error::{KeyvaultError, Result, ValidationError};
pub use key::{Address, PrivateKey};
pub use keystore::{Keystore, Meta};
