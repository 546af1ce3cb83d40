//! Keyvault error types.
//!
//! Every public API in this crate returns [`KeyvaultError`]. The variants are
//! grouped by the layer that raises them so callers can tell a wrong password
//! apart from a damaged file or a structurally invalid container.

use std::path::PathBuf;

/// Structural problems found by [`crate::keystore::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The container version is neither 1 nor 3.
    #[error("invalid keystore: unsupported version {version}")]
    UnsupportedVersion { version: u32 },

    /// The address is not 40 hex characters.
    #[error("invalid keystore: malformed address {address:?}")]
    MalformedAddress { address: String },

    /// The id is not a canonical UUID string.
    #[error("invalid keystore: malformed id {id:?}")]
    MalformedId { id: String },
}

/// Unified error type for the keyvault crate.
#[derive(Debug, thiserror::Error)]
pub enum KeyvaultError {
    // -- Codec errors -------------------------------------------------------
    /// The container failed structural validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// MAC verification failed: wrong password or tampered ciphertext.
    #[error("authentication failed: wrong password or corrupted keystore")]
    AuthenticationFailed,

    /// The container names a cipher this crate cannot decrypt.
    #[error("unsupported cipher: {cipher}")]
    UnsupportedCipher { cipher: String },

    /// The KDF parameters are out of range.
    #[error("invalid kdf parameters: {reason}")]
    InvalidKdfParams { reason: String },

    /// The bytes are not a usable secp256k1 private key.
    #[error("invalid private key: {reason}")]
    InvalidPrivateKey { reason: String },

    // -- Derivation errors --------------------------------------------------
    /// The recovery phrase is not a valid BIP-39 mnemonic.
    #[error("invalid mnemonic: {reason}")]
    InvalidMnemonic { reason: String },

    /// Hierarchical-deterministic derivation failed.
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    // -- Storage errors -----------------------------------------------------
    /// The keystore file is larger than the read ceiling.
    #[error("keystore file too large: {} ({size} bytes)", path.display())]
    OversizedFile { path: PathBuf, size: u64 },

    /// The keystore file could not be parsed.
    #[error("malformed keystore data: {reason}")]
    MalformedData { reason: String },

    /// The file name does not match the checksum of the file content.
    #[error("keystore file checksum incorrect: {}", path.display())]
    ChecksumMismatch { path: PathBuf },

    // -- Configuration ------------------------------------------------------
    /// Configuration could not be loaded or is out of range.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    // -- Underlying errors --------------------------------------------------
    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Random source failure or a lost blocking task.
    #[error("internal keyvault error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KeyvaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_converts() {
        let err: KeyvaultError = ValidationError::UnsupportedVersion { version: 2 }.into();
        assert!(matches!(
            err,
            KeyvaultError::Validation(ValidationError::UnsupportedVersion { version: 2 })
        ));
        assert_eq!(err.to_string(), "invalid keystore: unsupported version 2");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: KeyvaultError = io.into();
        assert!(err.to_string().starts_with("io error:"));
    }
}
