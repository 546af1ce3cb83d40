//! Encrypted private key containers in the Ethereum JSON keystore format.
//!
//! A [`Keystore`] seals one 32-byte private key under a password:
//!
//! - **KDF**: scrypt (`N=262144, r=8, p=1, dklen=32` by default) stretches the
//!   password with a fresh 32-byte salt. PBKDF2-HMAC-SHA256 keystores written
//!   by other tools are accepted on decrypt. Stored KDF costs are bounded
//!   ([`crate::config::MAX_SCRYPT_MEMORY`], [`MAX_PBKDF2_ITERATIONS`]) and
//!   checked before any derivation starts.
//! - **Cipher**: AES-128-CTR keyed by the first 16 bytes of the derived key,
//!   with a fresh 16-byte IV.
//! - **MAC**: `keccak256(derived_key[16..32] || ciphertext)`, checked in
//!   constant time before any plaintext is produced.
//!
//! # On-disk layout
//!
//! Field order is part of the storage format because file names carry a hash
//! of the serialized bytes (see [`crate::storage`]). Serialization emits:
//!
//! ```text
//! address, crypto { cipher, ciphertext, cipherparams { iv }, mac, kdf,
//!   kdfparams { dklen, n, r, p, salt } }, id, version, meta
//! ```
//!
//! # Versions
//!
//! Version 3 and legacy version 1 containers share the record layout but
//! differ in the cipher key: version 1 uses `keccak256(derived_key[0..16])`
//! truncated to 16 bytes. New containers are always version 3.

use std::num::NonZeroU32;
use std::sync::LazyLock;

use aes::cipher::{KeyIvInit, StreamCipher};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::{MAX_DKLEN, ScryptConfig};
use crate::error::{KeyvaultError, Result, ValidationError};
use crate::key::{self, KEY_LEN, PrivateKey};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

/// Cipher identifier written into every container.
pub const CIPHER: &str = "aes-128-ctr";

/// Version written by [`encrypt`].
pub const CURRENT_VERSION: u32 = 3;

/// Length of the scrypt salt in bytes.
pub const SALT_LEN: usize = 32;

/// Length of the AES-CTR initialization vector in bytes.
pub const IV_LEN: usize = 16;

/// PRF identifier accepted for PBKDF2 keystores.
const PBKDF2_PRF: &str = "hmac-sha256";

/// Most PBKDF2 rounds a stored keystore may ask for.
pub const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{40}$").expect("address pattern is valid"));

static ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .expect("uuid pattern is valid")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An encrypted private key container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keystore {
    /// Account address, 40 hex characters without prefix.
    pub address: String,

    /// Cipher and KDF parameters plus the sealed key.
    #[serde(alias = "Crypto")]
    pub crypto: CryptoParams,

    /// Random UUID identifying this container.
    pub id: String,

    /// Container version, 1 or 3.
    pub version: u32,

    /// Caller-defined metadata, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// The `crypto` section of a keystore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoParams {
    /// Cipher name; only `aes-128-ctr` decrypts.
    pub cipher: String,

    /// The encrypted private key.
    #[serde(with = "hex")]
    pub ciphertext: Vec<u8>,

    pub cipherparams: CipherParams,

    /// `keccak256(derived_key[16..32] || ciphertext)`.
    #[serde(with = "hex")]
    pub mac: Vec<u8>,

    /// Written as the `kdf` and `kdfparams` fields.
    #[serde(flatten)]
    pub kdf: Kdf,
}

/// Cipher parameters of a keystore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CipherParams {
    /// AES-CTR initial counter block, 16 bytes.
    #[serde(with = "hex")]
    pub iv: Vec<u8>,
}

/// Key derivation function and its parameters.
///
/// Serialized as the sibling fields `kdf` and `kdfparams`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kdf", content = "kdfparams", rename_all = "lowercase")]
pub enum Kdf {
    Scrypt(ScryptParams),
    Pbkdf2(Pbkdf2Params),
}

/// Stored scrypt parameters. See [`ScryptConfig`] for their meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScryptParams {
    pub dklen: u32,
    pub n: u32,
    pub r: u32,
    pub p: u32,
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
}

/// Stored PBKDF2 parameters, as written by other keystore tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pbkdf2Params {
    /// Iteration count, at most [`MAX_PBKDF2_ITERATIONS`].
    pub c: u32,
    /// Derived key length in bytes.
    pub dklen: u32,
    /// Pseudo-random function; only `hmac-sha256` is supported.
    pub prf: String,
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
}

/// Caller-defined information attached to a keystore.
///
/// Kept as an arbitrary JSON object and never interpreted, so fields of any
/// type survive a load and save unchanged. `identity` and `provider` are the
/// conventional keys. Keys are written back in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Meta(pub serde_json::Map<String, serde_json::Value>);

impl Meta {
    /// Metadata with the conventional `identity` and `provider` fields set.
    pub fn new(identity: impl Into<String>, provider: impl Into<String>) -> Self {
        let mut meta = Self::default();
        meta.insert("identity", serde_json::Value::String(identity.into()));
        meta.insert("provider", serde_json::Value::String(provider.into()));
        meta
    }

    /// The `identity` field, if present and a string.
    pub fn identity(&self) -> Option<&str> {
        self.0.get("identity").and_then(serde_json::Value::as_str)
    }

    /// The `provider` field, if present and a string.
    pub fn provider(&self) -> Option<&str> {
        self.0.get("provider").and_then(serde_json::Value::as_str)
    }

    /// Any field, whatever its type.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Set `key`, returning the previous value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        self.0.insert(key.into(), value.into())
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Meta {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `key` under `password` with the default scrypt parameters.
///
/// Every call draws a fresh salt, IV and id, so encrypting the same key twice
/// yields unrelated containers.
pub fn encrypt(key: &PrivateKey, password: &str, meta: Option<Meta>) -> Result<Keystore> {
    encrypt_with(key, password, meta, &ScryptConfig::default())
}

/// Encrypt `key` under `password` with explicit scrypt parameters.
///
/// # Errors
///
/// Returns [`KeyvaultError::InvalidKdfParams`] for unusable parameters,
/// [`KeyvaultError::InvalidPrivateKey`] if `key` is not a valid secp256k1
/// scalar, and [`KeyvaultError::Internal`] if the random source fails.
pub fn encrypt_with(
    key: &PrivateKey,
    password: &str,
    meta: Option<Meta>,
    scrypt: &ScryptConfig,
) -> Result<Keystore> {
    scrypt.validate()?;
    let address = key.address()?;

    let salt = key::random_array::<SALT_LEN>()?;
    let iv = key::random_array::<IV_LEN>()?;

    let kdf = Kdf::Scrypt(ScryptParams {
        dklen: scrypt.dklen,
        n: scrypt.n,
        r: scrypt.r,
        p: scrypt.p,
        salt: salt.to_vec(),
    });
    let derived = derive_key(&kdf, password)?;

    let mut ciphertext = key.as_bytes().to_vec();
    apply_keystream(&derived[..16], &iv, &mut ciphertext)?;
    let mac = compute_mac(&derived, &ciphertext);

    tracing::trace!(
        address = %address,
        n = scrypt.n,
        "encrypted private key into keystore"
    );

    Ok(Keystore {
        address: address.to_hex(),
        crypto: CryptoParams {
            cipher: CIPHER.to_string(),
            ciphertext,
            cipherparams: CipherParams { iv: iv.to_vec() },
            mac: mac.to_vec(),
            kdf,
        },
        id: Uuid::new_v4().to_string(),
        version: CURRENT_VERSION,
        meta,
    })
}

// ---------------------------------------------------------------------------
// Decryption
// ---------------------------------------------------------------------------

/// Recover the private key sealed in `keystore`.
///
/// # Errors
///
/// Returns [`KeyvaultError::AuthenticationFailed`] when the MAC does not
/// match, which means the password is wrong or the container was altered.
/// Structural problems (validation, unknown cipher, bad KDF parameters,
/// malformed lengths) surface as their own variants.
pub fn decrypt(keystore: &Keystore, password: &str) -> Result<PrivateKey> {
    validate(keystore)?;

    let crypto = &keystore.crypto;
    if !crypto.cipher.eq_ignore_ascii_case(CIPHER) {
        return Err(KeyvaultError::UnsupportedCipher {
            cipher: crypto.cipher.clone(),
        });
    }
    if crypto.mac.len() != 32 {
        return Err(KeyvaultError::MalformedData {
            reason: format!("mac must be 32 bytes, got {}", crypto.mac.len()),
        });
    }

    let derived = derive_key(&crypto.kdf, password)?;

    let expected = compute_mac(&derived, &crypto.ciphertext);
    if !bool::from(expected.as_slice().ct_eq(crypto.mac.as_slice())) {
        tracing::debug!(id = %keystore.id, "keystore mac mismatch");
        return Err(KeyvaultError::AuthenticationFailed);
    }

    let cipher_key: Zeroizing<[u8; 16]> = match keystore.version {
        1 => {
            let hashed = Zeroizing::new(key::keccak256(&derived[..16]));
            let mut k = Zeroizing::new([0u8; 16]);
            k.copy_from_slice(&hashed[..16]);
            k
        }
        _ => {
            let mut k = Zeroizing::new([0u8; 16]);
            k.copy_from_slice(&derived[..16]);
            k
        }
    };

    let mut plaintext = Zeroizing::new(crypto.ciphertext.clone());
    apply_keystream(cipher_key.as_slice(), &crypto.cipherparams.iv, &mut plaintext)?;

    if plaintext.len() != KEY_LEN {
        return Err(KeyvaultError::InvalidPrivateKey {
            reason: format!("decrypted {} bytes, expected {KEY_LEN}", plaintext.len()),
        });
    }

    tracing::trace!(id = %keystore.id, version = keystore.version, "decrypted keystore");
    PrivateKey::from_slice(&plaintext)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Structural check of a container. No I/O, no cryptography.
pub fn validate(keystore: &Keystore) -> std::result::Result<(), ValidationError> {
    if keystore.version != 1 && keystore.version != 3 {
        return Err(ValidationError::UnsupportedVersion {
            version: keystore.version,
        });
    }
    if !ADDRESS_RE.is_match(&keystore.address) {
        return Err(ValidationError::MalformedAddress {
            address: keystore.address.clone(),
        });
    }
    if !ID_RE.is_match(&keystore.id) {
        return Err(ValidationError::MalformedId {
            id: keystore.id.clone(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Run the container's KDF over `password`.
fn derive_key(kdf: &Kdf, password: &str) -> Result<Zeroizing<Vec<u8>>> {
    match kdf {
        Kdf::Scrypt(params) => {
            let cfg = ScryptConfig {
                n: params.n,
                r: params.r,
                p: params.p,
                dklen: params.dklen,
            };
            cfg.validate()?;
            let scrypt_params = scrypt::Params::new(cfg.log_n(), cfg.r, cfg.p, cfg.dklen as usize)
                .map_err(|e| KeyvaultError::InvalidKdfParams {
                    reason: e.to_string(),
                })?;

            let mut out = Zeroizing::new(vec![0u8; cfg.dklen as usize]);
            scrypt::scrypt(password.as_bytes(), &params.salt, &scrypt_params, &mut out).map_err(
                |e| KeyvaultError::InvalidKdfParams {
                    reason: e.to_string(),
                },
            )?;
            Ok(out)
        }
        Kdf::Pbkdf2(params) => {
            if !params.prf.eq_ignore_ascii_case(PBKDF2_PRF) {
                return Err(KeyvaultError::InvalidKdfParams {
                    reason: format!("unsupported prf {:?}", params.prf),
                });
            }
            if params.dklen < 32 || params.dklen > MAX_DKLEN {
                return Err(KeyvaultError::InvalidKdfParams {
                    reason: format!(
                        "dklen must be between 32 and {MAX_DKLEN}, got {}",
                        params.dklen
                    ),
                });
            }
            if params.c > MAX_PBKDF2_ITERATIONS {
                return Err(KeyvaultError::InvalidKdfParams {
                    reason: format!(
                        "pbkdf2 iteration count {} exceeds {MAX_PBKDF2_ITERATIONS}",
                        params.c
                    ),
                });
            }
            let iterations =
                NonZeroU32::new(params.c).ok_or_else(|| KeyvaultError::InvalidKdfParams {
                    reason: "pbkdf2 iteration count must be non-zero".into(),
                })?;

            let mut out = Zeroizing::new(vec![0u8; params.dklen as usize]);
            ring::pbkdf2::derive(
                ring::pbkdf2::PBKDF2_HMAC_SHA256,
                iterations,
                &params.salt,
                password.as_bytes(),
                &mut out,
            );
            Ok(out)
        }
    }
}

/// `keccak256(derived[16..32] || ciphertext)`.
fn compute_mac(derived: &[u8], ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(&derived[16..32]);
    hasher.update(ciphertext);
    hasher.finalize().into()
}

/// AES-128-CTR is its own inverse, so this both encrypts and decrypts.
fn apply_keystream(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    let mut cipher =
        Aes128Ctr::new_from_slices(key, iv).map_err(|_| KeyvaultError::MalformedData {
            reason: format!("iv must be {IV_LEN} bytes, got {}", iv.len()),
        })?;
    cipher.apply_keystream(buf);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
