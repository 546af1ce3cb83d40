//! Private key and account address types.
//!
//! A [`PrivateKey`] is a raw 32-byte secp256k1 scalar. It is wiped from memory
//! when dropped and never printed. An [`Address`] is the 20-byte account
//! identifier derived from it: the last 20 bytes of the Keccak-256 hash of the
//! uncompressed public key (without its `0x04` tag byte).

use std::fmt;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use ring::rand::{SecureRandom, SystemRandom};
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{KeyvaultError, Result};

/// Length of a raw private key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of an account address in bytes.
pub const ADDRESS_LEN: usize = 20;

// ---------------------------------------------------------------------------
// Private key
// ---------------------------------------------------------------------------

/// A raw secp256k1 private key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; KEY_LEN]);

impl PrivateKey {
    /// Wrap 32 raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a private key out of a slice.
    ///
    /// # Errors
    ///
    /// Returns [`KeyvaultError::InvalidPrivateKey`] if `bytes` is not exactly
    /// 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| KeyvaultError::InvalidPrivateKey {
                    reason: format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
                })?;
        Ok(Self(raw))
    }

    /// Generate a fresh key from the OS random source.
    pub fn generate() -> Result<Self> {
        loop {
            let candidate = Self(random_array::<KEY_LEN>()?);
            // Zero and values >= the curve order are not valid scalars.
            if k256::SecretKey::from_slice(&candidate.0).is_ok() {
                return Ok(candidate);
            }
        }
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Derive the account address of this key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyvaultError::InvalidPrivateKey`] if the bytes are not a
    /// valid secp256k1 scalar.
    pub fn address(&self) -> Result<Address> {
        let secret =
            k256::SecretKey::from_slice(&self.0).map_err(|_| KeyvaultError::InvalidPrivateKey {
                reason: "not a valid secp256k1 scalar".into(),
            })?;
        let point = secret.public_key().to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);

        let mut address = [0u8; ADDRESS_LEN];
        address.copy_from_slice(&hash[KEY_LEN - ADDRESS_LEN..]);
        Ok(Address(address))
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl Eq for PrivateKey {}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Parse 40 hex characters, with or without a `0x` prefix, in any case.
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(digits, &mut bytes).map_err(|e| KeyvaultError::MalformedData {
            reason: format!("invalid address {s:?}: {e}"),
        })?;
        Ok(Self(bytes))
    }

    /// Lowercase hex without prefix, the form stored in keystores.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Borrow the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Keccak-256 of `data`.
pub(crate) fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Fill a fixed-size array from the OS random source.
pub(crate) fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| KeyvaultError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}
