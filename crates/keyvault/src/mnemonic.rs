//! BIP-39 recovery phrases and deterministic key derivation.
//!
//! A phrase is turned into a 64-byte seed (empty passphrase), and the key is
//! derived from that seed along the fixed BIP-32 path [`DERIVATION_PATH`]
//! (SLIP-0044 coin type 818). The path is part of the recovery contract:
//! other wallets derive the same key from the same words only if it never
//! changes.
//!
//! Derivation follows the BIP-39 seed function exactly and does not check the
//! phrase against the word list: any word sequence yields a key, as it does in
//! other recovery tools. Use [`validate`] to check a phrase first.

use std::num::NonZeroU32;

use bip39::{Language, Mnemonic};
use tiny_hderive::bip32::ExtendedPrivKey;
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use crate::error::{KeyvaultError, Result};
use crate::key::{self, Address, PrivateKey};

/// Hierarchical derivation path of the account key.
pub const DERIVATION_PATH: &str = "m/44'/818'/0'/0/0";

/// Number of words in a generated phrase.
pub const WORD_COUNT: usize = 12;

/// Entropy behind a generated phrase (128 bits).
const ENTROPY_LEN: usize = 16;

/// PBKDF2-HMAC-SHA512 rounds of the BIP-39 seed function.
const SEED_ROUNDS: u32 = 2048;

/// Seed salt prefix; the (empty) passphrase would follow it.
const SEED_SALT: &[u8] = b"mnemonic";

const SEED_LEN: usize = 64;

/// Generate a fresh 12-word recovery phrase.
pub fn generate() -> Result<Vec<String>> {
    let entropy = Zeroizing::new(key::random_array::<ENTROPY_LEN>()?);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy.as_slice()).map_err(
        |e| KeyvaultError::InvalidMnemonic {
            reason: e.to_string(),
        },
    )?;
    Ok(mnemonic.words().map(str::to_owned).collect())
}

/// Whether `words` form a valid English BIP-39 phrase: known words, a
/// supported word count and a matching checksum.
pub fn validate<S: AsRef<str>>(words: &[S]) -> bool {
    let phrase = join(words);
    Mnemonic::parse_in(Language::English, phrase.as_str()).is_ok()
}

/// Derive the account private key from a recovery phrase.
///
/// The words are joined with single spaces, NFKD-normalized and stretched
/// into the BIP-39 seed. The phrase itself is not validated.
///
/// # Errors
///
/// Returns [`KeyvaultError::KeyDerivationFailed`] in the negligible case
/// where BIP-32 derivation produces no valid key.
pub fn derive_private_key<S: AsRef<str>>(words: &[S]) -> Result<PrivateKey> {
    let seed = seed(words);

    let ext = ExtendedPrivKey::derive(seed.as_slice(), DERIVATION_PATH).map_err(|e| {
        KeyvaultError::KeyDerivationFailed {
            reason: format!("{e:?}"),
        }
    })?;

    Ok(PrivateKey::from_bytes(ext.secret()))
}

/// Derive the account address of a recovery phrase.
pub fn derive_address<S: AsRef<str>>(words: &[S]) -> Result<Address> {
    derive_private_key(words)?.address()
}

/// BIP-39 seed of `words` with an empty passphrase.
fn seed<S: AsRef<str>>(words: &[S]) -> Zeroizing<[u8; SEED_LEN]> {
    let phrase = join(words);
    let normalized: Zeroizing<String> = Zeroizing::new(phrase.as_str().nfkd().collect());
    let rounds = NonZeroU32::new(SEED_ROUNDS).expect("SEED_ROUNDS is non-zero");

    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA512,
        rounds,
        SEED_SALT,
        normalized.as_bytes(),
        seed.as_mut_slice(),
    );
    seed
}

fn join<S: AsRef<str>>(words: &[S]) -> Zeroizing<String> {
    Zeroizing::new(
        words
            .iter()
            .map(|w| w.as_ref())
            .collect::<Vec<&str>>()
            .join(" "),
    )
}
