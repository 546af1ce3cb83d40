//! Vault configuration.
//!
//! [`ScryptConfig`] holds the cost parameters used when sealing a new
//! keystore, and [`VaultConfig`] ties them to the vault directory. Defaults
//! match the parameters written by common wallet tooling, and both types can
//! be built fluently or loaded from TOML:
//!
//! ```toml
//! dir = "/home/alice/.keyvault"
//!
//! [scrypt]
//! n = 262144
//! r = 8
//! p = 1
//! dklen = 32
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KeyvaultError, Result};

/// Ceiling on the scrypt working set (`128 * r * n * p` bytes).
///
/// Stored parameters are read from files, so they are bounded before any
/// memory is allocated. The default parameters need 256 MiB.
pub const MAX_SCRYPT_MEMORY: u64 = 280_000_000;

/// Largest derived key length accepted from any KDF.
pub const MAX_DKLEN: u32 = 64;

/// Scrypt cost parameters for newly encrypted keystores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScryptConfig {
    /// CPU/memory cost. Must be a power of two greater than 1.
    ///
    /// Default: **262 144** (2^18).
    pub n: u32,

    /// Block size.
    ///
    /// Default: **8**.
    pub r: u32,

    /// Parallelization.
    ///
    /// Default: **1**.
    pub p: u32,

    /// Derived key length in bytes. At least 32: the first half keys the
    /// cipher and the second half keys the MAC.
    ///
    /// Default: **32**.
    pub dklen: u32,
}

impl Default for ScryptConfig {
    fn default() -> Self {
        Self {
            n: 262_144,
            r: 8,
            p: 1,
            dklen: 32,
        }
    }
}

impl ScryptConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CPU/memory cost.
    pub fn with_n(mut self, n: u32) -> Self {
        self.n = n;
        self
    }

    /// Set the block size.
    pub fn with_r(mut self, r: u32) -> Self {
        self.r = r;
        self
    }

    /// Set the parallelization factor.
    pub fn with_p(mut self, p: u32) -> Self {
        self.p = p;
        self
    }

    /// Set the derived key length.
    pub fn with_dklen(mut self, dklen: u32) -> Self {
        self.dklen = dklen;
        self
    }

    /// Check that the parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns [`KeyvaultError::InvalidKdfParams`] when `n` is not a power of
    /// two above 1, `r` or `p` is zero, `dklen` is outside `32..=64`, or the
    /// working set exceeds [`MAX_SCRYPT_MEMORY`].
    pub fn validate(&self) -> Result<()> {
        if self.n < 2 || !self.n.is_power_of_two() {
            return Err(KeyvaultError::InvalidKdfParams {
                reason: format!("n must be a power of two greater than 1, got {}", self.n),
            });
        }
        if self.r == 0 || self.p == 0 {
            return Err(KeyvaultError::InvalidKdfParams {
                reason: format!("r and p must be non-zero, got r={} p={}", self.r, self.p),
            });
        }
        if self.dklen < 32 || self.dklen > MAX_DKLEN {
            return Err(KeyvaultError::InvalidKdfParams {
                reason: format!("dklen must be between 32 and {MAX_DKLEN}, got {}", self.dklen),
            });
        }
        let memory = self.memory_cost();
        if memory > MAX_SCRYPT_MEMORY {
            return Err(KeyvaultError::InvalidKdfParams {
                reason: format!(
                    "scrypt needs {memory} bytes (n={} r={} p={}), limit is {MAX_SCRYPT_MEMORY}",
                    self.n, self.r, self.p
                ),
            });
        }
        Ok(())
    }

    /// Bytes of memory scrypt needs for these parameters.
    pub fn memory_cost(&self) -> u64 {
        // Each factor fits in 32 bits, so the product cannot overflow u128.
        let bytes = 128u128 * u128::from(self.r) * u128::from(self.n) * u128::from(self.p);
        u64::try_from(bytes).unwrap_or(u64::MAX)
    }

    /// Base-2 logarithm of `n`, as the scrypt primitive expects it.
    pub(crate) fn log_n(&self) -> u8 {
        // n is a power of two after validate(), so this is exact.
        self.n.trailing_zeros() as u8
    }
}

/// Top-level vault configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding the keystore files.
    pub dir: PathBuf,

    /// Cost parameters for new keystores.
    #[serde(default)]
    pub scrypt: ScryptConfig,
}

impl VaultConfig {
    /// Create a configuration for `dir` with default scrypt parameters.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            scrypt: ScryptConfig::default(),
        }
    }

    /// Replace the scrypt parameters.
    pub fn with_scrypt(mut self, scrypt: ScryptConfig) -> Self {
        self.scrypt = scrypt;
        self
    }

    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| KeyvaultError::Config {
            reason: format!("failed to parse TOML config: {e}"),
        })?;
        config.scrypt.validate().map_err(|e| KeyvaultError::Config {
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| KeyvaultError::Config {
            reason: format!("failed to read config file {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), dir = %config.dir.display(), "loaded vault config");
        Ok(config)
    }
}
