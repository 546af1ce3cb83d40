//! Checksummed, atomic keystore files.
//!
//! Each keystore lives in its own file named
//! `<address>-<checksum>.keystore`, where `checksum` is the first four bytes
//! of the BLAKE2b-256 hash of the file content, in hex. The name therefore
//! doubles as a tamper check: a file edited, truncated or renamed outside this
//! module no longer matches its own name and is refused by [`load`].
//!
//! Writes go to a uniquely named temporary file in the same directory, are
//! flushed to disk, then renamed over the final name. Readers see either the
//! previous complete file or the new complete file.
//!
//! Nothing here locks the directory. Concurrent writers (other processes or
//! concurrent tasks touching the same address) must coordinate externally.

use std::path::{Path, PathBuf};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{KeyvaultError, Result};
use crate::keystore::{self, Keystore};

type Blake2b256 = Blake2b<U32>;

/// Extension of keystore files, without the dot.
pub const FILE_EXTENSION: &str = "keystore";

/// Largest keystore file [`load`] will read, in bytes.
pub const MAX_FILE_SIZE: u64 = 4096;

/// Number of hash bytes embedded in the file name.
const CHECKSUM_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// File name for a keystore with `address` whose serialized bytes are `data`.
///
/// `data` must be the exact bytes on disk, not a re-serialization.
pub fn file_name(address: &str, data: &[u8]) -> String {
    let hash = Blake2b256::digest(data);
    format!(
        "{address}-{}.{FILE_EXTENSION}",
        hex::encode(&hash[..CHECKSUM_LEN])
    )
}

// ---------------------------------------------------------------------------
// Save / load
// ---------------------------------------------------------------------------

/// Validate, serialize and atomically write `keystore` into `dir`.
///
/// Returns the path of the written file.
pub async fn save(dir: &Path, keystore: &Keystore) -> Result<PathBuf> {
    keystore::validate(keystore)?;
    let data = serde_json::to_vec(keystore)?;

    let path = dir.join(file_name(&keystore.address, &data));
    write_atomic(&path, &data).await?;

    debug!(path = %path.display(), bytes = data.len(), "saved keystore");
    Ok(path)
}

/// Read, parse, validate and checksum-verify the keystore at `path`.
///
/// # Errors
///
/// - [`KeyvaultError::OversizedFile`] if the file exceeds [`MAX_FILE_SIZE`].
/// - [`KeyvaultError::MalformedData`] if the content is not a keystore.
/// - [`KeyvaultError::Validation`] if the keystore fails validation.
/// - [`KeyvaultError::ChecksumMismatch`] if the file name does not match the
///   content.
pub async fn load(path: &Path) -> Result<Keystore> {
    let size = tokio::fs::metadata(path).await?.len();
    if size > MAX_FILE_SIZE {
        return Err(KeyvaultError::OversizedFile {
            path: path.to_path_buf(),
            size,
        });
    }

    // The file may have grown since the metadata call.
    let data = read_capped(path).await?;
    if data.len() as u64 > MAX_FILE_SIZE {
        return Err(KeyvaultError::OversizedFile {
            path: path.to_path_buf(),
            size: data.len() as u64,
        });
    }

    let keystore: Keystore =
        serde_json::from_slice(&data).map_err(|e| KeyvaultError::MalformedData {
            reason: e.to_string(),
        })?;
    keystore::validate(&keystore)?;

    let expected = file_name(&keystore.address, &data);
    let actual = path.file_name().and_then(|n| n.to_str());
    if actual != Some(expected.as_str()) {
        return Err(KeyvaultError::ChecksumMismatch {
            path: path.to_path_buf(),
        });
    }

    debug!(path = %path.display(), "loaded keystore");
    Ok(keystore)
}

/// Load every keystore file in `dir`, skipping the ones that fail.
///
/// Creates `dir` if it does not exist. Entries come back sorted by file name.
pub async fn list(dir: &Path) -> Result<Vec<(PathBuf, Keystore)>> {
    ensure_dir(dir).await?;

    let mut paths = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        match load(&path).await {
            Ok(keystore) => loaded.push((path, keystore)),
            Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable keystore"),
        }
    }
    Ok(loaded)
}

// ---------------------------------------------------------------------------
// Filesystem helpers
// ---------------------------------------------------------------------------

/// Create `dir` with owner-only permissions if it does not exist yet.
///
/// An existing directory is left as it is.
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await? {
        return Ok(());
    }

    tokio::fs::create_dir_all(dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    }

    info!(dir = %dir.display(), "created keystore directory");
    Ok(())
}

/// Read at most `MAX_FILE_SIZE + 1` bytes of `path`, enough to tell an
/// oversized file apart without buffering all of it.
async fn read_capped(path: &Path) -> Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut data = Vec::new();
    file.take(MAX_FILE_SIZE + 1).read_to_end(&mut data).await?;
    Ok(data)
}

/// Write `data` to `path` through a temporary sibling file and a rename.
///
/// The temporary file is removed afterwards whether or not the rename went
/// through.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    let result = write_and_rename(&tmp, path, data).await;

    match tokio::fs::remove_file(&tmp).await {
        Ok(()) => debug!(path = %tmp.display(), "removed leftover temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %tmp.display(), error = %e, "failed to remove temp file"),
    }

    result
}

async fn write_and_rename(tmp: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }

    let mut file = options.open(tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(tmp, path).await?;

    // Persist the rename itself. Not every filesystem allows this.
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            match tokio::fs::File::open(parent).await {
                Ok(dir) => {
                    if let Err(e) = dir.sync_all().await {
                        debug!(dir = %parent.display(), error = %e, "directory fsync failed");
                    }
                }
                Err(e) => debug!(dir = %parent.display(), error = %e, "directory open failed"),
            }
        }
    }

    Ok(())
}

/// `<path>.tmp-<random>`, unique per call.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScryptConfig;
    use crate::key::PrivateKey;

    fn sample_keystore() -> Keystore {
        let key = PrivateKey::from_bytes([0x42; 32]);
        keystore::encrypt_with(&key, "pw", None, &ScryptConfig::new().with_n(1024)).unwrap()
    }

    async fn dir_names(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut rd = tokio::fs::read_dir(dir).await.unwrap();
        while let Some(entry) = rd.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names
    }

    #[test]
    fn file_name_format() {
        let address = "7e5f4552091a69125d5dfcb7b8c2659029395bdf";
        assert_eq!(
            file_name(address, b""),
            "7e5f4552091a69125d5dfcb7b8c2659029395bdf-0e5751c0.keystore"
        );
        assert_ne!(file_name(address, b"a"), file_name(address, b"b"));
    }

    #[test]
    fn temp_paths_are_unique_siblings() {
        let path = Path::new("/vault/abc-01020304.keystore");
        let a = temp_path(path);
        let b = temp_path(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert!(
            a.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("abc-01020304.keystore.tmp-")
        );
        assert_ne!(a.extension().and_then(|e| e.to_str()), Some(FILE_EXTENSION));
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let ks = sample_keystore();

        let path = save(dir.path(), &ks).await.unwrap();
        let data = tokio::fs::read(&path).await.unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            file_name(&ks.address, &data)
        );

        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded, ks);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = save(dir.path(), &sample_keystore()).await.unwrap();

        let names = dir_names(dir.path()).await;
        assert_eq!(
            names,
            vec![path.file_name().unwrap().to_string_lossy().into_owned()]
        );
    }

    #[tokio::test]
    async fn save_rejects_invalid_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let mut ks = sample_keystore();
        ks.version = 2;

        let result = save(dir.path(), &ks).await;
        assert!(matches!(result, Err(KeyvaultError::Validation(_))));
        assert!(dir_names(dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn altered_content_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = save(dir.path(), &sample_keystore()).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let altered = text.replacen("\"version\":3", "\"version\":1", 1);
        assert_eq!(altered.len(), text.len());
        tokio::fs::write(&path, altered).await.unwrap();

        let result = load(&path).await;
        assert!(matches!(result, Err(KeyvaultError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn renamed_file_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let ks = sample_keystore();
        let path = save(dir.path(), &ks).await.unwrap();

        let renamed = dir.path().join(format!("{}-00000000.keystore", ks.address));
        tokio::fs::rename(&path, &renamed).await.unwrap();

        let result = load(&renamed).await;
        assert!(matches!(result, Err(KeyvaultError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn oversized_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.keystore");
        tokio::fs::write(&path, vec![b' '; MAX_FILE_SIZE as usize + 1])
            .await
            .unwrap();

        let result = load(&path).await;
        assert!(matches!(
            result,
            Err(KeyvaultError::OversizedFile { size, .. }) if size == MAX_FILE_SIZE + 1
        ));
    }

    #[tokio::test]
    async fn capped_read_stops_past_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.keystore");
        tokio::fs::write(&path, vec![b'x'; 1 << 20]).await.unwrap();

        let data = read_capped(&path).await.unwrap();
        assert_eq!(data.len() as u64, MAX_FILE_SIZE + 1);

        let small = dir.path().join("small.keystore");
        tokio::fs::write(&small, b"{}").await.unwrap();
        assert_eq!(read_capped(&small).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.keystore");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let result = load(&path).await;
        assert!(matches!(result, Err(KeyvaultError::MalformedData { .. })));
    }

    #[tokio::test]
    async fn invalid_container_on_disk_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut ks = sample_keystore();
        ks.id = "not-a-uuid".into();
        let data = serde_json::to_vec(&ks).unwrap();
        let path = dir.path().join(file_name(&ks.address, &data));
        tokio::fs::write(&path, &data).await.unwrap();

        let result = load(&path).await;
        assert!(matches!(result, Err(KeyvaultError::Validation(_))));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load(&dir.path().join("absent.keystore")).await;
        assert!(matches!(result, Err(KeyvaultError::Io(_))));
    }

    #[tokio::test]
    async fn list_skips_corrupt_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let ks = sample_keystore();
        let good = save(dir.path(), &ks).await.unwrap();

        tokio::fs::write(dir.path().join("broken.keystore"), b"garbage")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"hello")
            .await
            .unwrap();

        let entries = list(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, good);
        assert_eq!(entries[0].1, ks);
    }

    #[tokio::test]
    async fn list_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("vault");

        let entries = list(&dir).await.unwrap();
        assert!(entries.is_empty());
        assert!(dir.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("vault");
        ensure_dir(&dir).await.unwrap();
        let path = save(&dir, &sample_keystore()).await.unwrap();

        let dir_mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
