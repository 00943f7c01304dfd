//! On-disk caches for exchanged credentials and Okta sessions.
//!
//! Each cache is one JSON object keyed by profile (or username). Readers take
//! no lock. Writers hold an exclusive lock on a sidecar `.lock` file for the
//! whole read-modify-write and replace the file with a rename, so a reader
//! sees either the old or the new document.

pub mod credentials;
pub mod session;

use crate::{
    aws::credentials::TemporaryCredential,
    error::{Error, Result},
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Credentials are treated as expired this long before their expiry.
pub const SAFETY_MARGIN: TimeDelta = TimeDelta::seconds(60);

pub const CACHE_DIR_NAME: &str = "okta-aws-login";

/// Whether `credential` can still be handed out at `now`.
#[must_use]
pub fn is_valid(credential: &TemporaryCredential, now: DateTime<Utc>) -> bool {
    now < credential.expiration - SAFETY_MARGIN
}

/// `<user cache dir>/okta-aws-login`
///
/// # Errors
/// `Io` when the platform has no cache directory.
pub fn default_cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
        .map(|dir| dir.join(CACHE_DIR_NAME))
        .ok_or_else(|| {
            Error::io(
                CACHE_DIR_NAME,
                std::io::Error::new(ErrorKind::NotFound, "no cache directory"),
            )
        })
}

/// Exclusive advisory lock on `<path>.lock`, released on drop.
pub(crate) struct FileLock {
    _file: File,
}

impl FileLock {
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let lock_path = sidecar(path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::io(&lock_path, e))?;

        file.lock().map_err(|e| Error::io(&lock_path, e))?;
        debug!("locked {}", lock_path.display());

        Ok(Self { _file: file })
    }
}

fn sidecar(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Replace `path` with `contents` through a temporary file in the same
/// directory. The file is readable by the owner only.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    tmp.write_all(contents).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::io(tmp.path(), e))?;
    }

    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;

    Ok(())
}

/// A JSON object of `T` values stored in one file.
pub(crate) struct JsonStore<T> {
    path: PathBuf,
    _entry: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonStore<T> {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _entry: PhantomData,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Current entries; a missing file is empty, an unreadable one is logged
    /// and treated as empty.
    pub(crate) fn load(&self) -> BTreeMap<String, T> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!("cannot read cache {}: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };

        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("ignoring corrupt cache {}: {}", self.path.display(), e);
            BTreeMap::new()
        })
    }

    /// Read-modify-write under the lock.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut BTreeMap<String, T>) -> R) -> Result<R> {
        let _lock = FileLock::acquire(&self.path)?;

        let mut entries = self.load();
        let result = f(&mut entries);

        let json = serde_json::to_vec_pretty(&entries)
            .map_err(|e| Error::Protocol(format!("cannot serialize cache: {e}")))?;
        write_atomic(&self.path, &json)?;

        Ok(result)
    }
}
