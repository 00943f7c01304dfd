//! Where exchanged credentials are written for the AWS tooling.

use crate::{
    aws::credentials::TemporaryCredential,
    cache::{FileLock, write_atomic},
    error::{Error, Result},
};
use ini::Ini;
use secrecy::ExposeSecret;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::info;

pub const SHARED_CREDENTIALS_FILE_ENV: &str = "AWS_SHARED_CREDENTIALS_FILE";

pub trait CredentialSink: Send + Sync {
    /// # Errors
    /// `Io` when the destination cannot be written.
    fn write(&self, profile: &str, credential: &TemporaryCredential) -> Result<()>;
}

/// The AWS shared credentials file (`~/.aws/credentials`).
///
/// Only the keys of the target section are replaced, other profiles and any
/// other keys in the section are left alone.
#[derive(Debug, Clone)]
pub struct SharedCredentialsFile {
    path: PathBuf,
}

impl SharedCredentialsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$AWS_SHARED_CREDENTIALS_FILE` or `~/.aws/credentials`.
    ///
    /// # Errors
    /// `Io` without a home directory.
    pub fn from_env() -> Result<Self> {
        if let Some(path) =
            std::env::var_os(SHARED_CREDENTIALS_FILE_ENV).filter(|p| !p.is_empty())
        {
            return Ok(Self::new(path));
        }

        dirs::home_dir()
            .map(|home| Self::new(home.join(".aws").join("credentials")))
            .ok_or_else(|| {
                Error::io(
                    ".aws/credentials",
                    std::io::Error::new(ErrorKind::NotFound, "no home directory"),
                )
            })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Ini> {
        match Ini::load_from_file(&self.path) {
            Ok(ini) => Ok(ini),
            Err(ini::Error::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(Ini::new()),
            Err(ini::Error::Io(e)) => Err(Error::io(&self.path, e)),
            Err(ini::Error::Parse(e)) => Err(Error::ConfigParse {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl CredentialSink for SharedCredentialsFile {
    fn write(&self, profile: &str, credential: &TemporaryCredential) -> Result<()> {
        let _lock = FileLock::acquire(&self.path)?;

        let mut ini = self.load()?;
        ini.with_section(Some(profile))
            .set("aws_access_key_id", credential.access_key_id.as_str())
            .set(
                "aws_secret_access_key",
                credential.secret_access_key.expose_secret(),
            )
            .set("aws_session_token", credential.session_token.expose_secret())
            .set("aws_expiration", credential.expiration_rfc3339());

        let mut contents = Vec::new();
        ini.write_to(&mut contents)
            .map_err(|e| Error::io(&self.path, e))?;
        write_atomic(&self.path, &contents)?;

        info!("credentials written to {} [{}]", self.path.display(), profile);

        Ok(())
    }
}
