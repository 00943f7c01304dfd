use crate::{
    aws::credentials::TemporaryCredential,
    cache::{JsonStore, is_valid},
    error::Result,
};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Serialize, Deserialize)]
struct CredentialRecord {
    #[serde(default)]
    role_arn: String,
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: DateTime<Utc>,
}

impl From<&TemporaryCredential> for CredentialRecord {
    fn from(credential: &TemporaryCredential) -> Self {
        Self {
            role_arn: credential.role_arn.clone(),
            access_key_id: credential.access_key_id.clone(),
            secret_access_key: credential.secret_access_key.expose_secret().to_string(),
            session_token: credential.session_token.expose_secret().to_string(),
            expiration: credential.expiration,
        }
    }
}

impl From<CredentialRecord> for TemporaryCredential {
    fn from(record: CredentialRecord) -> Self {
        Self::new(
            record.role_arn,
            record.access_key_id,
            record.secret_access_key,
            record.session_token,
            record.expiration,
        )
    }
}

/// Exchanged credentials keyed by profile name.
pub struct CredentialCache {
    store: JsonStore<CredentialRecord>,
}

impl CredentialCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(path),
        }
    }

    /// Cache file inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CREDENTIALS_FILE))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Credential for `profile` if it is still valid now.
    #[must_use]
    pub fn get(&self, profile: &str) -> Option<TemporaryCredential> {
        self.get_at(profile, Utc::now())
    }

    #[must_use]
    pub fn get_at(&self, profile: &str, now: DateTime<Utc>) -> Option<TemporaryCredential> {
        let credential: TemporaryCredential = self.store.load().remove(profile)?.into();

        if is_valid(&credential, now) {
            debug!("cached credentials found for {}", profile);
            Some(credential)
        } else {
            debug!("cached credentials for {} expired", profile);
            None
        }
    }

    /// Store `credential` for `profile`, replacing any previous one.
    ///
    /// # Errors
    /// `Io` when the cache file cannot be locked or written.
    pub fn put(&self, profile: &str, credential: &TemporaryCredential) -> Result<()> {
        let now = Utc::now();
        self.store.update(|entries| {
            entries.retain(|_, record| now < record.expiration);
            entries.insert(profile.to_string(), credential.into());
        })
    }

    /// # Errors
    /// `Io` when the cache file cannot be locked or written.
    pub fn invalidate(&self, profile: &str) -> Result<bool> {
        self.store.update(|entries| entries.remove(profile).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SAFETY_MARGIN;
    use chrono::TimeDelta;
    use std::{sync::Arc, thread};
    use tempfile::TempDir;

    fn credential(key: &str, expiration: DateTime<Utc>) -> TemporaryCredential {
        TemporaryCredential::new("arn:role:dev", key, "secret", "token", expiration)
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = CredentialCache::in_dir(dir.path());
        let cred = credential("ASIADEV", Utc::now() + TimeDelta::hours(1));

        cache.put("dev", &cred).unwrap();

        assert_eq!(cache.get("dev"), Some(cred));
        assert_eq!(cache.get("devin"), None);
    }

    #[test]
    fn test_role_survives_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = CredentialCache::in_dir(dir.path());
        let cred = TemporaryCredential::new(
            "arn:aws:iam::111111111111:role/dev",
            "ASIA111",
            "secret",
            "token",
            Utc::now() + TimeDelta::hours(1),
        );

        cache.put("dev", &cred).unwrap();

        assert_eq!(
            cache.get("dev").unwrap().role_arn,
            "arn:aws:iam::111111111111:role/dev"
        );
    }

    #[test]
    fn test_put_replaces() {
        let dir = TempDir::new().unwrap();
        let cache = CredentialCache::in_dir(dir.path());
        let expiration = Utc::now() + TimeDelta::hours(1);

        cache.put("dev", &credential("OLD", expiration)).unwrap();
        cache.put("dev", &credential("NEW", expiration)).unwrap();

        assert_eq!(cache.get("dev").unwrap().access_key_id, "NEW");
    }

    #[test]
    fn test_near_expiry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = CredentialCache::in_dir(dir.path());
        let now = Utc::now();

        cache.put("dev", &credential("ASIA", now + SAFETY_MARGIN)).unwrap();

        assert_eq!(cache.get_at("dev", now), None);
        assert!(cache.get_at("dev", now - TimeDelta::seconds(1)).is_some());
    }

    #[test]
    fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let cache = CredentialCache::in_dir(dir.path());

        cache
            .put("dev", &credential("ASIA", Utc::now() + TimeDelta::hours(1)))
            .unwrap();

        assert!(cache.invalidate("dev").unwrap());
        assert!(!cache.invalidate("dev").unwrap());
        assert_eq!(cache.get("dev"), None);
    }

    #[test]
    fn test_concurrent_puts_keep_every_profile() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(dir.path().join(CREDENTIALS_FILE));
        let expiration = Utc::now() + TimeDelta::hours(1);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = Arc::clone(&path);
                thread::spawn(move || {
                    let cache = CredentialCache::new(path.as_path());
                    cache
                        .put(&format!("profile{i}"), &credential(&format!("KEY{i}"), expiration))
                        .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let cache = CredentialCache::new(path.as_path());
        for i in 0..8 {
            assert_eq!(
                cache.get(&format!("profile{i}")).unwrap().access_key_id,
                format!("KEY{i}")
            );
        }
    }
}
