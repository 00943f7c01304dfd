//! Okta session reuse.
//!
//! Keeping the session id lets a later run fetch a fresh assertion with the
//! `sid` cookie instead of going through password and MFA again.

use crate::{cache::JsonStore, cache::SAFETY_MARGIN, error::Result};
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tracing::debug;

pub const SESSIONS_FILE: &str = "sessions.json";
pub const DEFAULT_SESSION_LIFETIME: TimeDelta = TimeDelta::hours(2);

#[derive(Clone)]
pub struct CachedSession {
    pub session_id: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl CachedSession {
    pub fn new(session_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            session_id: SecretString::from(session_id.into()),
            expires_at,
        }
    }

    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - SAFETY_MARGIN
    }
}

impl fmt::Debug for CachedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSession")
            .field("session_id", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    session_id: String,
    expires_at: DateTime<Utc>,
}

/// Okta sessions keyed by username.
pub struct SessionCache {
    store: JsonStore<SessionRecord>,
    lifetime: TimeDelta,
}

impl SessionCache {
    /// Sessions are kept at most `lifetime`, even when Okta grants longer.
    pub fn new(path: impl Into<PathBuf>, lifetime: TimeDelta) -> Self {
        Self {
            store: JsonStore::new(path),
            lifetime,
        }
    }

    pub fn in_dir(dir: &Path, lifetime: TimeDelta) -> Self {
        Self::new(dir.join(SESSIONS_FILE), lifetime)
    }

    #[must_use]
    pub fn get(&self, username: &str) -> Option<CachedSession> {
        self.get_at(username, Utc::now())
    }

    #[must_use]
    pub fn get_at(&self, username: &str, now: DateTime<Utc>) -> Option<CachedSession> {
        let record = self.store.load().remove(username)?;
        let session = CachedSession::new(record.session_id, record.expires_at);

        if session.is_valid(now) {
            Some(session)
        } else {
            debug!("cached Okta session for {} expired", username);
            None
        }
    }

    /// # Errors
    /// `Io` when the cache file cannot be locked or written.
    pub fn put(&self, username: &str, session: &CachedSession) -> Result<()> {
        self.put_at(username, session, Utc::now())
    }

    /// # Errors
    /// `Io` when the cache file cannot be locked or written.
    pub fn put_at(
        &self,
        username: &str,
        session: &CachedSession,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let expires_at = now
            .checked_add_signed(self.lifetime)
            .map_or(session.expires_at, |limit| session.expires_at.min(limit));

        let record = SessionRecord {
            session_id: session.session_id.expose_secret().to_string(),
            expires_at,
        };

        self.store.update(|entries| {
            entries.retain(|_, r| now < r.expires_at);
            entries.insert(username.to_string(), record);
        })
    }

    /// # Errors
    /// `Io` when the cache file cannot be locked or written.
    pub fn invalidate(&self, username: &str) -> Result<bool> {
        self.store.update(|entries| entries.remove(username).is_some())
    }
}
