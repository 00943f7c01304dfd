use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::fmt;

/// Short-lived AWS credentials returned by STS.
#[derive(Clone)]
pub struct TemporaryCredential {
    /// Role the credentials were issued for.
    pub role_arn: String,
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: SecretString,
    pub expiration: DateTime<Utc>,
}

impl TemporaryCredential {
    #[must_use]
    pub fn new(
        role_arn: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            role_arn: role_arn.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
            session_token: SecretString::from(session_token.into()),
            expiration,
        }
    }

    /// RFC 3339 expiry in UTC, the format the AWS tooling expects.
    #[must_use]
    pub fn expiration_rfc3339(&self) -> String {
        self.expiration.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Output of an AWS `credential_process`.
    #[must_use]
    pub fn to_credential_process_json(&self) -> String {
        json!({
            "Version": 1,
            "AccessKeyId": self.access_key_id,
            "SecretAccessKey": self.secret_access_key.expose_secret(),
            "SessionToken": self.session_token.expose_secret(),
            "Expiration": self.expiration_rfc3339(),
        })
        .to_string()
    }

    /// `export` lines for a POSIX shell.
    #[must_use]
    pub fn to_env_exports(&self) -> String {
        format!(
            "export AWS_ACCESS_KEY_ID={}\nexport AWS_SECRET_ACCESS_KEY={}\nexport AWS_SESSION_TOKEN={}\nexport AWS_CREDENTIAL_EXPIRATION={}\n",
            self.access_key_id,
            self.secret_access_key.expose_secret(),
            self.session_token.expose_secret(),
            self.expiration_rfc3339(),
        )
    }
}

impl PartialEq for TemporaryCredential {
    fn eq(&self, other: &Self) -> bool {
        self.role_arn == other.role_arn
            && self.access_key_id == other.access_key_id
            && self.secret_access_key.expose_secret() == other.secret_access_key.expose_secret()
            && self.session_token.expose_secret() == other.session_token.expose_secret()
            && self.expiration == other.expiration
    }
}

impl Eq for TemporaryCredential {}

impl fmt::Debug for TemporaryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryCredential")
            .field("role_arn", &self.role_arn)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}
