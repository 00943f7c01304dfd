//! Named login profiles.
//!
//! ```toml
//! [defaults]
//! okta_host = "acme.okta.com"
//! username = "alice@acme.com"
//!
//! [profiles.dev]
//! app_url = "/home/amazon_aws/0oa1b2c3d4/272"
//! role_arn = "arn:aws:iam::123456789012:role/dev"
//! ```
//!
//! Keys in `[defaults]` apply to every profile unless the profile sets them.

use crate::error::{Error, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use toml::{Table, Value};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = ".okta_aws_login_config";
pub const DEFAULT_DURATION_SECONDS: i32 = 3600;
pub const DEFAULT_SESSION_LIFETIME_SECONDS: i64 = 7200;
/// Longest session Okta grants, 90 days.
pub const MAX_SESSION_LIFETIME_SECONDS: i64 = 90 * 24 * 3600;
pub const DEFAULT_PUSH_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Write to the shared credentials file only.
    #[default]
    Credentials,
    /// `credential_process` JSON on stdout.
    Json,
    /// Shell `export` lines on stdout.
    Env,
}

impl OutputFormat {
    pub const VALUES: [&'static str; 3] = ["credentials", "json", "env"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::Json => "json",
            Self::Env => "env",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "credentials" => Ok(Self::Credentials),
            "json" => Ok(Self::Json),
            "env" => Ok(Self::Env),
            other => Err(format!(
                "invalid output format {other}, expected one of {}",
                Self::VALUES.join(", ")
            )),
        }
    }
}

fn default_region() -> String {
    crate::aws::sts::DEFAULT_REGION.to_string()
}

const fn default_duration() -> i32 {
    DEFAULT_DURATION_SECONDS
}

const fn default_session_lifetime() -> i64 {
    DEFAULT_SESSION_LIFETIME_SECONDS
}

const fn default_push_timeout() -> u64 {
    DEFAULT_PUSH_TIMEOUT_SECONDS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    /// Okta org, `acme.okta.com` or a full URL.
    pub okta_host: String,
    /// Embed link of the Okta AWS application.
    pub app_url: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Keep the Okta session id between runs.
    #[serde(default)]
    pub cache_session: bool,
    /// Section of the shared credentials file, the role name when unset.
    pub credential_profile: Option<String>,
    pub username: Option<String>,
    pub role_arn: Option<String>,
    /// Preferred factor, `factorType` or `factorType:provider`.
    pub factor: Option<String>,
    pub relay_state: Option<String>,
    #[serde(default = "default_region")]
    pub aws_region: String,
    #[serde(default = "default_duration")]
    pub duration_seconds: i32,
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime_seconds: i64,
    #[serde(default = "default_push_timeout")]
    pub push_timeout_seconds: u64,
}

impl ProfileConfig {
    /// Profile with only the required keys, everything else at its default.
    pub fn new(okta_host: impl Into<String>, app_url: impl Into<String>) -> Self {
        Self {
            okta_host: okta_host.into(),
            app_url: app_url.into(),
            output_format: OutputFormat::default(),
            cache_session: false,
            credential_profile: None,
            username: None,
            role_arn: None,
            factor: None,
            relay_state: None,
            aws_region: default_region(),
            duration_seconds: DEFAULT_DURATION_SECONDS,
            session_lifetime_seconds: DEFAULT_SESSION_LIFETIME_SECONDS,
            push_timeout_seconds: DEFAULT_PUSH_TIMEOUT_SECONDS,
        }
    }

    /// `session_lifetime_seconds` as a duration, `None` when it is outside
    /// `1..=MAX_SESSION_LIFETIME_SECONDS`.
    #[must_use]
    pub fn session_lifetime(&self) -> Option<TimeDelta> {
        if (1..=MAX_SESSION_LIFETIME_SECONDS).contains(&self.session_lifetime_seconds) {
            TimeDelta::try_seconds(self.session_lifetime_seconds)
        } else {
            None
        }
    }
}

pub trait ConfigProvider: Send + Sync {
    /// # Errors
    /// `ProfileNotFound` when `name` is not configured, `ConfigParse` when the
    /// configuration is malformed.
    fn load_profile(&self, name: &str) -> Result<ProfileConfig>;
}

/// `~/.okta_aws_login_config`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
}

/// TOML configuration file.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_error(&self, reason: impl ToString) -> Error {
        Error::ConfigParse {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn read(&self) -> Result<Table> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no configuration file at {}", self.path.display());
                return Ok(Table::new());
            }
            Err(e) => return Err(Error::io(&self.path, e)),
        };

        contents.parse::<Table>().map_err(|e| self.parse_error(e))
    }

    fn table<'a>(&self, root: &'a Table, key: &str) -> Result<Option<&'a Table>> {
        match root.get(key) {
            None => Ok(None),
            Some(Value::Table(table)) => Ok(Some(table)),
            Some(_) => Err(self.parse_error(format!("`{key}` must be a table"))),
        }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn load_profile(&self, name: &str) -> Result<ProfileConfig> {
        let root = self.read()?;

        let profile = self
            .table(&root, "profiles")?
            .and_then(|profiles| profiles.get(name))
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?
            .as_table()
            .ok_or_else(|| self.parse_error(format!("profile `{name}` must be a table")))?;

        let mut merged = self.table(&root, "defaults")?.cloned().unwrap_or_default();
        for (key, value) in profile {
            merged.insert(key.clone(), value.clone());
        }

        let config: ProfileConfig = Value::Table(merged)
            .try_into()
            .map_err(|e| self.parse_error(format!("profile `{name}`: {e}")))?;

        if config.session_lifetime().is_none() {
            return Err(self.parse_error(format!(
                "profile `{name}`: session_lifetime_seconds must be within 1..={}",
                MAX_SESSION_LIFETIME_SECONDS
            )));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[defaults]
okta_host = "acme.okta.com"
username = "alice@acme.com"
cache_session = true

[profiles.dev]
app_url = "/home/amazon_aws/0oa1/272"
role_arn = "arn:aws:iam::123456789012:role/dev"
output_format = "json"

[profiles.prod]
okta_host = "https://prod.okta.com"
app_url = "/home/amazon_aws/0oa2/272"
aws_region = "eu-west-1"
duration_seconds = 900
"#;

    fn provider(contents: &str) -> (TempDir, FileConfigProvider) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, contents).unwrap();
        (dir, FileConfigProvider::new(path))
    }

    #[test]
    fn test_defaults_are_merged() {
        let (_dir, provider) = provider(CONFIG);
        let dev = provider.load_profile("dev").unwrap();

        assert_eq!(dev.okta_host, "acme.okta.com");
        assert_eq!(dev.username.as_deref(), Some("alice@acme.com"));
        assert!(dev.cache_session);
        assert_eq!(dev.output_format, OutputFormat::Json);
        assert_eq!(dev.aws_region, "us-east-1");
        assert_eq!(dev.duration_seconds, DEFAULT_DURATION_SECONDS);
    }

    #[test]
    fn test_profile_overrides_defaults() {
        let (_dir, provider) = provider(CONFIG);
        let prod = provider.load_profile("prod").unwrap();

        assert_eq!(prod.okta_host, "https://prod.okta.com");
        assert_eq!(prod.aws_region, "eu-west-1");
        assert_eq!(prod.duration_seconds, 900);
        assert_eq!(prod.output_format, OutputFormat::Credentials);
    }

    #[test]
    fn test_profile_not_found() {
        let (_dir, provider) = provider(CONFIG);
        assert!(matches!(
            provider.load_profile("staging"),
            Err(Error::ProfileNotFound(name)) if name == "staging"
        ));
    }

    #[test]
    fn test_missing_file_has_no_profiles() {
        let dir = TempDir::new().unwrap();
        let provider = FileConfigProvider::new(dir.path().join("missing"));
        assert!(matches!(
            provider.load_profile("dev"),
            Err(Error::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        let (_dir, broken) = provider("[profiles.dev\n");
        assert!(matches!(broken.load_profile("dev"), Err(Error::ConfigParse { .. })));

        let (_dir, missing_key) = provider("[profiles.dev]\nokta_host = \"acme.okta.com\"\n");
        assert!(matches!(
            missing_key.load_profile("dev"),
            Err(Error::ConfigParse { .. })
        ));

        let (_dir, unknown) = provider(
            "[profiles.dev]\nokta_host = \"a\"\napp_url = \"b\"\noutput = \"json\"\n",
        );
        assert!(matches!(unknown.load_profile("dev"), Err(Error::ConfigParse { .. })));
    }

    #[test]
    fn test_session_lifetime_out_of_range() {
        for value in ["0", "-5", "9223372036854775807"] {
            let (_dir, provider) = provider(&format!(
                "[profiles.dev]\nokta_host = \"a\"\napp_url = \"b\"\n\
                 session_lifetime_seconds = {value}\n"
            ));
            assert!(
                matches!(provider.load_profile("dev"), Err(Error::ConfigParse { .. })),
                "{value}"
            );
        }

        let mut config = ProfileConfig::new("a", "b");
        assert_eq!(config.session_lifetime(), Some(TimeDelta::hours(2)));
        config.session_lifetime_seconds = i64::MAX;
        assert_eq!(config.session_lifetime(), None);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
