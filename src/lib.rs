//! # okta-aws-login
//!
//! Gets temporary AWS credentials for command-line tooling from an Okta SAML
//! assertion.
//!
//! ## Flow
//!
//! 1. [`okta::authn`] drives an Okta authentication transaction from the
//!    primary password round through any MFA challenge until a session token
//!    is issued. Factor kinds are handled by the strategies in
//!    [`okta::factors`].
//! 2. [`okta::assertion`] trades the session for the `SAMLResponse` of the
//!    Okta AWS application.
//! 3. [`aws::roles`] extracts the assumable `(role, provider)` pairs and
//!    selects one.
//! 4. [`aws::sts`] calls `AssumeRoleWithSAML` and returns a
//!    [`aws::credentials::TemporaryCredential`].
//! 5. [`cache`] keeps the credential (and optionally the Okta session id)
//!    until shortly before it expires; [`aws::sink`] writes it to the AWS
//!    shared credentials file.
//!
//! [`pipeline::Pipeline`] owns the HTTP client, configuration and
//! collaborators for one profile and runs the steps above in order.

pub mod aws;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod observe;
pub mod okta;
pub mod pipeline;
pub mod prompt;
pub mod retry;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
