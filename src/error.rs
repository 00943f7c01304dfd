use crate::{aws::roles::RoleCandidate, okta::transaction::AuthStatus};
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected identity provider response: {0}")]
    Protocol(String),
    #[error("authentication failed ({status}): {reason}")]
    AuthenticationFailed { status: AuthStatus, reason: String },
    #[error("unsupported factor type: {factor_type}")]
    UnsupportedFactor { factor_type: String },
    #[error("factor verification timed out after {}s", .0.as_secs())]
    FactorTimeout(Duration),
    #[error("SAML assertion unavailable: {0}")]
    AssertionUnavailable(String),
    #[error("{}", role_not_found(.requested.as_deref(), .candidates))]
    RoleNotFound {
        requested: Option<String>,
        candidates: Vec<RoleCandidate>,
    },
    #[error("multiple roles available, choose one with --role:\n{}", list_candidates(.candidates))]
    AmbiguousRole { candidates: Vec<RoleCandidate> },
    #[error("assertion rejected by STS: {0}")]
    ExchangeRejected(String),
    #[error("invalid transaction state: {0}")]
    InvalidState(String),
    #[error("input aborted: {0}")]
    InputAborted(String),
    #[error("profile not found: {0}")]
    ProfileNotFound(String),
    #[error("failed to parse {}: {reason}", .path.display())]
    ConfigParse { path: PathBuf, reason: String },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Only transport failures are worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Process exit code for the binary.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::AuthenticationFailed { .. }
            | Self::InputAborted(_)
            | Self::FactorTimeout(_)
            | Self::UnsupportedFactor { .. } => 2,
            Self::Network(_) => 3,
            Self::RoleNotFound { .. } | Self::AmbiguousRole { .. } => 4,
            Self::Cancelled => 130,
            _ => 1,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

fn list_candidates(candidates: &[RoleCandidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("  [{}] {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n")
}

fn role_not_found(requested: Option<&str>, candidates: &[RoleCandidate]) -> String {
    match (requested, candidates.is_empty()) {
        (_, true) => "the SAML assertion does not grant any AWS role".to_string(),
        (Some(role), false) => format!(
            "role {role} not found in the SAML assertion, available roles:\n{}",
            list_candidates(candidates)
        ),
        (None, false) => format!(
            "no role selected, available roles:\n{}",
            list_candidates(candidates)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(role: &str, provider: &str) -> RoleCandidate {
        RoleCandidate::new(role, provider)
    }

    #[test]
    fn test_only_network_is_retryable() {
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(!Error::Protocol("bad json".into()).is_retryable());
        assert!(!Error::ExchangeRejected("audience".into()).is_retryable());
        assert!(
            !Error::AuthenticationFailed {
                status: AuthStatus::LockedOut,
                reason: "locked".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_ambiguous_role_lists_candidates() {
        let err = Error::AmbiguousRole {
            candidates: vec![candidate("A", "P1"), candidate("B", "P2")],
        };
        let msg = err.to_string();
        assert!(msg.contains("[1] A"));
        assert!(msg.contains("[2] B"));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_role_not_found_message() {
        let err = Error::RoleNotFound {
            requested: Some("C".into()),
            candidates: vec![candidate("A", "P1")],
        };
        assert!(err.to_string().starts_with("role C not found"));

        let err = Error::RoleNotFound {
            requested: None,
            candidates: Vec::new(),
        };
        assert!(err.to_string().contains("does not grant any AWS role"));
    }
}
