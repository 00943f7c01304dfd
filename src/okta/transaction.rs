//! Okta authentication transaction model.
//!
//! <https://developer.okta.com/docs/reference/api/authn/#authentication-transaction-object>

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthStatus {
    Unauthenticated,
    PasswordWarn,
    PasswordExpired,
    PasswordReset,
    Recovery,
    RecoveryChallenge,
    LockedOut,
    MfaEnroll,
    MfaEnrollActivate,
    MfaRequired,
    MfaChallenge,
    Success,
    /// Primary credentials refused (HTTP 401 on `/authn`). Okta answers this
    /// with an error body rather than a status, the variant keeps it in the
    /// same state space.
    Rejected,
}

impl AuthStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PasswordWarn => "PASSWORD_WARN",
            Self::PasswordExpired => "PASSWORD_EXPIRED",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::Recovery => "RECOVERY",
            Self::RecoveryChallenge => "RECOVERY_CHALLENGE",
            Self::LockedOut => "LOCKED_OUT",
            Self::MfaEnroll => "MFA_ENROLL",
            Self::MfaEnrollActivate => "MFA_ENROLL_ACTIVATE",
            Self::MfaRequired => "MFA_REQUIRED",
            Self::MfaChallenge => "MFA_CHALLENGE",
            Self::Success => "SUCCESS",
            Self::Rejected => "REJECTED",
        }
    }

    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim() {
            "UNAUTHENTICATED" => Some(Self::Unauthenticated),
            "PASSWORD_WARN" => Some(Self::PasswordWarn),
            "PASSWORD_EXPIRED" => Some(Self::PasswordExpired),
            "PASSWORD_RESET" => Some(Self::PasswordReset),
            "RECOVERY" => Some(Self::Recovery),
            "RECOVERY_CHALLENGE" => Some(Self::RecoveryChallenge),
            "LOCKED_OUT" => Some(Self::LockedOut),
            "MFA_ENROLL" => Some(Self::MfaEnroll),
            "MFA_ENROLL_ACTIVATE" => Some(Self::MfaEnrollActivate),
            "MFA_REQUIRED" => Some(Self::MfaRequired),
            "MFA_CHALLENGE" => Some(Self::MfaChallenge),
            "SUCCESS" => Some(Self::Success),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// `SUCCESS` or a hard failure the pipeline cannot continue from.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::LockedOut
                | Self::PasswordExpired
                | Self::PasswordReset
                | Self::Rejected
                | Self::Recovery
                | Self::RecoveryChallenge
                | Self::MfaEnroll
                | Self::MfaEnrollActivate
        )
    }

    #[must_use]
    pub const fn is_failure(self) -> bool {
        self.is_terminal() && !matches!(self, Self::Success)
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactorResult {
    Challenge,
    Waiting,
    Success,
    Rejected,
    Timeout,
    TimeWindowExceeded,
    PasscodeReplayed,
    Cancelled,
    Error,
    /// A submitted code was refused (HTTP 403 `E0000068`), the challenge stays
    /// open.
    PasscodeInvalid,
    Other(String),
}

impl FactorResult {
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value.trim() {
            "CHALLENGE" => Self::Challenge,
            "WAITING" => Self::Waiting,
            "SUCCESS" => Self::Success,
            "REJECTED" => Self::Rejected,
            "TIMEOUT" => Self::Timeout,
            "TIME_WINDOW_EXCEEDED" => Self::TimeWindowExceeded,
            "PASSCODE_REPLAYED" => Self::PasscodeReplayed,
            "CANCELLED" => Self::Cancelled,
            "ERROR" => Self::Error,
            "PASSCODE_INVALID" => Self::PasscodeInvalid,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Factor mechanisms known to the login flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FactorKind {
    SoftwareTotp,
    HardwareToken,
    Token,
    Sms,
    Call,
    Email,
    Push,
    Question,
    WebAuthn,
    U2f,
    Other(String),
}

impl FactorKind {
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "token:software:totp" => Self::SoftwareTotp,
            "token:hardware" | "token:hotp" => Self::HardwareToken,
            "token" => Self::Token,
            "sms" => Self::Sms,
            "call" => Self::Call,
            "email" => Self::Email,
            "push" => Self::Push,
            "question" => Self::Question,
            "webauthn" => Self::WebAuthn,
            "u2f" => Self::U2f,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether Okta has to send something (SMS, call, e-mail, push) before
    /// the factor can be verified.
    #[must_use]
    pub const fn sends_challenge(&self) -> bool {
        matches!(self, Self::Sms | Self::Call | Self::Email | Self::Push)
    }
}

/// An enrolled factor as listed by Okta in `_embedded.factors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Factor {
    pub id: String,
    pub factor_type: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub profile: Option<Value>,
}

impl Factor {
    #[must_use]
    pub fn kind(&self) -> FactorKind {
        FactorKind::from_wire(&self.factor_type)
    }

    /// Human readable name, e.g. `push (OKTA)`.
    #[must_use]
    pub fn label(&self) -> String {
        if self.provider.is_empty() {
            self.factor_type.clone()
        } else {
            format!("{} ({})", self.factor_type, self.provider)
        }
    }

    #[must_use]
    pub fn question(&self) -> Option<&str> {
        self.profile
            .as_ref()
            .and_then(|p| p.get("questionText"))
            .and_then(Value::as_str)
    }
}

/// Okta error body, e.g. `{"errorCode":"E0000004","errorSummary":"Authentication failed"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderError {
    pub error_code: String,
    #[serde(default)]
    pub error_summary: String,
}

pub const E_AUTHENTICATION_FAILED: &str = "E0000004";
pub const E_INVALID_TOKEN: &str = "E0000011";
pub const E_INVALID_PASSCODE: &str = "E0000068";
pub const E_USER_LOCKED: &str = "E0000069";

impl ProviderError {
    #[must_use]
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code, self.error_summary)
    }
}

#[derive(Debug, Default, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<Link>,
    skip: Option<Link>,
}

#[derive(Debug, Default, Deserialize)]
struct Embedded {
    #[serde(default)]
    factors: Vec<Factor>,
    factor: Option<Factor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    status: Option<String>,
    state_token: Option<String>,
    session_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    relay_state: Option<String>,
    factor_result: Option<String>,
    #[serde(rename = "_embedded", default)]
    embedded: Embedded,
    #[serde(rename = "_links", default)]
    links: Links,
}

/// One in-progress authentication attempt as last reported by Okta.
///
/// Only ever built from a provider response, so a `SUCCESS` transaction always
/// carries a session token and no other status exposes one.
#[derive(Debug, Clone)]
pub struct AuthTransaction {
    status: AuthStatus,
    state_token: Option<String>,
    session_token: Option<SecretString>,
    expires_at: Option<DateTime<Utc>>,
    relay_state: Option<String>,
    factor_result: Option<FactorResult>,
    factors: Vec<Factor>,
    challenged_factor: Option<Factor>,
    next_link: Option<String>,
    skip_link: Option<String>,
}

impl AuthTransaction {
    /// # Errors
    /// Returns `Protocol` if the body is not a transaction or violates the
    /// status invariants.
    pub fn from_json(body: &str) -> Result<Self> {
        let raw: RawTransaction = serde_json::from_str(body)
            .map_err(|e| Error::Protocol(format!("invalid authentication transaction: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawTransaction) -> Result<Self> {
        let status = raw
            .status
            .as_deref()
            .ok_or_else(|| Error::Protocol("transaction without status".to_string()))?;
        let status = AuthStatus::from_wire(status)
            .ok_or_else(|| Error::Protocol(format!("unknown transaction status: {status}")))?;

        let session_token = if status == AuthStatus::Success {
            match raw.session_token.filter(|t| !t.is_empty()) {
                Some(token) => Some(SecretString::from(token)),
                None => {
                    return Err(Error::Protocol(
                        "SUCCESS transaction without session token".to_string(),
                    ));
                }
            }
        } else {
            None
        };

        let state_token = raw.state_token.filter(|t| !t.is_empty());
        if matches!(
            status,
            AuthStatus::MfaRequired | AuthStatus::MfaChallenge | AuthStatus::PasswordWarn
        ) && state_token.is_none()
        {
            return Err(Error::Protocol(format!("{status} transaction without state token")));
        }

        if status == AuthStatus::MfaRequired && raw.embedded.factors.is_empty() {
            return Err(Error::Protocol(
                "MFA_REQUIRED transaction without enrolled factors".to_string(),
            ));
        }

        Ok(Self {
            status,
            state_token,
            session_token,
            expires_at: raw.expires_at,
            relay_state: raw.relay_state,
            factor_result: raw.factor_result.as_deref().map(FactorResult::from_wire),
            factors: raw.embedded.factors,
            challenged_factor: raw.embedded.factor,
            next_link: raw.links.next.map(|l| l.href),
            skip_link: raw.links.skip.map(|l| l.href),
        })
    }

    #[must_use]
    pub const fn status(&self) -> AuthStatus {
        self.status
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// # Errors
    /// Returns `InvalidState` unless the transaction completed successfully.
    pub fn session_token(&self) -> Result<&SecretString> {
        match (&self.status, &self.session_token) {
            (AuthStatus::Success, Some(token)) => Ok(token),
            (status, _) => Err(Error::InvalidState(format!(
                "no session token in a {status} transaction"
            ))),
        }
    }

    /// # Errors
    /// Returns `InvalidState` when Okta has not issued a state token.
    pub fn state_token(&self) -> Result<&str> {
        self.state_token.as_deref().ok_or_else(|| {
            Error::InvalidState(format!("no state token in a {} transaction", self.status))
        })
    }

    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    #[must_use]
    pub fn relay_state(&self) -> Option<&str> {
        self.relay_state.as_deref()
    }

    #[must_use]
    pub const fn factor_result(&self) -> Option<&FactorResult> {
        self.factor_result.as_ref()
    }

    #[must_use]
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    #[must_use]
    pub const fn challenged_factor(&self) -> Option<&Factor> {
        self.challenged_factor.as_ref()
    }

    /// Polling link while a push is outstanding.
    #[must_use]
    pub fn next_link(&self) -> Option<&str> {
        self.next_link.as_deref()
    }

    #[must_use]
    pub fn skip_link(&self) -> Option<&str> {
        self.skip_link.as_deref()
    }

    /// The same transaction moved to `MFA_CHALLENGE` for `factor` without a
    /// round trip, used for factors whose code already exists on the user's
    /// device.
    pub(crate) fn into_local_challenge(self, factor: Factor) -> Self {
        Self {
            status: AuthStatus::MfaChallenge,
            factor_result: Some(FactorResult::Challenge),
            challenged_factor: Some(factor),
            next_link: None,
            ..self
        }
    }

    pub(crate) fn with_factor_result(self, result: FactorResult) -> Self {
        Self {
            factor_result: Some(result),
            ..self
        }
    }
}
