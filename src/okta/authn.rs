//! Okta primary authentication and MFA state machine.
//!
//! ```text
//! INIT -> PRIMARY_SUBMITTED -> SUCCESS
//!                           -> MFA_REQUIRED -> MFA_CHALLENGE -> SUCCESS
//!                                                            -> MFA_CHALLENGE (bad code)
//!                                                            -> LOCKED_OUT
//!                           -> LOCKED_OUT | PASSWORD_EXPIRED | REJECTED
//! ```
//!
//! Every call returns the next transaction or a typed error. Terminal
//! failures come back as `AuthenticationFailed` and are never retried, only
//! transport failures go through the retry policy.

use crate::{
    error::{Error, Result},
    observe::{AuthEvent, Phase},
    okta::{
        OktaClient,
        factors::FactorRegistry,
        transaction::{
            AuthStatus, AuthTransaction, E_AUTHENTICATION_FAILED, E_INVALID_PASSCODE,
            E_INVALID_TOKEN, E_USER_LOCKED, Factor, FactorResult, ProviderError,
        },
    },
    prompt::Prompter,
};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

/// What the state machine submits to a factor's verify endpoint.
pub enum Verification<'a> {
    PassCode(&'a SecretString),
    Answer(&'a SecretString),
}

/// Drives authentication transactions against one Okta org.
pub struct Authenticator<'a> {
    client: &'a OktaClient,
}

impl<'a> Authenticator<'a> {
    #[must_use]
    pub const fn new(client: &'a OktaClient) -> Self {
        Self { client }
    }

    fn transition(&self, from: Phase, to: Phase) {
        self.client
            .observer()
            .on_event(&AuthEvent::StateTransition { from, to });
    }

    async fn post(
        &self,
        operation: &'static str,
        path: &str,
        payload: &Value,
    ) -> Result<(StatusCode, String)> {
        let url = self.client.endpoint(path)?;
        self.client
            .retry()
            .run(operation, self.client.observer(), || self.client.post_json(&url, payload))
            .await
    }

    /// Submit username and password.
    ///
    /// # Errors
    /// `AuthenticationFailed` for rejected credentials, a locked account or an
    /// expired password, `Protocol` for an unparseable response, `Network`
    /// once retries are exhausted.
    #[instrument(skip(self, password))]
    pub async fn begin(&self, username: &str, password: &SecretString) -> Result<AuthTransaction> {
        let payload = json!({
            "username": username,
            "password": password.expose_secret(),
            "options": {
                "multiOptionalFactorEnroll": false,
                "warnBeforePasswordExpired": true,
            },
        });

        self.transition(Phase::Init, Phase::PrimarySubmitted);

        let (status, body) = self
            .post("primary authentication", "/api/v1/authn", &payload)
            .await?;

        let tx = match read_transaction(status, &body) {
            Ok(tx) => tx,
            Err(e) => {
                if let Error::AuthenticationFailed { status, .. } = &e {
                    self.transition(Phase::PrimarySubmitted, Phase::Status(*status));
                }
                return Err(e);
            }
        };

        self.transition(Phase::PrimarySubmitted, Phase::Status(tx.status()));

        ensure_not_failed(tx)
    }

    /// Start verification of `factor`.
    ///
    /// Code factors whose code already lives on the user's device move to
    /// `MFA_CHALLENGE` locally; SMS, call, e-mail and push ask Okta to send
    /// the challenge.
    ///
    /// # Errors
    /// `InvalidState` if the transaction is not waiting for a factor or
    /// `factor` was not offered, `Protocol` if Okta answers with anything
    /// but `MFA_CHALLENGE`.
    #[instrument(skip(self, transaction, factor), fields(factor = %factor.label()))]
    pub async fn challenge_factor(
        &self,
        transaction: &AuthTransaction,
        factor: &Factor,
    ) -> Result<AuthTransaction> {
        let from = transaction.status();

        match from {
            AuthStatus::MfaRequired => {
                if !transaction.factors().iter().any(|f| f.id == factor.id) {
                    return Err(Error::InvalidState(format!(
                        "factor {} is not enrolled for this transaction",
                        factor.id
                    )));
                }
            }
            AuthStatus::MfaChallenge => {}
            status => {
                return Err(Error::InvalidState(format!(
                    "cannot challenge a factor from a {status} transaction"
                )));
            }
        }

        if !factor.kind().sends_challenge() {
            let tx = transaction.clone().into_local_challenge(factor.clone());
            self.transition(Phase::Status(from), Phase::Status(tx.status()));
            return Ok(tx);
        }

        let payload = json!({ "stateToken": transaction.state_token()? });
        let path = format!("/api/v1/authn/factors/{}/verify", factor.id);
        let (status, body) = self.post("factor challenge", &path, &payload).await?;
        let tx = ensure_not_failed(read_transaction(status, &body)?)?;

        self.transition(Phase::Status(from), Phase::Status(tx.status()));

        if tx.status() != AuthStatus::MfaChallenge {
            return Err(Error::Protocol(format!(
                "challenging {} returned {} instead of MFA_CHALLENGE",
                factor.label(),
                tx.status()
            )));
        }

        Ok(tx)
    }

    /// Submit a one-time code for `factor_id`.
    ///
    /// A wrong code returns the transaction still in `MFA_CHALLENGE` with
    /// factor result `PASSCODE_INVALID`.
    ///
    /// # Errors
    /// `AuthenticationFailed` once Okta locks the account, `InvalidState`
    /// outside `MFA_CHALLENGE`.
    pub async fn submit_verification(
        &self,
        transaction: &AuthTransaction,
        factor_id: &str,
        code: &SecretString,
    ) -> Result<AuthTransaction> {
        self.submit(transaction, factor_id, Verification::PassCode(code))
            .await
    }

    /// # Errors
    /// See [`Authenticator::submit_verification`].
    #[instrument(skip(self, transaction, verification))]
    pub async fn submit(
        &self,
        transaction: &AuthTransaction,
        factor_id: &str,
        verification: Verification<'_>,
    ) -> Result<AuthTransaction> {
        if transaction.status() != AuthStatus::MfaChallenge {
            return Err(Error::InvalidState(format!(
                "cannot submit a verification from a {} transaction",
                transaction.status()
            )));
        }

        let state_token = transaction.state_token()?;
        let payload = match verification {
            Verification::PassCode(code) => {
                json!({ "stateToken": state_token, "passCode": code.expose_secret() })
            }
            Verification::Answer(answer) => {
                json!({ "stateToken": state_token, "answer": answer.expose_secret() })
            }
        };

        let path = format!("/api/v1/authn/factors/{factor_id}/verify");
        let (status, body) = self.post("factor verification", &path, &payload).await?;

        if status == StatusCode::FORBIDDEN
            && ProviderError::from_body(&body).is_some_and(|e| e.error_code == E_INVALID_PASSCODE)
        {
            debug!("verification code refused for factor {}", factor_id);
            return Ok(transaction
                .clone()
                .with_factor_result(FactorResult::PasscodeInvalid));
        }

        let tx = self.advance(transaction.status(), read_transaction(status, &body))?;

        Ok(tx)
    }

    /// Poll an outstanding push challenge once.
    ///
    /// # Errors
    /// `InvalidState` without a polling link, otherwise as
    /// [`Authenticator::submit`].
    pub async fn poll(&self, transaction: &AuthTransaction) -> Result<AuthTransaction> {
        let next = transaction.next_link().ok_or_else(|| {
            Error::InvalidState("transaction has no polling link".to_string())
        })?;

        let payload = json!({ "stateToken": transaction.state_token()? });
        let (status, body) = self.post("factor poll", next, &payload).await?;

        self.advance(transaction.status(), read_transaction(status, &body))
    }

    /// Continue past a `PASSWORD_WARN`.
    ///
    /// # Errors
    /// `InvalidState` without a skip link.
    pub async fn skip(&self, transaction: &AuthTransaction) -> Result<AuthTransaction> {
        let skip = transaction.skip_link().unwrap_or("/api/v1/authn/skip");
        let payload = json!({ "stateToken": transaction.state_token()? });
        let (status, body) = self.post("password warning skip", skip, &payload).await?;

        self.advance(transaction.status(), read_transaction(status, &body))
    }

    fn advance(&self, from: AuthStatus, next: Result<AuthTransaction>) -> Result<AuthTransaction> {
        match next {
            Ok(tx) => {
                if tx.status() != from {
                    self.transition(Phase::Status(from), Phase::Status(tx.status()));
                }
                ensure_not_failed(tx)
            }
            Err(e) => {
                if let Error::AuthenticationFailed { status, .. } = &e {
                    self.transition(Phase::Status(from), Phase::Status(*status));
                }
                Err(e)
            }
        }
    }

    /// Run the whole transaction to `SUCCESS` and return the session token.
    ///
    /// With several enrolled factors the `preferred` one is used when it
    /// matches, otherwise the user picks. A factor without a registered
    /// handler is dropped from the choice and the user picks again.
    ///
    /// # Errors
    /// Any error of the individual steps; `UnsupportedFactor` when no
    /// enrolled factor can be handled.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &SecretString,
        registry: &FactorRegistry,
        prompter: &dyn Prompter,
        preferred: Option<&str>,
    ) -> Result<SecretString> {
        let mut tx = self.begin(username, password).await?;
        let mut excluded: Vec<String> = Vec::new();
        let mut unsupported: Option<Error> = None;

        loop {
            match tx.status() {
                AuthStatus::Success => return Ok(tx.session_token()?.clone()),
                AuthStatus::PasswordWarn => {
                    warn!("the Okta password for {} expires soon", username);
                    tx = self.skip(&tx).await?;
                }
                AuthStatus::MfaRequired => {
                    let offered: Vec<Factor> = tx
                        .factors()
                        .iter()
                        .filter(|f| !excluded.contains(&f.id))
                        .cloned()
                        .collect();

                    if offered.is_empty() {
                        return Err(unsupported.unwrap_or_else(|| {
                            Error::UnsupportedFactor {
                                factor_type: "none".to_string(),
                            }
                        }));
                    }

                    let factor = choose_factor(&offered, preferred, prompter)?;

                    match registry.verify(self, &tx, &factor, prompter).await {
                        Ok(next) => tx = next,
                        Err(e @ Error::UnsupportedFactor { .. }) => {
                            warn!("{}, choose another factor", e);
                            prompter.notify(&format!("{e}, choose another factor"));
                            excluded.push(factor.id.clone());
                            unsupported = Some(e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                status => {
                    return Err(Error::Protocol(format!(
                        "unexpected {status} transaction while authenticating"
                    )));
                }
            }
        }
    }
}

/// Pick the factor to verify: the preferred one, the only one, or ask.
///
/// `preferred` matches `factorType` or `factorType:provider`, ignoring case.
///
/// # Errors
/// Whatever the prompter returns, `InvalidState` for an out-of-range choice.
pub fn choose_factor(
    factors: &[Factor],
    preferred: Option<&str>,
    prompter: &dyn Prompter,
) -> Result<Factor> {
    if let Some(preferred) = preferred {
        let found = factors.iter().find(|f| {
            preferred.eq_ignore_ascii_case(&f.factor_type)
                || preferred.eq_ignore_ascii_case(&format!("{}:{}", f.factor_type, f.provider))
        });
        if let Some(factor) = found {
            return Ok(factor.clone());
        }
        warn!("preferred factor {} is not enrolled", preferred);
    }

    if let [only] = factors {
        return Ok(only.clone());
    }

    let index = prompter.select_factor(factors)?;

    factors
        .get(index)
        .cloned()
        .ok_or_else(|| Error::InvalidState(format!("no factor at index {index}")))
}

/// Turn an `/authn` response into a transaction or a typed failure.
fn read_transaction(status: StatusCode, body: &str) -> Result<AuthTransaction> {
    if status.is_success() {
        return AuthTransaction::from_json(body);
    }

    let provider_error = ProviderError::from_body(body);
    let code = provider_error.as_ref().map(|e| e.error_code.as_str());
    let reason = provider_error
        .as_ref()
        .map_or_else(|| status.to_string(), ToString::to_string);

    match (status, code) {
        (StatusCode::UNAUTHORIZED, _) | (_, Some(E_AUTHENTICATION_FAILED)) => {
            Err(Error::AuthenticationFailed {
                status: AuthStatus::Rejected,
                reason,
            })
        }
        (StatusCode::FORBIDDEN, Some(E_USER_LOCKED)) => Err(Error::AuthenticationFailed {
            status: AuthStatus::LockedOut,
            reason,
        }),
        (_, Some(E_INVALID_TOKEN)) => Err(Error::AuthenticationFailed {
            status: AuthStatus::Rejected,
            reason: format!("authentication transaction expired, {reason}"),
        }),
        _ => Err(Error::Protocol(format!("{status}, {reason}"))),
    }
}

fn ensure_not_failed(tx: AuthTransaction) -> Result<AuthTransaction> {
    let status = tx.status();
    if !status.is_failure() {
        return Ok(tx);
    }

    let reason = match status {
        AuthStatus::LockedOut => "the account is locked",
        AuthStatus::PasswordExpired | AuthStatus::PasswordReset => {
            "the password has expired, change it in the Okta dashboard"
        }
        AuthStatus::MfaEnroll | AuthStatus::MfaEnrollActivate => {
            "MFA enrollment is required, complete it in the Okta dashboard"
        }
        AuthStatus::Recovery | AuthStatus::RecoveryChallenge => {
            "the account is in recovery"
        }
        _ => "the credentials were rejected",
    };

    Err(Error::AuthenticationFailed {
        status,
        reason: reason.to_string(),
    })
}
