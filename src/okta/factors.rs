//! Factor verification strategies.
//!
//! Each [`FactorHandler`] takes a transaction waiting in `MFA_REQUIRED` (or
//! `MFA_CHALLENGE`) and one enrolled factor, and returns the transaction once
//! the factor is verified. The registry maps factor kinds to handlers; kinds
//! without a handler are reported as `UnsupportedFactor`.

use crate::{
    error::{Error, Result},
    okta::{
        authn::{Authenticator, Verification},
        transaction::{AuthStatus, AuthTransaction, Factor, FactorKind, FactorResult},
    },
    prompt::Prompter,
};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, info, warn};

pub const DEFAULT_PASSCODE_ATTEMPTS: u32 = 3;
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[async_trait]
pub trait FactorHandler: Send + Sync {
    /// # Errors
    /// `AuthenticationFailed`, `FactorTimeout`, `InputAborted` or any error
    /// of the underlying state machine call.
    async fn verify(
        &self,
        auth: &Authenticator<'_>,
        transaction: &AuthTransaction,
        factor: &Factor,
        prompter: &dyn Prompter,
    ) -> Result<AuthTransaction>;
}

/// Codes typed by the user: TOTP apps, hardware tokens, SMS, voice call and
/// e-mail.
#[derive(Debug, Clone, Copy)]
pub struct OneTimeCode {
    pub max_attempts: u32,
}

impl Default for OneTimeCode {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PASSCODE_ATTEMPTS,
        }
    }
}

#[async_trait]
impl FactorHandler for OneTimeCode {
    async fn verify(
        &self,
        auth: &Authenticator<'_>,
        transaction: &AuthTransaction,
        factor: &Factor,
        prompter: &dyn Prompter,
    ) -> Result<AuthTransaction> {
        let mut tx = auth.challenge_factor(transaction, factor).await?;

        for attempt in 1..=self.max_attempts {
            let code = prompter.ask_passcode(factor)?;
            tx = auth.submit_verification(&tx, &factor.id, &code).await?;

            if tx.status() == AuthStatus::Success {
                return Ok(tx);
            }

            if tx.factor_result() == Some(&FactorResult::PasscodeInvalid) {
                warn!("invalid verification code ({}/{})", attempt, self.max_attempts);
                prompter.notify("Invalid verification code, try again");
            }
        }

        Err(Error::AuthenticationFailed {
            status: tx.status(),
            reason: format!("{} invalid verification codes", self.max_attempts),
        })
    }
}

/// Security question answered with a secret string.
#[derive(Debug, Clone, Copy)]
pub struct SecurityQuestion {
    pub max_attempts: u32,
}

impl Default for SecurityQuestion {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PASSCODE_ATTEMPTS,
        }
    }
}

#[async_trait]
impl FactorHandler for SecurityQuestion {
    async fn verify(
        &self,
        auth: &Authenticator<'_>,
        transaction: &AuthTransaction,
        factor: &Factor,
        prompter: &dyn Prompter,
    ) -> Result<AuthTransaction> {
        let mut tx = auth.challenge_factor(transaction, factor).await?;
        let question = factor.question().unwrap_or("Security question");

        for _ in 0..self.max_attempts {
            let answer = prompter.ask_answer(question)?;
            tx = auth
                .submit(&tx, &factor.id, Verification::Answer(&answer))
                .await?;

            if tx.status() == AuthStatus::Success {
                return Ok(tx);
            }

            prompter.notify("Incorrect answer, try again");
        }

        Err(Error::AuthenticationFailed {
            status: tx.status(),
            reason: format!("{} incorrect answers", self.max_attempts),
        })
    }
}

/// Okta Verify push: send the push, then poll until the user acts or the
/// timeout elapses.
#[derive(Debug, Clone, Copy)]
pub struct Push {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for Push {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PUSH_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Push {
    async fn wait(
        &self,
        auth: &Authenticator<'_>,
        mut tx: AuthTransaction,
    ) -> Result<AuthTransaction> {
        loop {
            if tx.status() == AuthStatus::Success {
                return Ok(tx);
            }

            match tx.factor_result().cloned() {
                Some(FactorResult::Waiting | FactorResult::Challenge) | None => {
                    sleep(self.poll_interval).await;
                    debug!("polling push verification");
                    tx = auth.poll(&tx).await?;
                }
                Some(FactorResult::Rejected) => {
                    return Err(Error::AuthenticationFailed {
                        status: tx.status(),
                        reason: "the push notification was rejected".to_string(),
                    });
                }
                Some(FactorResult::Timeout | FactorResult::TimeWindowExceeded) => {
                    return Err(Error::FactorTimeout(self.timeout));
                }
                Some(other) => {
                    return Err(Error::AuthenticationFailed {
                        status: tx.status(),
                        reason: format!("push verification ended with {other:?}"),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl FactorHandler for Push {
    async fn verify(
        &self,
        auth: &Authenticator<'_>,
        transaction: &AuthTransaction,
        factor: &Factor,
        prompter: &dyn Prompter,
    ) -> Result<AuthTransaction> {
        let tx = auth.challenge_factor(transaction, factor).await?;

        info!("push notification sent to {}", factor.label());
        prompter.notify("Push notification sent, approve it on your device");

        timeout(self.timeout, self.wait(auth, tx))
            .await
            .map_err(|_| Error::FactorTimeout(self.timeout))?
    }
}

/// Settings shared by the default handlers.
#[derive(Debug, Clone, Copy)]
pub struct FactorSettings {
    pub max_attempts: u32,
    pub push_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for FactorSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PASSCODE_ATTEMPTS,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Clone, Default)]
pub struct FactorRegistry {
    handlers: HashMap<FactorKind, Arc<dyn FactorHandler>>,
}

impl FactorRegistry {
    /// Empty registry, every factor is unsupported until registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_defaults(settings: FactorSettings) -> Self {
        let code: Arc<dyn FactorHandler> = Arc::new(OneTimeCode {
            max_attempts: settings.max_attempts,
        });

        let mut registry = Self::new();
        for kind in [
            FactorKind::SoftwareTotp,
            FactorKind::HardwareToken,
            FactorKind::Token,
            FactorKind::Sms,
            FactorKind::Call,
            FactorKind::Email,
        ] {
            registry.register(kind, Arc::clone(&code));
        }

        registry.register(
            FactorKind::Question,
            Arc::new(SecurityQuestion {
                max_attempts: settings.max_attempts,
            }),
        );
        registry.register(
            FactorKind::Push,
            Arc::new(Push {
                timeout: settings.push_timeout,
                poll_interval: settings.poll_interval,
            }),
        );

        registry
    }

    pub fn register(&mut self, kind: FactorKind, handler: Arc<dyn FactorHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// # Errors
    /// `UnsupportedFactor` when no handler is registered for the factor's kind.
    pub fn handler_for(&self, factor: &Factor) -> Result<&dyn FactorHandler> {
        self.handlers
            .get(&factor.kind())
            .map(|handler| &**handler)
            .ok_or_else(|| Error::UnsupportedFactor {
                factor_type: factor.factor_type.clone(),
            })
    }

    /// # Errors
    /// `UnsupportedFactor` or whatever the handler returns.
    pub async fn verify(
        &self,
        auth: &Authenticator<'_>,
        transaction: &AuthTransaction,
        factor: &Factor,
        prompter: &dyn Prompter,
    ) -> Result<AuthTransaction> {
        self.handler_for(factor)?
            .verify(auth, transaction, factor, prompter)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn factor(factor_type: &str) -> Factor {
        serde_json::from_value(json!({
            "id": "fac1",
            "factorType": factor_type,
            "provider": "OKTA",
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_cover_code_push_and_question() {
        let registry = FactorRegistry::with_defaults(FactorSettings::default());
        for factor_type in [
            "token:software:totp",
            "token:hardware",
            "sms",
            "call",
            "email",
            "push",
            "question",
        ] {
            assert!(registry.handler_for(&factor(factor_type)).is_ok(), "{factor_type}");
        }
    }

    #[test]
    fn test_unregistered_kind_is_unsupported() {
        let registry = FactorRegistry::with_defaults(FactorSettings::default());
        for factor_type in ["webauthn", "u2f", "signed_nonce"] {
            match registry.handler_for(&factor(factor_type)) {
                Err(Error::UnsupportedFactor { factor_type: t }) => assert_eq!(t, factor_type),
                _ => panic!("{factor_type} should be unsupported"),
            }
        }
        assert!(FactorRegistry::new().handler_for(&factor("push")).is_err());
    }
}
