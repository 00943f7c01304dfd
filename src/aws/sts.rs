//! Assertion-to-credential exchange with STS `AssumeRoleWithSAML`.

use crate::{
    aws::{credentials::TemporaryCredential, roles::RoleCandidate},
    error::{Error, Result},
    observe::AuthObserver,
    okta::assertion::Assertion,
    retry::RetryPolicy,
};
use async_trait::async_trait;
use aws_sdk_sts::{
    Client,
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::assume_role_with_saml::AssumeRoleWithSAMLError,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_DURATION_SECONDS: i32 = 3600;
pub const MIN_DURATION_SECONDS: i32 = 900;

/// One `AssumeRoleWithSAML` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub principal_arn: String,
    pub saml_assertion: String,
    pub duration_seconds: i32,
}

#[async_trait]
pub trait TrustBroker: Send + Sync {
    /// # Errors
    /// `ExchangeRejected` when the service refuses the assertion, `Network`
    /// for transient failures, `Protocol` for an unusable response.
    async fn assume_role_with_saml(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<TemporaryCredential>;
}

/// STS client without signing credentials, the assertion is the proof.
pub struct StsBroker {
    client: Client,
}

impl StsBroker {
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .no_credentials()
            .load()
            .await;

        Self {
            client: Client::new(&config),
        }
    }
}

fn classify(err: SdkError<AssumeRoleWithSAMLError>) -> Error {
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(service) => match service.err().code() {
            Some("Throttling" | "ThrottlingException" | "RequestLimitExceeded") => {
                Error::Network(message)
            }
            _ => Error::ExchangeRejected(message),
        },
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => Error::Network(message),
        _ => Error::Protocol(message),
    }
}

#[async_trait]
impl TrustBroker for StsBroker {
    async fn assume_role_with_saml(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<TemporaryCredential> {
        let output = self
            .client
            .assume_role_with_saml()
            .role_arn(&request.role_arn)
            .principal_arn(&request.principal_arn)
            .saml_assertion(&request.saml_assertion)
            .duration_seconds(request.duration_seconds)
            .send()
            .await
            .map_err(classify)?;

        let credentials = output
            .credentials()
            .ok_or_else(|| Error::Protocol("STS response has no credentials".to_string()))?;

        let expiration = DateTime::<Utc>::from_timestamp(credentials.expiration().secs(), 0)
            .ok_or_else(|| Error::Protocol("STS returned an invalid expiration".to_string()))?;

        Ok(TemporaryCredential::new(
            &request.role_arn,
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token(),
            expiration,
        ))
    }
}

/// Exchanges an assertion for credentials through a [`TrustBroker`].
pub struct CredentialExchanger {
    broker: Arc<dyn TrustBroker>,
    retry: RetryPolicy,
    observer: Arc<dyn AuthObserver>,
    duration_seconds: i32,
}

impl CredentialExchanger {
    #[must_use]
    pub fn new(
        broker: Arc<dyn TrustBroker>,
        retry: RetryPolicy,
        observer: Arc<dyn AuthObserver>,
        duration_seconds: i32,
    ) -> Self {
        Self {
            broker,
            retry,
            observer,
            duration_seconds,
        }
    }

    /// Requested duration capped by the assertion's `SessionDuration`.
    #[must_use]
    pub fn duration_for(&self, assertion: &Assertion) -> i32 {
        let duration = assertion
            .session_duration()
            .map_or(self.duration_seconds, |max| self.duration_seconds.min(max));
        duration.max(MIN_DURATION_SECONDS)
    }

    /// Consumes the assertion, it is good for one exchange.
    ///
    /// # Errors
    /// `ExchangeRejected` is returned as is, `Network` after the retries.
    pub async fn exchange(
        &self,
        assertion: Assertion,
        role: &RoleCandidate,
    ) -> Result<TemporaryCredential> {
        let request = AssumeRoleRequest {
            role_arn: role.role_arn.clone(),
            principal_arn: role.provider_arn.clone(),
            duration_seconds: self.duration_for(&assertion),
            saml_assertion: assertion.document().to_string(),
        };

        debug!(
            "assuming {} for {}s",
            request.role_arn, request.duration_seconds
        );

        let span = info_span!("sts.assume_role_with_saml", role = %request.role_arn);
        let mut credential = self
            .retry
            .run("credential exchange", self.observer.as_ref(), || {
                self.broker.assume_role_with_saml(&request)
            })
            .instrument(span)
            .await?;
        credential.role_arn.clone_from(&role.role_arn);

        info!(
            "credentials for {} valid until {}",
            role.role_arn,
            credential.expiration_rfc3339()
        );

        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{observe::TracingObserver, okta::assertion::tests::assertion};
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tokio::time::Duration;

    struct FakeBroker {
        failures: Mutex<Vec<Error>>,
        requests: Mutex<Vec<AssumeRoleRequest>>,
    }

    impl FakeBroker {
        fn new(failures: Vec<Error>) -> Self {
            Self {
                failures: Mutex::new(failures),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TrustBroker for FakeBroker {
        async fn assume_role_with_saml(
            &self,
            request: &AssumeRoleRequest,
        ) -> Result<TemporaryCredential> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(TemporaryCredential::new(
                "arn:role:other",
                "ASIA",
                "secret",
                "token",
                Utc.with_ymd_and_hms(2026, 10, 19, 21, 0, 0).unwrap(),
            ))
        }
    }

    fn exchanger(broker: Arc<FakeBroker>, duration_seconds: i32) -> CredentialExchanger {
        let retry = RetryPolicy {
            retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        CredentialExchanger::new(broker, retry, Arc::new(TracingObserver), duration_seconds)
    }

    #[tokio::test]
    async fn test_exchange_builds_request() {
        let broker = Arc::new(FakeBroker::new(Vec::new()));
        let role = RoleCandidate::new("arn:role:dev", "arn:provider:okta");
        let assertion = assertion(&["arn:role:dev,arn:provider:okta"]);
        let document = assertion.document().to_string();

        let credential = exchanger(Arc::clone(&broker), 43200)
            .exchange(assertion, &role)
            .await
            .unwrap();
        assert_eq!(credential.access_key_id, "ASIA");
        assert_eq!(credential.role_arn, "arn:role:dev");

        let requests = broker.requests.lock().unwrap();
        assert_eq!(
            requests.as_slice(),
            [AssumeRoleRequest {
                role_arn: "arn:role:dev".into(),
                principal_arn: "arn:provider:okta".into(),
                saml_assertion: document,
                duration_seconds: 3600,
            }]
        );
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let broker = Arc::new(FakeBroker::new(vec![Error::ExchangeRejected(
            "InvalidIdentityToken".into(),
        )]));
        let role = RoleCandidate::new("arn:role:dev", "arn:provider:okta");

        let err = exchanger(Arc::clone(&broker), 3600)
            .exchange(assertion(&["arn:role:dev,arn:provider:okta"]), &role)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExchangeRejected(_)));
        assert_eq!(broker.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_is_retried() {
        let broker = Arc::new(FakeBroker::new(vec![
            Error::Network("dispatch".into()),
            Error::Network("timeout".into()),
        ]));
        let role = RoleCandidate::new("arn:role:dev", "arn:provider:okta");

        exchanger(Arc::clone(&broker), 3600)
            .exchange(assertion(&["arn:role:dev,arn:provider:okta"]), &role)
            .await
            .unwrap();
        assert_eq!(broker.requests.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_duration_floor() {
        let broker = Arc::new(FakeBroker::new(Vec::new()));
        let assertion = assertion(&["arn:role:dev,arn:provider:okta"]);
        assert_eq!(exchanger(Arc::clone(&broker), 60).duration_for(&assertion), 900);
        assert_eq!(exchanger(broker, 1800).duration_for(&assertion), 1800);
    }
}
