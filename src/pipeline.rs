//! One login, from cached credentials or from Okta through to STS.

use crate::{
    aws::{
        credentials::TemporaryCredential,
        roles::{RoleCandidate, resolve_roles, select_role},
        sink::CredentialSink,
        sts::{CredentialExchanger, StsBroker, TrustBroker},
    },
    cache::{
        credentials::CredentialCache,
        session::{DEFAULT_SESSION_LIFETIME, SessionCache},
    },
    config::ProfileConfig,
    error::{Error, Result},
    observe::{AuthObserver, TracingObserver},
    okta::{
        OktaClient,
        assertion::{Assertion, AssertionRetriever},
        authn::Authenticator,
        factors::{FactorRegistry, FactorSettings},
    },
    prompt::Prompter,
    retry::RetryPolicy,
};
use chrono::Utc;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

/// Per-run overrides of the profile configuration.
#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub role: Option<String>,
    pub credential_profile: Option<String>,
    pub factor: Option<String>,
    /// Ignore cached credentials and sessions but still refresh them.
    pub force: bool,
    /// Neither read nor write any cache.
    pub no_cache: bool,
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug)]
pub struct Login {
    /// Section name used for the cache and the credentials file.
    pub profile: String,
    pub role: Option<RoleCandidate>,
    pub credential: TemporaryCredential,
    pub from_cache: bool,
}

pub struct PipelineBuilder {
    profile: ProfileConfig,
    prompter: Arc<dyn Prompter>,
    observer: Arc<dyn AuthObserver>,
    retry: RetryPolicy,
    registry: Option<FactorRegistry>,
    broker: Option<Arc<dyn TrustBroker>>,
    cache_dir: Option<PathBuf>,
    sink: Option<Arc<dyn CredentialSink>>,
    interactive: bool,
}

impl PipelineBuilder {
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: FactorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn broker(mut self, broker: Arc<dyn TrustBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Directory holding `credentials.json` and `sessions.json`; without one
    /// nothing is cached.
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn CredentialSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Ask the user to pick a role instead of failing with `AmbiguousRole`.
    #[must_use]
    pub const fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// # Errors
    /// `Protocol` for an unusable `okta_host`.
    pub async fn build(self) -> Result<Pipeline> {
        let okta = OktaClient::new(
            &self.profile.okta_host,
            self.retry,
            Arc::clone(&self.observer),
        )?;

        let broker = match self.broker {
            Some(broker) => broker,
            None => Arc::new(StsBroker::new(&self.profile.aws_region).await),
        };

        let exchanger = CredentialExchanger::new(
            broker,
            self.retry,
            Arc::clone(&self.observer),
            self.profile.duration_seconds,
        );

        let registry = self.registry.unwrap_or_else(|| {
            FactorRegistry::with_defaults(FactorSettings {
                push_timeout: Duration::from_secs(self.profile.push_timeout_seconds),
                ..FactorSettings::default()
            })
        });

        let credentials = self.cache_dir.as_deref().map(CredentialCache::in_dir);
        let sessions = self
            .cache_dir
            .as_deref()
            .filter(|_| self.profile.cache_session)
            .map(|dir| {
                let lifetime = self.profile.session_lifetime().unwrap_or_else(|| {
                    warn!(
                        "session_lifetime_seconds {} is out of range, keeping sessions {}s",
                        self.profile.session_lifetime_seconds,
                        DEFAULT_SESSION_LIFETIME.num_seconds()
                    );
                    DEFAULT_SESSION_LIFETIME
                });
                SessionCache::in_dir(dir, lifetime)
            });

        Ok(Pipeline {
            okta,
            profile: self.profile,
            registry,
            prompter: self.prompter,
            exchanger,
            credentials,
            sessions,
            sink: self.sink,
            interactive: self.interactive,
        })
    }
}

/// Everything one profile's login needs. Nothing is shared between
/// pipelines except the cache files.
pub struct Pipeline {
    okta: OktaClient,
    profile: ProfileConfig,
    registry: FactorRegistry,
    prompter: Arc<dyn Prompter>,
    exchanger: CredentialExchanger,
    credentials: Option<CredentialCache>,
    sessions: Option<SessionCache>,
    sink: Option<Arc<dyn CredentialSink>>,
    interactive: bool,
}

impl Pipeline {
    pub fn builder(profile: ProfileConfig, prompter: Arc<dyn Prompter>) -> PipelineBuilder {
        PipelineBuilder {
            profile,
            prompter,
            observer: Arc::new(TracingObserver),
            retry: RetryPolicy::default(),
            registry: None,
            broker: None,
            cache_dir: None,
            sink: None,
            interactive: false,
        }
    }

    #[must_use]
    pub const fn profile(&self) -> &ProfileConfig {
        &self.profile
    }

    /// # Errors
    /// Any error of the individual steps. The caches and the sink are only
    /// written after a complete exchange.
    #[instrument(skip(self, request), fields(okta = %self.okta.base_url()))]
    pub async fn run(&self, request: &LoginRequest) -> Result<Login> {
        let requested_role = request.role.as_deref().or(self.profile.role_arn.as_deref());
        let preset_profile = request
            .credential_profile
            .clone()
            .or_else(|| self.profile.credential_profile.clone())
            .or_else(|| {
                requested_role.map(|role| RoleCandidate::new(role, "").role_name().to_string())
            });

        if let Some(login) = self.cached(preset_profile.as_deref(), requested_role, request) {
            return Ok(login);
        }

        let username = match request.username.as_ref().or(self.profile.username.as_ref()) {
            Some(username) => username.clone(),
            None => self.prompter.ask_username()?,
        };

        let assertion = self.assertion(&username, request).await?;
        if !assertion.is_current(Utc::now()) {
            return Err(Error::AssertionUnavailable(
                "the assertion is outside its validity window".to_string(),
            ));
        }

        let candidates = resolve_roles(&assertion);
        let role = self.choose_role(&candidates, requested_role)?;
        let profile = preset_profile.unwrap_or_else(|| role.role_name().to_string());

        let credential = self.exchanger.exchange(assertion, &role).await?;

        if !request.no_cache {
            if let Some(cache) = &self.credentials {
                if let Err(e) = cache.put(&profile, &credential) {
                    warn!("cannot cache credentials: {}", e);
                }
            }
        }

        if let Some(sink) = &self.sink {
            sink.write(&profile, &credential)?;
        }

        Ok(Login {
            profile,
            role: Some(role),
            credential,
            from_cache: false,
        })
    }

    fn cached(
        &self,
        profile: Option<&str>,
        requested_role: Option<&str>,
        request: &LoginRequest,
    ) -> Option<Login> {
        if request.force || request.no_cache {
            return None;
        }

        let profile = profile?;
        let credential = self.credentials.as_ref()?.get(profile)?;

        if let Some(role) = requested_role.filter(|role| *role != credential.role_arn) {
            debug!(
                "cached credentials for {} belong to {}, not {}",
                profile, credential.role_arn, role
            );
            return None;
        }

        info!(
            "using cached credentials for {} until {}",
            profile,
            credential.expiration_rfc3339()
        );

        Some(Login {
            profile: profile.to_string(),
            role: None,
            credential,
            from_cache: true,
        })
    }

    async fn assertion(&self, username: &str, request: &LoginRequest) -> Result<Assertion> {
        let retriever = AssertionRetriever::new(&self.okta, &self.profile.app_url)?;
        let relay_state = self.profile.relay_state.as_deref();
        let sessions = self.sessions.as_ref().filter(|_| !request.no_cache);

        if let Some(sessions) = sessions.filter(|_| !request.force) {
            if let Some(session) = sessions.get(username) {
                debug!("reusing the Okta session of {}", username);
                match retriever.fetch_assertion_with_session(&session, relay_state).await {
                    Ok(assertion) => return Ok(assertion),
                    Err(Error::AssertionUnavailable(reason)) => {
                        info!("cached Okta session refused, signing in again: {}", reason);
                        if let Err(e) = sessions.invalidate(username) {
                            warn!("cannot drop the cached session: {}", e);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let password = self
            .prompter
            .ask_password(&format!("Okta password for {username}"))?;

        let factor = request.factor.as_deref().or(self.profile.factor.as_deref());
        let session_token = Authenticator::new(&self.okta)
            .authenticate(
                username,
                &password,
                &self.registry,
                self.prompter.as_ref(),
                factor,
            )
            .await?;

        match sessions {
            Some(sessions) => {
                let session = retriever.create_session(&session_token).await?;
                if let Err(e) = sessions.put(username, &session) {
                    warn!("cannot cache the Okta session: {}", e);
                }
                retriever
                    .fetch_assertion_with_session(&session, relay_state)
                    .await
            }
            None => retriever.fetch_assertion(&session_token, relay_state).await,
        }
    }

    fn choose_role(
        &self,
        candidates: &[RoleCandidate],
        requested: Option<&str>,
    ) -> Result<RoleCandidate> {
        match select_role(candidates, requested) {
            Err(Error::AmbiguousRole { candidates }) if self.interactive => {
                let index = self.prompter.select_role(&candidates)?;
                candidates
                    .get(index)
                    .cloned()
                    .ok_or_else(|| Error::InvalidState(format!("no role at index {index}")))
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aws::sts::AssumeRoleRequest, prompt::tests::ScriptedPrompter};
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    struct StaticBroker;

    #[async_trait]
    impl TrustBroker for StaticBroker {
        async fn assume_role_with_saml(
            &self,
            _request: &AssumeRoleRequest,
        ) -> Result<TemporaryCredential> {
            Err(Error::ExchangeRejected("not expected in this test".into()))
        }
    }

    async fn pipeline(
        profile: ProfileConfig,
        dir: &TempDir,
        prompter: ScriptedPrompter,
    ) -> Pipeline {
        Pipeline::builder(profile, Arc::new(prompter))
            .broker(Arc::new(StaticBroker))
            .retry(RetryPolicy::none())
            .cache_dir(dir.path())
            .build()
            .await
            .unwrap()
    }

    const DEV_ROLE: &str = "arn:aws:iam::123456789012:role/dev";

    fn cached_credential(dir: &TempDir, profile: &str, role_arn: &str) -> TemporaryCredential {
        let credential = TemporaryCredential::new(
            role_arn,
            "ASIACACHED",
            "secret",
            "token",
            Utc::now() + TimeDelta::hours(1),
        );
        CredentialCache::in_dir(dir.path()).put(profile, &credential).unwrap();
        credential
    }

    #[tokio::test]
    async fn test_cache_hit_skips_okta() {
        let dir = TempDir::new().unwrap();
        let credential = cached_credential(&dir, "dev", DEV_ROLE);

        let mut profile = ProfileConfig::new("127.0.0.1:9", "/home/amazon_aws/0oa1/272");
        profile.role_arn = Some(DEV_ROLE.into());

        let login = pipeline(profile, &dir, ScriptedPrompter::default())
            .await
            .run(&LoginRequest::default())
            .await
            .unwrap();

        assert!(login.from_cache);
        assert_eq!(login.profile, "dev");
        assert_eq!(login.credential, credential);
    }

    #[tokio::test]
    async fn test_force_bypasses_cache() {
        let dir = TempDir::new().unwrap();
        cached_credential(&dir, "dev", DEV_ROLE);

        let profile = ProfileConfig::new("127.0.0.1:9", "/home/amazon_aws/0oa1/272");
        let request = LoginRequest {
            credential_profile: Some("dev".into()),
            force: true,
            ..LoginRequest::default()
        };

        let err = pipeline(profile, &dir, ScriptedPrompter::default())
            .await
            .run(&request)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InputAborted(_)));
    }

    #[tokio::test]
    async fn test_cached_credentials_of_another_account_are_a_miss() {
        let dir = TempDir::new().unwrap();
        cached_credential(&dir, "dev", "arn:aws:iam::111111111111:role/dev");

        let mut profile = ProfileConfig::new("127.0.0.1:9", "/home/amazon_aws/0oa1/272");
        profile.role_arn = Some("arn:aws:iam::999999999999:role/dev".into());

        // Username prompt is reached, so the cache was not used.
        let err = pipeline(profile, &dir, ScriptedPrompter::default())
            .await
            .run(&LoginRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InputAborted(_)));
    }

    #[tokio::test]
    async fn test_role_change_under_fixed_profile_is_a_miss() {
        let dir = TempDir::new().unwrap();
        cached_credential(&dir, "work", DEV_ROLE);

        let mut profile = ProfileConfig::new("127.0.0.1:9", "/home/amazon_aws/0oa1/272");
        profile.credential_profile = Some("work".into());
        let pipeline = pipeline(profile, &dir, ScriptedPrompter::default()).await;

        let same_role = LoginRequest {
            role: Some(DEV_ROLE.into()),
            ..LoginRequest::default()
        };
        assert!(pipeline.run(&same_role).await.unwrap().from_cache);

        let other_role = LoginRequest {
            role: Some("arn:aws:iam::123456789012:role/ops".into()),
            ..LoginRequest::default()
        };
        assert!(matches!(
            pipeline.run(&other_role).await,
            Err(Error::InputAborted(_))
        ));

        // Without a requested role any cached role is accepted.
        assert!(pipeline.run(&LoginRequest::default()).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_out_of_range_session_lifetime_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let mut profile = ProfileConfig::new("acme.okta.com", "/home/amazon_aws/0oa1/272");
        profile.cache_session = true;
        profile.session_lifetime_seconds = i64::MAX;

        let pipeline = pipeline(profile, &dir, ScriptedPrompter::default()).await;
        assert!(pipeline.sessions.is_some());
    }

    #[tokio::test]
    async fn test_interactive_role_choice() {
        let dir = TempDir::new().unwrap();
        let prompter = ScriptedPrompter {
            role_choice: Some(1),
            ..ScriptedPrompter::default()
        };
        let candidates = vec![RoleCandidate::new("A", "P1"), RoleCandidate::new("B", "P2")];
        let profile = ProfileConfig::new("acme.okta.com", "/home/amazon_aws/0oa1/272");

        let interactive = Pipeline::builder(profile.clone(), Arc::new(prompter))
            .broker(Arc::new(StaticBroker))
            .interactive(true)
            .build()
            .await
            .unwrap();
        assert_eq!(interactive.choose_role(&candidates, None).unwrap(), candidates[1]);

        let batch = pipeline(profile, &dir, ScriptedPrompter::default()).await;
        assert!(matches!(
            batch.choose_role(&candidates, None),
            Err(Error::AmbiguousRole { .. })
        ));
    }
}
