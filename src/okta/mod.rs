pub mod assertion;
pub mod authn;
pub mod factors;
pub mod transaction;

use crate::{
    APP_USER_AGENT,
    error::{Error, Result},
    observe::{AuthEvent, AuthObserver},
    retry::RetryPolicy,
};
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{Instrument, debug, info_span};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept a bare Okta host (`acme.okta.com`) or a full base URL.
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// HTTP handle on one Okta org, owned by a pipeline.
pub struct OktaClient {
    http: Client,
    base_url: Url,
    retry: RetryPolicy,
    observer: Arc<dyn AuthObserver>,
}

impl OktaClient {
    /// # Errors
    /// Returns `Protocol` if `host` is not a usable URL and `Network` if the
    /// HTTP client cannot be built.
    pub fn new(host: &str, retry: RetryPolicy, observer: Arc<dyn AuthObserver>) -> Result<Self> {
        let base_url = Url::parse(&normalize_host(host))
            .map_err(|e| Error::Protocol(format!("invalid Okta host {host}: {e}")))?;

        if base_url.host().is_none() {
            return Err(Error::Protocol(format!(
                "invalid Okta host {host}: no host specified"
            )));
        }

        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url,
            retry,
            observer,
        })
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub fn observer(&self) -> &dyn AuthObserver {
        self.observer.as_ref()
    }

    /// Resolve `path` (absolute URL or path on the org) to a URL.
    ///
    /// # Errors
    /// Returns `Protocol` if the result is not a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)
        } else {
            self.base_url.join(path)
        };

        let url = url.map_err(|e| Error::Protocol(format!("invalid endpoint {path}: {e}")))?;

        debug!("endpoint URL: {}", url);

        Ok(url)
    }

    /// POST a JSON body and return the status and raw body.
    ///
    /// Transport failures, 429 and 5xx responses come back as `Network` so
    /// the retry policy can pick them up.
    pub(crate) async fn post_json(
        &self,
        url: &Url,
        payload: &Value,
    ) -> Result<(StatusCode, String)> {
        self.observer.on_event(&AuthEvent::RequestSent {
            method: "POST",
            endpoint: url.to_string(),
        });

        let span = info_span!("okta.post", http.method = "POST", url = %url);
        let response = self
            .http
            .post(url.clone())
            .header(header::ACCEPT, "application/json")
            .header(header::CACHE_CONTROL, "no-cache")
            .json(payload)
            .send()
            .instrument(span)
            .await?;

        self.read(url, response).await
    }

    /// GET a page, optionally with an Okta `sid` cookie.
    pub(crate) async fn get(&self, url: &Url, sid: Option<&str>) -> Result<(StatusCode, String)> {
        self.observer.on_event(&AuthEvent::RequestSent {
            method: "GET",
            endpoint: redact_query(url),
        });

        let mut request = self.http.get(url.clone());
        if let Some(sid) = sid {
            request = request.header(header::COOKIE, format!("sid={sid}"));
        }

        let span = info_span!("okta.get", http.method = "GET", url = %redact_query(url));
        let response = request.send().instrument(span).await?;

        self.read(url, response).await
    }

    async fn read(&self, url: &Url, response: reqwest::Response) -> Result<(StatusCode, String)> {
        let status = response.status();

        self.observer.on_event(&AuthEvent::ResponseReceived {
            endpoint: redact_query(url),
            status: status.as_u16(),
        });

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Error::Network(format!("{} - {}", redact_query(url), status)));
        }

        let body = response.text().await?;

        Ok((status, body))
    }
}

/// Query strings carry one-time tokens, keep them out of logs.
fn redact_query(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::TracingObserver;

    fn client(host: &str) -> Result<OktaClient> {
        OktaClient::new(host, RetryPolicy::none(), Arc::new(TracingObserver))
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("acme.okta.com"), "https://acme.okta.com");
        assert_eq!(normalize_host("https://acme.okta.com/"), "https://acme.okta.com");
        assert_eq!(normalize_host("http://127.0.0.1:8080"), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_endpoint() {
        let okta = client("acme.okta.com").unwrap();
        assert_eq!(
            okta.endpoint("/api/v1/authn").unwrap().as_str(),
            "https://acme.okta.com/api/v1/authn"
        );
        assert_eq!(
            okta.endpoint("https://other.okta.com/api/v1/authn/factors/x/verify")
                .unwrap()
                .as_str(),
            "https://other.okta.com/api/v1/authn/factors/x/verify"
        );
    }

    #[test]
    fn test_invalid_host() {
        assert!(matches!(client("https://"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_redact_query() {
        let url =
            Url::parse("https://acme.okta.com/home/amazon_aws/0oa/272?onetimetoken=secret").unwrap();
        assert_eq!(redact_query(&url), "https://acme.okta.com/home/amazon_aws/0oa/272");
    }
}
