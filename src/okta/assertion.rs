//! SAML assertion retrieval from the Okta AWS application.
//!
//! Okta answers the application's embed URL with an auto-submitting HTML form
//! that carries the base64 `SAMLResponse`. The page is fetched either with a
//! fresh one-time session token or with a cached `sid` cookie.

use crate::{
    cache::session::CachedSession,
    error::{Error, Result},
    okta::OktaClient,
};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, TimeDelta, Utc};
use quick_xml::{
    Reader,
    escape::unescape,
    events::{BytesStart, Event},
};
use regex::Regex;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::{fmt, sync::LazyLock};
use tracing::{debug, instrument};
use url::Url;

pub const ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";
pub const SESSION_DURATION_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/SessionDuration";

/// Tolerated drift between the local clock and the identity provider's.
pub const CLOCK_SKEW: TimeDelta = TimeDelta::minutes(3);

static INPUT_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b[^>]*>").ok());
static NAME_ATTR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)\bname\s*=\s*"([^"]*)""#).ok());
static VALUE_ATTR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)\bvalue\s*=\s*"([^"]*)""#).ok());

/// Value of the hidden form input `name` in an HTML page, entity-decoded.
#[must_use]
pub fn form_input(html: &str, name: &str) -> Option<String> {
    let (Some(input), Some(name_attr), Some(value_attr)) =
        (INPUT_TAG.as_ref(), NAME_ATTR.as_ref(), VALUE_ATTR.as_ref())
    else {
        return None;
    };

    input
        .find_iter(html)
        .map(|tag| tag.as_str())
        .find(|tag| {
            name_attr
                .captures(tag)
                .and_then(|c| c.get(1))
                .is_some_and(|n| n.as_str() == name)
        })
        .and_then(|tag| value_attr.captures(tag))
        .and_then(|c| c.get(1))
        .map(|value| {
            unescape(value.as_str()).map_or_else(|_| value.as_str().to_string(), |v| v.into_owned())
        })
}

/// A SAML assertion issued for the AWS application.
///
/// Not `Clone`: it is handed to STS exactly once.
pub struct Assertion {
    document: String,
    attributes: Vec<(String, Vec<String>)>,
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assertion")
            .field("document", &format_args!("<{} bytes>", self.document.len()))
            .field("attributes", &self.attributes.len())
            .field("not_before", &self.not_before)
            .field("not_on_or_after", &self.not_on_or_after)
            .finish()
    }
}

impl Assertion {
    /// Decode and parse a base64 `SAMLResponse`.
    ///
    /// # Errors
    /// `AssertionUnavailable` if the document is not base64 XML.
    pub fn from_base64(document: &str) -> Result<Self> {
        let document: String = document.split_whitespace().collect();

        let xml = Base64::decode_vec(&document)
            .map_err(|e| Error::AssertionUnavailable(format!("SAMLResponse is not base64: {e}")))?;
        let xml = String::from_utf8(xml)
            .map_err(|e| Error::AssertionUnavailable(format!("SAMLResponse is not UTF-8: {e}")))?;

        let parsed = parse_xml(&xml)?;

        Ok(Self {
            document,
            attributes: parsed.attributes,
            not_before: parsed.not_before,
            not_on_or_after: parsed.not_on_or_after,
        })
    }

    /// The base64 document as sent to STS.
    #[must_use]
    pub fn document(&self) -> &str {
        &self.document
    }

    /// Values of the attribute `name`, in document order.
    #[must_use]
    pub fn attribute_values(&self, name: &str) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(n, _)| n == name)
            .flat_map(|(_, values)| values.iter().map(String::as_str))
            .collect()
    }

    /// Maximum STS session length granted by the identity provider.
    #[must_use]
    pub fn session_duration(&self) -> Option<i32> {
        self.attribute_values(SESSION_DURATION_ATTRIBUTE)
            .first()
            .and_then(|v| v.trim().parse().ok())
    }

    #[must_use]
    pub const fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    #[must_use]
    pub const fn not_on_or_after(&self) -> Option<DateTime<Utc>> {
        self.not_on_or_after
    }

    /// Whether `now` falls inside the assertion's `Conditions` window, give
    /// or take [`CLOCK_SKEW`].
    #[must_use]
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|t| now + CLOCK_SKEW >= t)
            && self.not_on_or_after.is_none_or(|t| now - CLOCK_SKEW < t)
    }
}

struct ParsedAssertion {
    attributes: Vec<(String, Vec<String>)>,
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::AssertionUnavailable(format!("invalid timestamp {value}: {e}")))
}

fn read_conditions(
    element: &BytesStart<'_>,
    not_before: &mut Option<DateTime<Utc>>,
    not_on_or_after: &mut Option<DateTime<Utc>>,
) -> Result<()> {
    for attr in element.attributes().flatten() {
        let value = attr.unescape_value().unwrap_or_default();
        match attr.key.local_name().as_ref() {
            b"NotBefore" => *not_before = Some(parse_instant(&value)?),
            b"NotOnOrAfter" => *not_on_or_after = Some(parse_instant(&value)?),
            _ => {}
        }
    }
    Ok(())
}

fn parse_xml(xml: &str) -> Result<ParsedAssertion> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut attributes: Vec<(String, Vec<String>)> = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;
    let mut in_value = false;
    let mut not_before = None;
    let mut not_on_or_after = None;
    let mut seen_assertion = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Assertion" => seen_assertion = true,
                b"Attribute" => {
                    let name = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == b"Name")
                        .and_then(|a| a.unescape_value().ok())
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    current = Some((name, Vec::new()));
                }
                b"AttributeValue" => {
                    in_value = true;
                    if let Some((_, values)) = current.as_mut() {
                        values.push(String::new());
                    }
                }
                b"Conditions" => read_conditions(&e, &mut not_before, &mut not_on_or_after)?,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"AttributeValue" => {
                    if let Some((_, values)) = current.as_mut() {
                        values.push(String::new());
                    }
                }
                b"Conditions" => read_conditions(&e, &mut not_before, &mut not_on_or_after)?,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_value {
                    let text = t.unescape().map_err(|e| {
                        Error::AssertionUnavailable(format!("invalid attribute value: {e}"))
                    })?;
                    if let Some(value) = current.as_mut().and_then(|(_, v)| v.last_mut()) {
                        value.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"AttributeValue" => in_value = false,
                b"Attribute" => {
                    if let Some(attribute) = current.take() {
                        attributes.push(attribute);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::AssertionUnavailable(format!(
                    "SAMLResponse is not valid XML: {e}"
                )));
            }
            _ => {}
        }
    }

    if !seen_assertion {
        return Err(Error::AssertionUnavailable(
            "SAMLResponse does not contain an assertion".to_string(),
        ));
    }

    Ok(ParsedAssertion {
        attributes,
        not_before,
        not_on_or_after,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    id: String,
    expires_at: DateTime<Utc>,
}

/// Trades an Okta session for the AWS application's SAML assertion.
pub struct AssertionRetriever<'a> {
    client: &'a OktaClient,
    app_url: Url,
}

impl<'a> AssertionRetriever<'a> {
    /// `app_url` is the embed link of the Okta AWS application, absolute or
    /// relative to the org.
    ///
    /// # Errors
    /// `Protocol` if `app_url` is not a valid URL.
    pub fn new(client: &'a OktaClient, app_url: &str) -> Result<Self> {
        Ok(Self {
            client,
            app_url: client.endpoint(app_url)?,
        })
    }

    /// Fetch the assertion with a one-time session token.
    ///
    /// # Errors
    /// `AssertionUnavailable` when Okta refuses the session (restart from
    /// primary authentication), `Network` once retries are exhausted.
    #[instrument(skip(self, session_token))]
    pub async fn fetch_assertion(
        &self,
        session_token: &SecretString,
        relay_state: Option<&str>,
    ) -> Result<Assertion> {
        let mut url = self.app_url.clone();
        url.query_pairs_mut()
            .append_pair("onetimetoken", session_token.expose_secret());
        if let Some(relay_state) = relay_state {
            url.query_pairs_mut().append_pair("RelayState", relay_state);
        }

        self.fetch(&url, None).await
    }

    /// Fetch the assertion with an existing Okta session (`sid` cookie).
    ///
    /// # Errors
    /// As [`AssertionRetriever::fetch_assertion`]; an expired session shows
    /// up as `AssertionUnavailable`.
    #[instrument(skip(self, session))]
    pub async fn fetch_assertion_with_session(
        &self,
        session: &CachedSession,
        relay_state: Option<&str>,
    ) -> Result<Assertion> {
        let mut url = self.app_url.clone();
        if let Some(relay_state) = relay_state {
            url.query_pairs_mut().append_pair("RelayState", relay_state);
        }

        self.fetch(&url, Some(session.session_id.expose_secret())).await
    }

    async fn fetch(&self, url: &Url, sid: Option<&str>) -> Result<Assertion> {
        let (status, body) = self
            .client
            .retry()
            .run("assertion fetch", self.client.observer(), || {
                self.client.get(url, sid)
            })
            .await?;

        match status {
            s if s.is_success() => {
                let document = form_input(&body, "SAMLResponse").ok_or_else(|| {
                    Error::AssertionUnavailable(
                        "the application page has no SAMLResponse, the Okta session is not valid"
                            .to_string(),
                    )
                })?;
                debug!("SAMLResponse received ({} bytes)", document.len());
                Assertion::from_base64(&document)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Err(
                Error::AssertionUnavailable(format!("{} - {}", self.app_url, status)),
            ),
            status => Err(Error::Protocol(format!("{} - {}", self.app_url, status))),
        }
    }

    /// Turn a one-time session token into a reusable Okta session.
    ///
    /// # Errors
    /// `AssertionUnavailable` when Okta refuses the token.
    #[instrument(skip(self, session_token))]
    pub async fn create_session(&self, session_token: &SecretString) -> Result<CachedSession> {
        let url = self.client.endpoint("/api/v1/sessions")?;
        let payload = json!({ "sessionToken": session_token.expose_secret() });

        let (status, body) = self
            .client
            .retry()
            .run("session creation", self.client.observer(), || {
                self.client.post_json(&url, &payload)
            })
            .await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::AssertionUnavailable(format!(
                "session token refused - {status}"
            )));
        }

        if !status.is_success() {
            return Err(Error::Protocol(format!("{url} - {status}")));
        }

        let session: SessionResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("invalid session response: {e}")))?;

        Ok(CachedSession::new(session.id, session.expires_at))
    }
}
