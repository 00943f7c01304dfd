#![allow(clippy::unwrap_used, dead_code)]

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use chrono::{TimeDelta, Utc};
use okta_aws_login::{
    Error, Result,
    aws::{
        credentials::TemporaryCredential,
        roles::RoleCandidate,
        sts::{AssumeRoleRequest, TrustBroker},
    },
    okta::transaction::Factor,
    prompt::Prompter,
};
use secrecy::SecretString;
use std::{collections::VecDeque, sync::Mutex};

pub const APP_PATH: &str = "/home/amazon_aws/0oa1b2c3d4/272";
pub const ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";

/// Answers prompts in order and records notifications.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    pub notifications: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(ToString::to_string).collect()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, what: &str) -> Result<String> {
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::InputAborted(format!("{what} not provided")))
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().unwrap().len()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask_username(&self) -> Result<String> {
        self.next("Username")
    }

    fn ask_password(&self, _label: &str) -> Result<SecretString> {
        self.next("Password").map(SecretString::from)
    }

    fn ask_passcode(&self, _factor: &Factor) -> Result<SecretString> {
        self.next("Verification code").map(SecretString::from)
    }

    fn ask_answer(&self, _question: &str) -> Result<SecretString> {
        self.next("Answer").map(SecretString::from)
    }

    fn select_factor(&self, _factors: &[Factor]) -> Result<usize> {
        Ok(0)
    }

    fn select_role(&self, _candidates: &[RoleCandidate]) -> Result<usize> {
        Ok(0)
    }

    fn notify(&self, message: &str) {
        self.notifications.lock().unwrap().push(message.to_string());
    }
}

/// Trust broker that hands out a fixed credential and keeps the requests.
pub struct FakeBroker {
    pub credential: TemporaryCredential,
    pub requests: Mutex<Vec<AssumeRoleRequest>>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self {
            credential: TemporaryCredential::new(
                "arn:role:dev",
                "ASIAEXAMPLE",
                "wJalrXUtnFEMI/K7MDENG",
                "FwoGZXIvYXdzEBYaDH",
                Utc::now() + TimeDelta::hours(1),
            ),
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
        Ok(self.credential.clone())
    }
}

pub fn saml_response(role_values: &[&str]) -> String {
    saml_document(role_values, "")
}

/// SAML response whose `Conditions` window closed long ago.
pub fn expired_saml_response(role_values: &[&str]) -> String {
    saml_document(
        role_values,
        r#"<saml2:Conditions NotBefore="2020-01-01T00:00:00Z" NotOnOrAfter="2020-01-01T00:05:00Z"/>"#,
    )
}

fn saml_document(role_values: &[&str], conditions: &str) -> String {
    let values: String = role_values
        .iter()
        .map(|v| format!("<saml2:AttributeValue>{v}</saml2:AttributeValue>"))
        .collect();

    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" Version="2.0">
  <saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" Version="2.0">
    {conditions}
    <saml2:AttributeStatement>
      <saml2:Attribute Name="{ROLE_ATTRIBUTE}">{values}</saml2:Attribute>
    </saml2:AttributeStatement>
  </saml2:Assertion>
</saml2p:Response>"#
    );

    Base64::encode_string(xml.as_bytes())
}

/// The auto-submitting form Okta serves for the AWS application.
pub fn app_page(role_values: &[&str]) -> String {
    form_page(&saml_response(role_values))
}

pub fn form_page(saml_response: &str) -> String {
    let document = saml_response.replace('+', "&#x2b;").replace('=', "&#x3d;");

    format!(
        r#"<!DOCTYPE html><html><body onload="document.forms[0].submit()">
<form id="appForm" action="https&#x3a;&#x2f;&#x2f;signin.aws.amazon.com&#x2f;saml" method="POST">
<input name="SAMLResponse" type="hidden" value="{document}"/>
<input name="RelayState" type="hidden" value=""/>
</form></body></html>"#
    )
}
