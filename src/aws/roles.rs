//! Roles granted by the SAML assertion.
//!
//! Each value of the `https://aws.amazon.com/SAML/Attributes/Role` attribute
//! is a comma separated pair of a role ARN and the ARN of the SAML provider
//! trusted by that role. Okta emits them in either order.

use crate::{
    error::{Error, Result},
    okta::assertion::{Assertion, ROLE_ATTRIBUTE},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

const PROVIDER_MARKER: &str = ":saml-provider/";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleCandidate {
    pub role_arn: String,
    pub provider_arn: String,
}

impl RoleCandidate {
    pub fn new(role_arn: impl Into<String>, provider_arn: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
            provider_arn: provider_arn.into(),
        }
    }

    /// Parse one attribute value, `None` if it is not a pair.
    #[must_use]
    pub fn from_attribute(value: &str) -> Option<Self> {
        let (first, second) = value.split_once(',')?;
        let (first, second) = (first.trim(), second.trim());

        if first.is_empty() || second.is_empty() {
            return None;
        }

        if first.contains(PROVIDER_MARKER) && !second.contains(PROVIDER_MARKER) {
            Some(Self::new(second, first))
        } else {
            Some(Self::new(first, second))
        }
    }

    /// Last path segment of the role ARN, `dev` for `...:role/team/dev`.
    #[must_use]
    pub fn role_name(&self) -> &str {
        self.role_arn
            .rsplit(['/', ':'])
            .next()
            .unwrap_or(&self.role_arn)
    }
}

impl fmt::Display for RoleCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (via {})", self.role_arn, self.provider_arn)
    }
}

/// Candidates in document order with exact duplicates removed.
#[must_use]
pub fn resolve_roles(assertion: &Assertion) -> Vec<RoleCandidate> {
    let mut candidates: Vec<RoleCandidate> = Vec::new();

    for value in assertion.attribute_values(ROLE_ATTRIBUTE) {
        match RoleCandidate::from_attribute(value) {
            Some(candidate) if !candidates.contains(&candidate) => candidates.push(candidate),
            Some(_) => debug!("duplicate role attribute: {}", value),
            None => warn!("ignoring malformed role attribute: {}", value),
        }
    }

    candidates
}

/// Pick the role to assume.
///
/// # Errors
/// `RoleNotFound` when `requested` is not granted (or nothing is),
/// `AmbiguousRole` when several roles are granted and none was requested.
pub fn select_role(candidates: &[RoleCandidate], requested: Option<&str>) -> Result<RoleCandidate> {
    if let Some(requested) = requested {
        return candidates
            .iter()
            .find(|c| c.role_arn == requested)
            .cloned()
            .ok_or_else(|| Error::RoleNotFound {
                requested: Some(requested.to_string()),
                candidates: candidates.to_vec(),
            });
    }

    match candidates {
        [] => Err(Error::RoleNotFound {
            requested: None,
            candidates: Vec::new(),
        }),
        [only] => Ok(only.clone()),
        _ => Err(Error::AmbiguousRole {
            candidates: candidates.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::okta::assertion::tests::assertion;

    fn pair() -> Vec<RoleCandidate> {
        vec![RoleCandidate::new("A", "P1"), RoleCandidate::new("B", "P2")]
    }

    #[test]
    fn test_from_attribute_either_order() {
        let role = "arn:aws:iam::123456789012:role/dev";
        let provider = "arn:aws:iam::123456789012:saml-provider/okta";

        assert_eq!(
            RoleCandidate::from_attribute(&format!("{role},{provider}")),
            Some(RoleCandidate::new(role, provider))
        );
        assert_eq!(
            RoleCandidate::from_attribute(&format!("{provider}, {role}")),
            Some(RoleCandidate::new(role, provider))
        );
        assert_eq!(RoleCandidate::from_attribute(role), None);
        assert_eq!(RoleCandidate::from_attribute(",x"), None);
    }

    #[test]
    fn test_role_name() {
        assert_eq!(RoleCandidate::new("arn:aws:iam::1:role/team/dev", "p").role_name(), "dev");
        assert_eq!(RoleCandidate::new("arn:role:dev", "p").role_name(), "dev");
    }

    #[test]
    fn test_resolve_roles_dedupes_in_order() {
        let assertion = assertion(&[
            "arn:role:dev,arn:provider:okta",
            "arn:role:ops,arn:provider:okta",
            "arn:role:dev,arn:provider:okta",
            "not-a-pair",
        ]);

        assert_eq!(
            resolve_roles(&assertion),
            vec![
                RoleCandidate::new("arn:role:dev", "arn:provider:okta"),
                RoleCandidate::new("arn:role:ops", "arn:provider:okta"),
            ]
        );
    }

    #[test]
    fn test_select_requested_role() {
        assert_eq!(select_role(&pair(), Some("B")).unwrap(), RoleCandidate::new("B", "P2"));
    }

    #[test]
    fn test_select_ambiguous_role() {
        match select_role(&pair(), None) {
            Err(Error::AmbiguousRole { candidates }) => assert_eq!(candidates, pair()),
            other => panic!("expected AmbiguousRole, got {other:?}"),
        }
    }

    #[test]
    fn test_select_missing_role() {
        match select_role(&pair(), Some("C")) {
            Err(Error::RoleNotFound { requested, candidates }) => {
                assert_eq!(requested.as_deref(), Some("C"));
                assert_eq!(candidates, pair());
            }
            other => panic!("expected RoleNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_select_is_case_sensitive() {
        assert!(matches!(
            select_role(&pair(), Some("a")),
            Err(Error::RoleNotFound { .. })
        ));
    }

    #[test]
    fn test_select_single_and_none() {
        let single = vec![RoleCandidate::new("A", "P1")];
        assert_eq!(select_role(&single, None).unwrap(), single[0]);
        assert!(matches!(
            select_role(&[], None),
            Err(Error::RoleNotFound { requested: None, .. })
        ));
    }
}
