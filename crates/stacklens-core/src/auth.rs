// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared-secret gate for protected request fields.
//!
//! Some request fields are only accepted from trusted integrations that
//! present the deployment's API token. A request carrying a protected field
//! without a valid token is rejected before it is fingerprinted or published.

use subtle::ConstantTimeEq;
use thiserror::Error;

/// Authentication failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// A token was supplied but does not match the configured secret.
    #[error("Bad token supplied")]
    BadToken,

    /// A protected field was set on an unauthenticated request.
    #[error("Parameter '{0}' requires token to be set to perform authenticated request")]
    ProtectedField(&'static str),
}

/// Outcome of a successful authentication check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    /// A valid token was supplied.
    Authenticated,
    /// No token was supplied and no protected field is set.
    Anonymous,
}

impl Authentication {
    /// Whether the request is authenticated.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Authentication::Authenticated)
    }
}

/// Check the supplied token against the configured secret.
///
/// `protected` lists `(field name, is set)` pairs for every protected field of
/// the request.
pub fn authenticate(
    supplied: Option<&str>,
    configured: Option<&str>,
    protected: &[(&'static str, bool)],
) -> Result<Authentication, AuthError> {
    if let Some(token) = supplied {
        return match configured {
            Some(secret) if constant_time_eq(token, secret) => Ok(Authentication::Authenticated),
            _ => Err(AuthError::BadToken),
        };
    }

    match protected.iter().find(|(_, present)| *present) {
        Some((field, _)) => Err(AuthError::ProtectedField(field)),
        None => Ok(Authentication::Anonymous),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_token_authenticates() {
        let auth = authenticate(Some("s3cret"), Some("s3cret"), &[("integration_metadata", true)]);
        assert_eq!(auth, Ok(Authentication::Authenticated));
    }

    #[test]
    fn wrong_token_is_rejected() {
        assert_eq!(
            authenticate(Some("nope"), Some("s3cret"), &[]),
            Err(AuthError::BadToken)
        );
    }

    #[test]
    fn token_without_configured_secret_is_rejected() {
        assert_eq!(authenticate(Some("any"), None, &[]), Err(AuthError::BadToken));
    }

    #[test]
    fn protected_field_requires_token() {
        let err = authenticate(None, Some("s3cret"), &[("integration_metadata", true)]).unwrap_err();
        assert_eq!(err, AuthError::ProtectedField("integration_metadata"));
        assert!(err.to_string().contains("requires token"));
    }

    #[test]
    fn anonymous_without_protected_fields() {
        let auth = authenticate(None, Some("s3cret"), &[("integration_metadata", false)]);
        assert_eq!(auth, Ok(Authentication::Anonymous));
        assert!(!auth.unwrap().is_authenticated());
    }
}
