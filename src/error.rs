//! Error types for Simple OIDC
//!
//! This module defines all error types used throughout the protocol engine,
//! using `thiserror` for ergonomic error handling.
//!
//! Errors are `Clone` so that a single failure can be returned to the caller
//! of the triggering operation, published on the event bus, and handed to
//! every caller that joined the same in-flight silent renewal.

use thiserror::Error;

/// Identity token validation failures
///
/// Validation fails closed: the first failed check is reported and the
/// token is never trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The `iss` claim does not equal the configured issuer
    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer found in the token
        actual: String,
    },

    /// The configured audience is not contained in the `aud` claim
    #[error("audience mismatch: {expected} is not an audience of the token")]
    AudienceMismatch {
        /// Configured audience
        expected: String,
    },

    /// The `exp` claim lies in the past, beyond the allowed clock skew
    #[error("token expired at {exp} (unix seconds)")]
    Expired {
        /// Expiration claim value
        exp: i64,
    },

    /// The `nbf` claim lies in the future, beyond the allowed clock skew
    #[error("token not valid before {nbf} (unix seconds)")]
    NotYetValid {
        /// Not-before claim value
        nbf: i64,
    },

    /// The `nonce` claim does not match the nonce of the originating request
    #[error("nonce mismatch")]
    NonceMismatch,

    /// The signature could not be verified with the available keys
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// A claim required for validation is absent
    #[error("missing required claim: {0}")]
    MissingClaim(String),

    /// The `at_hash` claim does not match the issued access token
    #[error("at_hash does not match the access token")]
    AccessTokenHashMismatch,

    /// A UserInfo response or refreshed identity token names a different `sub`
    #[error("subject does not match the stored identity token")]
    SubjectMismatch,
}

/// Main error type for Simple OIDC operations
///
/// This enum covers configuration problems, authorization server errors,
/// correlation failures (possible CSRF or replay), token validation, token
/// endpoint failures, and silent renewal failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OidcError {
    /// Missing or invalid configuration, surfaced before any network call
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The authorization endpoint redirected back with an `error` parameter
    #[error("Authorization error: {code}{}", parenthesized(.description))]
    Authorization {
        /// The OAuth error code, e.g. `login_required`
        code: String,
        /// Optional `error_description`
        description: Option<String>,
    },

    /// The callback `state` matches no pending request, or it was consumed
    #[error("State mismatch: no pending authorize request for this callback")]
    StateMismatch,

    /// The callback carried neither `code` nor `error`
    #[error("Authorization code missing from callback")]
    MissingAuthorizationCode,

    /// Identity token validation failed
    #[error("Token validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A JWT could not be decoded
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The token endpoint answered with a non-success status, or could not
    /// be reached at all (`status` is `None`)
    #[error("{}", describe_token_endpoint(*.status, .body))]
    TokenEndpoint {
        /// HTTP status code, absent for transport failures
        status: Option<u16>,
        /// Response body, or the transport error message
        body: String,
    },

    /// The UserInfo endpoint answered with a non-success status
    #[error("UserInfo endpoint returned {status}: {body}")]
    UserInfoEndpoint {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// A refresh was requested but no refresh token is stored
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The hidden frame did not complete within the configured timeout
    #[error("Silent renewal timed out after {timeout_ms} ms")]
    SilentRenewalTimeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// The hidden frame collaborator failed
    #[error("Frame error: {0}")]
    Frame(String),

    /// The operating system random source is unavailable
    #[error("Secure random source unavailable: {0}")]
    RandomSource(String),

    /// The persistence collaborator failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Provider discovery failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Transport-level HTTP failure outside the token endpoint
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),
}

fn parenthesized(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

fn describe_token_endpoint(status: Option<u16>, body: &str) -> String {
    match status {
        Some(status) => format!("Token endpoint returned {status}: {body}"),
        None => format!("Token endpoint unreachable: {body}"),
    }
}

impl From<reqwest::Error> for OidcError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for OidcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for OidcError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<url::ParseError> for OidcError {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration(format!("invalid URL: {err}"))
    }
}

impl From<keyring::Error> for OidcError {
    fn from(err: keyring::Error) -> Self {
        Self::Persistence(format!("keyring: {err}"))
    }
}

impl OidcError {
    /// Short machine-friendly label, used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authorization { .. } => "authorization",
            Self::StateMismatch => "state_mismatch",
            Self::MissingAuthorizationCode => "missing_code",
            Self::Validation(ValidationError::NonceMismatch) => "nonce_mismatch",
            Self::Validation(_) => "validation",
            Self::MalformedToken(_) => "malformed_token",
            Self::TokenEndpoint { .. } => "token_endpoint",
            Self::UserInfoEndpoint { .. } => "userinfo_endpoint",
            Self::NoRefreshToken => "no_refresh_token",
            Self::SilentRenewalTimeout { .. } => "silent_renewal_timeout",
            Self::Frame(_) => "frame",
            Self::RandomSource(_) => "random_source",
            Self::Persistence(_) => "persistence",
            Self::Discovery(_) => "discovery",
            Self::Http(_) => "http",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

/// Result type alias for Simple OIDC operations
pub type Result<T> = std::result::Result<T, OidcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let error = OidcError::Configuration("client_id is empty".to_string());
        assert_eq!(error.to_string(), "Configuration error: client_id is empty");
    }

    #[test]
    fn test_authorization_error_display_with_description() {
        let error = OidcError::Authorization {
            code: "login_required".to_string(),
            description: Some("user must log in".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "Authorization error: login_required (user must log in)"
        );
    }

    #[test]
    fn test_authorization_error_display_without_description() {
        let error = OidcError::Authorization {
            code: "access_denied".to_string(),
            description: None,
        };
        assert_eq!(error.to_string(), "Authorization error: access_denied");
    }

    #[test]
    fn test_token_endpoint_error_display() {
        let error = OidcError::TokenEndpoint {
            status: Some(400),
            body: "{\"error\":\"invalid_grant\"}".to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("400"));
        assert!(s.contains("invalid_grant"));
    }

    #[test]
    fn test_token_endpoint_transport_error_display() {
        let error = OidcError::TokenEndpoint {
            status: None,
            body: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Token endpoint unreachable: connection refused"
        );
        assert_eq!(error.kind(), "token_endpoint");
    }

    #[test]
    fn test_validation_error_converts() {
        let error: OidcError = ValidationError::NonceMismatch.into();
        assert_eq!(error, OidcError::Validation(ValidationError::NonceMismatch));
        assert_eq!(error.kind(), "nonce_mismatch");
    }

    #[test]
    fn test_silent_renewal_timeout_display() {
        let error = OidcError::SilentRenewalTimeout { timeout_ms: 5000 };
        assert_eq!(error.to_string(), "Silent renewal timed out after 5000 ms");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: OidcError = io_error.into();
        assert!(matches!(error, OidcError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: OidcError = json_error.into();
        assert!(matches!(error, OidcError::Serialization(_)));
    }

    #[test]
    fn test_url_error_is_configuration_error() {
        let parse_error = url::Url::parse("not a url").unwrap_err();
        let error: OidcError = parse_error.into();
        assert!(matches!(error, OidcError::Configuration(_)));
    }

    #[test]
    fn test_error_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone + 'static>() {}
        assert_traits::<OidcError>();
    }
}
