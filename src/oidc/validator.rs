//! Token Validator/Decoder
//!
//! Decodes identity tokens and validates them against the originating
//! authorize request. Validation fails closed: the first failed check is
//! returned as a [`ValidationError`] and nothing is accepted best-effort.
//!
//! Signatures are verified with a JWK set (installed after discovery) or a
//! shared client secret for `HS*` tokens. When neither is configured the
//! signature check is skipped; every claim check still applies.

use std::collections::HashSet;
use std::sync::RwLock;

use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{OidcError, Result, ValidationError};
use crate::oidc::models::{ClaimCollection, DecodedIdentityToken, JwtHeader};

/// Inputs for one identity token validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationParams<'a> {
    /// Nonce of the originating request. `None` skips the nonce check.
    pub expected_nonce: Option<&'a str>,
    /// Required `iss` value.
    pub issuer: &'a str,
    /// Value that must appear in `aud`.
    pub audience: &'a str,
    /// Tolerance applied to `exp` and `nbf`.
    pub clock_skew_seconds: i64,
    /// Access token issued alongside, checked against `at_hash` when both exist.
    pub access_token: Option<&'a str>,
}

/// Decodes and validates identity tokens.
#[derive(Debug, Default)]
pub struct TokenValidator {
    jwks: RwLock<Option<JwkSet>>,
    shared_secret: Option<String>,
}

impl TokenValidator {
    /// Creates a validator with no verification keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `HS256`/`HS384`/`HS512` tokens signed with `secret`.
    pub fn with_shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }

    /// Installs the provider's JWK set; later validations verify signatures
    /// against it.
    pub fn set_jwks(&self, jwks: JwkSet) {
        tracing::debug!(keys = jwks.keys.len(), "Installed JWK set");
        let mut slot = self.jwks.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(jwks);
    }

    /// Returns `true` when signatures will be verified.
    pub fn verifies_signatures(&self) -> bool {
        self.shared_secret.is_some()
            || self
                .jwks
                .read()
                .map(|g| g.is_some())
                .unwrap_or_else(|e| e.into_inner().is_some())
    }

    /// Decodes a compact JWS without verifying it.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::MalformedToken`] when the input is not three
    /// base64url segments, or the header or payload is not a JSON object.
    ///
    /// # Examples
    ///
    /// ```
    /// use simple_oidc::oidc::validator::TokenValidator;
    ///
    /// // {"alg":"none"} . {"sub":"alice"} . (empty signature)
    /// let decoded = TokenValidator::decode("eyJhbGciOiJub25lIn0.eyJzdWIiOiJhbGljZSJ9.").unwrap();
    /// assert_eq!(decoded.sub(), Some("alice"));
    /// assert!(TokenValidator::decode("not-a-jwt").is_err());
    /// ```
    pub fn decode(jwt: &str) -> Result<DecodedIdentityToken> {
        let mut segments = jwt.trim().split('.');
        let (Some(header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(OidcError::MalformedToken(
                "expected three dot-separated segments".to_string(),
            ));
        };

        let header: JwtHeader = serde_json::from_slice(&decode_segment(header, "header")?)
            .map_err(|e| OidcError::MalformedToken(format!("header: {e}")))?;
        let claims: ClaimCollection = serde_json::from_slice(&decode_segment(payload, "payload")?)
            .map_err(|e| OidcError::MalformedToken(format!("payload: {e}")))?;

        Ok(DecodedIdentityToken::new(header, claims, jwt.trim().to_string()))
    }

    /// Validates `token` at the current time.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate(
        &self,
        token: &DecodedIdentityToken,
        params: &ValidationParams<'_>,
    ) -> std::result::Result<(), ValidationError> {
        self.validate_at(token, params, Utc::now().timestamp())
    }

    /// Validates `token` as if the current time were `now` (unix seconds).
    ///
    /// Checks run in order: signature, `iss`, `aud`, `exp`, `nbf`, `nonce`,
    /// `at_hash`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate_at(
        &self,
        token: &DecodedIdentityToken,
        params: &ValidationParams<'_>,
        now: i64,
    ) -> std::result::Result<(), ValidationError> {
        self.verify_signature(token)?;

        let iss = token
            .iss()
            .ok_or_else(|| ValidationError::MissingClaim("iss".to_string()))?;
        if iss != params.issuer {
            return Err(ValidationError::IssuerMismatch {
                expected: params.issuer.to_string(),
                actual: iss.to_string(),
            });
        }

        if !token.aud().contains(&params.audience) {
            return Err(ValidationError::AudienceMismatch {
                expected: params.audience.to_string(),
            });
        }

        let skew = params.clock_skew_seconds.max(0);
        let exp = token
            .exp()
            .ok_or_else(|| ValidationError::MissingClaim("exp".to_string()))?;
        if now >= exp.saturating_add(skew) {
            return Err(ValidationError::Expired { exp });
        }
        if let Some(nbf) = token.nbf() {
            if now.saturating_add(skew) < nbf {
                return Err(ValidationError::NotYetValid { nbf });
            }
        }

        if let Some(expected) = params.expected_nonce {
            if token.nonce() != Some(expected) {
                return Err(ValidationError::NonceMismatch);
            }
        }

        if let (Some(access_token), Some(at_hash)) = (params.access_token, token.at_hash()) {
            if access_token_hash(&token.header.alg, access_token) != at_hash {
                return Err(ValidationError::AccessTokenHashMismatch);
            }
        }

        Ok(())
    }

    fn verify_signature(
        &self,
        token: &DecodedIdentityToken,
    ) -> std::result::Result<(), ValidationError> {
        if !self.verifies_signatures() {
            tracing::debug!("No verification keys configured; skipping signature check");
            return Ok(());
        }
        if token.raw().is_empty() {
            return Err(ValidationError::SignatureInvalid(
                "compact token unavailable".to_string(),
            ));
        }

        let header = jsonwebtoken::decode_header(token.raw())
            .map_err(|e| ValidationError::SignatureInvalid(e.to_string()))?;
        let key = self.decoding_key(header.alg, header.kid.as_deref())?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        jsonwebtoken::decode::<serde_json::Value>(token.raw(), &key, &validation)
            .map(|_| ())
            .map_err(|e| ValidationError::SignatureInvalid(e.to_string()))
    }

    fn decoding_key(
        &self,
        alg: Algorithm,
        kid: Option<&str>,
    ) -> std::result::Result<DecodingKey, ValidationError> {
        if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return self
                .shared_secret
                .as_ref()
                .map(|secret| DecodingKey::from_secret(secret.as_bytes()))
                .ok_or_else(|| {
                    ValidationError::SignatureInvalid(format!("no shared secret for {alg:?}"))
                });
        }

        let guard = self.jwks.read().unwrap_or_else(|e| e.into_inner());
        let jwks = guard.as_ref().ok_or_else(|| {
            ValidationError::SignatureInvalid(format!("no JWK set for {alg:?}"))
        })?;

        let jwk = match kid {
            Some(kid) => jwks.find(kid),
            None if jwks.keys.len() == 1 => jwks.keys.first(),
            None => None,
        }
        .ok_or_else(|| {
            ValidationError::SignatureInvalid(format!(
                "no matching key for kid {}",
                kid.unwrap_or("<none>")
            ))
        })?;

        DecodingKey::from_jwk(jwk).map_err(|e| ValidationError::SignatureInvalid(e.to_string()))
    }
}

/// Computes the `at_hash` for `access_token` under the JWS algorithm `alg`.
///
/// Left-most half of the hash, base64url-encoded without padding. The hash
/// function follows the algorithm's size suffix; SHA-256 otherwise.
pub fn access_token_hash(alg: &str, access_token: &str) -> String {
    let digest: Vec<u8> = if alg.ends_with("384") {
        Sha384::digest(access_token.as_bytes()).to_vec()
    } else if alg.ends_with("512") {
        Sha512::digest(access_token.as_bytes()).to_vec()
    } else {
        Sha256::digest(access_token.as_bytes()).to_vec()
    };
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| OidcError::MalformedToken(format!("{what} is not base64url: {e}")))
}
