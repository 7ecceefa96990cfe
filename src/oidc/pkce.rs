//! PKCE S256 challenge generation and correlation values
//!
//! This module implements the Proof Key for Code Exchange (PKCE) extension
//! to OAuth 2.0 as defined in RFC 7636 (the `S256` method) and produces the
//! `state` and `nonce` values that bind an authorize request to its callback
//! and to the identity token it yields.
//!
//! # How PKCE works
//!
//! 1. The client generates a high-entropy random string called the `code_verifier`.
//! 2. The client computes a SHA-256 hash of the verifier and base64url-encodes
//!    it to produce the `code_challenge`.
//! 3. The authorization request includes `code_challenge` and
//!    `code_challenge_method=S256`.
//! 4. The token exchange request includes the original `code_verifier`.
//! 5. The authorization server recomputes the challenge and compares it to
//!    the value sent in step 3, proving possession of the verifier.
//!
//! All randomness comes from the operating system generator. When it is
//! unavailable every function here fails with
//! [`OidcError::RandomSource`]; there is no weaker fallback.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>
//! - OpenID Connect Core 1.0, section 3.1.2.1 <https://openid.net/specs/openid-connect-core-1_0.html>

use base64::Engine as _;
use rand::TryRngCore as _;
use sha2::{Digest, Sha256};

use crate::error::{OidcError, Result};

/// Number of random bytes behind a code verifier (43 base64url characters).
const VERIFIER_BYTES: usize = 32;

/// Number of random bytes behind a `state` or `nonce` value.
const CORRELATION_BYTES: usize = 24;

/// The only challenge method this crate emits.
pub const CHALLENGE_METHOD: &str = "S256";

// ---------------------------------------------------------------------------
// PkceChallenge
// ---------------------------------------------------------------------------

/// A PKCE S256 challenge pair consisting of a verifier and its derived
/// challenge value.
///
/// # Examples
///
/// ```
/// use simple_oidc::oidc::pkce::generate;
///
/// let challenge = generate().expect("PKCE generation must not fail");
/// assert_eq!(challenge.method, "S256");
/// assert_eq!(challenge.verifier.len(), 43);
/// ```
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// The code verifier: 32 random bytes, base64url-encoded without padding.
    pub verifier: String,

    /// The code challenge: base64url(SHA-256(verifier)) without padding.
    pub challenge: String,

    /// The challenge method. Always `"S256"`.
    pub method: String,
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Generates a fresh code verifier.
///
/// The verifier is 43 characters from the base64url alphabet, within the
/// 43..=128 range RFC 7636 section 4.1 requires.
///
/// # Errors
///
/// Returns [`OidcError::RandomSource`] when the OS random source fails.
pub fn generate_verifier() -> Result<String> {
    random_url_safe(VERIFIER_BYTES)
}

/// Derives the `S256` code challenge for `verifier`.
///
/// `ASCII(BASE64URL(SHA256(ASCII(code_verifier))))` per RFC 7636 section 4.2.
/// Deterministic: the same verifier always yields the same challenge.
///
/// # Examples
///
/// ```
/// use simple_oidc::oidc::pkce::derive_challenge;
///
/// // RFC 7636 Appendix B
/// assert_eq!(
///     derive_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
///     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
/// );
/// ```
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Generates a verifier and its challenge in one step.
///
/// # Errors
///
/// Returns [`OidcError::RandomSource`] when the OS random source fails.
pub fn generate() -> Result<PkceChallenge> {
    let verifier = generate_verifier()?;
    let challenge = derive_challenge(&verifier);
    Ok(PkceChallenge {
        verifier,
        challenge,
        method: CHALLENGE_METHOD.to_string(),
    })
}

/// Generates an unguessable `state` correlation value.
///
/// # Errors
///
/// Returns [`OidcError::RandomSource`] when the OS random source fails.
pub fn generate_state() -> Result<String> {
    random_url_safe(CORRELATION_BYTES)
}

/// Generates an unguessable `nonce` for identity token binding.
///
/// # Errors
///
/// Returns [`OidcError::RandomSource`] when the OS random source fails.
pub fn generate_nonce() -> Result<String> {
    random_url_safe(CORRELATION_BYTES)
}

/// Fills `len` bytes from the OS generator and base64url-encodes them.
fn random_url_safe(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| OidcError::RandomSource(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn is_base64url(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_generate_produces_correct_verifier_length() {
        let pkce = generate().expect("generate must not fail");
        assert_eq!(
            pkce.verifier.len(),
            43,
            "32 random bytes in base64url without padding produces 43 chars"
        );
    }

    #[test]
    fn test_challenge_is_s256_of_verifier() {
        let pkce = generate().expect("generate must not fail");
        assert_eq!(pkce.challenge, derive_challenge(&pkce.verifier));
    }

    #[test]
    fn test_method_is_always_s256() {
        let pkce = generate().expect("generate must not fail");
        assert_eq!(pkce.method, "S256");
    }

    #[test]
    fn test_derive_challenge_is_deterministic() {
        let verifier = generate_verifier().unwrap();
        assert_eq!(derive_challenge(&verifier), derive_challenge(&verifier));
    }

    #[test]
    fn test_generate_produces_unique_verifiers_and_challenges() {
        let a = generate().expect("first call");
        let b = generate().expect("second call");
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn test_values_use_url_safe_base64_no_padding() {
        let pkce = generate().unwrap();
        let state = generate_state().unwrap();
        let nonce = generate_nonce().unwrap();
        for value in [&pkce.verifier, &pkce.challenge, &state, &nonce] {
            assert!(is_base64url(value), "not base64url: {value}");
            assert!(!value.contains('='), "must not be padded: {value}");
        }
    }

    #[test]
    fn test_state_and_nonce_are_unique() {
        assert_ne!(generate_state().unwrap(), generate_state().unwrap());
        assert_ne!(generate_nonce().unwrap(), generate_nonce().unwrap());
    }

    #[test]
    fn test_state_has_expected_length() {
        // 24 bytes -> 32 base64url characters.
        assert_eq!(generate_state().unwrap().len(), 32);
    }

    /// RFC 7636 Appendix B test vector.
    #[test]
    fn test_s256_known_answer_rfc7636_appendix_b() {
        assert_eq!(
            derive_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
