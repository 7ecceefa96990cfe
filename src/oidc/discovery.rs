//! OpenID Provider discovery and JWK set retrieval
//!
//! Locates provider endpoints from an authority URL before a client is
//! built, and fetches the signing keys used by
//! [`TokenValidator`](super::validator::TokenValidator).
//!
//! # Discovery sequence
//!
//! [`fetch_provider_metadata`] tries, in order:
//!
//! 1. `<authority>/.well-known/openid-configuration` (OpenID Connect Discovery 1.0)
//! 2. `/.well-known/openid-configuration<path>` (path insertion)
//! 3. `/.well-known/oauth-authorization-server<path>` (RFC 8414)
//! 4. `/.well-known/oauth-authorization-server` (root)
//!
//! and returns the first document that parses.

use std::collections::HashMap;

use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OidcError, Result};

// ---------------------------------------------------------------------------
// ProviderMetadata
// ---------------------------------------------------------------------------

/// OpenID Provider metadata document.
///
/// # Examples
///
/// ```
/// use simple_oidc::oidc::discovery::ProviderMetadata;
///
/// let json = r#"{
///     "issuer": "https://idp.example",
///     "authorization_endpoint": "https://idp.example/authorize",
///     "token_endpoint": "https://idp.example/token",
///     "code_challenge_methods_supported": ["S256"]
/// }"#;
///
/// let meta: ProviderMetadata = serde_json::from_str(json).unwrap();
/// assert!(meta.supports_pkce_s256());
/// assert!(meta.userinfo_endpoint.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier; identity tokens must carry it as `iss`.
    pub issuer: String,

    /// Authorization endpoint.
    pub authorization_endpoint: String,

    /// Token endpoint.
    pub token_endpoint: String,

    /// UserInfo endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// RP-initiated logout endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// JWK set location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Supported scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Supported `response_mode` values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_modes_supported: Option<Vec<String>>,

    /// Supported PKCE methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Any other advertised fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderMetadata {
    /// Returns `false` only when the provider lists PKCE methods and `S256`
    /// is not one of them.
    pub fn supports_pkce_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .map_or(true, |methods| methods.iter().any(|m| m == "S256"))
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

fn candidate_urls(authority: &Url) -> Vec<Url> {
    let path = authority.path().trim_end_matches('/').to_string();
    let mut origin = authority.clone();
    origin.set_path("");
    origin.set_query(None);
    origin.set_fragment(None);
    let origin = origin.as_str().trim_end_matches('/').to_string();

    let raw = [
        format!("{origin}{path}/.well-known/openid-configuration"),
        format!("{origin}/.well-known/openid-configuration{path}"),
        format!("{origin}/.well-known/oauth-authorization-server{path}"),
        format!("{origin}/.well-known/oauth-authorization-server"),
    ];

    let mut candidates: Vec<Url> = Vec::with_capacity(raw.len());
    for candidate in raw.iter().filter_map(|s| Url::parse(s).ok()) {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Fetches the provider metadata for `authority`.
///
/// # Errors
///
/// Returns [`OidcError::Configuration`] for an unparsable authority and
/// [`OidcError::Discovery`] when no candidate yields a document.
pub async fn fetch_provider_metadata(
    http: &reqwest::Client,
    authority: &str,
) -> Result<ProviderMetadata> {
    let authority = Url::parse(authority)?;

    for candidate in candidate_urls(&authority) {
        tracing::debug!(url = %candidate, "Trying discovery document");
        let resp = match http.get(candidate.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url = %candidate, error = %e, "Discovery request failed");
                continue;
            }
        };

        if resp.status().is_success() {
            match resp.json::<ProviderMetadata>().await {
                Ok(meta) => {
                    tracing::info!(issuer = %meta.issuer, "Discovered OpenID Provider");
                    if !meta.supports_pkce_s256() {
                        tracing::warn!(issuer = %meta.issuer, "Provider does not advertise PKCE S256");
                    }
                    return Ok(meta);
                }
                Err(e) => {
                    tracing::debug!(url = %candidate, error = %e, "Discovery document unparsable");
                    continue;
                }
            }
        }
    }

    Err(OidcError::Discovery(format!(
        "provider metadata not found for authority {authority}"
    )))
}

/// Fetches the JWK set published at `jwks_uri`.
///
/// # Errors
///
/// Returns [`OidcError::Discovery`] for non-success responses or an
/// unparsable body, [`OidcError::Http`] for transport failures.
pub async fn fetch_jwks(http: &reqwest::Client, jwks_uri: &str) -> Result<JwkSet> {
    let resp = http.get(jwks_uri).send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(OidcError::Discovery(format!(
            "JWKS endpoint returned {status}: {body}"
        )));
    }

    let jwks: JwkSet = resp
        .json()
        .await
        .map_err(|e| OidcError::Discovery(format!("failed to parse JWK set: {e}")))?;
    tracing::debug!(keys = jwks.keys.len(), "Fetched JWK set");
    Ok(jwks)
}
