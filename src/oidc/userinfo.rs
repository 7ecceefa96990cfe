//! UserInfo client

use std::sync::Arc;

use crate::config::AuthConfig;
use crate::error::{OidcError, Result, ValidationError};
use crate::oidc::models::ClaimCollection;

/// Fetches claims from the UserInfo endpoint.
#[derive(Debug, Clone)]
pub struct UserInfoClient {
    http: reqwest::Client,
    config: Arc<AuthConfig>,
}

impl UserInfoClient {
    /// Creates a client for `config.user_info_endpoint`.
    pub fn new(http: reqwest::Client, config: Arc<AuthConfig>) -> Self {
        Self { http, config }
    }

    /// GETs the UserInfo claims with `access_token` as bearer.
    ///
    /// When `expected_subject` is given, the response must carry the same
    /// `sub`; claims about another user are never returned.
    ///
    /// # Errors
    ///
    /// - [`OidcError::Configuration`] when no endpoint is configured
    /// - [`OidcError::UserInfoEndpoint`] for non-success responses
    /// - [`OidcError::Validation`] with [`ValidationError::SubjectMismatch`]
    /// - [`OidcError::Http`] / [`OidcError::Serialization`]
    pub async fn fetch(
        &self,
        access_token: &str,
        expected_subject: Option<&str>,
    ) -> Result<ClaimCollection> {
        let endpoint = self.config.user_info_endpoint.as_deref().ok_or_else(|| {
            OidcError::Configuration("user_info_endpoint is not configured".to_string())
        })?;

        tracing::debug!(%endpoint, "Requesting userinfo");
        let resp = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(OidcError::UserInfoEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let claims: ClaimCollection = serde_json::from_str(&body)
            .map_err(|e| OidcError::Serialization(format!("invalid userinfo response: {e}")))?;

        if let Some(expected) = expected_subject {
            if claims.get("sub").and_then(|v| v.as_str()) != Some(expected) {
                return Err(ValidationError::SubjectMismatch.into());
            }
        }

        Ok(claims)
    }
}
