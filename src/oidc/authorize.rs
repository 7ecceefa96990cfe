//! Authorize Request Builder
//!
//! Builds the authorization endpoint URL for a code flow with PKCE and
//! persists the matching [`PendingAuthorizeRequest`] before the URL is
//! handed out: navigation may unload the caller, so the correlation data
//! has to be durable first.

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::config::AuthConfig;
use crate::error::{OidcError, Result};
use crate::oidc::models::{PendingAuthorizeRequest, ResponseMode};
use crate::oidc::pkce;
use crate::oidc::store::StateStore;

/// Parameters that callers control; everything else is generated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizeParams {
    /// Scopes to request; the configured scope when `None`.
    pub scope: Option<String>,
    /// Redirect URI; the configured one when `None`.
    pub redirect_uri: Option<String>,
    /// `prompt` value, e.g. `none` for silent renewal or `login`.
    pub prompt: Option<String>,
    /// Identity token previously issued, sent as `id_token_hint`.
    pub id_token_hint: Option<String>,
    /// Additional authorize parameters, in order.
    pub extra: Vec<(String, String)>,
}

/// A ready-to-navigate authorize request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizeRequest {
    /// Full authorization endpoint URL.
    pub url: Url,
    /// Correlation record already persisted for this request.
    pub pending: PendingAuthorizeRequest,
}

/// Parameters generated by the builder; callers may not override them.
const RESERVED: &[&str] = &[
    "response_type",
    "client_id",
    "redirect_uri",
    "scope",
    "state",
    "nonce",
    "code_challenge",
    "code_challenge_method",
    "response_mode",
];

/// Builds authorize URLs and records their pending requests.
#[derive(Debug, Clone)]
pub struct AuthorizeRequestBuilder {
    config: Arc<AuthConfig>,
    store: Arc<StateStore>,
}

impl AuthorizeRequestBuilder {
    /// Creates a builder over `config` and `store`.
    pub fn new(config: Arc<AuthConfig>, store: Arc<StateStore>) -> Self {
        Self { config, store }
    }

    /// Generates state, nonce and a PKCE pair, persists the pending request
    /// and returns the authorize URL.
    ///
    /// # Errors
    ///
    /// - [`OidcError::RandomSource`] when secure randomness is unavailable
    /// - [`OidcError::Configuration`] for an invalid endpoint or an extra
    ///   parameter that collides with a generated one
    /// - [`OidcError::Persistence`] when the pending request cannot be stored;
    ///   no URL is returned in that case
    pub async fn build_authorize_url(&self, params: AuthorizeParams) -> Result<AuthorizeRequest> {
        if let Some((name, _)) = params
            .extra
            .iter()
            .find(|(name, _)| RESERVED.contains(&name.as_str()))
        {
            return Err(OidcError::Configuration(format!(
                "authorize parameter '{name}' cannot be overridden"
            )));
        }

        let challenge = pkce::generate()?;
        let state = pkce::generate_state()?;
        let nonce = pkce::generate_nonce()?;

        let scope = params.scope.unwrap_or_else(|| self.config.scope.clone());
        let redirect_uri = params
            .redirect_uri
            .unwrap_or_else(|| self.config.redirect_uri.clone());

        let mut url = Url::parse(&self.config.authorize_endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &redirect_uri);
            query.append_pair("scope", &scope);
            query.append_pair("state", &state);
            query.append_pair("nonce", &nonce);
            query.append_pair("code_challenge", &challenge.challenge);
            query.append_pair("code_challenge_method", &challenge.method);
            if self.config.response_mode == ResponseMode::Fragment {
                query.append_pair("response_mode", ResponseMode::Fragment.as_str());
            }
            if let Some(prompt) = &params.prompt {
                query.append_pair("prompt", prompt);
            }
            if let Some(hint) = &params.id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            for (name, value) in &params.extra {
                query.append_pair(name, value);
            }
        }

        let pending = PendingAuthorizeRequest {
            state,
            nonce,
            code_verifier: challenge.verifier,
            code_challenge: challenge.challenge,
            redirect_uri,
            requested_scopes: scope,
            created_at: Utc::now(),
        };
        self.store
            .store_pending(pending.clone(), self.config.pending_request_max_age())
            .await?;

        tracing::debug!(
            redirect_uri = %pending.redirect_uri,
            scope = %pending.requested_scopes,
            prompt = params.prompt.as_deref().unwrap_or(""),
            "Built authorize request"
        );

        Ok(AuthorizeRequest { url, pending })
    }
}
