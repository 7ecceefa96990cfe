//! Code-flow pipeline
//!
//! `callback -> exchange -> validate -> patch`, shared by interactive
//! redirects, silent renewal and the refresh grant. Tokens reach the store
//! only after the identity token (when present) validated.

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::config::AuthConfig;
use crate::error::{OidcError, Result, ValidationError};
use crate::oidc::authorize::{AuthorizeParams, AuthorizeRequest, AuthorizeRequestBuilder};
use crate::oidc::callback::{AuthorizationCallback, CallbackHandler};
use crate::oidc::events::{EventBus, SimpleOidcEvent};
use crate::oidc::models::{DecodedIdentityToken, LocalState, TokenRequestResult};
use crate::oidc::store::StateStore;
use crate::oidc::token_client::TokenClient;
use crate::oidc::validator::{TokenValidator, ValidationParams};

/// How a token response relates to what the client already holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenContext<'a> {
    /// Nonce of the authorize request this response answers.
    pub expected_nonce: Option<&'a str>,
    /// Identity token being replaced, for refresh responses.
    pub previous: Option<&'a DecodedIdentityToken>,
}

/// Drives one authorization code flow from URL to stored tokens.
#[derive(Debug, Clone)]
pub struct CodeFlow {
    config: Arc<AuthConfig>,
    store: Arc<StateStore>,
    authorize: AuthorizeRequestBuilder,
    callbacks: CallbackHandler,
    tokens: TokenClient,
    validator: Arc<TokenValidator>,
    events: EventBus,
}

impl CodeFlow {
    /// Wires the pipeline together.
    pub fn new(
        config: Arc<AuthConfig>,
        store: Arc<StateStore>,
        tokens: TokenClient,
        validator: Arc<TokenValidator>,
        events: EventBus,
    ) -> Self {
        Self {
            authorize: AuthorizeRequestBuilder::new(config.clone(), store.clone()),
            callbacks: CallbackHandler::new(config.clone(), store.clone()),
            config,
            store,
            tokens,
            validator,
            events,
        }
    }

    /// The store this flow writes to.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// The token endpoint client.
    pub fn token_client(&self) -> &TokenClient {
        &self.tokens
    }

    /// Builds and persists an authorize request and announces it.
    ///
    /// # Errors
    ///
    /// See [`AuthorizeRequestBuilder::build_authorize_url`].
    pub async fn start(&self, params: AuthorizeParams, silent: bool) -> Result<AuthorizeRequest> {
        let request = self.authorize.build_authorize_url(params).await?;
        self.events.publish(SimpleOidcEvent::CodeFlowStarted {
            redirect_uri: request.pending.redirect_uri.clone(),
            silent,
        });
        Ok(request)
    }

    /// Correlates a callback URL and consumes its pending request.
    ///
    /// # Errors
    ///
    /// See [`CallbackHandler::handle_params`].
    pub async fn handle_callback(&self, url: &Url) -> Result<AuthorizationCallback> {
        let callback = self.callbacks.handle_callback(url).await?;
        self.events.publish(SimpleOidcEvent::CallbackReceived {
            session_state: callback.session_state.clone(),
        });
        Ok(callback)
    }

    /// Exchanges the callback's code and stores the validated tokens.
    ///
    /// # Errors
    ///
    /// Token endpoint and validation failures; the store is untouched then.
    pub async fn exchange(&self, callback: AuthorizationCallback) -> Result<LocalState> {
        let result = self
            .tokens
            .exchange_code(&callback.code, &callback.pending)
            .await?;
        let context = TokenContext {
            expected_nonce: Some(&callback.pending.nonce),
            previous: None,
        };
        self.accept_tokens(result, context, callback.session_state)
            .await
    }

    /// Runs [`CodeFlow::handle_callback`] then [`CodeFlow::exchange`].
    ///
    /// # Errors
    ///
    /// Any error of the two steps.
    pub async fn complete(&self, url: &Url) -> Result<LocalState> {
        let callback = self.handle_callback(url).await?;
        self.exchange(callback).await
    }

    /// Runs the refresh token grant and stores the result.
    ///
    /// A refreshed identity token must keep the subject of the one it
    /// replaces, and must repeat its nonce if it carries one.
    ///
    /// # Errors
    ///
    /// - [`OidcError::NoRefreshToken`]
    ///   when nothing is stored
    /// - any token endpoint or validation failure; the store is untouched
    pub async fn refresh(&self, scope: Option<&str>) -> Result<LocalState> {
        let current = self.store.get_state();
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or(OidcError::NoRefreshToken)?;

        let result = self.tokens.refresh_token(refresh_token, scope).await?;
        let context = TokenContext {
            expected_nonce: None,
            previous: current.decoded_identity_token.as_ref(),
        };
        let state = self.accept_tokens(result, context, None).await?;

        self.events.publish(SimpleOidcEvent::AccessTokenRefreshed {
            expires_at: state.access_token_expiration,
        });
        Ok(state)
    }

    /// Validates `result` and merges it into the store.
    ///
    /// The access token and its expiration are always replaced together.
    /// Identity and refresh tokens are replaced only when the response
    /// carries new ones, so a response without `id_token` leaves the stored
    /// claims unchanged.
    ///
    /// # Errors
    ///
    /// - [`OidcError::MalformedToken`]
    ///   for an undecodable identity token
    /// - [`OidcError::Validation`] for a
    ///   failed check
    /// - [`OidcError::Persistence`]
    pub async fn accept_tokens(
        &self,
        result: TokenRequestResult,
        context: TokenContext<'_>,
        session_state: Option<String>,
    ) -> Result<LocalState> {
        let decoded = match &result.id_token {
            Some(raw) => Some(self.validate_identity_token(raw, &result, context)?),
            None => None,
        };

        let expiration = result.expiration_from(Utc::now());
        let TokenRequestResult {
            access_token,
            id_token,
            refresh_token,
            ..
        } = result;

        let state = self
            .store
            .update(|state| {
                state.access_token = Some(access_token);
                state.access_token_expiration = expiration;
                if let (Some(raw), Some(decoded)) = (id_token, decoded) {
                    state.identity_token = Some(raw);
                    state.decoded_identity_token = Some(decoded);
                }
                if let Some(refresh_token) = refresh_token {
                    state.refresh_token = Some(refresh_token);
                }
                if let Some(session_state) = session_state {
                    state.session_state = Some(session_state);
                }
                state.clone()
            })
            .await?;

        tracing::info!(
            expires_at = ?state.access_token_expiration,
            has_refresh_token = state.refresh_token.is_some(),
            "Stored tokens"
        );
        self.events.publish(SimpleOidcEvent::TokensReady {
            expires_at: state.access_token_expiration,
            subject: state
                .decoded_identity_token
                .as_ref()
                .and_then(|t| t.sub().map(str::to_string)),
        });
        Ok(state)
    }

    fn validate_identity_token(
        &self,
        raw: &str,
        result: &TokenRequestResult,
        context: TokenContext<'_>,
    ) -> Result<DecodedIdentityToken> {
        let decoded = TokenValidator::decode(raw)?;

        // A refreshed token only has to repeat the nonce if it carries one.
        let expected_nonce = context.expected_nonce.or_else(|| {
            context
                .previous
                .and_then(|p| p.nonce())
                .filter(|_| decoded.nonce().is_some())
        });

        let params = ValidationParams {
            expected_nonce,
            issuer: &self.config.issuer,
            audience: self.config.effective_audience(),
            clock_skew_seconds: self.config.clock_skew_seconds,
            access_token: Some(&result.access_token),
        };
        self.validator.validate(&decoded, &params)?;

        if let Some(previous) = context.previous {
            if let (Some(before), Some(after)) = (previous.sub(), decoded.sub()) {
                if before != after {
                    return Err(ValidationError::SubjectMismatch.into());
                }
            }
        }

        Ok(decoded)
    }
}
