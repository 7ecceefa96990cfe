//! Redirect/Callback Handler
//!
//! Parses the parameters the authorization server appends to the redirect
//! URI and correlates them with the pending request that started the flow.
//! The pending request is consumed atomically, so a second callback for the
//! same `state` always fails with [`OidcError::StateMismatch`].

use std::sync::Arc;

use url::Url;

use crate::config::AuthConfig;
use crate::error::{OidcError, Result};
use crate::oidc::metrics;
use crate::oidc::models::{PendingAuthorizeRequest, ResponseMode};
use crate::oidc::store::StateStore;

/// Raw callback parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Correlation state
    pub state: Option<String>,
    /// OAuth error code
    pub error: Option<String>,
    /// Human-readable error description
    pub error_description: Option<String>,
    /// OpenID session management state
    pub session_state: Option<String>,
}

/// A callback that matched its pending request and carried a code.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationCallback {
    /// Authorization code to exchange
    pub code: String,
    /// Correlation state
    pub state: String,
    /// `session_state`, when the provider sends one
    pub session_state: Option<String>,
    /// The consumed pending request (verifier, nonce, redirect URI)
    pub pending: PendingAuthorizeRequest,
}

/// Reads callback parameters from the query or fragment of `url`.
///
/// Empty values are treated as absent.
///
/// # Examples
///
/// ```
/// use simple_oidc::oidc::callback::parse_callback_params;
/// use simple_oidc::oidc::models::ResponseMode;
/// use url::Url;
///
/// let url = Url::parse("https://app.example/cb#code=abc&state=xyz").unwrap();
/// let params = parse_callback_params(&url, ResponseMode::Fragment);
/// assert_eq!(params.code.as_deref(), Some("abc"));
/// assert_eq!(params.state.as_deref(), Some("xyz"));
/// ```
pub fn parse_callback_params(url: &Url, mode: ResponseMode) -> CallbackParams {
    let raw = match mode {
        ResponseMode::Query => url.query(),
        ResponseMode::Fragment => url.fragment(),
    }
    .unwrap_or_default();

    let mut params = CallbackParams::default();
    for (name, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        let slot = match name.as_ref() {
            "code" => &mut params.code,
            "state" => &mut params.state,
            "error" => &mut params.error,
            "error_description" => &mut params.error_description,
            "session_state" => &mut params.session_state,
            _ => continue,
        };
        *slot = Some(value.into_owned());
    }
    params
}

/// Correlates callbacks with pending requests.
#[derive(Debug, Clone)]
pub struct CallbackHandler {
    config: Arc<AuthConfig>,
    store: Arc<StateStore>,
}

impl CallbackHandler {
    /// Creates a handler over `config` and `store`.
    pub fn new(config: Arc<AuthConfig>, store: Arc<StateStore>) -> Self {
        Self { config, store }
    }

    /// Parses `url` with the configured response mode and handles it.
    ///
    /// # Errors
    ///
    /// See [`CallbackHandler::handle_params`].
    pub async fn handle_callback(&self, url: &Url) -> Result<AuthorizationCallback> {
        let params = parse_callback_params(url, self.config.response_mode);
        self.handle_params(params).await
    }

    /// Correlates `params` with their pending request and consumes it.
    ///
    /// # Errors
    ///
    /// - [`OidcError::StateMismatch`] when `state` is missing, unknown,
    ///   expired or already consumed
    /// - [`OidcError::Authorization`] when the provider returned `error`
    /// - [`OidcError::MissingAuthorizationCode`] when neither `code` nor
    ///   `error` is present
    pub async fn handle_params(&self, params: CallbackParams) -> Result<AuthorizationCallback> {
        let result = self.correlate(params).await;
        if let Err(error) = &result {
            tracing::warn!(reason = error.kind(), "Rejected authorization callback");
            metrics::record_callback_rejected(error);
        }
        result
    }

    async fn correlate(&self, params: CallbackParams) -> Result<AuthorizationCallback> {
        let state = params.state.ok_or(OidcError::StateMismatch)?;

        let pending = self
            .store
            .take_pending(&state, self.config.pending_request_max_age())
            .await?
            .ok_or(OidcError::StateMismatch)?;

        if let Some(code) = params.error {
            return Err(OidcError::Authorization {
                code,
                description: params.error_description,
            });
        }

        let code = params.code.ok_or(OidcError::MissingAuthorizationCode)?;

        tracing::debug!(
            has_session_state = params.session_state.is_some(),
            "Callback matched pending authorize request"
        );

        Ok(AuthorizationCallback {
            code,
            state,
            session_state: params.session_state,
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::authorize::{AuthorizeParams, AuthorizeRequestBuilder};

    fn config(mode: ResponseMode) -> Arc<AuthConfig> {
        Arc::new(AuthConfig {
            issuer: "https://idp.example".to_string(),
            client_id: "client-a".to_string(),
            authorize_endpoint: "https://idp.example/authorize".to_string(),
            token_endpoint: "https://idp.example/token".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            response_mode: mode,
            ..Default::default()
        })
    }

    async fn setup(mode: ResponseMode) -> (CallbackHandler, Arc<StateStore>, PendingAuthorizeRequest) {
        let config = config(mode);
        let store = Arc::new(StateStore::in_memory());
        let request = AuthorizeRequestBuilder::new(config.clone(), store.clone())
            .build_authorize_url(AuthorizeParams::default())
            .await
            .unwrap();
        (
            CallbackHandler::new(config, store.clone()),
            store,
            request.pending,
        )
    }

    fn callback_url(query: &str) -> Url {
        Url::parse(&format!("https://app.example/cb?{query}")).unwrap()
    }

    #[test]
    fn test_parse_query_params() {
        let url = callback_url("code=abc&state=s1&session_state=ss&ignored=1");
        let params = parse_callback_params(&url, ResponseMode::Query);
        assert_eq!(params.code.as_deref(), Some("abc"));
        assert_eq!(params.state.as_deref(), Some("s1"));
        assert_eq!(params.session_state.as_deref(), Some("ss"));
        assert!(params.error.is_none());
    }

    #[test]
    fn test_parse_decodes_error_description() {
        let url = callback_url("error=login_required&error_description=Login+is%20required&state=s");
        let params = parse_callback_params(&url, ResponseMode::Query);
        assert_eq!(params.error.as_deref(), Some("login_required"));
        assert_eq!(params.error_description.as_deref(), Some("Login is required"));
    }

    #[test]
    fn test_parse_ignores_the_other_component() {
        let url = Url::parse("https://app.example/cb?code=q#code=f").unwrap();
        assert_eq!(
            parse_callback_params(&url, ResponseMode::Query).code.as_deref(),
            Some("q")
        );
        assert_eq!(
            parse_callback_params(&url, ResponseMode::Fragment).code.as_deref(),
            Some("f")
        );
    }

    #[tokio::test]
    async fn test_matching_callback_yields_code_and_consumes_pending() {
        let (handler, store, pending) = setup(ResponseMode::Query).await;
        let url = callback_url(&format!("code=abc123&state={}", pending.state));

        let callback = handler.handle_callback(&url).await.unwrap();

        assert_eq!(callback.code, "abc123");
        assert_eq!(callback.state, pending.state);
        assert_eq!(callback.pending, pending);
        assert!(store.get_state().pending_requests.is_empty());
        assert!(store.get_state().code_verifier.is_none());
    }

    #[tokio::test]
    async fn test_replayed_state_is_rejected() {
        let (handler, _, pending) = setup(ResponseMode::Query).await;
        let url = callback_url(&format!("code=abc123&state={}", pending.state));

        handler.handle_callback(&url).await.unwrap();
        let second = handler.handle_callback(&url).await;
        assert_eq!(second, Err(OidcError::StateMismatch));
    }

    #[tokio::test]
    async fn test_unknown_or_missing_state_is_rejected() {
        let (handler, store, _) = setup(ResponseMode::Query).await;
        assert_eq!(
            handler.handle_callback(&callback_url("code=abc&state=forged")).await,
            Err(OidcError::StateMismatch)
        );
        assert_eq!(
            handler.handle_callback(&callback_url("code=abc")).await,
            Err(OidcError::StateMismatch)
        );
        assert_eq!(store.get_state().pending_requests.len(), 1);
    }

    #[tokio::test]
    async fn test_error_callback_consumes_pending_and_reports_error() {
        let (handler, store, pending) = setup(ResponseMode::Query).await;
        let url = callback_url(&format!(
            "error=login_required&error_description=no+session&state={}",
            pending.state
        ));

        let err = handler.handle_callback(&url).await.unwrap_err();
        assert_eq!(
            err,
            OidcError::Authorization {
                code: "login_required".to_string(),
                description: Some("no session".to_string()),
            }
        );
        assert!(store.get_state().pending_requests.is_empty());
    }

    #[tokio::test]
    async fn test_missing_code() {
        let (handler, _, pending) = setup(ResponseMode::Query).await;
        let url = callback_url(&format!("state={}", pending.state));
        assert_eq!(
            handler.handle_callback(&url).await,
            Err(OidcError::MissingAuthorizationCode)
        );
    }

    #[tokio::test]
    async fn test_fragment_mode() {
        let (handler, _, pending) = setup(ResponseMode::Fragment).await;
        let url = Url::parse(&format!(
            "https://app.example/cb#code=frag&state={}",
            pending.state
        ))
        .unwrap();
        assert_eq!(handler.handle_callback(&url).await.unwrap().code, "frag");
    }

    #[tokio::test]
    async fn test_concurrent_callbacks_for_same_state_succeed_once() {
        let (handler, _, pending) = setup(ResponseMode::Query).await;
        let url = callback_url(&format!("code=abc&state={}", pending.state));

        let (a, b) = tokio::join!(handler.handle_callback(&url), handler.handle_callback(&url));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    }
}
