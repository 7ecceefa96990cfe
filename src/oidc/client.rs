//! OIDC client facade
//!
//! [`OidcClient`] wires every protocol component together from one
//! immutable [`AuthConfig`]. Each public operation publishes its failure on
//! the [`EventBus`] before returning it.

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::wrappers::WatchStream;
use url::Url;

use crate::config::AuthConfig;
use crate::error::{OidcError, Result};
use crate::oidc::authorize::{AuthorizeParams, AuthorizeRequest};
use crate::oidc::code_flow::CodeFlow;
use crate::oidc::discovery;
use crate::oidc::end_session::{build_end_session_url, LogoutFlowParameters};
use crate::oidc::events::{EventBus, OidcOperation, SimpleOidcEvent};
use crate::oidc::frame::HiddenFrameFactory;
use crate::oidc::models::{ClaimCollection, LocalState};
use crate::oidc::renewal::{RenewalPhase, SilentRenewalOrchestrator};
use crate::oidc::store::StateStore;
use crate::oidc::token_client::TokenClient;
use crate::oidc::userinfo::UserInfoClient;
use crate::oidc::validator::TokenValidator;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for an interactive code flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartCodeFlowParameters {
    /// Scopes to request instead of the configured ones.
    pub scope: Option<String>,
    /// Redirect URI instead of the configured one.
    pub redirect_uri: Option<String>,
    /// `prompt` value such as `login` or `consent`.
    pub prompt: Option<String>,
    /// Additional authorize parameters such as `login_hint`.
    pub extra: Vec<(String, String)>,
}

impl From<StartCodeFlowParameters> for AuthorizeParams {
    fn from(params: StartCodeFlowParameters) -> Self {
        Self {
            scope: params.scope,
            redirect_uri: params.redirect_uri,
            prompt: params.prompt,
            id_token_hint: None,
            extra: params.extra,
        }
    }
}

/// Authorization Code Flow + PKCE client.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use simple_oidc::config::AuthConfig;
/// use simple_oidc::oidc::client::{OidcClient, StartCodeFlowParameters};
/// use simple_oidc::oidc::frame::loopback::LoopbackFrameFactory;
/// use simple_oidc::oidc::store::StateStore;
///
/// # async fn example(config: AuthConfig) -> simple_oidc::error::Result<()> {
/// let frames = Arc::new(LoopbackFrameFactory::new(&config.redirect_uri, true)?);
/// let client = OidcClient::new(config, Arc::new(StateStore::in_memory()), frames)?;
///
/// let request = client.start_code_flow(StartCodeFlowParameters::default()).await?;
/// println!("navigate to {}", request.url);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct OidcClient {
    config: Arc<AuthConfig>,
    http: reqwest::Client,
    store: Arc<StateStore>,
    events: EventBus,
    validator: Arc<TokenValidator>,
    flow: Arc<CodeFlow>,
    renewal: SilentRenewalOrchestrator,
    userinfo: UserInfoClient,
}

impl OidcClient {
    /// Creates a client with a validator that has no keys yet.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Configuration`] when `config` is invalid; no
    /// network call is made.
    pub fn new(
        config: AuthConfig,
        store: Arc<StateStore>,
        frames: Arc<dyn HiddenFrameFactory>,
    ) -> Result<Self> {
        Self::with_validator(config, store, frames, TokenValidator::new())
    }

    /// Creates a client around a pre-configured [`TokenValidator`].
    ///
    /// # Errors
    ///
    /// Same as [`OidcClient::new`].
    pub fn with_validator(
        config: AuthConfig,
        store: Arc<StateStore>,
        frames: Arc<dyn HiddenFrameFactory>,
        validator: TokenValidator,
    ) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("simple-oidc/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let config = Arc::new(config);
        let events = EventBus::new();
        let validator = Arc::new(validator);

        let flow = Arc::new(CodeFlow::new(
            config.clone(),
            store.clone(),
            TokenClient::new(http.clone(), config.clone()),
            validator.clone(),
            events.clone(),
        ));
        let renewal =
            SilentRenewalOrchestrator::new(config.clone(), flow.clone(), frames, events.clone());
        let userinfo = UserInfoClient::new(http.clone(), config.clone());

        tracing::debug!(
            client_id = %config.client_id,
            issuer = %config.issuer,
            "Created OIDC client"
        );

        Ok(Self {
            config,
            http,
            store,
            events,
            validator,
            flow,
            renewal,
            userinfo,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Effective configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Event bus for lifecycle and error notifications.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Underlying state store.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Current state snapshot.
    pub fn state(&self) -> LocalState {
        self.store.get_state()
    }

    /// Current state, then every change.
    pub fn state_changes(&self) -> WatchStream<LocalState> {
        self.store.changes()
    }

    /// Returns `true` when an unexpired access token is stored.
    pub fn is_logged_in(&self) -> bool {
        self.store.get_state().is_logged_in()
    }

    /// Phase of the silent renewal state machine.
    pub fn renewal_phase(&self) -> RenewalPhase {
        self.renewal.phase()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Fetches the configured JWK set so identity token signatures are
    /// verified from now on. A no-op without `jwks_uri`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Discovery`] when the set cannot be fetched.
    pub async fn load_jwks(&self) -> Result<()> {
        let Some(jwks_uri) = self.config.jwks_uri.as_deref() else {
            return Ok(());
        };
        let result = discovery::fetch_jwks(&self.http, jwks_uri)
            .await
            .map(|jwks| self.validator.set_jwks(jwks));
        self.events.report(OidcOperation::Discovery, result)
    }

    /// Builds and persists an authorize request; the caller navigates to
    /// the returned URL.
    ///
    /// # Errors
    ///
    /// [`OidcError::Configuration`], [`OidcError::RandomSource`] or
    /// [`OidcError::Persistence`].
    pub async fn start_code_flow(
        &self,
        params: StartCodeFlowParameters,
    ) -> Result<AuthorizeRequest> {
        let result = self.flow.start(params.into(), false).await;
        if result.is_ok() {
            tracing::info!("Started authorization code flow");
        }
        self.events.report(OidcOperation::StartCodeFlow, result)
    }

    /// Completes a flow from the URL the provider redirected to.
    ///
    /// # Errors
    ///
    /// [`OidcError::StateMismatch`], [`OidcError::Authorization`],
    /// [`OidcError::MissingAuthorizationCode`], token endpoint and
    /// validation failures.
    pub async fn handle_redirect_callback(&self, url: &Url) -> Result<LocalState> {
        let result = self.flow.complete(url).await;
        self.events.report(OidcOperation::HandleCallback, result)
    }

    /// Runs the refresh token grant.
    ///
    /// # Errors
    ///
    /// [`OidcError::NoRefreshToken`], token endpoint and validation
    /// failures.
    pub async fn refresh_access_token(&self) -> Result<LocalState> {
        let result = self.flow.refresh(None).await;
        self.events.report(OidcOperation::RefreshAccessToken, result)
    }

    /// Renews tokens through a hidden frame with `prompt=none`.
    ///
    /// # Errors
    ///
    /// See [`SilentRenewalOrchestrator::renew`].
    pub async fn renew_silently(&self) -> Result<LocalState> {
        self.renewal.renew().await
    }

    /// Returns an unexpired access token, refreshing or silently renewing
    /// when the stored one has expired.
    ///
    /// The refresh grant is used when a refresh token is stored, silent
    /// renewal otherwise.
    ///
    /// # Errors
    ///
    /// The error of the refresh or renewal attempt.
    pub async fn valid_access_token(&self) -> Result<String> {
        let state = self.store.get_state();
        if state.is_logged_in() {
            if let Some(token) = state.access_token {
                return Ok(token);
            }
        }

        let renewed = if state.refresh_token.is_some() {
            tracing::debug!("Access token expired; using refresh token");
            self.refresh_access_token().await?
        } else {
            tracing::debug!("Access token expired; renewing silently");
            self.renew_silently().await?
        };
        renewed.access_token.ok_or_else(|| {
            OidcError::Persistence("token response stored without an access token".to_string())
        })
    }

    /// Clears local state and returns the end-session URL to navigate to.
    ///
    /// # Errors
    ///
    /// [`OidcError::Configuration`] or [`OidcError::Persistence`].
    pub async fn end_session(&self, params: LogoutFlowParameters) -> Result<Option<Url>> {
        let result = self.end_session_inner(&params).await;
        self.events.report(OidcOperation::EndSession, result)
    }

    async fn end_session_inner(&self, params: &LogoutFlowParameters) -> Result<Option<Url>> {
        let hint = self.store.get_state().identity_token;
        let url = build_end_session_url(&self.config, hint.as_deref(), params)?;
        self.store.clear().await?;

        tracing::info!(provider_logout = url.is_some(), "Session ended");
        self.events.publish(SimpleOidcEvent::SessionEnded {
            end_session_url: url.as_ref().map(Url::to_string),
        });
        Ok(url)
    }

    /// Loads UserInfo claims for the current user.
    ///
    /// # Errors
    ///
    /// Any error of [`OidcClient::valid_access_token`], plus
    /// [`OidcError::UserInfoEndpoint`] and a subject mismatch.
    pub async fn user_info(&self) -> Result<ClaimCollection> {
        let access_token = self.valid_access_token().await?;
        let subject = self
            .store
            .get_state()
            .decoded_identity_token
            .and_then(|t| t.sub().map(str::to_string));

        let result = self
            .userinfo
            .fetch(&access_token, subject.as_deref())
            .await;
        if let Ok(claims) = &result {
            self.events.publish(SimpleOidcEvent::UserInfoLoaded {
                claims: claims.clone(),
            });
        }
        self.events.report(OidcOperation::UserInfo, result)
    }
}
