//! Silent Renewal Orchestrator
//!
//! Renews tokens without user interaction: a hidden frame is pointed at an
//! authorize URL with `prompt=none`, and whatever it lands on goes through
//! the regular code-flow pipeline. At most one round trip is in flight;
//! callers arriving meanwhile join it and observe the same outcome.
//!
//! ```text
//! Idle -> Requesting -> AwaitingCallback -> Exchanging -> Idle
//!              \______________\_______________\______ (failure) -> Idle
//! ```

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;

use crate::config::AuthConfig;
use crate::error::{OidcError, Result};
use crate::oidc::authorize::{AuthorizeParams, AuthorizeRequest};
use crate::oidc::code_flow::CodeFlow;
use crate::oidc::events::{EventBus, OidcOperation, SimpleOidcEvent};
use crate::oidc::frame::{HiddenFrame, HiddenFrameFactory};
use crate::oidc::metrics;
use crate::oidc::models::LocalState;

type SharedRenewal = Shared<BoxFuture<'static, Result<LocalState>>>;

/// Where the current round trip is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenewalPhase {
    /// Nothing in flight
    #[default]
    Idle,
    /// Building the authorize request and frame
    Requesting,
    /// Frame navigated; waiting for the redirect
    AwaitingCallback,
    /// Callback accepted; exchanging the code
    Exchanging,
}

/// Runs silent renewals, one at a time.
#[derive(Clone)]
pub struct SilentRenewalOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<AuthConfig>,
    flow: Arc<CodeFlow>,
    frames: Arc<dyn HiddenFrameFactory>,
    events: EventBus,
    phase: watch::Sender<RenewalPhase>,
    in_flight: Mutex<Option<SharedRenewal>>,
}

impl std::fmt::Debug for SilentRenewalOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SilentRenewalOrchestrator")
            .field("phase", &*self.inner.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl SilentRenewalOrchestrator {
    /// Creates an idle orchestrator.
    pub fn new(
        config: Arc<AuthConfig>,
        flow: Arc<CodeFlow>,
        frames: Arc<dyn HiddenFrameFactory>,
        events: EventBus,
    ) -> Self {
        let (phase, _) = watch::channel(RenewalPhase::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                flow,
                frames,
                events,
                phase,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RenewalPhase {
        *self.inner.phase.borrow()
    }

    /// Receiver notified on every phase transition.
    pub fn phase_changes(&self) -> watch::Receiver<RenewalPhase> {
        self.inner.phase.subscribe()
    }

    /// Returns `true` while a round trip is in flight.
    pub fn is_renewing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or_else(|e| e.into_inner().is_some())
    }

    /// Renews the tokens through a hidden frame.
    ///
    /// Joins the round trip already in flight, if any. The round trip runs
    /// on its own task, so dropping this future never stalls it. On failure the
    /// stored tokens are left as they were, the pending request is
    /// discarded and both a `SilentRenewalFailed` event and an error event
    /// are published.
    ///
    /// # Errors
    ///
    /// - [`OidcError::SilentRenewalTimeout`] when the frame does not land
    ///   within the configured timeout
    /// - [`OidcError::Authorization`] for provider errors such as
    ///   `login_required`
    /// - any error of the frame, callback or token exchange
    pub async fn renew(&self) -> Result<LocalState> {
        let renewal = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(existing) => {
                    tracing::debug!("Joining silent renewal already in flight");
                    existing.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    // The round trip owns its task so its timeout and cleanup
                    // run even when every caller stops waiting.
                    let task = tokio::spawn(async move {
                        let _clear = ClearInFlight(inner.clone());
                        inner.run().await
                    });
                    let renewal = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(OidcError::Frame(format!("silent renewal task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(renewal.clone());
                    renewal
                }
            }
        };
        renewal.await
    }
}

/// Empties the in-flight slot when the renewal task ends, panics included.
struct ClearInFlight(Arc<Inner>);

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        self.0
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

impl Inner {
    async fn run(&self) -> Result<LocalState> {
        let started = Instant::now();
        tracing::info!("Starting silent renewal");
        self.events.publish(SimpleOidcEvent::SilentRenewalStarted);

        let result = self.round_trip().await;
        self.phase.send_replace(RenewalPhase::Idle);
        metrics::record_silent_renewal(&result, started.elapsed());

        match &result {
            Ok(state) => {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Silent renewal succeeded"
                );
                self.events.publish(SimpleOidcEvent::SilentRenewalSucceeded {
                    expires_at: state.access_token_expiration,
                });
            }
            Err(error) => {
                self.events.publish(SimpleOidcEvent::SilentRenewalFailed {
                    error: error.clone(),
                });
                self.events
                    .publish_error(OidcOperation::SilentRenewal, error.clone());
            }
        }
        result
    }

    async fn round_trip(&self) -> Result<LocalState> {
        self.phase.send_replace(RenewalPhase::Requesting);
        let mut frame = self.frames.create().await?;

        let params = AuthorizeParams {
            redirect_uri: Some(self.config.silent_redirect_uri().to_string()),
            prompt: Some("none".to_string()),
            id_token_hint: self.flow.store().get_state().identity_token,
            ..Default::default()
        };
        let request = match self.flow.start(params, true).await {
            Ok(request) => request,
            Err(e) => {
                frame.remove().await;
                return Err(e);
            }
        };

        let landed = self.navigate(frame.as_mut(), &request).await;
        frame.remove().await;

        let result = match landed {
            Ok(url) => self.finish(&url).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            // Already consumed when the callback matched; a no-op then.
            if let Err(e) = self.flow.store().discard_pending(&request.pending.state).await {
                tracing::warn!(error = %e, "Failed to discard pending silent renewal request");
            }
        }
        result
    }

    async fn navigate(&self, frame: &mut dyn HiddenFrame, request: &AuthorizeRequest) -> Result<url::Url> {
        frame.set_source(&request.url).await?;
        self.phase.send_replace(RenewalPhase::AwaitingCallback);

        let timeout = self.config.silent_renew_timeout();
        match tokio::time::timeout(timeout, frame.completion()).await {
            Ok(landed) => landed,
            Err(_) => Err(OidcError::SilentRenewalTimeout {
                timeout_ms: self.config.silent_renew_timeout_ms,
            }),
        }
    }

    async fn finish(&self, landed: &url::Url) -> Result<LocalState> {
        let callback = self.flow.handle_callback(landed).await?;
        self.phase.send_replace(RenewalPhase::Exchanging);
        self.flow.exchange(callback).await
    }
}
