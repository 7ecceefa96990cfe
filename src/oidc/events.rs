//! Event Bus
//!
//! Plain publish/subscribe object for lifecycle and error notifications.
//! Events are fire-and-forget: publishing never blocks and never fails, and
//! a subscriber that falls behind loses the oldest events.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::OidcError;
use crate::oidc::models::ClaimCollection;

const CHANNEL_CAPACITY: usize = 64;

/// Engine operation an error event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidcOperation {
    /// Building and persisting an authorize request
    StartCodeFlow,
    /// Processing a redirect callback
    HandleCallback,
    /// Refresh token grant
    RefreshAccessToken,
    /// Hidden-frame renewal
    SilentRenewal,
    /// Logout
    EndSession,
    /// UserInfo request
    UserInfo,
    /// Provider discovery or key retrieval
    Discovery,
}

impl fmt::Display for OidcOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartCodeFlow => "start_code_flow",
            Self::HandleCallback => "handle_callback",
            Self::RefreshAccessToken => "refresh_access_token",
            Self::SilentRenewal => "silent_renewal",
            Self::EndSession => "end_session",
            Self::UserInfo => "user_info",
            Self::Discovery => "discovery",
        };
        f.write_str(name)
    }
}

/// Lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SimpleOidcEvent {
    /// An authorize request was built and persisted
    CodeFlowStarted {
        /// Redirect URI the provider will answer on
        redirect_uri: String,
        /// `true` for hidden-frame renewals
        silent: bool,
    },
    /// A callback matched its pending request
    CallbackReceived {
        /// `session_state` reported by the provider
        session_state: Option<String>,
    },
    /// Validated tokens were stored
    TokensReady {
        /// Access token expiration
        expires_at: Option<DateTime<Utc>>,
        /// `sub` of the identity token, when one is stored
        subject: Option<String>,
    },
    /// The refresh token grant succeeded
    AccessTokenRefreshed {
        /// New access token expiration
        expires_at: Option<DateTime<Utc>>,
    },
    /// A hidden-frame round trip began
    SilentRenewalStarted,
    /// Silent renewal stored new tokens
    SilentRenewalSucceeded {
        /// New access token expiration
        expires_at: Option<DateTime<Utc>>,
    },
    /// Silent renewal failed; existing tokens were kept
    SilentRenewalFailed {
        /// Cause
        error: OidcError,
    },
    /// Local state was cleared for logout
    SessionEnded {
        /// End-session URL the caller should navigate to
        end_session_url: Option<String>,
    },
    /// UserInfo claims were loaded
    UserInfoLoaded {
        /// Claims returned by the endpoint
        claims: ClaimCollection,
    },
}

/// Error notification, published before the error is returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleOidcErrorEvent {
    /// Operation that failed
    pub operation: OidcOperation,
    /// The error returned to the caller
    pub error: OidcError,
}

/// Publish/subscribe hub for [`SimpleOidcEvent`] and [`SimpleOidcErrorEvent`].
#[derive(Debug, Clone)]
pub struct EventBus {
    events: broadcast::Sender<SimpleOidcEvent>,
    errors: broadcast::Sender<SimpleOidcErrorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (errors, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { events, errors }
    }

    /// Subscribes to lifecycle events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SimpleOidcEvent> {
        self.events.subscribe()
    }

    /// Subscribes to error events published from now on.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<SimpleOidcErrorEvent> {
        self.errors.subscribe()
    }

    /// Publishes a lifecycle event.
    pub fn publish(&self, event: SimpleOidcEvent) {
        tracing::trace!(?event, "Publishing OIDC event");
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Publishes an error event.
    pub fn publish_error(&self, operation: OidcOperation, error: OidcError) {
        tracing::warn!(%operation, kind = error.kind(), error = %error, "OIDC operation failed");
        let _ = self.errors.send(SimpleOidcErrorEvent { operation, error });
    }

    /// Publishes the error of a failed `result` and hands the result back.
    pub fn report<T>(
        &self,
        operation: OidcOperation,
        result: crate::error::Result<T>,
    ) -> crate::error::Result<T> {
        if let Err(error) = &result {
            self.publish_error(operation, error.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_fail() {
        let bus = EventBus::new();
        bus.publish(SimpleOidcEvent::SilentRenewalStarted);
        bus.publish_error(OidcOperation::SilentRenewal, OidcError::StateMismatch);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SimpleOidcEvent::SilentRenewalStarted);
        bus.publish(SimpleOidcEvent::SessionEnded {
            end_session_url: None,
        });

        assert_eq!(rx.recv().await.unwrap(), SimpleOidcEvent::SilentRenewalStarted);
        assert!(matches!(
            rx.recv().await.unwrap(),
            SimpleOidcEvent::SessionEnded { .. }
        ));
    }

    #[tokio::test]
    async fn test_report_publishes_errors_only() {
        let bus = EventBus::new();
        let mut errors = bus.subscribe_errors();

        let ok: crate::error::Result<u8> = bus.report(OidcOperation::UserInfo, Ok(1));
        assert_eq!(ok, Ok(1));
        let err: crate::error::Result<u8> =
            bus.report(OidcOperation::UserInfo, Err(OidcError::NoRefreshToken));
        assert_eq!(err, Err(OidcError::NoRefreshToken));

        let event = errors.recv().await.unwrap();
        assert_eq!(event.operation, OidcOperation::UserInfo);
        assert_eq!(event.error, OidcError::NoRefreshToken);
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(OidcOperation::SilentRenewal.to_string(), "silent_renewal");
    }
}
