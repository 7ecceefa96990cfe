//! Hidden-frame collaborator
//!
//! Silent renewal needs a navigable, non-interactive browsing context: point
//! it at the authorize URL, then wait until it lands on the redirect URI.
//! The protocol engine only sees these traits; [`fake`] provides an
//! in-process implementation for tests and [`loopback`] drives the system
//! browser through a local HTTP listener.

pub mod fake;
pub mod loopback;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

/// One navigable context.
#[async_trait]
pub trait HiddenFrame: Send {
    /// Navigates the frame to `url`.
    async fn set_source(&mut self, url: &Url) -> Result<()>;

    /// Resolves with the URL the frame finally landed on (the redirect URI
    /// with callback parameters), or the frame's load error.
    ///
    /// Callers bound this with their own timeout.
    async fn completion(&mut self) -> Result<Url>;

    /// Tears the frame down. Must be safe to call after a failed or
    /// abandoned completion.
    async fn remove(&mut self);
}

/// Creates hidden frames.
#[async_trait]
pub trait HiddenFrameFactory: Send + Sync {
    /// Creates a fresh frame.
    async fn create(&self) -> Result<Box<dyn HiddenFrame>>;
}
