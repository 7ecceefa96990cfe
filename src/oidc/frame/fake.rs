//! In-process fake hidden frame for unit and integration tests
//!
//! [`FakeFrameFactory::new`] returns a `(FakeFrameFactory, FakeFrameHandle)`
//! pair. Wire the factory into the code under test; from the test side use
//! the handle to:
//!
//! - Read every URL a frame was pointed at: `handle.next_navigation().await`
//! - Complete the pending frame: `handle.redirect(url)` or `handle.fail(msg)`
//! - Count frames: `handle.created()`, `handle.removed()`
//!
//! ```text
//! frame set_source() ---> navigations_tx ---> navigations_rx (handle reads)
//! handle redirect()  ---> responses_tx   ---> responses_rx   (frame completion())
//! ```
//!
//! # Example
//!
//! ```
//! use simple_oidc::oidc::frame::fake::FakeFrameFactory;
//! use simple_oidc::oidc::frame::{HiddenFrame, HiddenFrameFactory};
//! use url::Url;
//!
//! # tokio_test::block_on(async {
//! let (factory, mut handle) = FakeFrameFactory::new();
//! let mut frame = factory.create().await.unwrap();
//!
//! frame.set_source(&Url::parse("https://idp.example/authorize").unwrap()).await.unwrap();
//! assert_eq!(handle.next_navigation().await.unwrap().path(), "/authorize");
//!
//! handle.redirect(Url::parse("https://app.example/cb?code=c&state=s").unwrap());
//! assert_eq!(frame.completion().await.unwrap().query(), Some("code=c&state=s"));
//! # });
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use url::Url;

use crate::error::{OidcError, Result};
use crate::oidc::frame::{HiddenFrame, HiddenFrameFactory};

type FrameOutcome = std::result::Result<Url, String>;

/// Factory producing [`FakeFrame`]s that share one pair of channels.
#[derive(Debug, Clone)]
pub struct FakeFrameFactory {
    navigations_tx: mpsc::UnboundedSender<Url>,
    responses_rx: Arc<Mutex<mpsc::UnboundedReceiver<FrameOutcome>>>,
    created: Arc<AtomicUsize>,
    removed: Arc<AtomicUsize>,
}

impl FakeFrameFactory {
    /// Create a new `(FakeFrameFactory, FakeFrameHandle)` pair.
    pub fn new() -> (Self, FakeFrameHandle) {
        let (navigations_tx, navigations_rx) = mpsc::unbounded_channel();
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let created = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));

        let factory = Self {
            navigations_tx,
            responses_rx: Arc::new(Mutex::new(responses_rx)),
            created: created.clone(),
            removed: removed.clone(),
        };
        let handle = FakeFrameHandle {
            navigations_rx,
            responses_tx,
            created,
            removed,
        };
        (factory, handle)
    }
}

#[async_trait]
impl HiddenFrameFactory for FakeFrameFactory {
    async fn create(&self) -> Result<Box<dyn HiddenFrame>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeFrame {
            navigations_tx: self.navigations_tx.clone(),
            responses_rx: self.responses_rx.clone(),
            removed: self.removed.clone(),
            is_removed: false,
        }))
    }
}

/// Frame created by [`FakeFrameFactory`].
#[derive(Debug)]
pub struct FakeFrame {
    navigations_tx: mpsc::UnboundedSender<Url>,
    responses_rx: Arc<Mutex<mpsc::UnboundedReceiver<FrameOutcome>>>,
    removed: Arc<AtomicUsize>,
    is_removed: bool,
}

#[async_trait]
impl HiddenFrame for FakeFrame {
    async fn set_source(&mut self, url: &Url) -> Result<()> {
        self.navigations_tx
            .send(url.clone())
            .map_err(|e| OidcError::Frame(format!("fake frame handle dropped: {e}")))
    }

    async fn completion(&mut self) -> Result<Url> {
        let mut rx = self.responses_rx.lock().await;
        match rx.recv().await {
            Some(Ok(url)) => Ok(url),
            Some(Err(message)) => Err(OidcError::Frame(message)),
            None => Err(OidcError::Frame("fake frame handle dropped".to_string())),
        }
    }

    async fn remove(&mut self) {
        if !self.is_removed {
            self.is_removed = true;
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// The test-side handle for a [`FakeFrameFactory`].
#[derive(Debug)]
pub struct FakeFrameHandle {
    navigations_rx: mpsc::UnboundedReceiver<Url>,
    responses_tx: mpsc::UnboundedSender<FrameOutcome>,
    created: Arc<AtomicUsize>,
    removed: Arc<AtomicUsize>,
}

impl FakeFrameHandle {
    /// Waits for the next URL a frame was pointed at.
    pub async fn next_navigation(&mut self) -> Option<Url> {
        self.navigations_rx.recv().await
    }

    /// Returns an already recorded navigation without waiting.
    pub fn try_next_navigation(&mut self) -> Option<Url> {
        self.navigations_rx.try_recv().ok()
    }

    /// Completes the waiting frame as if it had landed on `url`.
    pub fn redirect(&self, url: Url) {
        // A dropped factory means the test is already over.
        let _ = self.responses_tx.send(Ok(url));
    }

    /// Completes the waiting frame with a load error.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.responses_tx.send(Err(message.into()));
    }

    /// Number of frames created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of frames removed so far.
    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }
}
