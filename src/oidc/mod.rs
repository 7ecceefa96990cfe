//! OpenID Connect protocol engine
//!
//! Authorization Code Flow with PKCE, redirect callback handling, token
//! exchange and validation, silent renewal through a hidden frame, and the
//! state and event plumbing around them.
//!
//! [`client::OidcClient`] is the entry point; the other modules can be used
//! on their own.

pub mod authorize;
pub mod callback;
pub mod client;
pub mod code_flow;
pub mod discovery;
pub mod end_session;
pub mod events;
pub mod frame;
pub mod keyring_store;
pub mod metrics;
pub mod models;
pub mod pkce;
pub mod renewal;
pub mod store;
pub mod token_client;
pub mod userinfo;
pub mod validator;

pub use client::{OidcClient, StartCodeFlowParameters};
pub use end_session::LogoutFlowParameters;
pub use events::{EventBus, OidcOperation, SimpleOidcErrorEvent, SimpleOidcEvent};
pub use models::{ClaimCollection, DecodedIdentityToken, LocalState, LocalStatePatch};
pub use store::{MemoryPersistence, StatePersistence, StateStore};
