//! Simple OIDC - OpenID Connect Authorization Code Flow client library
//!
//! This library implements the client side of the OpenID Connect
//! Authorization Code Flow with PKCE: authorize URL construction, callback
//! correlation, token exchange and refresh, identity token validation,
//! silent renewal through a hidden frame, and observable session state.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `oidc`: The protocol engine and its collaborators
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `logging`: Tracing subscriber setup
//! - `cli` / `commands`: Command-line interface definition and handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use simple_oidc::oidc::frame::loopback::LoopbackFrameFactory;
//! use simple_oidc::oidc::{OidcClient, StartCodeFlowParameters, StateStore};
//! use simple_oidc::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     let frames = Arc::new(LoopbackFrameFactory::new(&config.auth.redirect_uri, true)?);
//!     let client = OidcClient::new(config.auth, Arc::new(StateStore::in_memory()), frames)?;
//!
//!     let request = client.start_code_flow(StartCodeFlowParameters::default()).await?;
//!     println!("Sign in at {}", request.url);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod oidc;

// Re-export commonly used types
pub use config::Config;
pub use error::{OidcError, Result, ValidationError};
pub use oidc::{OidcClient, StateStore};
