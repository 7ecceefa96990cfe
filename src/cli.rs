//! Command-line interface definition for Simple OIDC
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for logging in, completing callbacks, renewing
//! tokens and inspecting the stored session.

use clap::{Parser, Subcommand};

/// Simple OIDC - OpenID Connect Authorization Code Flow client
///
/// Signs in against an OpenID Provider with PKCE, keeps the session in the
/// OS keyring and renews it on demand.
#[derive(Parser, Debug, Clone)]
#[command(name = "simple-oidc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SIMPLE_OIDC_CONFIG", default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the configured client_id
    #[arg(long)]
    pub client_id: Option<String>,

    /// Override the configured issuer
    #[arg(long)]
    pub issuer: Option<String>,

    /// Keep session state in memory instead of the OS keyring
    #[arg(long)]
    pub memory: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Sign in through the system browser and a loopback redirect
    Login {
        /// Print the authorize URL without opening a browser
        #[arg(long)]
        no_browser: bool,

        /// Scopes to request instead of the configured ones
        #[arg(long)]
        scope: Option<String>,

        /// `prompt` value, e.g. login or consent
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Print an authorize URL and remember its pending request
    AuthorizeUrl {
        /// Scopes to request instead of the configured ones
        #[arg(long)]
        scope: Option<String>,
    },

    /// Complete a flow from the URL the provider redirected to
    Callback {
        /// Full redirect URL including query or fragment
        url: String,
    },

    /// Use the refresh token to obtain new tokens
    Refresh,

    /// Renew tokens without interaction (`prompt=none`)
    Renew {
        /// Print the authorize URL without opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Show the stored session
    Status {
        /// Print the raw state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch claims from the UserInfo endpoint
    Userinfo,

    /// Clear the session and print the provider logout URL
    Logout {
        /// Post-logout redirect instead of the configured one
        #[arg(long)]
        post_logout_redirect_uri: Option<String>,
    },

    /// Decode a JWT without verifying it
    Decode {
        /// Compact JWT
        jwt: String,
    },

    /// Fetch and print a provider's discovery document
    Discover {
        /// Issuer or authority URL
        authority: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns `true` for commands that need no configuration.
    pub fn is_offline(&self) -> bool {
        matches!(
            self.command,
            Commands::Decode { .. } | Commands::Discover { .. }
        )
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            client_id: None,
            issuer: None,
            memory: false,
            command: Commands::Status { json: false },
        }
    }
}
