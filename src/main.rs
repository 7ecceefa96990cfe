//! Simple OIDC - OpenID Connect client CLI
//!
#![doc = "Simple OIDC - OpenID Connect client CLI"]
#![doc = "Main entry point for the simple-oidc command."]

use anyhow::Result;

use simple_oidc::cli::{Cli, Commands};
use simple_oidc::commands::{inspect, session};
use simple_oidc::config::Config;
use simple_oidc::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration; a missing file falls back to defaults
    let config = if cli.is_offline() {
        let mut config = Config::default();
        if cli.verbose {
            config.logging.level = "debug".to_string();
        }
        config
    } else {
        let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
        Config::load(config_path, &cli)?
    };

    init_logging(&config.logging)?;

    // Execute command
    match cli.command {
        Commands::Login {
            no_browser,
            scope,
            prompt,
        } => {
            tracing::info!("Starting interactive login");
            session::run_login(config, no_browser, scope, prompt).await?;
        }
        Commands::AuthorizeUrl { scope } => {
            session::run_authorize_url(config, scope).await?;
        }
        Commands::Callback { url } => {
            tracing::info!("Completing authorization from callback URL");
            session::run_callback(config, &url).await?;
        }
        Commands::Refresh => {
            session::run_refresh(config).await?;
        }
        Commands::Renew { no_browser } => {
            tracing::info!("Starting silent renewal");
            session::run_renew(config, no_browser).await?;
        }
        Commands::Status { json } => {
            inspect::run_status(config, json).await?;
        }
        Commands::Userinfo => {
            session::run_userinfo(config).await?;
        }
        Commands::Logout {
            post_logout_redirect_uri,
        } => {
            session::run_logout(config, post_logout_redirect_uri).await?;
        }
        Commands::Decode { jwt } => {
            inspect::run_decode(&jwt)?;
        }
        Commands::Discover { authority } => {
            inspect::run_discover(&authority).await?;
        }
    }

    Ok(())
}
