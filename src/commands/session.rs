//! Commands that talk to the OpenID Provider

use std::time::Duration;

use colored::Colorize;
use url::Url;

use crate::commands::build_client;
use crate::commands::inspect::print_summary;
use crate::config::Config;
use crate::error::{OidcError, Result};
use crate::oidc::client::StartCodeFlowParameters;
use crate::oidc::end_session::LogoutFlowParameters;
use crate::oidc::frame::loopback::LoopbackFrameFactory;
use crate::oidc::frame::HiddenFrameFactory;

/// How long `login` waits for the user to finish in the browser.
const INTERACTIVE_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Interactive login through the system browser.
///
/// Binds the redirect URI locally, sends the browser to the authorize URL
/// and completes the flow with the redirect it receives.
///
/// # Errors
///
/// Returns [`OidcError::Frame`] when the redirect URI is not a loopback
/// `http` URI or no redirect arrives in time, plus any callback, token
/// endpoint or validation error.
pub async fn run_login(
    config: Config,
    no_browser: bool,
    scope: Option<String>,
    prompt: Option<String>,
) -> Result<()> {
    let redirect_uri = config.auth.redirect_uri.clone();
    let client = build_client(config, None, !no_browser).await?;

    // Bind before navigating so the redirect cannot arrive first.
    let frames = LoopbackFrameFactory::new(&redirect_uri, !no_browser)?;
    let mut frame = frames.create().await?;

    let request = client
        .start_code_flow(StartCodeFlowParameters {
            scope,
            prompt,
            ..Default::default()
        })
        .await?;
    frame.set_source(&request.url).await?;

    let landed = tokio::time::timeout(INTERACTIVE_LOGIN_TIMEOUT, frame.completion()).await;
    frame.remove().await;
    let landed = match landed {
        Ok(landed) => landed?,
        Err(_) => {
            client
                .store()
                .discard_pending(&request.pending.state)
                .await?;
            return Err(OidcError::Frame(format!(
                "no redirect received within {} seconds",
                INTERACTIVE_LOGIN_TIMEOUT.as_secs()
            )));
        }
    };

    let state = client.handle_redirect_callback(&landed).await?;
    println!("{}", "Login successful".green().bold());
    print_summary(&state);
    Ok(())
}

/// Prints an authorize URL; the flow is completed with `callback`.
///
/// # Errors
///
/// Configuration, random source and persistence errors.
pub async fn run_authorize_url(config: Config, scope: Option<String>) -> Result<()> {
    let client = build_client(config, None, false).await?;
    let request = client
        .start_code_flow(StartCodeFlowParameters {
            scope,
            ..Default::default()
        })
        .await?;
    println!("{}", request.url);
    eprintln!(
        "{} run `simple-oidc callback '<redirect URL>'` after signing in",
        "Next:".cyan()
    );
    Ok(())
}

/// Completes a flow from a pasted redirect URL.
///
/// # Errors
///
/// Callback, token endpoint and validation errors.
pub async fn run_callback(config: Config, url: &str) -> Result<()> {
    let url = Url::parse(url)
        .map_err(|e| OidcError::Configuration(format!("invalid callback URL: {e}")))?;
    let client = build_client(config, None, false).await?;
    let state = client.handle_redirect_callback(&url).await?;
    println!("{}", "Login successful".green().bold());
    print_summary(&state);
    Ok(())
}

/// Uses the stored refresh token.
///
/// # Errors
///
/// [`OidcError::NoRefreshToken`], token endpoint and validation errors.
pub async fn run_refresh(config: Config) -> Result<()> {
    let client = build_client(config, None, false).await?;
    let state = client.refresh_access_token().await?;
    println!("{}", "Tokens refreshed".green().bold());
    print_summary(&state);
    Ok(())
}

/// Silent renewal through the loopback frame with `prompt=none`.
///
/// # Errors
///
/// See [`OidcClient::renew_silently`](crate::oidc::client::OidcClient::renew_silently).
pub async fn run_renew(config: Config, no_browser: bool) -> Result<()> {
    let silent_redirect = config.auth.silent_redirect_uri().to_string();
    let client = build_client(config, Some(&silent_redirect), !no_browser).await?;
    let state = client.renew_silently().await?;
    println!("{}", "Tokens renewed".green().bold());
    print_summary(&state);
    Ok(())
}

/// Prints the UserInfo claims as JSON.
///
/// # Errors
///
/// Token, UserInfo endpoint and subject mismatch errors.
pub async fn run_userinfo(config: Config) -> Result<()> {
    let client = build_client(config, None, false).await?;
    let claims = client.user_info().await?;
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}

/// Clears the session and prints the provider logout URL.
///
/// # Errors
///
/// Configuration and persistence errors.
pub async fn run_logout(config: Config, post_logout_redirect_uri: Option<String>) -> Result<()> {
    let client = build_client(config, None, false).await?;
    let url = client
        .end_session(LogoutFlowParameters {
            post_logout_redirect_uri,
            state: None,
        })
        .await?;

    println!("{}", "Local session cleared".green().bold());
    if let Some(url) = url {
        println!("Finish provider logout at:\n{url}");
    }
    Ok(())
}
