//! Read-only commands: `status`, `decode` and `discover`

use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::commands::open_persistence;
use crate::config::Config;
use crate::error::Result;
use crate::oidc::discovery;
use crate::oidc::models::{DecodedIdentityToken, LocalState};
use crate::oidc::store::StateStore;
use crate::oidc::validator::TokenValidator;

/// Prints the stored session.
///
/// Reads the state store only; no provider configuration is needed.
///
/// # Errors
///
/// Persistence and serialization errors.
pub async fn run_status(config: Config, json: bool) -> Result<()> {
    let state = StateStore::load(open_persistence(&config.storage))
        .await?
        .get_state();

    if json {
        println!("{}", serde_json::to_string_pretty(&redacted(&state))?);
    } else {
        print_summary(&state);
    }
    Ok(())
}

const REDACTED: &str = "<redacted>";

/// Copy of `state` with credentials and in-flight PKCE secrets masked.
///
/// Decoded claims, expirations and pending-request metadata stay readable.
fn redacted(state: &LocalState) -> LocalState {
    let mask = |value: &Option<String>| value.as_ref().map(|_| REDACTED.to_string());
    let mut out = state.clone();
    out.access_token = mask(&state.access_token);
    out.identity_token = mask(&state.identity_token);
    out.refresh_token = mask(&state.refresh_token);
    out.session_state = mask(&state.session_state);
    out.code_verifier = mask(&state.code_verifier);
    out.nonce = mask(&state.nonce);
    for pending in out.pending_requests.values_mut() {
        pending.code_verifier = REDACTED.to_string();
        pending.nonce = REDACTED.to_string();
    }
    out
}

/// Decodes a JWT without verifying it and prints header and claims.
///
/// # Errors
///
/// [`OidcError::MalformedToken`](crate::error::OidcError::MalformedToken).
pub fn run_decode(jwt: &str) -> Result<()> {
    let token = TokenValidator::decode(jwt)?;
    println!("{}", serde_json::to_string_pretty(&token)?);
    if let Some(exp) = token.expiration() {
        eprintln!("{} {}", "expires:".cyan(), describe_expiry(exp, Utc::now()));
    }
    Ok(())
}

/// Fetches and prints a provider's discovery document.
///
/// # Errors
///
/// Discovery errors.
pub async fn run_discover(authority: &str) -> Result<()> {
    let metadata = discovery::fetch_provider_metadata(&reqwest::Client::new(), authority).await?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

/// Prints a short human-readable description of `state`.
pub fn print_summary(state: &LocalState) {
    let now = Utc::now();
    let status = if state.is_logged_in_at(now) {
        "logged in".green().bold()
    } else if state.access_token.is_some() {
        "expired".yellow().bold()
    } else {
        "logged out".red().bold()
    };
    println!("{:<16}{}", "Session:", status);

    if let Some(token) = &state.decoded_identity_token {
        print_identity(token);
    }
    if let Some(exp) = state.access_token_expiration {
        println!("{:<16}{}", "Access token:", describe_expiry(exp, now));
    }
    println!(
        "{:<16}{}",
        "Refresh token:",
        if state.refresh_token.is_some() { "yes" } else { "no" }
    );
    if !state.pending_requests.is_empty() {
        println!("{:<16}{}", "Pending flows:", state.pending_requests.len());
    }
}

fn print_identity(token: &DecodedIdentityToken) {
    if let Some(sub) = token.sub() {
        println!("{:<16}{}", "Subject:", sub);
    }
    if let Some(iss) = token.iss() {
        println!("{:<16}{}", "Issuer:", iss);
    }
    for claim in ["name", "email", "preferred_username"] {
        if let Some(value) = token.string_claim(claim) {
            println!("{:<16}{}", format!("{claim}:"), value);
        }
    }
}

fn describe_expiry(exp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = exp.signed_duration_since(now);
    if remaining.num_seconds() <= 0 {
        format!("expired at {}", exp.to_rfc3339())
    } else {
        format!("valid until {} ({}s left)", exp.to_rfc3339(), remaining.num_seconds())
    }
}
