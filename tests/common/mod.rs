use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tempfile::TempDir;
use url::Url;
use wiremock::MockServer;

use simple_oidc::config::AuthConfig;
use simple_oidc::oidc::frame::fake::{FakeFrameFactory, FakeFrameHandle};
use simple_oidc::oidc::validator::TokenValidator;
use simple_oidc::oidc::{OidcClient, StateStore};

pub const ISSUER: &str = "https://idp.example";
pub const CLIENT_ID: &str = "client-a";

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Compact JWT with `alg: none` and an empty signature.
#[allow(dead_code)]
pub fn unsigned_jwt(claims: &serde_json::Value) -> String {
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// Identity token claims valid for [`test_config`].
#[allow(dead_code)]
pub fn id_token_claims(sub: &str, nonce: &str) -> serde_json::Value {
    let now = chrono::Utc::now().timestamp();
    serde_json::json!({
        "iss": ISSUER,
        "aud": CLIENT_ID,
        "sub": sub,
        "nonce": nonce,
        "iat": now,
        "exp": now + 3600,
    })
}

/// Provider configuration whose token and userinfo endpoints live on `server`.
#[allow(dead_code)]
pub fn test_config(server: &MockServer) -> AuthConfig {
    AuthConfig {
        issuer: ISSUER.to_string(),
        client_id: CLIENT_ID.to_string(),
        authorize_endpoint: format!("{ISSUER}/authorize"),
        token_endpoint: format!("{}/token", server.uri()),
        user_info_endpoint: Some(format!("{}/userinfo", server.uri())),
        end_session_endpoint: Some(format!("{ISSUER}/logout")),
        redirect_uri: "https://app.example/cb".to_string(),
        silent_renew_redirect_uri: Some("https://app.example/silent".to_string()),
        scope: "openid profile".to_string(),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn client_with_validator(
    config: AuthConfig,
    validator: TokenValidator,
) -> (OidcClient, FakeFrameHandle) {
    let (frames, handle) = FakeFrameFactory::new();
    let client = OidcClient::with_validator(
        config,
        Arc::new(StateStore::in_memory()),
        Arc::new(frames),
        validator,
    )
    .expect("valid test config");
    (client, handle)
}

#[allow(dead_code)]
pub fn client(config: AuthConfig) -> (OidcClient, FakeFrameHandle) {
    client_with_validator(config, TokenValidator::new())
}

#[allow(dead_code)]
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
