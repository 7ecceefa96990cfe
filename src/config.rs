//! Configuration management for Simple OIDC
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! The resulting [`AuthConfig`] is immutable once handed to
//! [`OidcClient`](crate::oidc::client::OidcClient); every component receives
//! it explicitly at construction.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OidcError, Result};
use crate::oidc::discovery::ProviderMetadata;
use crate::oidc::models::ResponseMode;

/// Main configuration structure for Simple OIDC
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Provider and client registration settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where the CLI keeps session state between invocations
    #[serde(default)]
    pub storage: StorageConfig,
}

/// OpenID Provider endpoints and client registration
///
/// Endpoints left empty can be filled from a discovery document with
/// [`AuthConfig::apply_discovery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL used for discovery (`<authority>/.well-known/...`)
    #[serde(default)]
    pub authority: Option<String>,

    /// Expected `iss` of identity tokens
    #[serde(default)]
    pub issuer: String,

    /// OAuth client identifier
    #[serde(default)]
    pub client_id: String,

    /// Client secret for confidential clients
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Authorization endpoint
    #[serde(default)]
    pub authorize_endpoint: String,

    /// Token endpoint
    #[serde(default)]
    pub token_endpoint: String,

    /// RP-initiated logout endpoint
    #[serde(default)]
    pub end_session_endpoint: Option<String>,

    /// UserInfo endpoint
    #[serde(default)]
    pub user_info_endpoint: Option<String>,

    /// JWK set location; signatures are verified when set
    #[serde(default)]
    pub jwks_uri: Option<String>,

    /// Space-separated scopes; must contain `openid`
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Redirect URI registered for interactive flows
    #[serde(default)]
    pub redirect_uri: String,

    /// Redirect URI for the hidden frame (defaults to `redirect_uri`)
    #[serde(default)]
    pub silent_renew_redirect_uri: Option<String>,

    /// Where the provider sends the user after logout
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,

    /// Application base URL; fallback post-logout target
    #[serde(default)]
    pub base_url: Option<String>,

    /// Required audience (defaults to `client_id`)
    #[serde(default)]
    pub audience: Option<String>,

    /// Where callback parameters are read from
    #[serde(default)]
    pub response_mode: ResponseMode,

    /// Silent renewal round-trip timeout in milliseconds
    #[serde(default = "default_silent_renew_timeout_ms")]
    pub silent_renew_timeout_ms: u64,

    /// Clock skew tolerated on `exp`/`nbf`
    #[serde(default = "default_clock_skew_seconds")]
    pub clock_skew_seconds: i64,

    /// Age after which an unanswered authorize request is discarded
    #[serde(default = "default_pending_request_max_age_seconds")]
    pub pending_request_max_age_seconds: u64,
}

fn default_scope() -> String {
    "openid profile".to_string()
}

fn default_silent_renew_timeout_ms() -> u64 {
    10_000
}

fn default_clock_skew_seconds() -> i64 {
    60
}

fn default_pending_request_max_age_seconds() -> u64 {
    600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authority: None,
            issuer: String::new(),
            client_id: String::new(),
            client_secret: None,
            authorize_endpoint: String::new(),
            token_endpoint: String::new(),
            end_session_endpoint: None,
            user_info_endpoint: None,
            jwks_uri: None,
            scope: default_scope(),
            redirect_uri: String::new(),
            silent_renew_redirect_uri: None,
            post_logout_redirect_uri: None,
            base_url: None,
            audience: None,
            response_mode: ResponseMode::default(),
            silent_renew_timeout_ms: default_silent_renew_timeout_ms(),
            clock_skew_seconds: default_clock_skew_seconds(),
            pending_request_max_age_seconds: default_pending_request_max_age_seconds(),
        }
    }
}

impl AuthConfig {
    /// Audience identity tokens must carry.
    pub fn effective_audience(&self) -> &str {
        self.audience.as_deref().unwrap_or(&self.client_id)
    }

    /// Redirect URI used by silent renewal.
    pub fn silent_redirect_uri(&self) -> &str {
        self.silent_renew_redirect_uri
            .as_deref()
            .unwrap_or(&self.redirect_uri)
    }

    /// Silent renewal timeout.
    pub fn silent_renew_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.silent_renew_timeout_ms)
    }

    /// Maximum age of a pending authorize request.
    pub fn pending_request_max_age(&self) -> chrono::Duration {
        i64::try_from(self.pending_request_max_age_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Returns `true` when at least one endpoint must come from discovery.
    pub fn needs_discovery(&self) -> bool {
        self.authority.is_some()
            && (self.issuer.is_empty()
                || self.authorize_endpoint.is_empty()
                || self.token_endpoint.is_empty())
    }

    /// Fills every endpoint left unset from a discovery document.
    ///
    /// Explicitly configured values always win.
    pub fn apply_discovery(&mut self, metadata: &ProviderMetadata) {
        if self.issuer.is_empty() {
            self.issuer = metadata.issuer.clone();
        }
        if self.authorize_endpoint.is_empty() {
            self.authorize_endpoint = metadata.authorization_endpoint.clone();
        }
        if self.token_endpoint.is_empty() {
            self.token_endpoint = metadata.token_endpoint.clone();
        }
        if self.end_session_endpoint.is_none() {
            self.end_session_endpoint = metadata.end_session_endpoint.clone();
        }
        if self.user_info_endpoint.is_none() {
            self.user_info_endpoint = metadata.userinfo_endpoint.clone();
        }
        if self.jwks_uri.is_none() {
            self.jwks_uri = metadata.jwks_uri.clone();
        }
    }

    /// Validate the configuration
    ///
    /// Runs before any network activity.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(OidcError::Configuration(
                "client_id cannot be empty".to_string(),
            ));
        }

        if self.issuer.trim().is_empty() {
            return Err(OidcError::Configuration("issuer cannot be empty".to_string()));
        }

        require_url("authorize_endpoint", &self.authorize_endpoint)?;
        require_url("token_endpoint", &self.token_endpoint)?;
        require_url("redirect_uri", &self.redirect_uri)?;

        let optional = [
            ("end_session_endpoint", &self.end_session_endpoint),
            ("user_info_endpoint", &self.user_info_endpoint),
            ("jwks_uri", &self.jwks_uri),
            ("silent_renew_redirect_uri", &self.silent_renew_redirect_uri),
            ("post_logout_redirect_uri", &self.post_logout_redirect_uri),
            ("base_url", &self.base_url),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                require_url(name, value)?;
            }
        }

        if !self.scope.split_whitespace().any(|s| s == "openid") {
            return Err(OidcError::Configuration(format!(
                "scope must include openid, got '{}'",
                self.scope
            )));
        }

        if self.silent_renew_timeout_ms == 0 {
            return Err(OidcError::Configuration(
                "silent_renew_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.clock_skew_seconds < 0 {
            return Err(OidcError::Configuration(
                "clock_skew_seconds cannot be negative".to_string(),
            ));
        }

        if self.pending_request_max_age_seconds == 0 {
            return Err(OidcError::Configuration(
                "pending_request_max_age_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn require_url(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OidcError::Configuration(format!("{name} cannot be empty")));
    }
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| OidcError::Configuration(format!("{name} is not a valid URL: {e}")))
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,

    /// Log file path (if None, STDERR only)
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

/// Session state backend for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// OS credential store; state survives between invocations
    #[default]
    Keyring,
    /// Process memory; state is lost on exit
    Memory,
}

/// Session storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StorageBackend,

    /// Keyring account name; separates multiple sessions
    #[serde(default = "default_account")]
    pub account: String,
}

fn default_account() -> String {
    "default".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            account: default_account(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration. It is not validated;
    /// call [`AuthConfig::validate`] once discovery has run.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            OidcError::Configuration(format!("Failed to read config file: {}", e))
        })?;
        serde_yaml::from_str(&contents)
            .map_err(|e| OidcError::Configuration(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        let auth = &mut self.auth;

        if let Ok(v) = std::env::var("SIMPLE_OIDC_AUTHORITY") {
            auth.authority = Some(v);
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_ISSUER") {
            auth.issuer = v;
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_CLIENT_ID") {
            auth.client_id = v;
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_CLIENT_SECRET") {
            auth.client_secret = Some(v);
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_AUTHORIZE_ENDPOINT") {
            auth.authorize_endpoint = v;
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_TOKEN_ENDPOINT") {
            auth.token_endpoint = v;
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_END_SESSION_ENDPOINT") {
            auth.end_session_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_USER_INFO_ENDPOINT") {
            auth.user_info_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_JWKS_URI") {
            auth.jwks_uri = Some(v);
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_SCOPE") {
            auth.scope = v;
        }
        if let Ok(v) = std::env::var("SIMPLE_OIDC_REDIRECT_URI") {
            auth.redirect_uri = v;
        }

        if let Ok(v) = std::env::var("SIMPLE_OIDC_SILENT_RENEW_TIMEOUT_MS") {
            if let Ok(value) = v.parse() {
                auth.silent_renew_timeout_ms = value;
            } else {
                tracing::warn!("Invalid SIMPLE_OIDC_SILENT_RENEW_TIMEOUT_MS: {}", v);
            }
        }

        if let Ok(v) = std::env::var("SIMPLE_OIDC_CLOCK_SKEW_SECONDS") {
            if let Ok(value) = v.parse() {
                auth.clock_skew_seconds = value;
            } else {
                tracing::warn!("Invalid SIMPLE_OIDC_CLOCK_SKEW_SECONDS: {}", v);
            }
        }

        if let Ok(v) = std::env::var("SIMPLE_OIDC_LOG_LEVEL") {
            self.logging.level = v;
        }

        if let Ok(v) = std::env::var("SIMPLE_OIDC_STORAGE_ACCOUNT") {
            self.storage.account = v;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(client_id) = &cli.client_id {
            self.auth.client_id = client_id.clone();
        }
        if let Some(issuer) = &cli.issuer {
            self.auth.issuer = issuer.clone();
        }
        if cli.memory {
            self.storage.backend = StorageBackend::Memory;
        }
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_auth() -> AuthConfig {
        AuthConfig {
            issuer: "https://idp.example".to_string(),
            client_id: "client-a".to_string(),
            authorize_endpoint: "https://idp.example/authorize".to_string(),
            token_endpoint: "https://idp.example/token".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let auth = AuthConfig::default();
        assert_eq!(auth.scope, "openid profile");
        assert_eq!(auth.silent_renew_timeout_ms, 10_000);
        assert_eq!(auth.clock_skew_seconds, 60);
        assert_eq!(auth.pending_request_max_age_seconds, 600);
        assert_eq!(auth.response_mode, ResponseMode::Query);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(valid_auth().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_client_id() {
        let mut auth = valid_auth();
        auth.client_id = String::new();
        assert!(matches!(auth.validate(), Err(OidcError::Configuration(_))));
    }

    #[test]
    fn test_config_validation_invalid_endpoint() {
        let mut auth = valid_auth();
        auth.token_endpoint = "not a url".to_string();
        let err = auth.validate().unwrap_err();
        assert!(err.to_string().contains("token_endpoint"));
    }

    #[test]
    fn test_config_validation_requires_openid_scope() {
        let mut auth = valid_auth();
        auth.scope = "profile email".to_string();
        assert!(auth.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut auth = valid_auth();
        auth.silent_renew_timeout_ms = 0;
        assert!(auth.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_optional_url() {
        let mut auth = valid_auth();
        auth.end_session_endpoint = Some("::".to_string());
        assert!(auth.validate().is_err());
    }

    #[test]
    fn test_audience_defaults_to_client_id() {
        let mut auth = valid_auth();
        assert_eq!(auth.effective_audience(), "client-a");
        auth.audience = Some("api".to_string());
        assert_eq!(auth.effective_audience(), "api");
    }

    #[test]
    fn test_silent_redirect_defaults_to_redirect_uri() {
        let mut auth = valid_auth();
        assert_eq!(auth.silent_redirect_uri(), "https://app.example/cb");
        auth.silent_renew_redirect_uri = Some("https://app.example/silent".to_string());
        assert_eq!(auth.silent_redirect_uri(), "https://app.example/silent");
    }

    #[test]
    fn test_apply_discovery_keeps_explicit_values() {
        let mut auth = AuthConfig {
            client_id: "client-a".to_string(),
            token_endpoint: "https://override.example/token".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            ..Default::default()
        };
        let metadata = ProviderMetadata {
            issuer: "https://idp.example".to_string(),
            authorization_endpoint: "https://idp.example/authorize".to_string(),
            token_endpoint: "https://idp.example/token".to_string(),
            userinfo_endpoint: Some("https://idp.example/userinfo".to_string()),
            end_session_endpoint: None,
            jwks_uri: Some("https://idp.example/jwks".to_string()),
            ..Default::default()
        };

        auth.apply_discovery(&metadata);

        assert_eq!(auth.issuer, "https://idp.example");
        assert_eq!(auth.authorize_endpoint, "https://idp.example/authorize");
        assert_eq!(auth.token_endpoint, "https://override.example/token");
        assert_eq!(auth.jwks_uri.as_deref(), Some("https://idp.example/jwks"));
        assert!(auth.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
auth:
  issuer: https://idp.example
  client_id: client-a
  authorize_endpoint: https://idp.example/authorize
  token_endpoint: https://idp.example/token
  redirect_uri: http://127.0.0.1:8765/callback
  response_mode: fragment
logging:
  json_format: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.auth.response_mode, ResponseMode::Fragment);
        assert_eq!(config.auth.scope, "openid profile");
        assert!(config.logging.json_format);
        assert_eq!(config.storage.account, "default");
        assert!(config.auth.validate().is_ok());
    }
}
