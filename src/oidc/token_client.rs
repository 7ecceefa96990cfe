//! Token Exchange Client
//!
//! Form-encoded POSTs to the token endpoint for the `authorization_code`
//! and `refresh_token` grants. Requests are never retried here: codes are
//! single-use, so retry policy belongs to the caller.

use std::sync::Arc;

use crate::config::AuthConfig;
use crate::error::{OidcError, Result};
use crate::oidc::metrics::{self, GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};
use crate::oidc::models::{PendingAuthorizeRequest, TokenRequestResult};

/// Client for the token endpoint.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use simple_oidc::config::AuthConfig;
/// use simple_oidc::oidc::token_client::TokenClient;
///
/// # async fn example(config: AuthConfig) -> simple_oidc::error::Result<()> {
/// let client = TokenClient::new(reqwest::Client::new(), Arc::new(config));
/// let tokens = client.refresh_token("stored-refresh-token", None).await?;
/// println!("expires in {:?}s", tokens.expires_in);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    config: Arc<AuthConfig>,
}

impl TokenClient {
    /// Creates a client posting to `config.token_endpoint`.
    pub fn new(http: reqwest::Client, config: Arc<AuthConfig>) -> Self {
        Self { http, config }
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// Sends `code`, the pending request's `code_verifier` and
    /// `redirect_uri`, and `client_id`.
    ///
    /// # Errors
    ///
    /// - [`OidcError::TokenEndpoint`] for non-success responses, and with
    ///   no status for transport failures
    /// - [`OidcError::Serialization`] for an unparsable success body
    pub async fn exchange_code(
        &self,
        code: &str,
        pending: &PendingAuthorizeRequest,
    ) -> Result<TokenRequestResult> {
        let params = [
            ("grant_type", GRANT_AUTHORIZATION_CODE),
            ("code", code),
            ("code_verifier", pending.code_verifier.as_str()),
            ("redirect_uri", pending.redirect_uri.as_str()),
        ];
        let result = self.post(&params).await;
        metrics::record_token_request(GRANT_AUTHORIZATION_CODE, &result);
        result
    }

    /// Exchanges a refresh token for new tokens.
    ///
    /// `scope` narrows the grant; the originally granted scope is kept when
    /// `None`.
    ///
    /// # Errors
    ///
    /// Same as [`TokenClient::exchange_code`].
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenRequestResult> {
        let mut params = vec![
            ("grant_type", GRANT_REFRESH_TOKEN),
            ("refresh_token", refresh_token),
        ];
        if let Some(scope) = scope {
            params.push(("scope", scope));
        }
        let result = self.post(&params).await;
        metrics::record_token_request(GRANT_REFRESH_TOKEN, &result);
        result
    }

    async fn post(&self, grant_params: &[(&str, &str)]) -> Result<TokenRequestResult> {
        let mut form: Vec<(&str, &str)> = grant_params.to_vec();
        form.push(("client_id", self.config.client_id.as_str()));
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        tracing::debug!(
            endpoint = %self.config.token_endpoint,
            grant_type = grant_params.first().map(|(_, v)| *v).unwrap_or_default(),
            "Calling token endpoint"
        );

        let resp = self
            .http
            .post(&self.config.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(OidcError::TokenEndpoint {
                status: Some(status.as_u16()),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| OidcError::Serialization(format!("invalid token response: {e}")))
    }
}

fn transport_error(err: reqwest::Error) -> OidcError {
    OidcError::TokenEndpoint {
        status: None,
        body: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, secret: Option<&str>) -> TokenClient {
        let config = AuthConfig {
            client_id: "client-a".to_string(),
            client_secret: secret.map(str::to_string),
            token_endpoint: format!("{}/token", server.uri()),
            ..Default::default()
        };
        TokenClient::new(reqwest::Client::new(), Arc::new(config))
    }

    fn pending() -> PendingAuthorizeRequest {
        PendingAuthorizeRequest {
            state: "s".to_string(),
            nonce: "n".to_string(),
            code_verifier: "verifier-123".to_string(),
            code_challenge: "c".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            requested_scopes: "openid".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_exchange_code_posts_pkce_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc123"))
            .and(body_string_contains("code_verifier=verifier-123"))
            .and(body_string_contains("client_id=client-a"))
            .and(body_string_contains("redirect_uri=https%3A%2F%2Fapp.example%2Fcb"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server, None)
            .exchange_code("abc123", &pending())
            .await
            .unwrap();
        assert_eq!(result.access_token, "A");
        assert_eq!(result.expires_in, Some(3600));
        assert!(result.id_token.is_none());
    }

    #[tokio::test]
    async fn test_refresh_includes_secret_and_scope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=R1"))
            .and(body_string_contains("client_secret=shh"))
            .and(body_string_contains("scope=openid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2",
                "refresh_token": "R2",
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let result = client(&server, Some("shh"))
            .refresh_token("R1", Some("openid"))
            .await
            .unwrap();
        assert_eq!(result.refresh_token.as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_non_success_maps_to_token_endpoint_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, None)
            .exchange_code("used-code", &pending())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OidcError::TokenEndpoint {
                status: Some(400),
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_unparsable_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server, None)
            .refresh_token("R", None)
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_token_endpoint_error() {
        // Nothing listens on a port that was bound and released.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let config = AuthConfig {
            client_id: "client-a".to_string(),
            token_endpoint: format!("http://{addr}/token"),
            ..Default::default()
        };
        let token_client = TokenClient::new(reqwest::Client::new(), Arc::new(config));

        let err = token_client
            .exchange_code("abc123", &pending())
            .await
            .unwrap_err();
        assert!(
            matches!(err, OidcError::TokenEndpoint { status: None, .. }),
            "unexpected error: {err:?}"
        );
    }
}
