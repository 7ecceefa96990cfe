//! RP-initiated logout URL builder

use url::Url;

use crate::config::AuthConfig;
use crate::error::{OidcError, Result};

/// Caller-controlled logout parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutFlowParameters {
    /// Where the provider should send the browser after logout.
    ///
    /// Falls back to `post_logout_redirect_uri`, then `base_url`, from the
    /// configuration.
    pub post_logout_redirect_uri: Option<String>,
    /// Opaque value echoed back on the post-logout redirect.
    pub state: Option<String>,
}

/// Builds the end-session URL the caller should navigate to.
///
/// Returns `Ok(None)` when the provider has no end-session endpoint; local
/// logout still applies then.
///
/// # Errors
///
/// Returns [`OidcError::Configuration`] for an unparsable endpoint.
///
/// # Examples
///
/// ```
/// use simple_oidc::config::AuthConfig;
/// use simple_oidc::oidc::end_session::{build_end_session_url, LogoutFlowParameters};
///
/// let config = AuthConfig {
///     end_session_endpoint: Some("https://idp.example/logout".to_string()),
///     base_url: Some("https://app.example/".to_string()),
///     ..Default::default()
/// };
/// let url = build_end_session_url(&config, Some("id.token.hint"), &LogoutFlowParameters::default())
///     .unwrap()
///     .unwrap();
/// assert!(url.as_str().contains("id_token_hint=id.token.hint"));
/// assert!(url.as_str().contains("post_logout_redirect_uri=https%3A%2F%2Fapp.example%2F"));
/// ```
pub fn build_end_session_url(
    config: &AuthConfig,
    id_token_hint: Option<&str>,
    params: &LogoutFlowParameters,
) -> Result<Option<Url>> {
    let Some(endpoint) = config.end_session_endpoint.as_deref() else {
        tracing::debug!("No end_session_endpoint configured; logging out locally only");
        return Ok(None);
    };

    let mut url = Url::parse(endpoint).map_err(|e| {
        OidcError::Configuration(format!("end_session_endpoint is not a valid URL: {e}"))
    })?;

    let post_logout_redirect_uri = params
        .post_logout_redirect_uri
        .as_deref()
        .or(config.post_logout_redirect_uri.as_deref())
        .or(config.base_url.as_deref());

    {
        let mut query = url.query_pairs_mut();
        if let Some(hint) = id_token_hint {
            query.append_pair("id_token_hint", hint);
        } else if !config.client_id.is_empty() {
            // Without a hint the provider needs the client to find the
            // registered post-logout redirects.
            query.append_pair("client_id", &config.client_id);
        }
        if let Some(redirect) = post_logout_redirect_uri {
            query.append_pair("post_logout_redirect_uri", redirect);
        }
        if let Some(state) = &params.state {
            query.append_pair("state", state);
        }
    }

    Ok(Some(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            client_id: "client-a".to_string(),
            end_session_endpoint: Some("https://idp.example/logout".to_string()),
            post_logout_redirect_uri: Some("https://app.example/bye".to_string()),
            base_url: Some("https://app.example/".to_string()),
            ..Default::default()
        }
    }

    fn param(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_no_endpoint_means_local_logout_only() {
        let config = AuthConfig::default();
        assert_eq!(
            build_end_session_url(&config, Some("t"), &LogoutFlowParameters::default()).unwrap(),
            None
        );
    }

    #[test]
    fn test_redirect_prefers_parameter_then_config_then_base_url() {
        let explicit = LogoutFlowParameters {
            post_logout_redirect_uri: Some("https://app.example/custom".to_string()),
            state: Some("xyz".to_string()),
        };
        let url = build_end_session_url(&config(), Some("t"), &explicit).unwrap().unwrap();
        assert_eq!(param(&url, "post_logout_redirect_uri").as_deref(), Some("https://app.example/custom"));
        assert_eq!(param(&url, "state").as_deref(), Some("xyz"));

        let url = build_end_session_url(&config(), Some("t"), &LogoutFlowParameters::default())
            .unwrap()
            .unwrap();
        assert_eq!(param(&url, "post_logout_redirect_uri").as_deref(), Some("https://app.example/bye"));

        let mut base_only = config();
        base_only.post_logout_redirect_uri = None;
        let url = build_end_session_url(&base_only, Some("t"), &LogoutFlowParameters::default())
            .unwrap()
            .unwrap();
        assert_eq!(param(&url, "post_logout_redirect_uri").as_deref(), Some("https://app.example/"));
    }

    #[test]
    fn test_client_id_sent_without_hint() {
        let url = build_end_session_url(&config(), None, &LogoutFlowParameters::default())
            .unwrap()
            .unwrap();
        assert_eq!(param(&url, "id_token_hint"), None);
        assert_eq!(param(&url, "client_id").as_deref(), Some("client-a"));
    }
}
