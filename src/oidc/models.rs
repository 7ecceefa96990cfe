//! Protocol data model
//!
//! Types shared by every component of the code-flow engine: the persisted
//! [`LocalState`], the correlation record [`PendingAuthorizeRequest`], the
//! raw [`TokenRequestResult`] and the decoded identity token claims.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Claims mapping as returned by identity tokens and the UserInfo endpoint.
pub type ClaimCollection = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// ResponseMode
// ---------------------------------------------------------------------------

/// Where the authorization server places callback parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Parameters arrive in the query string (`?code=...&state=...`).
    #[default]
    Query,
    /// Parameters arrive in the URL fragment (`#code=...&state=...`).
    Fragment,
}

impl ResponseMode {
    /// Value of the `response_mode` authorize parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Fragment => "fragment",
        }
    }
}

// ---------------------------------------------------------------------------
// DecodedIdentityToken
// ---------------------------------------------------------------------------

/// JOSE header of a decoded JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtHeader {
    /// Signing algorithm, e.g. `RS256`.
    pub alg: String,

    /// Key identifier used to select a key from the JWK set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Token type, usually `JWT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// Claims decoded from an identity token.
///
/// Derived from the raw token by
/// [`TokenValidator::decode`](super::validator::TokenValidator::decode) and
/// recomputed whenever a new identity token is stored. The raw compact
/// serialization is kept in memory for signature verification but is not
/// serialized; [`LocalState::identity_token`] already carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedIdentityToken {
    /// JOSE header.
    pub header: JwtHeader,

    /// All payload claims, reserved and custom.
    pub claims: ClaimCollection,

    #[serde(skip)]
    raw: String,
}

impl PartialEq for DecodedIdentityToken {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.claims == other.claims
    }
}

impl DecodedIdentityToken {
    pub(crate) fn new(header: JwtHeader, claims: ClaimCollection, raw: String) -> Self {
        Self {
            header,
            claims,
            raw,
        }
    }

    /// The compact serialization this token was decoded from.
    ///
    /// Empty for tokens restored from persistence.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns a string claim by name.
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(|v| v.as_str())
    }

    /// Returns a numeric date claim (seconds since the epoch) by name.
    pub fn numeric_claim(&self, name: &str) -> Option<i64> {
        self.claims.get(name).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().map(|f| f.trunc() as i64))
        })
    }

    /// `iss` claim.
    pub fn iss(&self) -> Option<&str> {
        self.string_claim("iss")
    }

    /// `sub` claim.
    pub fn sub(&self) -> Option<&str> {
        self.string_claim("sub")
    }

    /// `aud` claim, normalised to a list (it may be a string or an array).
    pub fn aud(&self) -> Vec<&str> {
        match self.claims.get("aud") {
            Some(serde_json::Value::String(s)) => vec![s.as_str()],
            Some(serde_json::Value::Array(items)) => {
                items.iter().filter_map(|v| v.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// `exp` claim.
    pub fn exp(&self) -> Option<i64> {
        self.numeric_claim("exp")
    }

    /// `nbf` claim.
    pub fn nbf(&self) -> Option<i64> {
        self.numeric_claim("nbf")
    }

    /// `iat` claim.
    pub fn iat(&self) -> Option<i64> {
        self.numeric_claim("iat")
    }

    /// `nonce` claim.
    pub fn nonce(&self) -> Option<&str> {
        self.string_claim("nonce")
    }

    /// `at_hash` claim.
    pub fn at_hash(&self) -> Option<&str> {
        self.string_claim("at_hash")
    }

    /// Expiration as a timestamp.
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.exp().and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

// ---------------------------------------------------------------------------
// PendingAuthorizeRequest
// ---------------------------------------------------------------------------

/// Correlation record for an authorize request that has not been answered.
///
/// Created when a flow starts, consumed exactly once when the callback with
/// the matching `state` arrives, then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorizeRequest {
    /// Correlation key echoed back by the authorization server.
    pub state: String,

    /// Value the identity token `nonce` claim must equal.
    pub nonce: String,

    /// PKCE verifier sent with the code exchange.
    pub code_verifier: String,

    /// PKCE challenge sent with the authorize request.
    pub code_challenge: String,

    /// Redirect URI used for this request; repeated in the code exchange.
    pub redirect_uri: String,

    /// Space-separated scopes requested.
    pub requested_scopes: String,

    /// When the request was created.
    pub created_at: DateTime<Utc>,
}

impl PendingAuthorizeRequest {
    /// Returns `true` when the request is older than `max_age` at `now`.
    pub fn is_expired_at(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.created_at
            .checked_add_signed(max_age)
            .is_some_and(|deadline| now > deadline)
    }
}

// ---------------------------------------------------------------------------
// TokenRequestResult
// ---------------------------------------------------------------------------

/// Raw token endpoint response.
///
/// Transient: transformed into [`LocalState`] fields as soon as it has been
/// validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequestResult {
    /// The issued access token.
    pub access_token: String,

    /// Lifetime of the access token in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Identity token, present for `openid` requests and some refreshes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Refresh token, when issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type; `Bearer` when the provider omits it.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Granted scopes, when they differ from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenRequestResult {
    /// Absolute access token expiration computed from `expires_in`.
    pub fn expiration_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.and_then(|secs| {
            let secs = i64::try_from(secs).ok()?;
            now.checked_add_signed(Duration::try_seconds(secs)?)
        })
    }
}

// ---------------------------------------------------------------------------
// LocalState
// ---------------------------------------------------------------------------

/// The persisted client state.
///
/// Owned by the [`StateStore`](super::store::StateStore); mutated only
/// through its patch/update operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalState {
    /// Current access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Expiration of [`Self::access_token`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expiration: Option<DateTime<Utc>>,

    /// Current identity token (compact serialization).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,

    /// Claims of [`Self::identity_token`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_identity_token: Option<DecodedIdentityToken>,

    /// Current refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// `session_state` from the last callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,

    /// Verifier of the most recently started flow, while it is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,

    /// State of the most recently started flow, while it is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_state: Option<String>,

    /// Nonce of the most recently started flow, while it is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Every unanswered authorize request, keyed by `state`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_requests: BTreeMap<String, PendingAuthorizeRequest>,
}

impl LocalState {
    /// Returns `true` when an access token is present and not expired at `now`.
    pub fn is_logged_in_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.access_token_expiration) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(expiration)) => now < expiration,
        }
    }

    /// Returns `true` when an access token is present and not expired.
    pub fn is_logged_in(&self) -> bool {
        self.is_logged_in_at(Utc::now())
    }

    /// Records a newly started flow as pending and in flight.
    pub(crate) fn begin_flow(&mut self, pending: PendingAuthorizeRequest) {
        self.code_verifier = Some(pending.code_verifier.clone());
        self.authorize_state = Some(pending.state.clone());
        self.nonce = Some(pending.nonce.clone());
        self.pending_requests.insert(pending.state.clone(), pending);
    }

    /// Removes the pending request for `state`, clearing the in-flight
    /// mirror fields when they belong to it.
    pub(crate) fn remove_pending(&mut self, state: &str) -> Option<PendingAuthorizeRequest> {
        let removed = self.pending_requests.remove(state);
        if self.authorize_state.as_deref() == Some(state) {
            self.code_verifier = None;
            self.authorize_state = None;
            self.nonce = None;
        }
        removed
    }

    /// Drops every pending request older than `max_age`.
    pub(crate) fn purge_expired_pending(&mut self, max_age: Duration, now: DateTime<Utc>) {
        let expired: Vec<String> = self
            .pending_requests
            .values()
            .filter(|p| p.is_expired_at(max_age, now))
            .map(|p| p.state.clone())
            .collect();
        for state in expired {
            self.remove_pending(&state);
        }
    }

    /// Merges every field set in `patch`.
    pub fn apply(&mut self, patch: LocalStatePatch) {
        let LocalStatePatch {
            access_token,
            access_token_expiration,
            identity_token,
            decoded_identity_token,
            refresh_token,
            session_state,
            code_verifier,
            authorize_state,
            nonce,
        } = patch;

        if let Some(v) = access_token {
            self.access_token = Some(v);
        }
        if let Some(v) = access_token_expiration {
            self.access_token_expiration = Some(v);
        }
        if let Some(v) = identity_token {
            self.identity_token = Some(v);
        }
        if let Some(v) = decoded_identity_token {
            self.decoded_identity_token = Some(v);
        }
        if let Some(v) = refresh_token {
            self.refresh_token = Some(v);
        }
        if let Some(v) = session_state {
            self.session_state = Some(v);
        }
        if let Some(v) = code_verifier {
            self.code_verifier = Some(v);
        }
        if let Some(v) = authorize_state {
            self.authorize_state = Some(v);
        }
        if let Some(v) = nonce {
            self.nonce = Some(v);
        }
    }
}

/// Partial update of [`LocalState`].
///
/// Fields left `None` are not touched by [`LocalState::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalStatePatch {
    /// New access token.
    pub access_token: Option<String>,
    /// New access token expiration.
    pub access_token_expiration: Option<DateTime<Utc>>,
    /// New identity token.
    pub identity_token: Option<String>,
    /// Claims of the new identity token.
    pub decoded_identity_token: Option<DecodedIdentityToken>,
    /// New refresh token.
    pub refresh_token: Option<String>,
    /// New session state.
    pub session_state: Option<String>,
    /// In-flight verifier.
    pub code_verifier: Option<String>,
    /// In-flight state.
    pub authorize_state: Option<String>,
    /// In-flight nonce.
    pub nonce: Option<String>,
}
