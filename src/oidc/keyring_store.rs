//! OIDC state persistence via OS keyring
//!
//! Stores the whole [`LocalState`] as one JSON secret in the operating
//! system's credential store (Keychain on macOS, Secret Service on Linux,
//! Windows Credential Manager on Windows), so tokens and pending authorize
//! requests survive a restart of the CLI between `authorize-url` and
//! `callback`.

use async_trait::async_trait;

use crate::error::{OidcError, Result};
use crate::oidc::models::LocalState;
use crate::oidc::store::StatePersistence;

/// [`StatePersistence`] backed by one keyring entry per account.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use simple_oidc::oidc::keyring_store::KeyringPersistence;
/// use simple_oidc::oidc::store::StateStore;
///
/// # async fn example() -> simple_oidc::error::Result<()> {
/// let store = StateStore::load(Arc::new(KeyringPersistence::new("work"))).await?;
/// println!("logged in: {}", store.get_state().is_logged_in());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct KeyringPersistence {
    account: String,
}

impl KeyringPersistence {
    /// Creates an accessor for the entry of `account`.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    /// Builds the keyring service name for `account`.
    ///
    /// The `simple-oidc-` prefix keeps entries apart from other
    /// applications using the same keyring.
    fn service_name(account: &str) -> String {
        format!("simple-oidc-{}", account)
    }

    fn entry(&self) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(
            &Self::service_name(&self.account),
            &self.account,
        )?)
    }
}

#[async_trait]
impl StatePersistence for KeyringPersistence {
    async fn read(&self) -> Result<Option<LocalState>> {
        match self.entry()?.get_password() {
            Ok(json_str) => {
                let state: LocalState = serde_json::from_str(&json_str).map_err(|e| {
                    OidcError::Persistence(format!("stored state is not valid JSON: {e}"))
                })?;
                Ok(Some(state))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, state: &LocalState) -> Result<()> {
        let json_str = serde_json::to_string(state)?;
        self.entry()?.set_password(&json_str)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
