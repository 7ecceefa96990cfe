/*!
Command handlers for the CLI

Each handler builds what it needs from the loaded [`Config`]:

- `session`: commands that talk to the provider (`login`, `callback`, `refresh`, ...)
- `inspect`: offline and read-only commands (`status`, `decode`, `discover`)

Session state lives in the OS keyring unless `--memory` or
`storage.backend: memory` is set, so a flow started by `authorize-url` can
be completed by a later `callback` invocation.
*/

use std::sync::Arc;

use crate::config::{Config, StorageBackend, StorageConfig};
use crate::error::Result;
use crate::oidc::client::OidcClient;
use crate::oidc::discovery;
use crate::oidc::frame::loopback::LoopbackFrameFactory;
use crate::oidc::keyring_store::KeyringPersistence;
use crate::oidc::store::{MemoryPersistence, StatePersistence, StateStore};

pub mod inspect;
pub mod session;

/// Builds an [`OidcClient`] for `config`.
///
/// Runs discovery when endpoints are missing and an `authority` is set,
/// validates the result, opens the configured state store and fetches the
/// JWK set when one is configured.
///
/// # Arguments
///
/// * `config` - Loaded configuration (consumed)
/// * `redirect_uri` - Redirect URI the loopback frame listens on
/// * `open_browser` - Launch the system browser for navigations
///
/// # Errors
///
/// Returns discovery, configuration and persistence errors.
pub async fn build_client(
    mut config: Config,
    redirect_uri: Option<&str>,
    open_browser: bool,
) -> Result<OidcClient> {
    if config.auth.needs_discovery() {
        if let Some(authority) = config.auth.authority.clone() {
            tracing::info!(%authority, "Discovering provider endpoints");
            let metadata =
                discovery::fetch_provider_metadata(&reqwest::Client::new(), &authority).await?;
            config.auth.apply_discovery(&metadata);
        }
    }
    config.auth.validate()?;

    let store = Arc::new(StateStore::load(open_persistence(&config.storage)).await?);

    let frame_redirect = redirect_uri.unwrap_or(&config.auth.redirect_uri).to_string();
    let frames = Arc::new(LoopbackFrameFactory::new(&frame_redirect, open_browser)?);

    let client = OidcClient::new(config.auth, store, frames)?;
    client.load_jwks().await?;
    Ok(client)
}

/// Opens the configured session state backend.
pub fn open_persistence(storage: &StorageConfig) -> Arc<dyn StatePersistence> {
    match storage.backend {
        StorageBackend::Keyring => Arc::new(KeyringPersistence::new(&storage.account)),
        StorageBackend::Memory => Arc::new(MemoryPersistence::new()),
    }
}
