mod flow;
mod token_provider;
mod token_store;

use anyhow::Context;
use disk_core::{ApiErrorClass, DiskClient, DiskInfo, OAuthClient};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub use flow::{AuthFlowError, DISK_SCOPE, authenticate};
pub use token_provider::{TokenProvider, TokenProviderError};
pub use token_store::{OAuthState, TokenStore, TokenStoreError};

use crate::settings::Settings;

/// Returns an access token that the disk API currently accepts.
///
/// `FTPVAULT_TOKEN` is used as-is. Otherwise the stored OAuth state is loaded
/// (or obtained interactively when there is none), refreshed when needed,
/// checked against the disk info endpoint and written back.
pub async fn resolve_access_token(settings: &Settings) -> anyhow::Result<String> {
    if let Some(token) = settings.disk.access_token.clone() {
        tracing::debug!("using access token from environment");
        return Ok(token);
    }

    let store = TokenStore::new(&settings.token_store_dir());
    let oauth_client = oauth_client(settings)?;
    let state = match store
        .load()
        .await
        .with_context(|| format!("failed to read {}", store.path().display()))?
    {
        Some(state) => state,
        None => {
            let client = oauth_client
                .as_ref()
                .context("no stored token and no clientId/clientSecret to authorize with")?;
            let token = authenticate(client).await.context("authorization failed")?;
            let state = OAuthState::from_oauth_token(&token);
            store.save(&state).await.context("failed to save token")?;
            state
        }
    };

    let mut provider = TokenProvider::new(state, oauth_client).with_store(store.clone());
    let info = fetch_disk_info_with_retry(&mut provider, settings)
        .await
        .context("failed to verify access token")?;
    store
        .save(provider.state())
        .await
        .context("failed to persist oauth state")?;

    tracing::info!(
        used_bytes = info.used_space,
        total_bytes = info.total_space,
        expires = %format_expiry(provider.state().expires_at),
        "disk authorized"
    );
    Ok(provider.state().access_token.clone())
}

pub fn disk_client(settings: &Settings, token: &str) -> Result<DiskClient, disk_core::DiskError> {
    match settings.disk.api_base_url.as_deref() {
        Some(url) => DiskClient::with_base_url(url, token),
        None => DiskClient::new(token),
    }
}

fn oauth_client(settings: &Settings) -> anyhow::Result<Option<OAuthClient>> {
    let (Some(client_id), Some(client_secret)) = (
        settings.disk.client_id.as_deref(),
        settings.disk.client_secret.as_deref(),
    ) else {
        return Ok(None);
    };
    let client = match settings.disk.oauth_base_url.as_deref() {
        Some(url) => OAuthClient::with_base_url(url, client_id, client_secret),
        None => OAuthClient::new(client_id, client_secret),
    }
    .context("invalid oauth configuration")?;
    Ok(Some(client))
}

async fn fetch_disk_info_with_retry(
    provider: &mut TokenProvider,
    settings: &Settings,
) -> anyhow::Result<DiskInfo> {
    let token = provider
        .valid_access_token()
        .await
        .context("failed to resolve valid access token")?;
    match disk_client(settings, &token)?.get_disk_info().await {
        Ok(info) => Ok(info),
        Err(err) if err.classification() == Some(ApiErrorClass::Auth) => {
            tracing::info!("access token rejected, refreshing");
            let refreshed = provider
                .refresh_now()
                .await
                .context("failed to refresh token after 401")?;
            Ok(disk_client(settings, &refreshed)?.get_disk_info().await?)
        }
        Err(err) => Err(err.into()),
    }
}

fn format_expiry(expires_at: Option<i64>) -> String {
    expires_at
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| "never".to_string())
}
