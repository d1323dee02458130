use disk_core::OAuthClient;
use thiserror::Error;

use super::token_store::{OAuthState, TokenStore, TokenStoreError, now_unix};

const REFRESH_SKEW_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum TokenProviderError {
    #[error("oauth client is required to refresh expired token")]
    MissingOAuthClient,
    #[error("refresh token is missing")]
    MissingRefreshToken,
    #[error("oauth refresh failed: {0}")]
    OAuth(#[from] disk_core::OAuthError),
    #[error("failed to persist refreshed token: {0}")]
    Store(#[from] TokenStoreError),
}

/// Hands out an access token, refreshing it shortly before it expires and
/// writing the refreshed state back to the store.
pub struct TokenProvider {
    state: OAuthState,
    oauth_client: Option<OAuthClient>,
    store: Option<TokenStore>,
}

impl TokenProvider {
    pub fn new(state: OAuthState, oauth_client: Option<OAuthClient>) -> Self {
        Self {
            state,
            oauth_client,
            store: None,
        }
    }

    pub fn with_store(mut self, store: TokenStore) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn valid_access_token(&mut self) -> Result<String, TokenProviderError> {
        if self.should_refresh() {
            self.refresh().await?;
        }
        Ok(self.state.access_token.clone())
    }

    /// Refreshes regardless of the recorded expiry, e.g. after a 401.
    pub async fn refresh_now(&mut self) -> Result<String, TokenProviderError> {
        self.refresh().await?;
        Ok(self.state.access_token.clone())
    }

    pub fn state(&self) -> &OAuthState {
        &self.state
    }

    fn should_refresh(&self) -> bool {
        let Some(expires_at) = self.state.expires_at else {
            return false;
        };
        expires_at <= now_unix().saturating_add(REFRESH_SKEW_SECS)
    }

    async fn refresh(&mut self) -> Result<(), TokenProviderError> {
        let refresh_token = self
            .state
            .refresh_token
            .clone()
            .ok_or(TokenProviderError::MissingRefreshToken)?;
        let client = self
            .oauth_client
            .as_ref()
            .ok_or(TokenProviderError::MissingOAuthClient)?;
        let token = client
            .refresh_token(&refresh_token, self.state.scope.as_deref())
            .await?;

        let mut refreshed = OAuthState::from_oauth_token(&token);
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        if refreshed.scope.is_none() {
            refreshed.scope = self.state.scope.clone();
        }
        self.state = refreshed;
        tracing::info!("access token refreshed");

        if let Some(store) = &self.store {
            store.save(&self.state).await?;
        }
        Ok(())
    }
}
