use std::io::Write;

use disk_core::{OAuthClient, OAuthToken};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// Scope requested for a new authorization.
pub const DISK_SCOPE: &str = "cloud_api:disk.read cloud_api:disk.write cloud_api:disk.app_folder";

#[derive(Debug, Error)]
pub enum AuthFlowError {
    #[error("oauth error: {0}")]
    OAuth(#[from] disk_core::OAuthError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("verification code was empty")]
    MissingCode,
}

/// Terminal authorization-code flow: print the authorize URL, read the code
/// the provider shows after sign-in, exchange it for a token.
pub async fn authenticate(client: &OAuthClient) -> Result<OAuthToken, AuthFlowError> {
    let url = client.authorize_url(Some(DISK_SCOPE))?;
    println!("Open this URL in your browser:\n{url}");
    print!("Enter the verification code: ");
    std::io::stdout().flush()?;

    let code = read_code(BufReader::new(tokio::io::stdin())).await?;
    Ok(client.exchange_code(&code).await?)
}

async fn read_code<R: AsyncBufRead + Unpin>(mut reader: R) -> Result<String, AuthFlowError> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let code = line.trim();
    if code.is_empty() {
        return Err(AuthFlowError::MissingCode);
    }
    Ok(code.to_string())
}
