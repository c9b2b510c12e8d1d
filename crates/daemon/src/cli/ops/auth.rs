use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use common::{DriveRemote, OAuthClient, RemoteError};
use drivefs_daemon::state::{AppState, StateError};

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Auth {
    /// Authorize again even if a refresh token is already stored
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug)]
pub struct AuthOutput {
    pub config_path: PathBuf,
    pub root_folder_id: String,
}

impl fmt::Display for AuthOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "Authorized".green().bold())?;
        writeln!(f, "  {} {}", "root folder:".dimmed(), self.root_folder_id)?;
        write!(f, "  {} {}", "config:".dimmed(), self.config_path.display())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no OAuth client credentials; pass --client-id and --client-secret or set them in the config file")]
    MissingCredentials,
    #[error("no authorization code entered")]
    EmptyCode,
    #[error("the token endpoint returned no refresh token")]
    NoRefreshToken,
}

#[async_trait::async_trait]
impl Op for Auth {
    type Error = AuthError;
    type Output = AuthOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let mut state = AppState::init(ctx.config_path.clone())?;
        if self.force {
            state.config.refresh_token = None;
        }
        let remote = connect(&mut state, ctx).await?;

        Ok(AuthOutput {
            config_path: state.config_path,
            root_folder_id: remote.root_folder_id().to_string(),
        })
    }
}

/// Connect to the drive, running the interactive handshake first when no
/// refresh token is stored
pub async fn connect(state: &mut AppState, ctx: &OpContext) -> Result<DriveRemote, AuthError> {
    let oauth = oauth_client(state, ctx)?;

    let refresh_token = match state.config.refresh_token.clone() {
        Some(token) => token,
        None => {
            let token = authorize(&oauth).await?;
            state.config.client_id = ctx.client_id.clone().or(state.config.client_id.take());
            state.config.client_secret = ctx
                .client_secret
                .clone()
                .or(state.config.client_secret.take());
            state.config.refresh_token = Some(token.clone());
            state.save()?;
            tracing::info!(path = %state.config_path.display(), "stored refresh token");
            token
        }
    };

    Ok(DriveRemote::connect(oauth, refresh_token).await?)
}

/// Command-line credentials win over the config file
fn oauth_client(state: &AppState, ctx: &OpContext) -> Result<OAuthClient, AuthError> {
    let client_id = ctx.client_id.as_ref().or(state.config.client_id.as_ref());
    let client_secret = ctx
        .client_secret
        .as_ref()
        .or(state.config.client_secret.as_ref());
    match (client_id, client_secret) {
        (Some(id), Some(secret)) => Ok(OAuthClient::new(id.clone(), secret.clone())),
        _ => Err(AuthError::MissingCredentials),
    }
}

/// Ask the user to grant access and trade the pasted code for a refresh token
async fn authorize(oauth: &OAuthClient) -> Result<String, AuthError> {
    let consent_url = oauth.authorization_url()?;
    let mut stderr = tokio::io::stderr();
    stderr
        .write_all(
            format!(
                "Please visit this URL to get an authorization code\n{}\nPaste the authorization code: ",
                consent_url
            )
            .as_bytes(),
        )
        .await?;
    stderr.flush().await?;

    let mut code = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut code).await?;
    let code = code.trim();
    if code.is_empty() {
        return Err(AuthError::EmptyCode);
    }

    let http = reqwest::Client::new();
    let tokens = oauth.exchange_code(&http, code).await?;
    tokens.refresh_token.ok_or(AuthError::NoRefreshToken)
}

impl fmt::Display for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "auth")
    }
}
