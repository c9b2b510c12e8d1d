//! Google Drive v2 client
//!
//! Implements [`RemoteAccess`] over the drive's REST API with `reqwest`.
//! Access tokens are obtained from the stored refresh token and refreshed
//! shortly before they expire.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use super::auth::{AccessToken, OAuthClient};
use super::descriptor::FileDescriptor;
use super::provider::{ContentStream, ListPage, RemoteAccess, RemoteError};

/// Base URL of the v2 files API (trailing slash required for joins)
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v2/";

/// Largest page size the list endpoint accepts
const MAX_RESULTS: &str = "1000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct About {
    root_folder_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    items: Vec<FileDescriptor>,
    next_page_token: Option<String>,
}

/// Authorized connection to a user's drive
#[derive(Debug)]
pub struct DriveRemote {
    http: reqwest::Client,
    oauth: OAuthClient,
    refresh_token: String,
    base_url: Url,
    token: Mutex<Option<AccessToken>>,
    root_folder_id: String,
    requests: AtomicU64,
}

impl DriveRemote {
    /// Authorize with a stored refresh token and look up the root folder
    pub async fn connect(oauth: OAuthClient, refresh_token: String) -> Result<Self, RemoteError> {
        Self::connect_with_base(oauth, refresh_token, Url::parse(DRIVE_API_BASE)?).await
    }

    pub async fn connect_with_base(
        oauth: OAuthClient,
        refresh_token: String,
        base_url: Url,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("drivefs/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut remote = Self {
            http,
            oauth,
            refresh_token,
            base_url,
            token: Mutex::new(None),
            root_folder_id: String::new(),
            requests: AtomicU64::new(0),
        };

        tracing::info!("connecting to drive");
        let about: About = remote.get_json(remote.endpoint("about")?).await?;
        tracing::debug!(root = %about.root_folder_id, "drive connected");
        remote.root_folder_id = about.root_folder_id;
        Ok(remote)
    }

    pub fn root_folder_id(&self) -> &str {
        &self.root_folder_id
    }

    /// Number of API requests issued so far
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        Ok(self.base_url.join(path)?)
    }

    async fn access_token(&self) -> Result<String, RemoteError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.token.clone());
        }

        tracing::debug!("refreshing drive access token");
        let response = self.oauth.refresh(&self.http, &self.refresh_token).await?;
        let token = AccessToken::from_response(&response);
        let value = token.token.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, RemoteError> {
        let token = self.access_token().await?;
        self.requests.fetch_add(1, Ordering::Relaxed);

        let response = self.http.get(url.clone()).bearer_auth(token).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(url.path().to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%url, status = status.as_u16(), "drive request failed");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let body = self.get(url).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl RemoteAccess for DriveRemote {
    async fn list_page(
        &self,
        dir_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        let mut url = self.endpoint("files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("q", &format!("'{}' in parents", dir_id));
            query.append_pair("maxResults", MAX_RESULTS);
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let list: FileList = self.get_json(url).await?;
        Ok(ListPage {
            items: list.items,
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_descriptor(&self, file_id: &str) -> Result<FileDescriptor, RemoteError> {
        tracing::debug!(file_id, "GET file info");
        self.get_json(self.endpoint(&format!("files/{}", file_id))?)
            .await
    }

    async fn get_root_descriptor(&self) -> Result<FileDescriptor, RemoteError> {
        self.get_descriptor(&self.root_folder_id).await
    }

    async fn open_content_stream(
        &self,
        descriptor: &FileDescriptor,
    ) -> Result<ContentStream, RemoteError> {
        let Some(download_url) = descriptor.download_url.as_deref() else {
            return Err(RemoteError::NotDownloadable(descriptor.id.clone()));
        };

        tracing::debug!(file_id = %descriptor.id, "downloading");
        let response = self.get(Url::parse(download_url)?).await?;
        Ok(Box::pin(response.bytes_stream().map_err(RemoteError::from)))
    }
}
