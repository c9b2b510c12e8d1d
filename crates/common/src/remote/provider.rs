use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use super::descriptor::FileDescriptor;

/// Byte stream of a remote file's content
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<Bytes, RemoteError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode remote response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("file {0} is not downloadable")]
    NotDownloadable(String),
    #[error("remote file not found: {0}")]
    NotFound(String),
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("content stream interrupted: {0}")]
    Interrupted(String),
    #[error("invalid remote url: {0}")]
    Url(#[from] url::ParseError),
}

/// One page of a directory listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<FileDescriptor>,
    /// Continuation token, `None` on the last page
    pub next_page_token: Option<String>,
}

/// Capabilities the filesystem needs from a remote drive
#[async_trait]
pub trait RemoteAccess: Send + Sync + std::fmt::Debug {
    /// Fetch a single page of the children of `dir_id`
    ///
    /// # Arguments
    /// * `dir_id` - Remote identifier of the folder
    /// * `page_token` - Continuation token from the previous page, `None` for the first
    async fn list_page(
        &self,
        dir_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError>;

    /// List every child of `dir_id`, following continuation tokens until exhausted
    async fn list_children(&self, dir_id: &str) -> Result<Vec<FileDescriptor>, RemoteError> {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(dir_id, token.as_deref()).await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        tracing::debug!(dir_id, count = items.len(), "listed remote directory");
        Ok(items)
    }

    async fn get_descriptor(&self, file_id: &str) -> Result<FileDescriptor, RemoteError>;

    async fn get_root_descriptor(&self) -> Result<FileDescriptor, RemoteError>;

    /// Open a stream over the file's content
    ///
    /// Fails with [`RemoteError::NotDownloadable`] when the descriptor has no
    /// content location.
    async fn open_content_stream(
        &self,
        descriptor: &FileDescriptor,
    ) -> Result<ContentStream, RemoteError>;
}
