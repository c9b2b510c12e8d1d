//! Remote file descriptors
//!
//! A [`FileDescriptor`] is the metadata record the drive returns for a file
//! or folder. Field names follow the Drive v2 JSON representation so the
//! HTTP client can deserialize responses directly.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

/// MIME type the drive uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Prefix shared by drive-native document types (docs, sheets, slides, ...)
pub const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps.";

/// Trash / visibility flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub hidden: bool,
}

/// Reference to one of the folders containing a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    pub id: String,
    #[serde(default)]
    pub is_root: bool,
}

/// Metadata for one remote file or folder
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Remote identifier, also the cache file name
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub mime_type: String,
    /// Size in bytes; the drive encodes it as a decimal string and omits it
    /// for folders and native documents
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub file_size: Option<u64>,
    pub created_date: Option<String>,
    pub modified_date: Option<String>,
    pub last_viewed_by_me_date: Option<String>,
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub parents: Vec<ParentReference>,
    pub alternate_link: Option<String>,
    pub download_url: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub owner_names: Vec<String>,
}

impl FileDescriptor {
    /// True for folders
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// True for drive-native documents that have no downloadable binary
    pub fn is_native_document(&self) -> bool {
        !self.is_folder() && self.mime_type.starts_with(NATIVE_MIME_PREFIX)
    }

    /// Entries in the trash or marked hidden are not exposed
    pub fn is_visible(&self) -> bool {
        !(self.labels.trashed || self.labels.hidden)
    }

    pub fn has_parent(&self, parent_id: &str) -> bool {
        self.parents.iter().any(|p| p.id == parent_id)
    }

    /// Desktop-entry link standing in for a native document.
    pub fn shortcut_payload(&self) -> String {
        format!(
            "[Desktop Entry]\nIcon={}\nName={}\nType=Link\nURL={}\n",
            self.mime_type.replace('/', "-"),
            self.title,
            self.alternate_link.as_deref().unwrap_or_default()
        )
    }
}
