use std::fmt;

use chrono::{DateTime, Local};
use clap::Args;
use owo_colors::OwoColorize;

use common::{FileDescriptor, RemoteAccess};
use drivefs_daemon::state::AppState;

use crate::cli::op::{Op, OpContext};
use crate::cli::ops::auth::{connect, AuthError};

#[derive(Args, Debug, Clone)]
pub struct Info {
    /// Remote file id; the root folder when omitted
    pub file_id: Option<String>,
}

/// Labelled metadata lines, empty values already dropped
#[derive(Debug)]
pub struct InfoOutput {
    pub fields: Vec<(&'static str, String)>,
}

impl InfoOutput {
    pub fn from_descriptor(desc: &FileDescriptor) -> Self {
        let date = |value: &Option<String>| value.as_deref().map(iso_date_to_local);
        let candidates = [
            ("Id", Some(desc.id.clone())),
            ("Title", Some(desc.title.clone())),
            ("Description", desc.description.clone()),
            ("Size", desc.file_size.map(file_size_format)),
            ("Created", date(&desc.created_date)),
            ("Modified", date(&desc.modified_date)),
            ("Accessed", date(&desc.last_viewed_by_me_date)),
            ("Owner", Some(desc.owner_names.join(", "))),
            ("Md5sum", desc.md5_checksum.clone()),
            ("Mime-type", Some(desc.mime_type.clone())),
            (
                "Parents",
                Some(
                    desc.parents
                        .iter()
                        .map(|p| p.id.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
            ),
        ];

        Self {
            fields: candidates
                .into_iter()
                .filter_map(|(label, value)| value.filter(|v| !v.is_empty()).map(|v| (label, v)))
                .collect(),
        }
    }
}

impl fmt::Display for InfoOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (label, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{} {}", format!("{}:", label).bold(), value)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InfoError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("remote error: {0}")]
    Remote(#[from] common::RemoteError),
}

#[async_trait::async_trait]
impl Op for Info {
    type Error = InfoError;
    type Output = InfoOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let mut state = AppState::load(ctx.config_path.clone()).map_err(AuthError::from)?;
        let remote = connect(&mut state, ctx).await?;

        let desc = match &self.file_id {
            Some(id) => remote.get_descriptor(id).await?,
            None => remote.get_root_descriptor().await?,
        };
        Ok(InfoOutput::from_descriptor(&desc))
    }
}

/// Render an RFC 3339 timestamp in local time; unparseable input is returned as is
pub fn iso_date_to_local(iso: &str) -> String {
    match DateTime::parse_from_rfc3339(iso) {
        Ok(t) => t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => iso.to_string(),
    }
}

/// Decimal (1000-based) size with a whole-number value
pub fn file_size_format(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    let mut value = bytes;
    let mut unit = 0;
    while value > 1000 && unit < UNITS.len() - 1 {
        value /= 1000;
        unit += 1;
    }
    format!("{} {}", value, UNITS[unit])
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "info")
    }
}
