//! Wire types crossing the host/content boundary.
//!
//! Events flow from the update engine to the hosted console, commands flow
//! back. Each kind has a fixed channel name and payload shape.

use serde::{Deserialize, Serialize};

/// Metadata describing a release, as reported by the update engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub version: String,
    pub current_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

impl UpdateInfo {
    /// Info describing the running build (used when no update exists).
    pub fn current() -> Self {
        let version = env!("CARGO_PKG_VERSION").to_string();
        Self {
            current_version: version.clone(),
            version,
            release_date: None,
            release_notes: None,
        }
    }
}

/// Raw progress sample from the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub percent: f64,
    pub bytes_per_second: u64,
    pub transferred: u64,
    pub total: u64,
}

/// Progress as the console sees it: whole percent, byte counters untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub percent: i64,
    pub bytes_per_second: u64,
    pub transferred: u64,
    pub total: u64,
}

impl From<DownloadProgress> for ProgressPayload {
    fn from(p: DownloadProgress) -> Self {
        Self {
            // `as` truncates toward zero and maps NaN to 0
            percent: p.percent as i64,
            bytes_per_second: p.bytes_per_second,
            transferred: p.transferred,
            total: p.total,
        }
    }
}

/// Lifecycle event emitted by the update engine.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    CheckingForUpdate,
    UpdateAvailable(UpdateInfo),
    UpdateNotAvailable(Option<UpdateInfo>),
    DownloadProgress(DownloadProgress),
    UpdateDownloaded(UpdateInfo),
    UpdateError(String),
}

pub const CHECKING_FOR_UPDATE: &str = "checking-for-update";
pub const UPDATE_AVAILABLE: &str = "update-available";
pub const UPDATE_NOT_AVAILABLE: &str = "update-not-available";
pub const DOWNLOAD_PROGRESS: &str = "download-progress";
pub const UPDATE_DOWNLOADED: &str = "update-downloaded";
pub const UPDATE_ERROR: &str = "update-error";

/// A message ready to be emitted into the hosted content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentMessage {
    pub channel: &'static str,
    pub payload: serde_json::Value,
}

impl UpdateEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            UpdateEvent::CheckingForUpdate => CHECKING_FOR_UPDATE,
            UpdateEvent::UpdateAvailable(_) => UPDATE_AVAILABLE,
            UpdateEvent::UpdateNotAvailable(_) => UPDATE_NOT_AVAILABLE,
            UpdateEvent::DownloadProgress(_) => DOWNLOAD_PROGRESS,
            UpdateEvent::UpdateDownloaded(_) => UPDATE_DOWNLOADED,
            UpdateEvent::UpdateError(_) => UPDATE_ERROR,
        }
    }

    pub fn to_message(&self) -> Result<ContentMessage, serde_json::Error> {
        let payload = match self {
            UpdateEvent::CheckingForUpdate => serde_json::Value::Null,
            UpdateEvent::UpdateAvailable(info) | UpdateEvent::UpdateDownloaded(info) => {
                serde_json::to_value(info)?
            }
            UpdateEvent::UpdateNotAvailable(info) => serde_json::to_value(info)?,
            UpdateEvent::DownloadProgress(progress) => {
                serde_json::to_value(ProgressPayload::from(*progress))?
            }
            UpdateEvent::UpdateError(message) => serde_json::Value::String(message.clone()),
        };
        Ok(ContentMessage {
            channel: self.channel(),
            payload,
        })
    }
}

/// Command issued by the hosted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateCommand {
    CheckForUpdates,
    StartDownloadUpdate,
    InstallUpdate,
}

impl UpdateCommand {
    pub fn channel(self) -> &'static str {
        match self {
            UpdateCommand::CheckForUpdates => "check-for-updates",
            UpdateCommand::StartDownloadUpdate => "start-download-update",
            UpdateCommand::InstallUpdate => "install-update",
        }
    }
}
