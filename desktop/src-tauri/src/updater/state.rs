use serde::Serialize;

use super::event::{UpdateCommand, UpdateEvent};

/// Where the update lifecycle currently stands.
///
/// Transitions are permissive: every event moves to the state it implies,
/// whatever the previous state was. The engine owns operation ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateState {
    #[default]
    Idle,
    Checking,
    Available,
    NotAvailable,
    Downloading,
    Downloaded,
    Installing,
    Error,
}

impl UpdateState {
    pub fn on_event(self, event: &UpdateEvent) -> UpdateState {
        match event {
            UpdateEvent::CheckingForUpdate => UpdateState::Checking,
            UpdateEvent::UpdateAvailable(_) => UpdateState::Available,
            UpdateEvent::UpdateNotAvailable(_) => UpdateState::NotAvailable,
            UpdateEvent::DownloadProgress(_) => UpdateState::Downloading,
            UpdateEvent::UpdateDownloaded(_) => UpdateState::Downloaded,
            UpdateEvent::UpdateError(_) => UpdateState::Error,
        }
    }

    /// Only installing is observable from the command side; check and
    /// download report their progress through events.
    pub fn on_command(self, command: UpdateCommand) -> UpdateState {
        match command {
            UpdateCommand::InstallUpdate => UpdateState::Installing,
            UpdateCommand::CheckForUpdates | UpdateCommand::StartDownloadUpdate => self,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == UpdateState::Installing
    }
}
