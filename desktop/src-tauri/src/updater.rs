//! Auto-updater module
//!
//! Relays the update lifecycle between the update engine and the hosted
//! console: engine events are forwarded into the webview, console commands
//! are forwarded into the engine.

pub mod engine;
pub mod event;
pub mod relay;
pub mod state;

use std::path::PathBuf;

use tauri::State;
use thiserror::Error;

use event::UpdateCommand;
use relay::RelayHandle;
use state::UpdateState;

use crate::window::WindowTarget;

/// Failures of the update engine. All of them end up as `update-error`
/// events in the console, so `Display` is the bare message.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("{0}")]
    Check(String),
    #[error("{0}")]
    Download(String),
    #[error("{0}")]
    Install(String),
    #[error("{0}")]
    Config(String),
}

/// The external update engine. Operations are fire-and-forget: an `Ok`
/// only means the operation was started, its outcome arrives later on the
/// event channel the engine was built with.
pub trait UpdateEngine: Send + 'static {
    fn set_auto_download(&mut self, enabled: bool);
    fn set_update_config_path(&mut self, path: PathBuf);
    fn force_dev_update_config(&mut self, force: bool);
    fn check_for_updates(&self) -> Result<(), UpdaterError>;
    fn download_update(&self) -> Result<(), UpdaterError>;
    /// Starts installing; on success the process restarts.
    fn quit_and_install(&self) -> Result<(), UpdaterError>;
}

pub type AppRelay = RelayHandle<WindowTarget>;

/// IPC command: forward a console command to the updater.
/// Called from the console as `invoke('update_command', { command: 'check-for-updates' })`.
#[tauri::command]
pub fn update_command(command: UpdateCommand, relay: State<'_, AppRelay>) -> Result<(), String> {
    log::info!("[updater] Command from console: {}", command.channel());
    relay
        .command(command)
        .map_err(|e| format!("Update command failed: {}", e))
}

/// IPC command: current update lifecycle state
#[tauri::command]
pub fn get_update_status(relay: State<'_, AppRelay>) -> UpdateState {
    relay.status()
}
