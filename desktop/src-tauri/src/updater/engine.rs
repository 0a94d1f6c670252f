//! Update engine backed by the Tauri updater plugin.
//!
//! Each operation is spawned onto the async runtime; outcomes are reported
//! on the event channel, never through the return value.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tauri::{AppHandle, Runtime};
use tauri_plugin_updater::{Update, UpdaterExt};
use tokio::sync::mpsc;
use url::Url;

use super::event::{DownloadProgress, UpdateEvent, UpdateInfo};
use super::{UpdateEngine, UpdaterError};

/// Local update feed used by unpackaged builds (`dev-app-update.yml`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevUpdateConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub pubkey: Option<String>,
}

impl DevUpdateConfig {
    pub fn load(path: &Path) -> Result<Self, UpdaterError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            UpdaterError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
            .map_err(|e| UpdaterError::Config(format!("Invalid {}: {}", path.display(), e)))
    }

    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// `url` first, then `endpoints`, in file order.
    pub fn endpoint_urls(&self) -> Result<Vec<Url>, UpdaterError> {
        let urls = self
            .url
            .iter()
            .chain(self.endpoints.iter())
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| UpdaterError::Config(format!("Invalid endpoint {}: {}", raw, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if urls.is_empty() {
            return Err(UpdaterError::Config(
                "dev update config has no url or endpoints".to_string(),
            ));
        }
        Ok(urls)
    }
}

/// Builds a progress sample from cumulative counters. `total` is 0 when the
/// server did not announce a length.
pub fn progress_sample(transferred: u64, total: u64, elapsed: Duration) -> DownloadProgress {
    let percent = if total > 0 {
        transferred as f64 * 100.0 / total as f64
    } else {
        0.0
    };
    let secs = elapsed.as_secs_f64();
    let bytes_per_second = if secs > 0.0 {
        (transferred as f64 / secs) as u64
    } else {
        transferred
    };
    DownloadProgress {
        percent,
        bytes_per_second,
        transferred,
        total,
    }
}

fn update_info(update: &Update) -> UpdateInfo {
    UpdateInfo {
        version: update.version.clone(),
        current_version: update.current_version.clone(),
        release_date: update
            .raw_json
            .get("pub_date")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        release_notes: update.body.clone(),
    }
}

/// A downloadable release, identified by its version.
trait Release: Clone {
    fn version(&self) -> &str;
}

impl Release for Update {
    fn version(&self) -> &str {
        &self.version
    }
}

/// What the engine holds between operations.
enum Pending<U> {
    None,
    Available(U),
    Downloading(U),
    Downloaded(U, Vec<u8>),
}

impl<U: Release> Pending<U> {
    fn version(&self) -> Option<&str> {
        match self {
            Pending::None => None,
            Pending::Available(u) | Pending::Downloading(u) | Pending::Downloaded(u, _) => {
                Some(u.version())
            }
        }
    }

    fn is_downloading(&self, version: &str) -> bool {
        matches!(self, Pending::Downloading(current) if current.version() == version)
    }

    /// A check found `update`. Work already done for the same version is
    /// kept; a different version replaces it. Returns true when the bytes
    /// for this version are already downloaded.
    fn checked(&mut self, update: U) -> bool {
        if self.version() != Some(update.version()) {
            *self = Pending::Available(update);
        }
        matches!(self, Pending::Downloaded(..))
    }

    /// Claims the update for downloading. `Ok(None)` while a download is
    /// already running.
    fn start_download(&mut self) -> Result<Option<U>, UpdaterError> {
        match std::mem::replace(self, Pending::None) {
            Pending::Available(update) | Pending::Downloaded(update, _) => {
                *self = Pending::Downloading(update.clone());
                Ok(Some(update))
            }
            running @ Pending::Downloading(_) => {
                *self = running;
                Ok(None)
            }
            Pending::None => Err(UpdaterError::Download(
                "no update available to download".to_string(),
            )),
        }
    }

    /// Stores the bytes unless a newer check replaced the update meanwhile.
    fn download_finished(&mut self, update: U, bytes: Vec<u8>) -> bool {
        let current = self.is_downloading(update.version());
        if current {
            *self = Pending::Downloaded(update, bytes);
        }
        current
    }

    fn download_failed(&mut self, update: U) {
        if self.is_downloading(update.version()) {
            *self = Pending::Available(update);
        }
    }

    fn take_downloaded(&mut self) -> Result<(U, Vec<u8>), UpdaterError> {
        match std::mem::replace(self, Pending::None) {
            Pending::Downloaded(update, bytes) => Ok((update, bytes)),
            other => {
                *self = other;
                Err(UpdaterError::Install(
                    "no downloaded update to install".to_string(),
                ))
            }
        }
    }
}

struct Shared<R: Runtime> {
    app: AppHandle<R>,
    events: mpsc::UnboundedSender<UpdateEvent>,
    pending: Mutex<Pending<Update>>,
}

impl<R: Runtime> Shared<R> {
    fn emit(&self, event: UpdateEvent) {
        if self.events.send(event).is_err() {
            log::warn!("[updater] Relay stopped, event dropped");
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending<Update>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn check(&self, dev_config: Option<&Path>) -> Result<Option<Update>, UpdaterError> {
        let mut builder = self.app.updater_builder();
        if let Some(path) = dev_config {
            let config = DevUpdateConfig::load(path)?;
            builder = builder
                .endpoints(config.endpoint_urls()?)
                .map_err(|e| UpdaterError::Config(format!("Invalid dev endpoints: {}", e)))?;
            if let Some(pubkey) = config.pubkey.filter(|k| !k.is_empty()) {
                builder = builder.pubkey(pubkey);
            }
        }
        let updater = builder
            .build()
            .map_err(|e| UpdaterError::Check(format!("Failed to build updater: {}", e)))?;
        updater
            .check()
            .await
            .map_err(|e| UpdaterError::Check(format!("Update check failed: {}", e)))
    }

    async fn download(&self, update: Update) {
        log::info!("[updater] Downloading update v{}", update.version);
        let started = Instant::now();
        let mut transferred: u64 = 0;
        let result = update
            .download(
                |chunk, content_length| {
                    transferred += chunk as u64;
                    let total = content_length.unwrap_or(0);
                    self.emit(UpdateEvent::DownloadProgress(progress_sample(
                        transferred,
                        total,
                        started.elapsed(),
                    )));
                },
                || log::info!("[updater] Download finished"),
            )
            .await;

        match result {
            Ok(bytes) => {
                let info = update_info(&update);
                if self.pending().download_finished(update, bytes) {
                    self.emit(UpdateEvent::UpdateDownloaded(info));
                } else {
                    log::info!("[updater] v{} superseded, download discarded", info.version);
                }
            }
            Err(e) => {
                log::warn!("[updater] Download failed: {}", e);
                self.pending().download_failed(update);
                self.emit(UpdateEvent::UpdateError(format!(
                    "Update download failed: {}",
                    e
                )));
            }
        }
    }

    async fn start_download(&self) {
        // The guard must be released before awaiting the download.
        let claimed = self.pending().start_download();
        match claimed {
            Ok(Some(update)) => self.download(update).await,
            Ok(None) => log::info!("[updater] Download already in progress"),
            Err(e) => self.emit(UpdateEvent::UpdateError(e.to_string())),
        }
    }
}

pub struct PluginEngine<R: Runtime> {
    shared: Arc<Shared<R>>,
    auto_download: bool,
    config_path: Option<PathBuf>,
    force_dev_config: bool,
}

impl<R: Runtime> PluginEngine<R> {
    pub fn new(app: AppHandle<R>, events: mpsc::UnboundedSender<UpdateEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                app,
                events,
                pending: Mutex::new(Pending::None),
            }),
            auto_download: false,
            config_path: None,
            force_dev_config: false,
        }
    }

    fn dev_config(&self) -> Option<PathBuf> {
        if self.force_dev_config {
            self.config_path.clone()
        } else {
            None
        }
    }
}

impl<R: Runtime> UpdateEngine for PluginEngine<R> {
    fn set_auto_download(&mut self, enabled: bool) {
        self.auto_download = enabled;
    }

    fn set_update_config_path(&mut self, path: PathBuf) {
        self.config_path = Some(path);
    }

    fn force_dev_update_config(&mut self, force: bool) {
        self.force_dev_config = force;
    }

    fn check_for_updates(&self) -> Result<(), UpdaterError> {
        let shared = self.shared.clone();
        let dev_config = self.dev_config();
        let auto_download = self.auto_download;

        tauri::async_runtime::spawn(async move {
            shared.emit(UpdateEvent::CheckingForUpdate);
            match shared.check(dev_config.as_deref()).await {
                Ok(Some(update)) => {
                    let info = update_info(&update);
                    log::info!("[updater] Update available: v{}", info.version);
                    let downloaded = shared.pending().checked(update);
                    shared.emit(UpdateEvent::UpdateAvailable(info.clone()));
                    if downloaded {
                        log::info!("[updater] v{} already downloaded", info.version);
                        shared.emit(UpdateEvent::UpdateDownloaded(info));
                    } else if auto_download {
                        shared.start_download().await;
                    }
                }
                Ok(None) => {
                    log::info!("[updater] App is up to date");
                    shared.emit(UpdateEvent::UpdateNotAvailable(Some(UpdateInfo::current())));
                }
                Err(e) => {
                    log::warn!("[updater] {}", e);
                    shared.emit(UpdateEvent::UpdateError(e.to_string()));
                }
            }
        });
        Ok(())
    }

    fn download_update(&self) -> Result<(), UpdaterError> {
        let Some(update) = self.shared.pending().start_download()? else {
            log::info!("[updater] Download already in progress");
            return Ok(());
        };
        let shared = self.shared.clone();
        tauri::async_runtime::spawn(async move { shared.download(update).await });
        Ok(())
    }

    fn quit_and_install(&self) -> Result<(), UpdaterError> {
        let (update, bytes) = self.shared.pending().take_downloaded()?;

        let shared = self.shared.clone();
        tauri::async_runtime::spawn_blocking(move || {
            log::info!("[updater] Installing update v{}", update.version);
            match update.install(&bytes) {
                Ok(()) => {
                    log::info!("[updater] Update installed, restarting");
                    shared.app.restart();
                }
                Err(e) => {
                    log::error!("[updater] Install failed: {}", e);
                    *shared.pending() = Pending::Downloaded(update, bytes);
                    shared.emit(UpdateEvent::UpdateError(format!(
                        "Failed to install update: {}",
                        e
                    )));
                }
            }
        });
        Ok(())
    }
}
