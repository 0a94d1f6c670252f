//! Main window host
//!
//! Builds the single console window: hidden until the first page load
//! finishes, CSP applied through the response hook and the bridge script,
//! new-window requests sent to the system browser.

use tauri::webview::{NewWindowResponse, PageLoadEvent};
use tauri::{
    AppHandle, Emitter, EventTarget, Manager, Runtime, WebviewUrl, WebviewWindow,
    WebviewWindowBuilder,
};
use tauri_plugin_shell::ShellExt;
use thiserror::Error;
use url::Url;

use crate::config::{self, MAIN_WINDOW_LABEL, WINDOW_HEIGHT, WINDOW_TITLE, WINDOW_WIDTH};
use crate::csp;
use crate::updater::event::ContentMessage;
use crate::updater::relay::{RelayTarget, TargetUnavailable};

/// `window.api` for the hosted console, injected on every page load.
const BRIDGE_SCRIPT: &str = include_str!("bridge.js");
const POLICY_PLACEHOLDER: &str = "__CSP_POLICY__";

/// Bridge script with the CSP inlined as a JS string literal.
fn bridge_script() -> String {
    let policy = serde_json::Value::from(csp::POLICY).to_string();
    BRIDGE_SCRIPT.replace(POLICY_PLACEHOLDER, &policy)
}

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("invalid console url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to create window: {0}")]
    Tauri(#[from] tauri::Error),
}

/// Outcome for a content request to open a new top-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewWindowDecision {
    Deny,
}

impl<R: Runtime> From<NewWindowDecision> for NewWindowResponse<R> {
    fn from(decision: NewWindowDecision) -> Self {
        match decision {
            NewWindowDecision::Deny => NewWindowResponse::Deny,
        }
    }
}

pub trait ExternalLinks {
    fn open_external(&self, url: &str) -> Result<(), String>;
}

impl<R: Runtime> ExternalLinks for AppHandle<R> {
    fn open_external(&self, url: &str) -> Result<(), String> {
        #[allow(deprecated)]
        self.shell().open(url, None).map_err(|e| e.to_string())
    }
}

/// New windows never open in-app; the link goes to the system browser.
pub fn handle_new_window<O: ExternalLinks + ?Sized>(opener: &O, url: &Url) -> NewWindowDecision {
    log::info!("[window] Opening {} externally", url);
    if let Err(e) = opener.open_external(url.as_str()) {
        log::warn!("[window] Failed to open {}: {}", url, e);
    }
    NewWindowDecision::Deny
}

/// Create the console window. `on_content_ready` runs after every finished
/// page load, once the window has been shown.
pub fn create_main_window<F>(
    app: &AppHandle,
    on_content_ready: F,
) -> Result<WebviewWindow, WindowError>
where
    F: Fn() + Send + Sync + 'static,
{
    let url = config::console_url()?;
    log::info!("[window] Loading {}", url);

    let opener = app.clone();
    let window = WebviewWindowBuilder::new(app, MAIN_WINDOW_LABEL, WebviewUrl::External(url))
        .title(WINDOW_TITLE)
        .inner_size(WINDOW_WIDTH, WINDOW_HEIGHT)
        .center()
        .visible(false)
        .initialization_script(bridge_script())
        .on_web_resource_request(|_request, response| csp::apply_policy(response.headers_mut()))
        .on_new_window(move |url, _features| handle_new_window(&opener, &url).into())
        .on_page_load(move |window, payload| {
            if payload.event() != PageLoadEvent::Finished {
                return;
            }
            log::info!("[window] Page loaded: {}", payload.url());
            if let Err(e) = window.show() {
                log::error!("[window] Failed to show window: {}", e);
            }
            on_content_ready();
        })
        .build()?;

    Ok(window)
}

/// Bring the main window to front, if it exists.
pub fn focus_main_window(app: &AppHandle) -> bool {
    match app.get_webview_window(MAIN_WINDOW_LABEL) {
        Some(window) => {
            let _ = window.show();
            let _ = window.set_focus();
            true
        }
        None => false,
    }
}

/// Relay target addressing a window by label. Holds no window reference,
/// so a destroyed window simply stops resolving.
#[derive(Clone)]
pub struct WindowTarget {
    app: AppHandle,
    label: String,
}

impl WindowTarget {
    pub fn new(app: AppHandle, label: impl Into<String>) -> Self {
        Self {
            app,
            label: label.into(),
        }
    }
}

impl RelayTarget for WindowTarget {
    fn id(&self) -> &str {
        &self.label
    }

    fn deliver(&self, message: &ContentMessage) -> Result<(), TargetUnavailable> {
        let window = self
            .app
            .get_webview_window(&self.label)
            .ok_or_else(|| TargetUnavailable(self.label.clone()))?;
        window
            .emit_to(
                EventTarget::webview_window(self.label.clone()),
                message.channel,
                &message.payload,
            )
            .map_err(|e| {
                log::warn!("[window] Emit {} failed: {}", message.channel, e);
                TargetUnavailable(self.label.clone())
            })
    }
}

/// Native error box for unpackaged builds; does not need a window.
pub fn show_error_dialog(message: &str) {
    let message = message.to_string();
    tauri::async_runtime::spawn(async move {
        let _ = rfd::AsyncMessageDialog::new()
            .set_level(rfd::MessageLevel::Error)
            .set_title("Update error")
            .set_description(message)
            .set_buttons(rfd::MessageButtons::Ok)
            .show()
            .await;
    });
}
