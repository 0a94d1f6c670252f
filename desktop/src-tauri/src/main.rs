#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod config;
mod csp;
mod updater;
mod window;

use tauri::{AppHandle, Manager, WindowEvent};
use tauri_plugin_log::{Target, TargetKind};

use updater::engine::PluginEngine;
use updater::relay::{UpdateSession, UpdaterRelay};
use updater::AppRelay;
use window::WindowTarget;

fn main() {
    let app = tauri::Builder::default()
        .plugin(
            tauri_plugin_log::Builder::new()
                .level(log::LevelFilter::Info)
                .targets([
                    Target::new(TargetKind::Stdout),
                    Target::new(TargetKind::LogDir {
                        file_name: Some("desktop".to_string()),
                    }),
                ])
                .build(),
        )
        .plugin(tauri_plugin_single_instance::init(|app, _args, _cwd| {
            window::focus_main_window(app);
        }))
        .plugin(tauri_plugin_shell::init())
        .plugin(tauri_plugin_updater::Builder::new().build())
        .invoke_handler(tauri::generate_handler![
            updater::update_command,
            updater::get_update_status,
        ])
        .setup(|app| {
            let packaged = config::is_packaged();
            log::info!(
                "[startup] v{} ({})",
                env!("CARGO_PKG_VERSION"),
                if packaged { "packaged" } else { "dev" }
            );

            // Start the update relay before the window so the first page
            // load can trigger a check.
            let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
            let engine = PluginEngine::new(app.handle().clone(), events_tx);
            let session = UpdateSession::new(!packaged, config::DEV_UPDATE_CONFIG);
            let (relay, task) = UpdaterRelay::new(engine, session)
                .with_error_dialog(window::show_error_dialog)
                .into_task(events_rx);
            tauri::async_runtime::spawn(task);
            app.manage(relay.clone());

            open_main_window(app.handle(), &relay)?;
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|_app, _event| {
        #[cfg(target_os = "macos")]
        handle_macos_event(_app, _event);
    });
}

/// Stay resident when the last window closes; recreate it from the dock.
#[cfg(target_os = "macos")]
fn handle_macos_event(app: &AppHandle, event: tauri::RunEvent) {
    use tauri::RunEvent;

    match event {
        RunEvent::ExitRequested { api, code: None, .. } => api.prevent_exit(),
        RunEvent::Reopen {
            has_visible_windows: false,
            ..
        } => {
            if window::focus_main_window(app) {
                return;
            }
            let relay = app.state::<AppRelay>().inner().clone();
            if let Err(e) = open_main_window(app, &relay) {
                log::error!("[startup] Failed to reopen window: {}", e);
            }
        }
        _ => {}
    }
}

/// Create the console window and bind it to the relay.
fn open_main_window(
    app: &AppHandle,
    relay: &AppRelay,
) -> Result<(), Box<dyn std::error::Error>> {
    relay.attach(WindowTarget::new(app.clone(), config::MAIN_WINDOW_LABEL))?;

    let ready = relay.clone();
    let window = window::create_main_window(app, move || {
        if let Err(e) = ready.content_ready() {
            log::warn!("[startup] {}", e);
        }
    })?;

    let closed = relay.clone();
    window.on_window_event(move |event| {
        if let WindowEvent::Destroyed = event {
            if let Err(e) = closed.detach() {
                log::warn!("[startup] {}", e);
            }
        }
    });
    Ok(())
}
