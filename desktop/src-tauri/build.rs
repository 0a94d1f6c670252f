fn main() {
    let dev_cap_path = std::path::Path::new("capabilities/dev-console.json");

    // Debug builds load the console from localhost and need IPC granted there.
    if std::env::var("PROFILE").as_deref() == Ok("debug") {
        std::fs::create_dir_all("capabilities").expect("failed to create capabilities dir");
        let cap = r#"{
  "identifier": "dev-console",
  "description": "console IPC for the local dev server",
  "windows": ["main"],
  "remote": {
    "urls": ["http://localhost:5001/*"]
  },
  "permissions": [
    "core:event:default",
    "allow-update-command",
    "allow-get-update-status"
  ]
}"#;
        // Only write if content changed, avoids a dev watcher rebuild loop
        let needs_write = match std::fs::read_to_string(dev_cap_path) {
            Ok(existing) => existing != cap,
            Err(_) => true,
        };
        if needs_write {
            std::fs::write(dev_cap_path, cap).expect("failed to write dev-console capability");
        }
    } else {
        let _ = std::fs::remove_file(dev_cap_path);
    }

    let manifest = tauri_build::AppManifest::new().commands(&["update_command", "get_update_status"]);
    tauri_build::try_build(tauri_build::Attributes::new().app_manifest(manifest))
        .expect("failed to run tauri-build");
}
