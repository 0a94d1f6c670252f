//! Static shell configuration

use url::Url;

pub const MAIN_WINDOW_LABEL: &str = "main";
pub const WINDOW_TITLE: &str = "Cometa Console";
pub const WINDOW_WIDTH: f64 = 1600.0;
pub const WINDOW_HEIGHT: f64 = 900.0;

#[cfg(debug_assertions)]
const DEFAULT_CONSOLE_URL: &str = "http://localhost:5001";
#[cfg(not(debug_assertions))]
const DEFAULT_CONSOLE_URL: &str = "https://cometa-console.test.leicloud.net";

/// Env override for the console address
pub const CONSOLE_URL_ENV: &str = "COMETA_CONSOLE_URL";

/// Update feed override read by unpackaged builds.
pub const DEV_UPDATE_CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/dev-app-update.yml");

pub fn console_url() -> Result<Url, url::ParseError> {
    resolve_console_url(std::env::var(CONSOLE_URL_ENV).ok())
}

fn resolve_console_url(override_url: Option<String>) -> Result<Url, url::ParseError> {
    if let Some(raw) = override_url {
        match Url::parse(&raw) {
            Ok(url) => return Ok(url),
            Err(e) => log::warn!("[config] Ignoring {}={}: {}", CONSOLE_URL_ENV, raw, e),
        }
    }
    Url::parse(DEFAULT_CONSOLE_URL)
}

/// Built with the bundler (`tauri build`) rather than run from `tauri dev`.
pub fn is_packaged() -> bool {
    !tauri::is_dev()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_console_url() {
        let url = resolve_console_url(None).unwrap();
        assert_eq!(url.as_str().trim_end_matches('/'), DEFAULT_CONSOLE_URL);
    }

    #[test]
    fn test_console_url_override() {
        let url = resolve_console_url(Some("https://console.example.com/app".into())).unwrap();
        assert_eq!(url.as_str(), "https://console.example.com/app");
    }

    #[test]
    fn test_invalid_override_falls_back() {
        let url = resolve_console_url(Some("::not a url::".into())).unwrap();
        assert_eq!(url.as_str().trim_end_matches('/'), DEFAULT_CONSOLE_URL);
    }

    #[test]
    fn test_dev_update_config_next_to_manifest() {
        assert!(DEV_UPDATE_CONFIG.ends_with("/dev-app-update.yml"));
    }
}
