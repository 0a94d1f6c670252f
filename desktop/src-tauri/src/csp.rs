//! Content-Security-Policy for the console. Applied to responses the
//! webview lets the host rewrite, and declared in the document head by the
//! bridge script for the remote console itself.

use tauri::http::header::CONTENT_SECURITY_POLICY;
use tauri::http::{HeaderMap, HeaderValue};

pub const POLICY: &str = concat!(
    "default-src 'self' https://cometa-console.test.leicloud.net; ",
    "script-src 'self' 'unsafe-inline'; ",
    "style-src 'self' 'unsafe-inline' https://fonts.googleapis.com; ",
    "img-src 'self' data: https://cometa-console.test.leicloud.net; ",
    "connect-src 'self' https://cometa-console.test.leicloud.net; ",
    "font-src 'self' https://fonts.gstatic.com; ",
    "frame-src 'none'; ",
    "object-src 'none'"
);

/// Keeps every response header and replaces the CSP with [`POLICY`].
pub fn apply_policy(headers: &mut HeaderMap) {
    headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(POLICY));
}
