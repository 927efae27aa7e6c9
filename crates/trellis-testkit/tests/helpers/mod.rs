// crates/trellis-testkit/tests/helpers/mod.rs
// ============================================================================
// Module: Testkit Test Helpers
// Description: Shared demo application and server lock for testkit suites.
// Purpose: Give every suite the same application and serialize port scans.
// Dependencies: axum, trellis-core
// ============================================================================

#![allow(dead_code, reason = "Shared helpers are reused across multiple test suites.")]

pub mod demo_app;

pub use trellis_testkit::server_lock;

/// Extracts the `value` attribute of the rendered authenticity field.
pub fn token_from_form(html: &str) -> Option<String> {
    let marker = r#"<input type="hidden" value=""#;
    let start = html.find(marker)? + marker.len();
    let end = html[start..].find('"')? + start;
    Some(html[start..end].to_string())
}
