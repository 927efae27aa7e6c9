// crates/trellis-testkit/tests/browser.rs
// ============================================================================
// Module: Test Browser Suite
// Description: Integration tests for the cookie-persisting test browser.
// Purpose: Verify request helpers, JSON handling, and closed-browser behavior.
// Dependencies: serde, trellis-testkit
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions favor direct unwrap/expect for clarity."
)]

mod helpers;

use std::time::Duration;

use helpers::demo_app::DemoApplication;
use helpers::server_lock;
use serde::Deserialize;
use serde_json::json;
use trellis_testkit::BrowserError;
use trellis_testkit::TestBrowser;
use trellis_testkit::TestServer;

#[derive(Debug, Deserialize, PartialEq, Eq)]
struct Status {
    ok: bool,
    service: String,
}

fn start() -> TestServer {
    TestServer::builder(DemoApplication)
        .override_property("application.events.sink", "none")
        .build()
        .unwrap()
}

#[test]
fn get_returns_status_headers_and_body() {
    let _lock = server_lock();
    let server = start();
    let browser = TestBrowser::new().unwrap();

    let response = browser.get(&format!("{}/form", server.base_url())).unwrap();
    assert!(response.is_success());
    assert!(response.header("content-type").unwrap().starts_with("text/html"));
    assert!(response.body.contains("name=\"authenticityToken\""));

    let missing = browser.get(&format!("{}/nowhere", server.base_url())).unwrap();
    assert_eq!(missing.status, 404);
    assert!(!missing.is_success());
}

#[test]
fn get_json_decodes_typed_bodies() {
    let _lock = server_lock();
    let server = start();
    let browser = TestBrowser::new().unwrap();

    let status: Status = browser.get_json(&format!("{}/status", server.base_url())).unwrap();
    assert_eq!(
        status,
        Status {
            ok: true,
            service: "demo".to_string()
        }
    );
    let err = browser.get_json::<Status>(&format!("{}/", server.base_url())).unwrap_err();
    assert!(matches!(err, BrowserError::Decode { .. }));
}

#[test]
fn custom_headers_are_sent() {
    let _lock = server_lock();
    let server = start();
    let browser = TestBrowser::new().unwrap();
    let url = format!("{}/headers", server.base_url());

    assert_eq!(browser.get_text(&url).unwrap(), "missing");
    assert_eq!(browser.get_text_with_headers(&url, &[("x-demo", "42")]).unwrap(), "42");
}

#[test]
fn json_posts_without_token_header_are_rejected() {
    let _lock = server_lock();
    let server = start();
    let browser = TestBrowser::new().unwrap();
    let url = format!("{}/echo-json", server.base_url());

    let _token = browser.get_text(&format!("{}/token", server.base_url())).unwrap();
    let rejected = browser.post_json(&url, &json!({"n": 1})).unwrap();
    assert_eq!(rejected.status, 403);
    assert_eq!(rejected.body, "invalid authenticity token");
}

#[test]
fn closed_browser_rejects_requests() {
    let _lock = server_lock();
    let server = start();
    let mut browser = TestBrowser::new().unwrap();
    assert!(!browser.is_closed());

    browser.shutdown().unwrap();
    browser.shutdown().unwrap();
    assert!(browser.is_closed());
    let home = format!("{}/", server.base_url());
    assert!(matches!(browser.get_text(&home), Err(BrowserError::Closed)));
    assert!(matches!(browser.clear_cookies(), Err(BrowserError::Closed)));
}

#[test]
fn malformed_urls_are_rejected_before_sending() {
    let browser = TestBrowser::new().unwrap();
    assert!(matches!(browser.get("not a url"), Err(BrowserError::InvalidUrl { .. })));
    assert!(matches!(browser.cookies("::"), Err(BrowserError::InvalidUrl { .. })));
}

#[test]
fn timeout_is_never_below_requested() {
    let browser = TestBrowser::with_timeout(Duration::from_secs(45)).unwrap();
    assert!(browser.timeout() >= Duration::from_secs(45));
    assert!(TestBrowser::new().unwrap().timeout() >= Duration::from_secs(30));
}
