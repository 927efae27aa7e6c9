// crates/trellis-testkit/tests/test_server.rs
// ============================================================================
// Module: Test Server Suite
// Description: Integration tests for the test server harness.
// Purpose: Verify builder defaults, overrides, URLs, and startup failures.
// Dependencies: trellis-core, trellis-testkit, tempfile
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions favor direct unwrap/expect for clarity."
)]

mod helpers;

use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use helpers::demo_app::DemoApplication;
use helpers::demo_app::Greeter;
use helpers::demo_app::PirateGreeter;
use helpers::server_lock;
use tempfile::TempDir;
use trellis_core::Application;
use trellis_core::Bindings;
use trellis_core::Injector;
use trellis_core::Mode;
use trellis_core::Module;
use trellis_core::Standalone;
use trellis_core::StandaloneConfig;
use trellis_core::StandaloneError;
use trellis_core::find_available_port;
use trellis_testkit::TestBrowser;
use trellis_testkit::TestServer;
use trellis_testkit::TestServerError;

fn quiet() -> BTreeMap<String, String> {
    [("application.events.sink".to_string(), "none".to_string())].into_iter().collect()
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

#[test]
fn builder_defaults_to_test_mode_and_scanned_port() {
    let _lock = server_lock();
    let mut server = TestServer::builder(DemoApplication).build().unwrap();

    assert_eq!(server.mode(), Mode::Test);
    let port = server.port().unwrap();
    assert!((1000..10000).contains(&port));
    assert_eq!(server.server_url(), format!("http://localhost:{port}"));
    assert_eq!(server.base_url(), server.server_url());
    assert!(!server.base_url().ends_with('/'));
    assert_eq!(*server.injector().require::<Mode>().unwrap(), Mode::Test);

    let browser = TestBrowser::new().unwrap();
    assert_eq!(browser.get_text(&format!("{}/mode", server.base_url())).unwrap(), "test");

    server.shutdown().unwrap();
    assert!(server.is_stopped());
    server.shutdown().unwrap();
    server.close().unwrap();
}

#[test]
#[allow(deprecated, reason = "Exercises the legacy address accessors.")]
fn legacy_address_accessors_keep_trailing_slash() {
    let _lock = server_lock();
    let server = TestServer::builder(DemoApplication)
        .override_property("server.context_path", "/shop")
        .build()
        .unwrap();

    assert_eq!(server.server_address(), format!("{}/", server.server_url()));
    let url = server.server_address_as_url().unwrap();
    assert_eq!(url.path(), "/");
    assert_eq!(url.port(), server.port());
}

#[test]
fn explicit_port_and_mode_are_used() {
    let _lock = server_lock();
    let port = find_available_port(10_000, 20_000).unwrap();
    let server = TestServer::builder(DemoApplication)
        .port(port)
        .mode(Mode::Dev)
        .override_properties(quiet())
        .build()
        .unwrap();

    assert_eq!(server.port(), Some(port));
    assert!(server.server_url().ends_with(&format!(":{port}")));
    assert_eq!(server.mode(), Mode::Dev);
}

// ============================================================================
// SECTION: Overrides
// ============================================================================

#[test]
fn override_module_replaces_application_binding() {
    let _lock = server_lock();
    let server = TestServer::builder(DemoApplication)
        .override_properties(quiet())
        .override_module(|bindings: &mut Bindings| {
            bindings.bind_shared::<dyn Greeter>(Arc::new(PirateGreeter));
        })
        .build()
        .unwrap();

    let greeter = server.injector().require::<dyn Greeter>().unwrap();
    assert_eq!(greeter.greet("ada"), "Ahoy, ada");
    let browser = TestBrowser::new().unwrap();
    let body = browser.get_text(&format!("{}/greeting/ada", server.base_url())).unwrap();
    assert_eq!(body, "Ahoy, ada");
}

#[test]
fn context_path_override_moves_base_url() {
    let _lock = server_lock();
    let server = TestServer::builder(DemoApplication)
        .override_properties(quiet())
        .override_property("server.context_path", "/shop")
        .build()
        .unwrap();

    assert_eq!(server.base_url(), format!("{}/shop", server.server_url()));
    let browser = TestBrowser::new().unwrap();
    let scoped = browser.get(&format!("{}/greeting/bo", server.base_url())).unwrap();
    assert_eq!(scoped.status, 200);
    assert_eq!(scoped.body, "Hello, bo");
    let unscoped = browser.get(&format!("{}/greeting/bo", server.server_url())).unwrap();
    assert_eq!(unscoped.status, 404);
}

#[test]
fn properties_layer_files_profile_and_overrides() {
    let _lock = server_lock();
    let conf = TempDir::new().unwrap();
    fs::write(
        conf.path().join("application.toml"),
        "[application.events]\nsink = \"none\"\n[demo]\nflavour = \"plain\"\ntopping = \"none\"\n",
    )
    .unwrap();
    fs::write(conf.path().join("application.test.toml"), "[demo]\nflavour = \"vanilla\"\n").unwrap();

    let browser = TestBrowser::new().unwrap();
    let test_server = TestServer::builder(DemoApplication).conf_dir(conf.path()).build().unwrap();
    let property = |server: &TestServer, key: &str| {
        browser.get_text(&format!("{}/property/{key}", server.base_url())).unwrap()
    };
    assert_eq!(property(&test_server, "demo.flavour"), "vanilla");
    assert_eq!(property(&test_server, "demo.topping"), "none");
    drop(test_server);

    let dev_server =
        TestServer::builder(DemoApplication).mode(Mode::Dev).conf_dir(conf.path()).build().unwrap();
    assert_eq!(property(&dev_server, "demo.flavour"), "plain");
    drop(dev_server);

    let overridden = TestServer::builder(DemoApplication)
        .conf_dir(conf.path())
        .override_property("demo.flavour", "mint")
        .build()
        .unwrap();
    assert_eq!(property(&overridden, "demo.flavour"), "mint");
}

// ============================================================================
// SECTION: Startup Failures
// ============================================================================

#[test]
fn invalid_property_override_is_a_startup_error() {
    let _lock = server_lock();
    let err = TestServer::builder(DemoApplication)
        .override_property("server.context_path", "shop/")
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, TestServerError::Startup(StandaloneError::Config(_))));
}

#[test]
fn occupied_port_is_a_startup_error() {
    let _lock = server_lock();
    let occupied = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = occupied.local_addr().unwrap().port();
    let err = TestServer::builder(DemoApplication)
        .port(port)
        .override_properties(quiet())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, TestServerError::Startup(StandaloneError::Bind { .. })));
}

static REFUSING_SHUTDOWN_CALLED: AtomicBool = AtomicBool::new(false);

/// Standalone that never starts.
struct RefusingStandalone {
    config: StandaloneConfig,
}

impl Standalone for RefusingStandalone {
    fn port(&self) -> Option<u16> {
        self.config.port
    }

    fn mode(&self) -> Mode {
        self.config.mode
    }

    fn application(&self) -> &dyn Application {
        self.config.application.as_ref()
    }

    fn override_module(&self) -> Option<&dyn Module> {
        self.config.override_module.as_deref()
    }

    fn override_properties(&self) -> &BTreeMap<String, String> {
        &self.config.override_properties
    }

    fn start(&mut self) -> Result<(), StandaloneError> {
        Err(StandaloneError::Runtime("refused".to_string()))
    }

    fn shutdown(&mut self) -> Result<(), StandaloneError> {
        REFUSING_SHUTDOWN_CALLED.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn injector(&self) -> Option<&Injector> {
        None
    }

    fn server_urls(&self) -> Vec<String> {
        Vec::new()
    }

    fn base_urls(&self) -> Vec<String> {
        Vec::new()
    }
}

fn refusing_factory(config: StandaloneConfig) -> Box<dyn Standalone> {
    Box::new(RefusingStandalone {
        config,
    })
}

#[test]
fn custom_standalone_failure_is_wrapped_and_shut_down() {
    let err = TestServer::builder(DemoApplication)
        .port(4321)
        .standalone(refusing_factory)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, TestServerError::Startup(StandaloneError::Runtime(ref message)) if message == "refused"));
    assert!(err.to_string().contains("refused"));
    assert!(REFUSING_SHUTDOWN_CALLED.load(Ordering::SeqCst));
}
