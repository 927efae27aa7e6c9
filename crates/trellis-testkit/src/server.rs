// crates/trellis-testkit/src/server.rs
// ============================================================================
// Module: Test Server
// Description: Builder and handle for an embedded application under test.
// Purpose: Start one application instance per test and expose its URLs and injector.
// Dependencies: trellis-core, url
// ============================================================================

//! ## Overview
//! [`TestServerBuilder`] collects the mode, port, standalone implementation,
//! override module, and override properties for one application. `build`
//! fills in defaults (test mode, the first free port in `[1000, 10000)`, and
//! [`AxumStandalone`]) and starts the server before returning. A failed start
//! is reported as [`TestServerError::Startup`] after a best-effort shutdown.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use thiserror::Error;
use trellis_core::Application;
use trellis_core::AxumStandalone;
use trellis_core::Injector;
use trellis_core::Mode;
use trellis_core::Module;
use trellis_core::Standalone;
use trellis_core::StandaloneConfig;
use trellis_core::StandaloneError;
use trellis_core::StandaloneFactory;
use trellis_core::find_available_port;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lowest port considered when no port is given.
pub const MIN_PORT: u16 = 1000;
/// Upper bound (exclusive) of the port scan.
pub const MAX_PORT: u16 = 10000;

// ============================================================================
// SECTION: Serialization
// ============================================================================

/// Serializes server startup across test threads in one process.
///
/// The port scan in [`TestServerBuilder::build`] and the later bind are not
/// atomic; holding this guard for a test's lifetime keeps two harnesses in
/// the same test binary from picking the same port.
pub fn server_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Configuration for a [`TestServer`].
pub struct TestServerBuilder {
    /// Application to serve.
    application: Arc<dyn Application>,
    /// Runtime mode; defaults to [`Mode::Test`].
    mode: Option<Mode>,
    /// Listen port; defaults to the first free port.
    port: Option<u16>,
    /// Standalone implementation; defaults to [`AxumStandalone`].
    standalone: Option<StandaloneFactory>,
    /// Module applied after application bindings.
    override_module: Option<Arc<dyn Module>>,
    /// Properties applied over file-based configuration.
    override_properties: Option<BTreeMap<String, String>>,
    /// Configuration directory.
    conf_dir: Option<PathBuf>,
}

impl TestServerBuilder {
    /// Sets the runtime mode.
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the listen port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the standalone implementation.
    #[must_use]
    pub fn standalone(mut self, factory: StandaloneFactory) -> Self {
        self.standalone = Some(factory);
        self
    }

    /// Sets a module whose bindings replace the application's.
    #[must_use]
    pub fn override_module(mut self, module: impl Module + 'static) -> Self {
        self.override_module = Some(Arc::new(module));
        self
    }

    /// Replaces the property overrides.
    #[must_use]
    pub fn override_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.override_properties = Some(properties);
        self
    }

    /// Adds one property override.
    #[must_use]
    pub fn override_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.override_properties.get_or_insert_with(BTreeMap::new).insert(key.into(), value.into());
        self
    }

    /// Reads configuration files from `dir`.
    #[must_use]
    pub fn conf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.conf_dir = Some(dir.into());
        self
    }

    /// Resolves defaults and starts the server.
    ///
    /// Without an explicit port the first free port in `[MIN_PORT, MAX_PORT)`
    /// is chosen by probing, then released and bound again by the server.
    /// Another process or test thread may take the port in between; there is
    /// no retry, and the start fails with [`TestServerError::Startup`].
    /// Tests that start servers in parallel should hold [`server_lock`] or pass
    /// distinct explicit ports.
    ///
    /// # Errors
    ///
    /// Returns [`TestServerError::NoAvailablePort`] when the port scan finds
    /// nothing and [`TestServerError::Startup`] when the server fails to start.
    pub fn build(self) -> Result<TestServer, TestServerError> {
        let port = match self.port {
            Some(port) => port,
            None => find_available_port(MIN_PORT, MAX_PORT).ok_or(
                TestServerError::NoAvailablePort {
                    min: MIN_PORT,
                    max: MAX_PORT,
                },
            )?,
        };
        let mut config = StandaloneConfig::new(self.application, self.mode.unwrap_or(Mode::Test));
        config.port = Some(port);
        config.override_module = self.override_module;
        config.override_properties = self.override_properties.unwrap_or_default();
        config.conf_dir = self.conf_dir;

        let factory = self.standalone.unwrap_or(AxumStandalone::boxed);
        let mut standalone = factory(config);
        if let Err(err) = standalone.start() {
            let _ = standalone.shutdown();
            return Err(TestServerError::Startup(err));
        }
        let injector = standalone.injector().cloned();
        let server_url = standalone.server_urls().into_iter().next();
        let base_url = standalone.base_urls().into_iter().next();
        let (Some(injector), Some(server_url), Some(base_url)) = (injector, server_url, base_url)
        else {
            let _ = standalone.shutdown();
            return Err(TestServerError::NotServing);
        };
        Ok(TestServer {
            standalone,
            injector,
            server_url,
            base_url,
            stopped: false,
        })
    }
}

// ============================================================================
// SECTION: Test Server
// ============================================================================

/// A running application instance for one test.
pub struct TestServer {
    /// Running standalone server.
    standalone: Box<dyn Standalone>,
    /// Injector captured at start.
    injector: Injector,
    /// First server URL.
    server_url: String,
    /// First base URL.
    base_url: String,
    /// Set once shut down.
    stopped: bool,
}

impl TestServer {
    /// Starts a builder for `application`.
    #[must_use]
    pub fn builder(application: impl Application + 'static) -> TestServerBuilder {
        TestServerBuilder {
            application: Arc::new(application),
            mode: None,
            port: None,
            standalone: None,
            override_module: None,
            override_properties: None,
            conf_dir: None,
        }
    }

    /// Returns the injector of the running application.
    #[must_use]
    pub const fn injector(&self) -> &Injector {
        &self.injector
    }

    /// Returns the server URL, without a trailing slash.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Returns the server URL plus context path, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the runtime mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.standalone.mode()
    }

    /// Returns the listen port.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.standalone.port()
    }

    /// Returns the server URL with a trailing slash.
    #[deprecated(note = "use server_url or base_url")]
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}/", self.server_url)
    }

    /// Returns the server URL with a trailing slash as a parsed URL.
    ///
    /// # Errors
    ///
    /// Returns [`TestServerError::InvalidUrl`] when the URL cannot be parsed.
    #[deprecated(note = "use server_url or base_url")]
    pub fn server_address_as_url(&self) -> Result<Url, TestServerError> {
        let address = format!("{}/", self.server_url);
        Url::parse(&address).map_err(|err| TestServerError::InvalidUrl(format!("{address}: {err}")))
    }

    /// Returns true once shut down.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stops the server. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TestServerError::Shutdown`] when the server exited with an error.
    pub fn shutdown(&mut self) -> Result<(), TestServerError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.standalone.shutdown().map_err(TestServerError::Shutdown)
    }

    /// Same as [`TestServer::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`TestServerError::Shutdown`] when the server exited with an error.
    pub fn close(&mut self) -> Result<(), TestServerError> {
        self.shutdown()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Test server errors.
#[derive(Debug, Error)]
pub enum TestServerError {
    /// No port in the scan range could be bound.
    #[error("no free port in [{min}, {max})")]
    NoAvailablePort {
        /// Inclusive lower bound.
        min: u16,
        /// Exclusive upper bound.
        max: u16,
    },
    /// The server failed to start.
    #[error("test server failed to start: {0}")]
    Startup(#[source] StandaloneError),
    /// The server started but reported no URL or injector.
    #[error("test server started but is not serving")]
    NotServing,
    /// The server stopped with an error.
    #[error("test server shutdown failed: {0}")]
    Shutdown(#[source] StandaloneError),
    /// A server URL could not be parsed.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}
