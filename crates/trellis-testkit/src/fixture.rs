// crates/trellis-testkit/src/fixture.rs
// ============================================================================
// Module: Test Fixture
// Description: Per-test pairing of a running server and a browser.
// Purpose: Give integration tests one handle for setup, URL building, and teardown.
// Dependencies: trellis-core, url
// ============================================================================

//! ## Overview
//! [`TestFixture`] starts a [`TestServer`] and a [`TestBrowser`] together and
//! tears both down on [`TestFixture::shutdown`] or drop. Teardown attempts
//! every component even when one fails, and a second teardown does nothing.
//! Failures during drop are recorded as `fixture_teardown_failed` events.

use std::sync::Arc;

use thiserror::Error;
use trellis_core::Application;
use trellis_core::EventSink;
use trellis_core::Injector;
use trellis_core::InjectorError;
use trellis_core::LifecycleEvent;
use trellis_core::Mode;
use trellis_core::StderrEventSink;
use url::Url;

use crate::browser::BrowserError;
use crate::browser::TestBrowser;
use crate::server::TestServer;
use crate::server::TestServerBuilder;
use crate::server::TestServerError;

/// A running server plus a browser for one test.
pub struct TestFixture {
    /// Server under test; `None` after teardown.
    server: Option<TestServer>,
    /// Browser; `None` after teardown.
    browser: Option<TestBrowser>,
    /// Mode of the server, kept for teardown events.
    mode: Mode,
    /// Destination of teardown failures raised during drop.
    events: Arc<dyn EventSink>,
}

impl TestFixture {
    /// Starts `A` with default harness settings.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError`] when the server or browser cannot be started.
    pub fn start<A: Application + Default + 'static>() -> Result<Self, FixtureError> {
        Self::start_with(TestServer::builder(A::default()))
    }

    /// Starts a customized harness.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError`] when the server or browser cannot be started.
    pub fn start_with(builder: TestServerBuilder) -> Result<Self, FixtureError> {
        let mut server = builder.build()?;
        let browser = match TestBrowser::new() {
            Ok(browser) => browser,
            Err(err) => {
                let _ = server.shutdown();
                return Err(err.into());
            }
        };
        Ok(Self {
            mode: server.mode(),
            server: Some(server),
            browser: Some(browser),
            events: Arc::new(StderrEventSink),
        })
    }

    /// Replaces the sink receiving teardown failures raised during drop.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the server.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Closed`] after teardown.
    pub fn server(&self) -> Result<&TestServer, FixtureError> {
        self.server.as_ref().ok_or(FixtureError::Closed)
    }

    /// Returns the injector of the running application.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Closed`] after teardown.
    pub fn injector(&self) -> Result<&Injector, FixtureError> {
        Ok(self.server()?.injector())
    }

    /// Looks up a bound instance by type.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Injector`] when nothing is bound for `T`.
    pub fn instance<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, FixtureError> {
        Ok(self.injector()?.require::<T>()?)
    }

    /// Returns the browser.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Closed`] after teardown.
    pub fn browser(&self) -> Result<&TestBrowser, FixtureError> {
        self.browser.as_ref().ok_or(FixtureError::Closed)
    }

    /// Returns the browser mutably.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Closed`] after teardown.
    pub fn browser_mut(&mut self) -> Result<&mut TestBrowser, FixtureError> {
        self.browser.as_mut().ok_or(FixtureError::Closed)
    }

    /// Returns the absolute URL of `path` under the application base URL.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::InvalidPath`] when `path` is empty or does not
    /// start with `/`.
    pub fn to(&self, path: &str) -> Result<String, FixtureError> {
        if path.is_empty() {
            return Err(FixtureError::InvalidPath("path must not be empty".to_string()));
        }
        if !path.starts_with('/') {
            return Err(FixtureError::InvalidPath(format!("path must start with '/': {path}")));
        }
        Ok(format!("{}{path}", self.server()?.base_url()))
    }

    /// Returns the server URL with a trailing slash.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Closed`] after teardown.
    #[deprecated(note = "use to(path)")]
    #[allow(deprecated, reason = "Forwards to the deprecated harness accessor.")]
    pub fn server_address(&self) -> Result<String, FixtureError> {
        Ok(self.server()?.server_address())
    }

    /// Returns the server URL with a trailing slash as a parsed URL.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Closed`] after teardown and
    /// [`FixtureError::Server`] when the URL cannot be parsed.
    #[deprecated(note = "use to(path)")]
    #[allow(deprecated, reason = "Forwards to the deprecated harness accessor.")]
    pub fn server_address_as_url(&self) -> Result<Url, FixtureError> {
        Ok(self.server()?.server_address_as_url()?)
    }

    /// Shuts down the server and the browser. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Teardown`] listing every component that failed.
    pub fn shutdown(&mut self) -> Result<(), FixtureError> {
        let mut failures = Vec::new();
        if let Some(mut server) = self.server.take()
            && let Err(err) = server.shutdown()
        {
            failures.push(err.to_string());
        }
        if let Some(mut browser) = self.browser.take()
            && let Err(err) = browser.shutdown()
        {
            failures.push(err.to_string());
        }
        if failures.is_empty() { Ok(()) } else { Err(FixtureError::Teardown(failures)) }
    }
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            let event = LifecycleEvent::new("fixture_teardown_failed", self.mode);
            self.events.record(&event.with_detail(err.to_string()));
        }
    }
}

/// Fixture errors.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The server could not be started or stopped.
    #[error(transparent)]
    Server(#[from] TestServerError),
    /// The browser could not be created or used.
    #[error(transparent)]
    Browser(#[from] BrowserError),
    /// A requested instance is not bound.
    #[error(transparent)]
    Injector(#[from] InjectorError),
    /// A path passed to [`TestFixture::to`] is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// The fixture was already torn down.
    #[error("fixture is torn down")]
    Closed,
    /// One or more components failed to shut down.
    #[error("teardown failed: {}", .0.join("; "))]
    Teardown(Vec<String>),
}
