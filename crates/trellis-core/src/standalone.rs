// crates/trellis-core/src/standalone.rs
// ============================================================================
// Module: Standalone Server
// Description: Contract and axum implementation of an embedded application server.
// Purpose: Boot a configured application on a local port and stop it cleanly.
// Dependencies: axum, tokio, tower
// ============================================================================

//! ## Overview
//! A [`Standalone`] runs one [`Application`] on one port. [`AxumStandalone`]
//! loads [`Properties`] for its mode, applies property overrides, builds the
//! [`Injector`] (framework bindings, then application bindings, then the
//! override module), and serves the application router on a dedicated thread
//! that owns its own tokio runtime. Under a context path both `<ctx>` and
//! `<ctx>/` reach the application's `/` route. The listener is bound before `start`
//! returns, so URLs reported afterwards accept connections immediately.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::net::TcpListener as StdTcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use axum::Router;
use axum::ServiceExt;
use axum::extract::Request;
use axum::http::Uri;
use axum::http::uri::PathAndQuery;
use axum::middleware;
use thiserror::Error;
use tokio::runtime::Builder;
use tokio::sync::oneshot;
use tower::Layer;
use tower::util::MapRequestLayer;

use crate::application::Application;
use crate::application::ApplicationError;
use crate::config::ConfigError;
use crate::config::Properties;
use crate::config::ServerSettings;
use crate::events::EventSink;
use crate::events::LifecycleEvent;
use crate::events::sink_from_properties;
use crate::injector::Bindings;
use crate::injector::Injector;
use crate::injector::Module;
use crate::mode::Mode;
use crate::mode::ModeParseError;
use crate::session::SessionLayerState;
use crate::session::SessionStore;
use crate::session::session_layer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Port used when neither the caller nor the properties name one.
pub const DEFAULT_PORT: u16 = 8080;
/// Interface bound when `server.host` is unset.
const DEFAULT_BIND_HOST: &str = "127.0.0.1";
/// Worker threads in each server runtime.
const WORKER_THREADS: usize = 2;

// ============================================================================
// SECTION: Contract
// ============================================================================

/// Inputs used to construct a standalone server.
#[derive(Clone)]
pub struct StandaloneConfig {
    /// Listen port; falls back to `server.port`, then [`DEFAULT_PORT`].
    pub port: Option<u16>,
    /// Runtime mode.
    pub mode: Mode,
    /// Application to serve.
    pub application: Arc<dyn Application>,
    /// Module applied after the application's own bindings.
    pub override_module: Option<Arc<dyn Module>>,
    /// Properties applied over every file-based value.
    pub override_properties: BTreeMap<String, String>,
    /// Configuration directory; defaults to `TRELLIS_CONF_DIR`, then `conf`.
    pub conf_dir: Option<PathBuf>,
}

impl StandaloneConfig {
    /// Creates a configuration with no port, overrides, or configuration directory.
    #[must_use]
    pub fn new(application: Arc<dyn Application>, mode: Mode) -> Self {
        Self {
            port: None,
            mode,
            application,
            override_module: None,
            override_properties: BTreeMap::new(),
            conf_dir: None,
        }
    }

    /// Creates a configuration whose mode comes from `TRELLIS_MODE`.
    ///
    /// # Errors
    ///
    /// Returns [`ModeParseError`] when the variable holds an unknown token.
    pub fn from_env(application: Arc<dyn Application>) -> Result<Self, ModeParseError> {
        Ok(Self::new(application, Mode::from_env()?))
    }
}

/// Constructs a standalone implementation from its configuration.
pub type StandaloneFactory = fn(StandaloneConfig) -> Box<dyn Standalone>;

/// An embedded server hosting one application.
pub trait Standalone: Send {
    /// Returns the bound port once started, else the configured port.
    fn port(&self) -> Option<u16>;

    /// Returns the runtime mode.
    fn mode(&self) -> Mode;

    /// Returns the served application.
    fn application(&self) -> &dyn Application;

    /// Returns the override module, if any.
    fn override_module(&self) -> Option<&dyn Module>;

    /// Returns the property overrides.
    fn override_properties(&self) -> &BTreeMap<String, String>;

    /// Configures the application and starts serving.
    ///
    /// # Errors
    ///
    /// Returns [`StandaloneError`] when configuration, binding, or runtime
    /// setup fails, or when the server is already running.
    fn start(&mut self) -> Result<(), StandaloneError>;

    /// Stops serving. Does nothing when not running.
    ///
    /// # Errors
    ///
    /// Returns [`StandaloneError::Serve`] when the server exited with an error.
    fn shutdown(&mut self) -> Result<(), StandaloneError>;

    /// Returns the injector of the running application.
    fn injector(&self) -> Option<&Injector>;

    /// Returns the URLs the server answers on, without trailing slashes.
    fn server_urls(&self) -> Vec<String>;

    /// Returns the server URLs joined with the context path.
    fn base_urls(&self) -> Vec<String>;
}

/// Standalone server errors.
#[derive(Debug, Error)]
pub enum StandaloneError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The application failed to configure itself.
    #[error("application error: {0}")]
    Application(#[from] ApplicationError),
    /// The listener could not be bound.
    #[error("bind failed on {address}: {message}")]
    Bind {
        /// Address that was requested.
        address: String,
        /// Underlying error text.
        message: String,
    },
    /// The server runtime could not be created.
    #[error("runtime error: {0}")]
    Runtime(String),
    /// `start` was called on a running server.
    #[error("server already started")]
    AlreadyStarted,
    /// The server stopped with an error.
    #[error("server error: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: Port Discovery
// ============================================================================

/// Returns the first port in `[min, max)` that can be bound on loopback.
#[must_use]
pub fn find_available_port(min: u16, max: u16) -> Option<u16> {
    (min..max).find(|port| StdTcpListener::bind((Ipv4Addr::LOCALHOST, *port)).is_ok())
}

// ============================================================================
// SECTION: Axum Standalone
// ============================================================================

/// State of a started server.
struct Running {
    /// Injector built at start.
    injector: Injector,
    /// Resolved server settings.
    settings: ServerSettings,
    /// Bound listener address.
    local_addr: SocketAddr,
    /// Lifecycle event sink.
    events: Arc<dyn EventSink>,
    /// Signals graceful shutdown.
    shutdown: Option<oneshot::Sender<()>>,
    /// Server thread.
    join: Option<JoinHandle<Result<(), String>>>,
}

impl Running {
    /// Returns the advertised server URL.
    fn server_url(&self) -> String {
        format!("http://{}", self.settings.advertised_authority(self.local_addr.port()))
    }
}

/// Standalone server backed by axum.
pub struct AxumStandalone {
    /// Construction inputs.
    config: StandaloneConfig,
    /// Present while serving.
    running: Option<Running>,
}

impl AxumStandalone {
    /// Creates a stopped server.
    #[must_use]
    pub const fn new(config: StandaloneConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    /// Factory matching [`StandaloneFactory`].
    #[must_use]
    pub fn boxed(config: StandaloneConfig) -> Box<dyn Standalone> {
        Box::new(Self::new(config))
    }

    /// Loads properties, builds the injector and router, and binds the listener.
    fn prepare(
        &self,
    ) -> Result<(Injector, ServerSettings, Arc<dyn EventSink>, Router, StdTcpListener), StandaloneError>
    {
        let mut properties = Properties::load(self.config.conf_dir.as_deref(), self.config.mode)?;
        properties.apply_overrides(&self.config.override_properties)?;
        let settings = ServerSettings::from_properties(&properties)?;
        let events = sink_from_properties(&properties)?;

        let sessions = Arc::new(SessionStore::new());
        let mut bindings = Bindings::new();
        bindings
            .bind(self.config.mode)
            .bind(properties.clone())
            .bind(settings.clone())
            .bind_shared(Arc::clone(&sessions));
        self.config.application.configure(&mut bindings, &properties)?;
        if let Some(module) = &self.config.override_module {
            bindings.install(module.as_ref());
        }
        let injector = bindings.build();

        let session_state = SessionLayerState::new(sessions, &settings.session_cookie_name());
        let app = self
            .config
            .application
            .routes(&injector)?
            .layer(middleware::from_fn_with_state(session_state, session_layer));
        let router = if settings.context_path.is_empty() {
            app
        } else {
            Router::new().nest(&settings.context_path, app)
        };

        let port = self
            .config
            .port
            .or(settings.port)
            .unwrap_or(DEFAULT_PORT);
        let address = settings.bind_address(DEFAULT_BIND_HOST, port);
        let listener = StdTcpListener::bind(address.as_str()).map_err(|err| {
            StandaloneError::Bind {
                address: address.clone(),
                message: err.to_string(),
            }
        })?;
        listener.set_nonblocking(true).map_err(|err| StandaloneError::Bind {
            address,
            message: err.to_string(),
        })?;
        Ok((injector, settings, events, router, listener))
    }
}

impl Standalone for AxumStandalone {
    fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.local_addr.port()).or(self.config.port)
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
        if self.running.is_some() {
            return Err(StandaloneError::AlreadyStarted);
        }
        let mode = self.config.mode;
        let (injector, settings, events, router, listener) = self.prepare()?;
        let local_addr = listener.local_addr().map_err(|err| StandaloneError::Bind {
            address: String::from("listener"),
            message: err.to_string(),
        })?;

        let runtime = match Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("trellis-server")
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let err = StandaloneError::Runtime(err.to_string());
                return Err(record_failure(events.as_ref(), mode, err));
            }
        };
        let context_path: Arc<str> = Arc::from(settings.context_path.as_str());
        let service = MapRequestLayer::new(move |request: Request| {
            with_context_root(request, &context_path)
        })
        .layer(router);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let spawned = thread::Builder::new().name(format!("trellis-{}", local_addr.port())).spawn(
            move || {
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)
                        .map_err(|err| err.to_string())?;
                    axum::serve(listener, ServiceExt::<Request>::into_make_service(service))
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.await;
                        })
                        .await
                        .map_err(|err| err.to_string())
                })
            },
        );
        let join = match spawned {
            Ok(join) => join,
            Err(err) => {
                let err = StandaloneError::Runtime(err.to_string());
                return Err(record_failure(events.as_ref(), mode, err));
            }
        };

        let running = Running {
            injector,
            settings,
            local_addr,
            events,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        };
        let started = LifecycleEvent::new("standalone_started", mode);
        running.events.record(&started.with_server_url(running.server_url()));
        self.running = Some(running);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), StandaloneError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        if let Some(shutdown) = running.shutdown.take() {
            let _ = shutdown.send(());
        }
        let outcome = match running.join.take().map(JoinHandle::join) {
            None | Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(message))) => Err(StandaloneError::Serve(message)),
            Some(Err(_)) => Err(StandaloneError::Serve(String::from("server thread panicked"))),
        };
        let event = match &outcome {
            Ok(()) => LifecycleEvent::new("standalone_stopped", self.config.mode),
            Err(err) => {
                LifecycleEvent::new("standalone_failed", self.config.mode).with_detail(err.to_string())
            }
        };
        running.events.record(&event.with_server_url(running.server_url()));
        outcome
    }

    fn injector(&self) -> Option<&Injector> {
        self.running.as_ref().map(|running| &running.injector)
    }

    fn server_urls(&self) -> Vec<String> {
        self.running.iter().map(Running::server_url).collect()
    }

    fn base_urls(&self) -> Vec<String> {
        self.running
            .iter()
            .map(|running| format!("{}{}", running.server_url(), running.settings.context_path))
            .collect()
    }
}

/// Maps `<context>/` onto `<context>`, which the nested router serves as the
/// application root.
fn with_context_root(mut request: Request, context_path: &str) -> Request {
    let path = request.uri().path();
    let is_context_root = !context_path.is_empty()
        && path.len() == context_path.len() + 1
        && path.starts_with(context_path)
        && path.ends_with('/');
    if !is_context_root {
        return request;
    }
    let rewritten = match request.uri().query() {
        Some(query) => format!("{context_path}?{query}"),
        None => context_path.to_string(),
    };
    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = PathAndQuery::try_from(rewritten).ok();
    if let Ok(uri) = Uri::from_parts(parts) {
        *request.uri_mut() = uri;
    }
    request
}

/// Records a start failure and hands the error back.
fn record_failure(events: &dyn EventSink, mode: Mode, err: StandaloneError) -> StandaloneError {
    events.record(&LifecycleEvent::new("standalone_failed", mode).with_detail(err.to_string()));
    err
}

impl Drop for AxumStandalone {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
