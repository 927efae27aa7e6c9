// crates/trellis-core/src/lib.rs
// ============================================================================
// Module: Trellis Core
// Description: Framework runtime for Trellis web applications.
// Purpose: Provide modes, properties, sessions, templates, and the standalone server.
// Dependencies: axum, handlebars, serde, tokio, toml
// ============================================================================

//! ## Overview
//! `trellis-core` holds the pieces a Trellis application runs on: the runtime
//! [`Mode`], layered [`Properties`], the opaque [`Injector`] handle, server-side
//! sessions with authenticity tokens, the handlebars [`TemplateEngine`] with its
//! authenticity helpers, and the [`Standalone`] contract with its default
//! [`AxumStandalone`] implementation.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod application;
pub mod authenticity;
pub mod config;
pub mod events;
pub mod injector;
pub mod mode;
pub mod session;
pub mod standalone;
pub mod template;
#[cfg(test)]
mod test_env;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use application::Application;
pub use application::ApplicationError;
pub use authenticity::AUTHENTICITY_FIELD;
pub use authenticity::AUTHENTICITY_HEADER;
pub use authenticity::require_authenticity_token;
pub use config::ConfigError;
pub use config::Properties;
pub use config::ServerSettings;
pub use events::EventSink;
pub use events::FileEventSink;
pub use events::LifecycleEvent;
pub use events::NoopEventSink;
pub use events::StderrEventSink;
pub use injector::Bindings;
pub use injector::Injector;
pub use injector::InjectorError;
pub use injector::Module;
pub use mode::MODE_ENV_VAR;
pub use mode::Mode;
pub use mode::ModeParseError;
pub use session::DEFAULT_MAX_SESSIONS;
pub use session::HttpContext;
pub use session::RequestContext;
pub use session::Session;
pub use session::SessionData;
pub use session::SessionLayerState;
pub use session::SessionStore;
pub use session::session_layer;
pub use standalone::AxumStandalone;
pub use standalone::Standalone;
pub use standalone::StandaloneConfig;
pub use standalone::StandaloneError;
pub use standalone::StandaloneFactory;
pub use standalone::find_available_port;
pub use template::AuthenticityFormHelper;
pub use template::AuthenticityTokenHelper;
pub use template::TemplateEngine;
pub use template::TemplateError;
