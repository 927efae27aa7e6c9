// crates/trellis-core/src/application.rs
// ============================================================================
// Module: Application
// Description: Contract implemented by Trellis web applications.
// Purpose: Let a standalone server configure bindings and mount routes.
// Dependencies: axum
// ============================================================================

//! ## Overview
//! An [`Application`] contributes bindings to the injector and builds its axum
//! router from the finished [`Injector`]. The standalone server wraps the
//! router with the session layer and mounts it under the configured context
//! path, so applications register paths relative to their own root.

use axum::Router;
use thiserror::Error;

use crate::config::Properties;
use crate::injector::Bindings;
use crate::injector::Injector;
use crate::injector::InjectorError;

/// A web application served by a standalone server.
pub trait Application: Send + Sync {
    /// Adds application bindings. Runs before the override module.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationError`] when the application cannot be configured.
    fn configure(
        &self,
        _bindings: &mut Bindings,
        _properties: &Properties,
    ) -> Result<(), ApplicationError> {
        Ok(())
    }

    /// Builds the application router.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationError`] when a required binding is missing.
    fn routes(&self, injector: &Injector) -> Result<Router, ApplicationError>;
}

/// Application configuration failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ApplicationError(pub String);

impl ApplicationError {
    /// Creates an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<InjectorError> for ApplicationError {
    fn from(err: InjectorError) -> Self {
        Self(err.to_string())
    }
}
