// crates/trellis-core/src/template.rs
// ============================================================================
// Module: Templates
// Description: Handlebars template engine with authenticity token helpers.
// Purpose: Render views with access to the current request's session.
// Dependencies: handlebars, serde
// ============================================================================

//! ## Overview
//! [`TemplateEngine`] owns the registered handlebars templates. Each render
//! binds the `authenticity_form` and `authenticity_token` helpers to the
//! request context being rendered. Both helpers take no parameters and no block
//! parameters, read the session token only when they are invoked, and write
//! straight to the output, so the token is substituted without HTML escaping.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::sync::Arc;

use handlebars::Handlebars;
use handlebars::Helper;
use handlebars::HelperDef;
use handlebars::HelperResult;
use handlebars::Output;
use handlebars::RenderContext;
use handlebars::RenderError;
use handlebars::RenderErrorReason;
use serde::Serialize;
use thiserror::Error;

use crate::session::RequestContext;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Helper name for the hidden authenticity form field.
pub const AUTHENTICITY_FORM_HELPER: &str = "authenticity_form";
/// Helper name for the bare authenticity token.
pub const AUTHENTICITY_TOKEN_HELPER: &str = "authenticity_token";
/// File extension of templates picked up by [`TemplateEngine::load_directory`].
const TEMPLATE_EXTENSION: &str = "hbs";

// ============================================================================
// SECTION: Template Engine
// ============================================================================

/// Registry of named templates.
#[derive(Clone)]
pub struct TemplateEngine {
    /// Handlebars registry holding compiled templates.
    registry: Handlebars<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Creates an engine with no templates.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Handlebars::new(),
        }
    }

    /// Compiles and registers `source` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] when the template does not compile.
    pub fn register_template(&mut self, name: &str, source: &str) -> Result<(), TemplateError> {
        self.registry.register_template_string(name, source)?;
        Ok(())
    }

    /// Registers every `*.hbs` file in `dir` under its file stem.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] when the directory or a template cannot be read
    /// or compiled.
    pub fn load_directory(&mut self, dir: &Path) -> Result<usize, TemplateError> {
        let entries = fs::read_dir(dir)
            .map_err(|err| TemplateError::Io(format!("{}: {err}", dir.display())))?;
        let mut loaded = 0;
        for entry in entries {
            let path = entry.map_err(|err| TemplateError::Io(err.to_string()))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let source = fs::read_to_string(&path)
                .map_err(|err| TemplateError::Io(format!("{}: {err}", path.display())))?;
            self.register_template(name, &source)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Returns true when a template named `name` is registered.
    #[must_use]
    pub fn has_template(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }

    /// Renders the registered template `name` for the given request.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Render`] when rendering fails, including helper
    /// misuse.
    pub fn render<T: Serialize>(
        &self,
        name: &str,
        data: &T,
        context: Arc<dyn RequestContext>,
    ) -> Result<String, TemplateError> {
        Ok(self.request_registry(context).render(name, data)?)
    }

    /// Renders an inline template source for the given request.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Render`] when compiling or rendering fails.
    pub fn render_template<T: Serialize>(
        &self,
        source: &str,
        data: &T,
        context: Arc<dyn RequestContext>,
    ) -> Result<String, TemplateError> {
        Ok(self.request_registry(context).render_template(source, data)?)
    }

    /// Returns a registry copy with the request-bound helpers installed.
    fn request_registry(&self, context: Arc<dyn RequestContext>) -> Handlebars<'static> {
        let mut registry = self.registry.clone();
        registry.register_helper(
            AUTHENTICITY_FORM_HELPER,
            Box::new(AuthenticityFormHelper::new(Arc::clone(&context))),
        );
        registry.register_helper(
            AUTHENTICITY_TOKEN_HELPER,
            Box::new(AuthenticityTokenHelper::new(context)),
        );
        registry
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Writes `<input type="hidden" value="TOKEN" name="authenticityToken" />`.
pub struct AuthenticityFormHelper {
    /// Request whose session supplies the token at render time.
    context: Arc<dyn RequestContext>,
}

impl AuthenticityFormHelper {
    /// Binds the helper to a request context without touching its session.
    #[must_use]
    pub fn new(context: Arc<dyn RequestContext>) -> Self {
        Self {
            context,
        }
    }
}

impl HelperDef for AuthenticityFormHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        helper: &Helper<'rc>,
        _registry: &'reg Handlebars<'reg>,
        _data: &'rc handlebars::Context,
        _render: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        ensure_bare_invocation(helper)?;
        let token = self.context.session().authenticity_token();
        out.write(&format!(r#"<input type="hidden" value="{token}" name="authenticityToken" />"#))?;
        Ok(())
    }
}

/// Writes the bare authenticity token.
pub struct AuthenticityTokenHelper {
    /// Request whose session supplies the token at render time.
    context: Arc<dyn RequestContext>,
}

impl AuthenticityTokenHelper {
    /// Binds the helper to a request context without touching its session.
    #[must_use]
    pub fn new(context: Arc<dyn RequestContext>) -> Self {
        Self {
            context,
        }
    }
}

impl HelperDef for AuthenticityTokenHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        helper: &Helper<'rc>,
        _registry: &'reg Handlebars<'reg>,
        _data: &'rc handlebars::Context,
        _render: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        ensure_bare_invocation(helper)?;
        out.write(&self.context.session().authenticity_token())?;
        Ok(())
    }
}

/// Rejects arguments and block parameters.
fn ensure_bare_invocation(helper: &Helper<'_>) -> Result<(), RenderError> {
    if !helper.params().is_empty() || !helper.hash().is_empty() {
        return Err(RenderErrorReason::Other(format!(
            "{} does not accept parameters",
            helper.name()
        ))
        .into());
    }
    if helper.block_param().is_some() || helper.block_param_pair().is_some() {
        return Err(RenderErrorReason::Other(format!(
            "{} does not accept loop variables",
            helper.name()
        ))
        .into());
    }
    Ok(())
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Template errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template source failed to compile.
    #[error("template syntax error: {0}")]
    Syntax(#[from] handlebars::TemplateError),
    /// Rendering failed.
    #[error("template render error: {0}")]
    Render(#[from] RenderError),
    /// Template files could not be read.
    #[error("template io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
