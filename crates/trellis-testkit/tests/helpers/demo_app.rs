// crates/trellis-testkit/tests/helpers/demo_app.rs
// ============================================================================
// Module: Demo Application
// Description: Small Trellis application exercised by the testkit suites.
// Purpose: Cover injected services, templates, sessions, and protected posts.
// Dependencies: axum, serde_json, trellis-core
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Form;
use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;
use trellis_core::Application;
use trellis_core::ApplicationError;
use trellis_core::Bindings;
use trellis_core::HttpContext;
use trellis_core::Injector;
use trellis_core::Mode;
use trellis_core::Properties;
use trellis_core::RequestContext;
use trellis_core::TemplateEngine;
use trellis_core::require_authenticity_token;

/// Template rendered at `/form`.
pub const FORM_TEMPLATE: &str =
    "<form method=\"post\" action=\"submit\">{{authenticity_form}}<input name=\"name\" /></form>";

/// Service resolved from the injector by `/greeting/{name}`.
pub trait Greeter: Send + Sync {
    fn greet(&self, name: &str) -> String;
}

pub struct PoliteGreeter;

impl Greeter for PoliteGreeter {
    fn greet(&self, name: &str) -> String {
        format!("Hello, {name}")
    }
}

pub struct PirateGreeter;

impl Greeter for PirateGreeter {
    fn greet(&self, name: &str) -> String {
        format!("Ahoy, {name}")
    }
}

#[derive(Default)]
pub struct DemoApplication;

impl Application for DemoApplication {
    fn configure(
        &self,
        bindings: &mut Bindings,
        _properties: &Properties,
    ) -> Result<(), ApplicationError> {
        let mut templates = TemplateEngine::new();
        templates
            .register_template("form", FORM_TEMPLATE)
            .map_err(|err| ApplicationError::new(err.to_string()))?;
        bindings.bind(templates).bind_shared::<dyn Greeter>(Arc::new(PoliteGreeter));
        Ok(())
    }

    fn routes(&self, injector: &Injector) -> Result<Router, ApplicationError> {
        let greeter = injector.require::<dyn Greeter>()?;
        let templates = injector.require::<TemplateEngine>()?;
        let properties = injector.require::<Properties>()?;
        let mode = injector.require::<Mode>()?;

        let protected = Router::new()
            .route("/submit", post(submit))
            .route("/echo-json", post(|Json(body): Json<Value>| async move { Json(body) }))
            .route_layer(middleware::from_fn(require_authenticity_token));

        Ok(Router::new()
            .route("/", get(|| async { "home" }))
            .route("/mode", get(move || async move { mode.as_str() }))
            .route(
                "/greeting/{name}",
                get(move |Path(name): Path<String>| async move { greeter.greet(&name) }),
            )
            .route(
                "/form",
                get(move |context: HttpContext| async move { render_form(&templates, context) }),
            )
            .route(
                "/token",
                get(|context: HttpContext| async move { context.session().authenticity_token() }),
            )
            .route(
                "/property/{key}",
                get(move |Path(key): Path<String>| async move {
                    match properties.get(&key) {
                        Some(value) => (StatusCode::OK, value.to_string()),
                        None => (StatusCode::NOT_FOUND, String::new()),
                    }
                }),
            )
            .route("/status", get(|| async { Json(json!({"ok": true, "service": "demo"})) }))
            .route("/headers", get(echo_header))
            .merge(protected))
    }
}

fn render_form(templates: &TemplateEngine, context: HttpContext) -> Response {
    match templates.render("form", &json!({}), Arc::new(context)) {
        Ok(html) => Html(html).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn submit(Form(fields): Form<BTreeMap<String, String>>) -> String {
    format!("saved {}", fields.get("name").map_or("", String::as_str))
}

async fn echo_header(headers: HeaderMap) -> String {
    headers.get("x-demo").and_then(|value| value.to_str().ok()).unwrap_or("missing").to_string()
}
