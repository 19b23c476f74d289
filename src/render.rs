use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use tracing::error;

/// Turns a template name plus named values into a response body.
///
/// Template expansion lives outside this crate; the server only depends on
/// this seam.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> anyhow::Result<String>;
    fn content_type(&self) -> &'static str;
}

/// Emits `{"template": ..., "context": ...}` instead of markup.
#[derive(Clone, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, template: &str, context: &Value) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&json!({
            "template": template,
            "context": context,
        }))?)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

pub fn render_response(renderer: &dyn Renderer, template: &str, context: &Value) -> Response {
    match renderer.render(template, context) {
        Ok(body) => ([(header::CONTENT_TYPE, renderer.content_type())], body).into_response(),
        Err(e) => {
            error!(error = %e, template, "render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "render failed").into_response()
        }
    }
}
