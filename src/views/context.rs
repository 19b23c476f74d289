use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    http::{Extensions, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde_json::Value;

use super::registry::RouteTable;
use crate::{
    auth::repo_types::User, db::DbSession, error::AppError, render::render_response,
    state::AppState,
};

/// What handlers and hooks hand back.
pub enum Reply {
    /// Template name plus named values for the renderer.
    Render { template: &'static str, context: Value },
    /// 303 to the given location.
    Redirect(String),
    /// Plain text body with status 200.
    Text(String),
    /// Already a response; passed through untouched.
    Response(Response),
}

impl Reply {
    pub fn render(template: &'static str, context: Value) -> Self {
        Reply::Render { template, context }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Reply::Redirect(location.into())
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<StatusCode> for Reply {
    fn from(status: StatusCode) -> Self {
        Reply::Response(status.into_response())
    }
}

/// Everything one request carries through its hooks and handler.
pub struct RequestContext {
    pub db: DbSession,
    pub current_user: Option<User>,
    pub method: Method,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
    pub cookies: CookieJar,
    /// Values hooks leave behind for the handler.
    pub locals: Extensions,
    pub state: AppState,
    routes: Arc<RouteTable>,
    handler: String,
    endpoint: String,
}

impl RequestContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        db: DbSession,
        state: AppState,
        routes: Arc<RouteTable>,
        handler: String,
        endpoint: String,
        method: Method,
        params: HashMap<String, String>,
        query: HashMap<String, String>,
        form: HashMap<String, String>,
        cookies: CookieJar,
    ) -> Self {
        Self {
            db,
            current_user: None,
            method,
            params,
            query,
            form,
            cookies,
            locals: Extensions::new(),
            state,
            routes,
            handler,
            endpoint,
        }
    }

    /// `<View>:<handler>` of the handler serving this request.
    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_post(&self) -> bool {
        self.method == Method::POST
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user.is_some()
    }

    pub fn param(&self, name: &str) -> Result<&str, AppError> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| AppError::BadRequest(format!("missing path parameter `{name}`")))
    }

    pub fn url_for(&self, endpoint: &str, params: &[(&str, String)]) -> Result<String, AppError> {
        self.routes
            .url_for(endpoint, params)
            .ok_or_else(|| AppError::UnknownEndpoint(endpoint.to_string()))
    }

    /// Turns any reply into a response. Rendered templates always see the
    /// current user's name.
    pub fn respond(&self, reply: Reply) -> Response {
        match reply {
            Reply::Render {
                template,
                mut context,
            } => {
                if let Value::Object(map) = &mut context {
                    map.entry("current_user").or_insert_with(|| {
                        self.current_user
                            .as_ref()
                            .map(|u| Value::String(u.username.clone()))
                            .unwrap_or(Value::Null)
                    });
                }
                render_response(self.state.renderer.as_ref(), template, &context)
            }
            Reply::Redirect(location) => Redirect::to(&location).into_response(),
            Reply::Text(text) => text.into_response(),
            Reply::Response(response) => response,
        }
    }
}
