//! Class-style views on top of axum.
//!
//! A [`ViewDef`] groups handlers under one base path. [`Registry`] turns
//! every routable handler into one or more URL rules, picks its hook plan
//! once, and mounts a proxy per rule that runs hooks and handler against a
//! fresh [`RequestContext`].

use axum::http::Method;
use thiserror::Error;

pub mod context;
pub mod hooks;
pub mod registry;
pub mod rule;
pub mod view;

pub use context::{Reply, RequestContext};
pub use hooks::{AfterHook, BeforeHook, HookFuture};
pub use registry::{RegisterOptions, Registry, RouteTable};
pub use rule::RouteOptions;
pub use view::{Decorator, Handler, HandlerFn, HandlerFuture, Utility, ViewDef};

/// Registration-time failures. None of them can be recovered per request.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Incompatible decorator detected on {handler} in view {view}")]
    DecoratorIncompatible { view: String, handler: String },

    #[error("Endpoint `{0}` is already registered")]
    DuplicateEndpoint(String),

    #[error("Rule {rule} already handles {method}")]
    RouteConflict { rule: String, method: Method },

    #[error("Unknown hook `{hook}` on {handler} in view {view}")]
    UnknownHook {
        view: String,
        handler: String,
        hook: String,
    },

    #[error("Unsupported HTTP method {0}")]
    UnsupportedMethod(Method),
}
