use std::sync::Arc;

use axum::response::Response;
use futures::future::BoxFuture;
use tracing::debug;

use super::context::{Reply, RequestContext};
use super::view::HandlerFn;
use crate::error::AppError;

pub type HookFuture<'a, T> = BoxFuture<'a, Result<T, AppError>>;

type BeforeFn = dyn for<'a> Fn(&'a mut RequestContext) -> HookFuture<'a, Option<Reply>> + Send + Sync;
type AfterFn = dyn for<'a> Fn(&'a mut RequestContext, Response) -> HookFuture<'a, Reply> + Send + Sync;

/// Runs ahead of a handler. Returning `Some` ends the request with that reply.
#[derive(Clone)]
pub struct BeforeHook(Arc<BeforeFn>);

impl BeforeHook {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> HookFuture<'a, Option<Reply>> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call<'a>(&self, ctx: &'a mut RequestContext) -> HookFuture<'a, Option<Reply>> {
        (self.0)(ctx)
    }
}

/// Runs after a handler and may replace its response.
#[derive(Clone)]
pub struct AfterHook(Arc<AfterFn>);

impl AfterHook {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext, Response) -> HookFuture<'a, Reply> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call<'a>(&self, ctx: &'a mut RequestContext, response: Response) -> HookFuture<'a, Reply> {
        (self.0)(ctx, response)
    }
}

/// A hook given directly or by the name of a view utility.
#[derive(Clone)]
pub enum HookRef<H> {
    Direct(H),
    Named(String),
}

/// Hook lists declared on the handler itself.
#[derive(Clone)]
pub struct ExplicitHooks {
    pub before: Vec<HookRef<BeforeHook>>,
    pub after: Vec<HookRef<AfterHook>>,
}

/// How hooks wrap one registered handler, fixed at registration.
#[derive(Clone)]
pub enum HookPlan {
    /// The handler's own before/after lists, in declared order.
    Explicit {
        before: Vec<BeforeHook>,
        after: Vec<AfterHook>,
    },
    /// `before_request`, `before_<name>`, handler, `after_<name>`, `after_request`.
    Convention {
        before_request: Option<BeforeHook>,
        before: Option<BeforeHook>,
        after: Option<AfterHook>,
        after_request: Option<AfterHook>,
    },
}

impl HookPlan {
    pub fn kind(&self) -> &'static str {
        match self {
            HookPlan::Explicit { .. } => "explicit",
            HookPlan::Convention { .. } => "convention",
        }
    }

    fn before_chain(&self) -> Vec<&BeforeHook> {
        match self {
            HookPlan::Explicit { before, .. } => before.iter().collect(),
            HookPlan::Convention {
                before_request,
                before,
                ..
            } => before_request.iter().chain(before.iter()).collect(),
        }
    }

    fn after_chain(&self) -> Vec<&AfterHook> {
        match self {
            HookPlan::Explicit { after, .. } => after.iter().collect(),
            HookPlan::Convention {
                after,
                after_request,
                ..
            } => after.iter().chain(after_request.iter()).collect(),
        }
    }

    /// Before hooks, then the handler, then after hooks; every reply is
    /// normalized into a response on the way.
    pub(crate) async fn run(&self, handler: &HandlerFn, ctx: &mut RequestContext) -> Result<Response, AppError> {
        for hook in self.before_chain() {
            if let Some(reply) = hook.call(ctx).await? {
                debug!(handler = %ctx.handler(), "short-circuited by before hook");
                return Ok(ctx.respond(reply));
            }
        }

        let reply = handler.call(ctx).await?;
        let mut response = ctx.respond(reply);

        for hook in self.after_chain() {
            let reply = hook.call(ctx, response).await?;
            response = ctx.respond(reply);
        }

        Ok(response)
    }
}
