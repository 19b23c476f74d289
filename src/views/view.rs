use std::sync::Arc;

use futures::future::BoxFuture;

use super::context::{Reply, RequestContext};
use super::hooks::{AfterHook, BeforeHook, ExplicitHooks, HookRef};
use super::rule::RouteOptions;
use crate::error::AppError;

pub type HandlerFuture<'a> = BoxFuture<'a, Result<Reply, AppError>>;

type HandlerCallable = dyn for<'a> Fn(&'a mut RequestContext) -> HandlerFuture<'a> + Send + Sync;

#[derive(Clone)]
pub struct HandlerFn(Arc<HandlerCallable>);

impl HandlerFn {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call<'a>(&self, ctx: &'a mut RequestContext) -> HandlerFuture<'a> {
        (self.0)(ctx)
    }
}

/// Parameter list a handler exposes to rule synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Declared(Vec<String>),
    /// Hidden behind a decorator that did not forward it.
    Opaque,
}

/// Wraps a handler function in another one.
#[derive(Clone)]
pub struct Decorator {
    wrap: Arc<dyn Fn(HandlerFn) -> HandlerFn + Send + Sync>,
    preserves_signature: bool,
}

impl Decorator {
    /// A decorator that forwards the wrapped handler's parameter list.
    pub fn wrapping<F>(f: F) -> Self
    where
        F: Fn(HandlerFn) -> HandlerFn + Send + Sync + 'static,
    {
        Self {
            wrap: Arc::new(f),
            preserves_signature: true,
        }
    }

    /// A decorator that hides the wrapped handler's parameter list.
    pub fn opaque<F>(f: F) -> Self
    where
        F: Fn(HandlerFn) -> HandlerFn + Send + Sync + 'static,
    {
        Self {
            wrap: Arc::new(f),
            preserves_signature: false,
        }
    }

    pub fn apply(&self, handler: HandlerFn) -> HandlerFn {
        (self.wrap)(handler)
    }
}

/// One handler of a view with its routing and hook metadata.
#[derive(Clone)]
pub struct Handler {
    pub(crate) name: String,
    pub(crate) func: HandlerFn,
    pub(crate) signature: Signature,
    pub(crate) rules: Vec<(String, RouteOptions)>,
    pub(crate) hooks: Option<ExplicitHooks>,
}

impl Handler {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: HandlerFn::new(f),
            signature: Signature::Declared(Vec::new()),
            rules: Vec::new(),
            hooks: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares the path parameters the handler reads.
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signature = Signature::Declared(params.into_iter().map(Into::into).collect());
        self
    }

    /// Adds an explicit rule; may be called several times.
    pub fn route(mut self, rule: impl Into<String>, options: RouteOptions) -> Self {
        self.rules.push((rule.into(), options));
        self
    }

    pub fn before(self, hook: BeforeHook) -> Self {
        self.push_before(HookRef::Direct(hook))
    }

    pub fn before_named(self, utility: impl Into<String>) -> Self {
        self.push_before(HookRef::Named(utility.into()))
    }

    pub fn after(self, hook: AfterHook) -> Self {
        self.push_after(HookRef::Direct(hook))
    }

    pub fn after_named(self, utility: impl Into<String>) -> Self {
        self.push_after(HookRef::Named(utility.into()))
    }

    pub fn decorate(mut self, decorator: Decorator) -> Self {
        self.func = decorator.apply(self.func);
        if !decorator.preserves_signature {
            self.signature = Signature::Opaque;
        }
        self
    }

    fn explicit_hooks(&mut self) -> &mut ExplicitHooks {
        self.hooks.get_or_insert_with(|| ExplicitHooks {
            before: Vec::new(),
            after: Vec::new(),
        })
    }

    fn push_before(mut self, hook: HookRef<BeforeHook>) -> Self {
        self.explicit_hooks().before.push(hook);
        self
    }

    fn push_after(mut self, hook: HookRef<AfterHook>) -> Self {
        self.explicit_hooks().after.push(hook);
        self
    }
}

/// Class-level helper: never routed, usable from explicit hook lists.
#[derive(Clone)]
pub enum Utility {
    Before(BeforeHook),
    After(AfterHook),
}

#[derive(Clone)]
pub enum Member {
    Handler(Handler),
    Before(BeforeHook),
    After(AfterHook),
    Utility(Utility),
}

/// Names the view machinery itself claims.
const BASE_MEMBERS: &[&str] = &[
    "register",
    "register_with",
    "route_base",
    "route_prefix",
    "subdomain",
    "trailing_slash",
    "decorator",
    "member",
    "handler",
    "utility",
    "before_request",
    "after_request",
];

pub fn is_routable(name: &str) -> bool {
    !(name.starts_with('_')
        || name.starts_with("before_")
        || name.starts_with("after_")
        || BASE_MEMBERS.contains(&name))
}

/// A group of handlers sharing a base path.
#[derive(Clone)]
pub struct ViewDef {
    pub(crate) name: String,
    pub(crate) route_base: Option<String>,
    pub(crate) route_prefix: Option<String>,
    pub(crate) subdomain: Option<String>,
    pub(crate) trailing_slash: bool,
    pub(crate) decorators: Vec<Decorator>,
    pub(crate) members: Vec<(String, Member)>,
}

impl ViewDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            route_base: None,
            route_prefix: None,
            subdomain: None,
            trailing_slash: true,
            decorators: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route_base(mut self, base: impl Into<String>) -> Self {
        self.route_base = Some(base.into());
        self
    }

    pub fn route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = Some(prefix.into());
        self
    }

    pub fn subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    pub fn trailing_slash(mut self, enabled: bool) -> Self {
        self.trailing_slash = enabled;
        self
    }

    /// Wraps every handler of the view.
    pub fn decorator(mut self, decorator: Decorator) -> Self {
        self.decorators.push(decorator);
        self
    }

    pub fn member(mut self, name: impl Into<String>, member: Member) -> Self {
        self.members.push((name.into(), member));
        self
    }

    pub fn handler(self, handler: Handler) -> Self {
        let name = handler.name.clone();
        self.member(name, Member::Handler(handler))
    }

    pub fn utility(self, name: impl Into<String>, utility: Utility) -> Self {
        self.member(name, Member::Utility(utility))
    }

    pub fn before_request(self, hook: BeforeHook) -> Self {
        self.member("before_request", Member::Before(hook))
    }

    pub fn after_request(self, hook: AfterHook) -> Self {
        self.member("after_request", Member::After(hook))
    }

    /// Convention hook run before the named handler.
    pub fn before(self, handler: &str, hook: BeforeHook) -> Self {
        self.member(format!("before_{handler}"), Member::Before(hook))
    }

    /// Convention hook run after the named handler.
    pub fn after(self, handler: &str, hook: AfterHook) -> Self {
        self.member(format!("after_{handler}"), Member::After(hook))
    }

    pub(crate) fn handlers(&self) -> impl Iterator<Item = (&str, &Handler)> {
        self.members.iter().filter_map(|(name, member)| match member {
            Member::Handler(handler) => Some((name.as_str(), handler)),
            _ => None,
        })
    }

    pub(crate) fn before_hook(&self, name: &str) -> Option<BeforeHook> {
        self.members.iter().find_map(|(n, member)| match member {
            Member::Before(hook) if n == name => Some(hook.clone()),
            _ => None,
        })
    }

    pub(crate) fn after_hook(&self, name: &str) -> Option<AfterHook> {
        self.members.iter().find_map(|(n, member)| match member {
            Member::After(hook) if n == name => Some(hook.clone()),
            _ => None,
        })
    }

    /// Resolves a named before hook among utilities and hook members.
    pub(crate) fn named_before(&self, name: &str) -> Option<BeforeHook> {
        self.members.iter().find_map(|(n, member)| match member {
            Member::Utility(Utility::Before(hook)) | Member::Before(hook) if n == name => {
                Some(hook.clone())
            }
            _ => None,
        })
    }

    pub(crate) fn named_after(&self, name: &str) -> Option<AfterHook> {
        self.members.iter().find_map(|(n, member)| match member {
            Member::Utility(Utility::After(hook)) | Member::After(hook) if n == name => {
                Some(hook.clone())
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_hook_and_base_names_are_not_routable() {
        assert!(is_routable("show"));
        assert!(is_routable("get"));
        assert!(!is_routable("_helper"));
        assert!(!is_routable("before_show"));
        assert!(!is_routable("after_show"));
        assert!(!is_routable("register"));
        assert!(!is_routable("before_request"));
    }
}
