use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter},
    Form, Router,
};
use axum_extra::extract::CookieJar;
use tracing::{debug, info};

use super::context::RequestContext;
use super::hooks::{HookPlan, HookRef};
use super::rule;
use super::view::{is_routable, Handler, HandlerFn, Signature, ViewDef};
use super::DispatchError;
use crate::{
    auth::jwt::{current_user, SessionKeys},
    db::DbSession,
    error::AppError,
    state::AppState,
};

/// Per-registration overrides of a view's own settings.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub route_base: Option<String>,
    pub route_prefix: Option<String>,
    pub subdomain: Option<String>,
    pub trailing_slash: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub endpoint: String,
    pub rule: String,
    pub methods: Vec<Method>,
    pub subdomain: Option<String>,
    pub view: String,
    pub handler: String,
}

/// Every rule the registry produced, addressable by endpoint.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn get(&self, endpoint: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.endpoint == endpoint)
    }

    pub fn url_for(&self, endpoint: &str, params: &[(&str, String)]) -> Option<String> {
        self.get(endpoint)
            .and_then(|entry| rule::expand(&entry.rule, params))
    }
}

/// The wrapped handler shared by all rules of one handler.
struct Proxy {
    handler: String,
    func: HandlerFn,
    plan: HookPlan,
}

impl Proxy {
    async fn serve(
        &self,
        state: AppState,
        routes: Arc<RouteTable>,
        endpoint: String,
        subdomain: Option<String>,
        req: Request,
    ) -> Response {
        let (mut parts, body) = req.into_parts();

        if let Some(subdomain) = subdomain.as_deref() {
            let host = parts
                .headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default();
            if !host.starts_with(&format!("{subdomain}.")) {
                return StatusCode::NOT_FOUND.into_response();
            }
        }

        let params = Path::<HashMap<String, String>>::from_request_parts(&mut parts, &state)
            .await
            .map(|Path(p)| p)
            .unwrap_or_default();
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let cookies = CookieJar::from_headers(&parts.headers);
        let method = parts.method.clone();
        let form = if method == Method::POST {
            Form::<HashMap<String, String>>::from_request(Request::from_parts(parts, body), &state)
                .await
                .map(|Form(f)| f)
                .unwrap_or_default()
        } else {
            HashMap::new()
        };

        let db = match DbSession::begin(&state.db).await {
            Ok(db) => db,
            Err(e) => return AppError::from(e).into_response(),
        };

        let mut ctx = RequestContext::new(
            db,
            state,
            routes,
            self.handler.clone(),
            endpoint,
            method,
            params,
            query,
            form,
            cookies,
        );
        let keys = SessionKeys::from_ref(&ctx.state);
        ctx.current_user = current_user(&mut ctx.db, &ctx.cookies, &keys).await;

        let response = match self.plan.run(&self.func, &mut ctx).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        };

        let RequestContext { db, cookies, .. } = ctx;
        db.remove();
        (cookies, response).into_response()
    }
}

/// Collects views and turns their handlers into routes.
#[derive(Default)]
pub struct Registry {
    routes: Vec<(RouteEntry, Arc<Proxy>)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, view: ViewDef) -> Result<&mut Self, DispatchError> {
        self.register_with(view, RegisterOptions::default())
    }

    pub fn register_with(
        &mut self,
        view: ViewDef,
        options: RegisterOptions,
    ) -> Result<&mut Self, DispatchError> {
        let explicit_base = options.route_base.or_else(|| view.route_base.clone());
        let prefix = options.route_prefix.or_else(|| view.route_prefix.clone());
        let subdomain = options.subdomain.or_else(|| view.subdomain.clone());
        let trailing_slash = options.trailing_slash.unwrap_or(view.trailing_slash);

        let base = rule::route_base(&view.name, explicit_base.as_deref());
        let base_args = explicit_base
            .as_deref()
            .map(rule::placeholders)
            .unwrap_or_default();

        for (name, handler) in view.handlers() {
            if !is_routable(name) {
                debug!(view = %view.name, handler = name, "skipping non-routable member");
                continue;
            }

            let plan = hook_plan(&view, handler)?;
            let func = view
                .decorators
                .iter()
                .fold(handler.func.clone(), |func, decorator| decorator.apply(func));
            let route_name = rule::route_name(&view.name, name);
            let proxy = Arc::new(Proxy {
                handler: route_name.clone(),
                func,
                plan,
            });

            let mounts: Vec<(String, String, Vec<Method>, Option<String>)> = if !handler.rules.is_empty() {
                let many = handler.rules.len() > 1;
                handler
                    .rules
                    .iter()
                    .enumerate()
                    .map(|(idx, (raw, opts))| {
                        let endpoint = match &opts.endpoint {
                            Some(endpoint) => endpoint.clone(),
                            None if many => format!("{route_name}_{idx}"),
                            None => route_name.clone(),
                        };
                        let rule = rule::build_rule(prefix.as_deref(), &base, raw, None, &base_args);
                        let sub = subdomain.clone().or_else(|| opts.subdomain.clone());
                        (endpoint, rule, opts.methods_or_get(), sub)
                    })
                    .collect()
            } else {
                let params = declared_params(&view, handler)?;
                match rule::conventional_methods(name) {
                    Some(methods) => {
                        let mut rule = rule::build_rule(prefix.as_deref(), &base, "/", Some(params), &base_args);
                        if !trailing_slash {
                            rule = rule::strip_trailing_slash(&rule);
                        }
                        vec![(route_name.clone(), rule, methods, subdomain.clone())]
                    }
                    None => {
                        let route = if trailing_slash {
                            format!("/{name}/")
                        } else {
                            format!("/{name}")
                        };
                        let rule = rule::build_rule(prefix.as_deref(), &base, &route, Some(params), &base_args);
                        vec![(route_name.clone(), rule, vec![Method::GET], subdomain.clone())]
                    }
                }
            };

            for (endpoint, rule, methods, sub) in mounts {
                self.add(
                    RouteEntry {
                        endpoint,
                        rule,
                        methods,
                        subdomain: sub,
                        view: view.name.clone(),
                        handler: name.to_string(),
                    },
                    proxy.clone(),
                )?;
            }
        }

        info!(view = %view.name, routes = self.routes.len(), "view registered");
        Ok(self)
    }

    fn add(&mut self, entry: RouteEntry, proxy: Arc<Proxy>) -> Result<(), DispatchError> {
        if self.routes.iter().any(|(e, _)| e.endpoint == entry.endpoint) {
            return Err(DispatchError::DuplicateEndpoint(entry.endpoint));
        }
        debug!(
            endpoint = %entry.endpoint,
            rule = %entry.rule,
            methods = ?entry.methods,
            hooks = proxy.plan.kind(),
            "rule added"
        );
        self.routes.push((entry, proxy));
        Ok(())
    }

    pub fn table(&self) -> RouteTable {
        RouteTable {
            entries: self.routes.iter().map(|(e, _)| e.clone()).collect(),
        }
    }

    pub fn into_router(self) -> Result<Router<AppState>, DispatchError> {
        let table = Arc::new(self.table());
        let mut seen: HashMap<(String, Method), Arc<Proxy>> = HashMap::new();
        // Paths that differ only by placeholder names cannot both be mounted.
        let mut shapes: HashMap<String, String> = HashMap::new();
        let mut paths: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();

        for (entry, proxy) in self.routes {
            let path = rule::to_axum_path(&entry.rule);
            let shape = rule::path_shape(&entry.rule);
            match shapes.get(&shape) {
                Some(mounted) if *mounted != path => {
                    return Err(DispatchError::RouteConflict {
                        rule: entry.rule.clone(),
                        method: entry.methods.first().cloned().unwrap_or(Method::GET),
                    })
                }
                Some(_) => {}
                None => {
                    shapes.insert(shape.clone(), path.clone());
                }
            }

            let mut filter: Option<MethodFilter> = None;
            for method in &entry.methods {
                match seen.get(&(shape.clone(), method.clone())) {
                    // Same handler listed the same rule twice: already mounted.
                    Some(owner) if Arc::ptr_eq(owner, &proxy) => continue,
                    Some(_) => {
                        return Err(DispatchError::RouteConflict {
                            rule: entry.rule.clone(),
                            method: method.clone(),
                        })
                    }
                    None => {
                        seen.insert((shape.clone(), method.clone()), proxy.clone());
                    }
                }
                let next = method_filter(method)?;
                filter = Some(filter.map_or(next, |f| f.or(next)));
            }
            let Some(filter) = filter else {
                continue;
            };

            let routes = table.clone();
            let endpoint = entry.endpoint.clone();
            let subdomain = entry.subdomain.clone();
            let handler = move |State(state): State<AppState>, req: Request| async move {
                proxy.serve(state, routes, endpoint, subdomain, req).await
            };

            let method_router = paths.remove(&path).unwrap_or_else(MethodRouter::new);
            paths.insert(path, method_router.on(filter, handler));
            debug!(rule = %entry.rule, endpoint = %entry.endpoint, "route mounted");
        }

        Ok(paths
            .into_iter()
            .fold(Router::new(), |router, (path, method_router)| {
                router.route(&path, method_router)
            }))
    }
}

fn method_filter(method: &Method) -> Result<MethodFilter, DispatchError> {
    Ok(match method.as_str() {
        "GET" => MethodFilter::GET,
        "POST" => MethodFilter::POST,
        "PUT" => MethodFilter::PUT,
        "PATCH" => MethodFilter::PATCH,
        "DELETE" => MethodFilter::DELETE,
        "HEAD" => MethodFilter::HEAD,
        "OPTIONS" => MethodFilter::OPTIONS,
        "TRACE" => MethodFilter::TRACE,
        _ => return Err(DispatchError::UnsupportedMethod(method.clone())),
    })
}

fn declared_params<'h>(view: &ViewDef, handler: &'h Handler) -> Result<&'h [String], DispatchError> {
    match &handler.signature {
        Signature::Declared(params) => Ok(params.as_slice()),
        Signature::Opaque => Err(DispatchError::DecoratorIncompatible {
            view: view.name.clone(),
            handler: handler.name.clone(),
        }),
    }
}

fn hook_plan(view: &ViewDef, handler: &Handler) -> Result<HookPlan, DispatchError> {
    let Some(explicit) = &handler.hooks else {
        return Ok(HookPlan::Convention {
            before_request: view.before_hook("before_request"),
            before: view.before_hook(&format!("before_{}", handler.name)),
            after: view.after_hook(&format!("after_{}", handler.name)),
            after_request: view.after_hook("after_request"),
        });
    };

    let unknown = |hook: &str| DispatchError::UnknownHook {
        view: view.name.clone(),
        handler: handler.name.clone(),
        hook: hook.to_string(),
    };
    let before = explicit
        .before
        .iter()
        .map(|hook| match hook {
            HookRef::Direct(hook) => Ok(hook.clone()),
            HookRef::Named(name) => view.named_before(name).ok_or_else(|| unknown(name)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let after = explicit
        .after
        .iter()
        .map(|hook| match hook {
            HookRef::Direct(hook) => Ok(hook.clone()),
            HookRef::Named(name) => view.named_after(name).ok_or_else(|| unknown(name)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HookPlan::Explicit { before, after })
}
