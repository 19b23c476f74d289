use axum::http::Method;
use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref REPEATED_SLASH: Regex = Regex::new(r"/{2,}").unwrap();
    static ref PLACEHOLDER: Regex = Regex::new(r"<(?:[^<>:]+:)?([^<>:]+)>").unwrap();
}

/// Options attached to an explicit rule.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub methods: Vec<Method>,
    pub endpoint: Option<String>,
    pub subdomain: Option<String>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn methods<I: IntoIterator<Item = Method>>(mut self, methods: I) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    /// Methods the rule answers to; GET when none were given.
    pub(crate) fn methods_or_get(&self) -> Vec<Method> {
        if self.methods.is_empty() {
            vec![Method::GET]
        } else {
            self.methods.clone()
        }
    }
}

/// Base path of a view: the explicit override, or the view name with its
/// `View` suffix stripped and lowercased.
pub fn route_base(view_name: &str, explicit: Option<&str>) -> String {
    match explicit {
        Some(base) => base.trim_matches('/').to_string(),
        None => view_name
            .strip_suffix("View")
            .unwrap_or(view_name)
            .trim_end_matches(['-', '_'])
            .to_lowercase(),
    }
}

/// Names of the placeholders in a rule, in order.
pub fn placeholders(rule: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(rule)
        .map(|c| c[1].to_string())
        .collect()
}

/// Joins prefix, base and rule, then appends one placeholder per handler
/// parameter that is not already bound by the base.
pub fn build_rule(
    prefix: Option<&str>,
    base: &str,
    rule: &str,
    params: Option<&[String]>,
    base_args: &[String],
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
        parts.push(prefix.to_string());
    }
    if !base.is_empty() {
        parts.push(base.to_string());
    }
    parts.push(rule.to_string());
    for param in params.unwrap_or_default() {
        if !base_args.contains(param) {
            parts.push(format!("<{param}>"));
        }
    }

    let joined = format!("/{}", parts.join("/"));
    REPEATED_SLASH.replace_all(&joined, "/").into_owned()
}

pub fn strip_trailing_slash(rule: &str) -> String {
    let trimmed = rule.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn route_name(view_name: &str, handler_name: &str) -> String {
    format!("{view_name}:{handler_name}")
}

/// HTTP methods implied by a conventional handler name.
pub fn conventional_methods(handler_name: &str) -> Option<Vec<Method>> {
    let method = match handler_name {
        "get" | "index" => Method::GET,
        "post" => Method::POST,
        "put" => Method::PUT,
        "patch" => Method::PATCH,
        "delete" => Method::DELETE,
        _ => return None,
    };
    Some(vec![method])
}

/// `/question/<int:id_>` becomes `/question/:id_`.
pub fn to_axum_path(rule: &str) -> String {
    PLACEHOLDER
        .replace_all(rule, |c: &Captures<'_>| format!(":{}", &c[1]))
        .into_owned()
}

/// Rule with every placeholder name blanked, so `/a/<x>` and `/a/<int:y>`
/// compare equal.
pub fn path_shape(rule: &str) -> String {
    PLACEHOLDER.replace_all(rule, ":").into_owned()
}

/// Fills a rule's placeholders; `None` when one of them has no value.
pub fn expand(rule: &str, params: &[(&str, String)]) -> Option<String> {
    let mut missing = false;
    let url = PLACEHOLDER.replace_all(rule, |c: &Captures<'_>| {
        match params.iter().find(|(name, _)| *name == &c[1]) {
            Some((_, value)) => value.clone(),
            None => {
                missing = true;
                String::new()
            }
        }
    });
    if missing {
        None
    } else {
        Some(url.into_owned())
    }
}
