//! Route patterns and the frozen route table

use crate::driver::CommandResult;
use crate::plugin::{CommandSpec, MethodMap, PluginError};
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use warp::http::Method;

/// Handler for a raw route installed by a server extension
pub type RawHandler = Arc<dyn Fn(RouteRequest) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// What a raw route handler gets to see of a request
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RouteRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A path pattern such as `/session/:sessionId/element/:elementId/click`
#[derive(Debug, Clone)]
pub struct RoutePattern {
    path: String,
    regex: Regex,
    params: Vec<String>,
}

impl RoutePattern {
    pub fn parse(path: &str) -> Result<Self, PluginError> {
        let invalid = |reason: &str| PluginError::InvalidRoute {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if !path.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let trimmed = path.trim_end_matches('/');
        let mut params = Vec::new();
        let mut source = String::from("^");
        for segment in trimmed.split('/').skip(1) {
            source.push('/');
            match segment.strip_prefix(':') {
                Some("") => return Err(invalid("empty parameter name")),
                Some(name) => {
                    if params.iter().any(|p| p == name) {
                        return Err(invalid("duplicate parameter name"));
                    }
                    params.push(name.to_string());
                    source.push_str("([^/]+)");
                }
                None if segment.is_empty() => return Err(invalid("empty path segment")),
                None => source.push_str(&regex::escape(segment)),
            }
        }
        source.push_str("/?$");

        let regex = Regex::new(&source).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            path: path.to_string(),
            regex,
            params,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// URL parameter names in pattern order
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Parameter values when `path` matches
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let captures = self.regex.captures(path)?;
        Some(
            self.params
                .iter()
                .zip(captures.iter().skip(1))
                .map(|(name, value)| {
                    (
                        name.clone(),
                        value.map(|m| m.as_str().to_string()).unwrap_or_default(),
                    )
                })
                .collect(),
        )
    }

    /// Pattern with parameter names erased, used to detect conflicting bindings
    pub(crate) fn shape(&self) -> String {
        let shaped: Vec<&str> = self
            .path
            .trim_end_matches('/')
            .split('/')
            .map(|segment| if segment.starts_with(':') { ":" } else { segment })
            .collect();
        shaped.join("/")
    }
}

#[derive(Clone)]
pub enum RouteTarget {
    Command(CommandSpec),
    Raw(RawHandler),
}

/// One (method, pattern) binding and who installed it
#[derive(Clone)]
pub struct Route {
    pub(crate) pattern: RoutePattern,
    pub(crate) method: Method,
    pub(crate) target: RouteTarget,
    pub(crate) owner: String,
}

impl Route {
    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &RouteTarget {
        &self.target
    }

    /// `"server"` for built-in routes, otherwise the plugin name
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

pub enum RouteMatch<'a> {
    Found {
        route: &'a Route,
        params: Vec<(String, String)>,
    },
    MethodNotAllowed,
    NotFound,
}

/// Immutable route table served once the server is built
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub(crate) fn new(mut routes: Vec<Route>) -> Self {
        // Raw routes take precedence over command bindings.
        routes.sort_by_key(|route| matches!(route.target, RouteTarget::Command(_)));
        Self { routes }
    }

    pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let mut path_known = false;
        for route in &self.routes {
            if let Some(params) = route.pattern.matches(path) {
                if &route.method == method {
                    return RouteMatch::Found { route, params };
                }
                path_known = true;
            }
        }
        if path_known {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Whether any command route binds `command`
    pub fn binds_command(&self, command: &str) -> bool {
        self.routes.iter().any(|route| {
            matches!(&route.target, RouteTarget::Command(spec) if spec.command == command)
        })
    }
}

/// Commands the server answers before any plugin is loaded
pub fn base_method_map() -> MethodMap {
    MethodMap::new()
        .route("/status", Method::GET, CommandSpec::new("getStatus"))
        .route("/session/:sessionId", Method::DELETE, CommandSpec::new("deleteSession"))
        .route("/session/:sessionId/url", Method::GET, CommandSpec::new("getUrl"))
        .route(
            "/session/:sessionId/url",
            Method::POST,
            CommandSpec::new("setUrl").required(["url"]),
        )
        .route("/session/:sessionId/title", Method::GET, CommandSpec::new("title"))
        .route(
            "/session/:sessionId/timeouts",
            Method::POST,
            CommandSpec::new("timeouts").optional(["implicit", "pageLoad", "script"]),
        )
        .route(
            "/session/:sessionId/element",
            Method::POST,
            CommandSpec::new("findElement").required(["using", "value"]),
        )
        .route(
            "/session/:sessionId/element/:elementId/click",
            Method::POST,
            CommandSpec::new("click"),
        )
        .route(
            "/session/:sessionId/element/:elementId/text",
            Method::GET,
            CommandSpec::new("getText"),
        )
        .route(
            "/session/:sessionId/execute/sync",
            Method::POST,
            CommandSpec::new("execute").required(["script", "args"]),
        )
        .route(
            "/session/:sessionId/history",
            Method::GET,
            CommandSpec::new("getCommandHistory"),
        )
}
