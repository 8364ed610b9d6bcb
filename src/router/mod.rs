use crate::config::{RouteConfig, ServiceGroup, ServicesConfig};
use crate::error::{GatewayError, Result};
use http::Method;
use matchit::Router as MatchitRouter;
use std::collections::HashMap;

/// Route information
#[derive(Debug, Clone)]
pub struct Route {
    /// Pattern as configured
    pub pattern: String,
    /// Route group the request is forwarded to
    pub service: ServiceGroup,
    /// Backend base URL for the group
    pub backend: String,
    /// Allowed HTTP methods (empty means all methods allowed)
    pub methods: Vec<Method>,
}

/// Gateway router for matching incoming requests to backend services
#[derive(Debug, Clone)]
pub struct Router {
    /// Path-based router using matchit
    matcher: MatchitRouter<Route>,
    patterns: Vec<String>,
}

impl Router {
    /// Create a new router from route configurations.
    ///
    /// Entries sharing a pattern are merged into one route. They must name
    /// the same route group.
    pub fn new(routes: &[RouteConfig], services: &ServicesConfig) -> Result<Self> {
        let mut merged: Vec<Route> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for route_config in routes {
            let methods = route_config
                .methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_uppercase().as_bytes()).map_err(|_| {
                        GatewayError::InvalidRoute(format!(
                            "Invalid HTTP method '{}' for route: {}",
                            m, route_config.path
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            match index.get(route_config.path.as_str()) {
                Some(&i) => {
                    let existing = &mut merged[i];
                    if existing.service != route_config.service {
                        return Err(GatewayError::InvalidRoute(format!(
                            "Route {} is bound to more than one service",
                            route_config.path
                        )));
                    }
                    // An unrestricted entry stays unrestricted
                    if existing.methods.is_empty() || methods.is_empty() {
                        existing.methods.clear();
                    } else {
                        for method in methods {
                            if !existing.methods.contains(&method) {
                                existing.methods.push(method);
                            }
                        }
                    }
                }
                None => {
                    index.insert(&route_config.path, merged.len());
                    merged.push(Route {
                        pattern: route_config.path.clone(),
                        service: route_config.service,
                        backend: services
                            .base_url(route_config.service)
                            .trim_end_matches('/')
                            .to_string(),
                        methods,
                    });
                }
            }
        }

        let mut matcher = MatchitRouter::new();
        let mut patterns = Vec::with_capacity(merged.len());

        for route in merged {
            // Convert path syntax from :param to {param} and *path to {*path}
            let matchit_path = convert_path_syntax(&route.pattern);
            patterns.push(route.pattern.clone());

            matcher
                .insert(matchit_path, route)
                .map_err(|e| GatewayError::InvalidRoute(format!("Failed to insert route: {}", e)))?;
        }

        Ok(Self { matcher, patterns })
    }

    /// Match a request path and method to a route
    pub fn match_route(&self, path: &str, method: &Method) -> Result<RouteMatch> {
        let matched = self
            .matcher
            .at(path)
            .map_err(|_| GatewayError::RouteNotFound(path.to_string()))?;

        let route = matched.value;

        // Check if method is allowed (empty methods means all methods are allowed)
        if !route.methods.is_empty() && !route.methods.contains(method) {
            return Err(GatewayError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            });
        }

        // Extract path parameters
        let params: HashMap<String, String> = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Ok(RouteMatch {
            route: route.clone(),
            params,
        })
    }

    /// Patterns of all routes in the router
    pub fn routes(&self) -> &[String] {
        &self.patterns
    }
}

/// Result of matching a route
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route
    pub route: Route,
    /// Path parameters extracted from the URL
    pub params: HashMap<String, String>,
}

/// Convert path syntax from Express-style (:param, *path) to matchit syntax ({param}, {*path})
fn convert_path_syntax(path: &str) -> String {
    let mut result = String::new();
    let mut chars = path.chars().peekable();
    let is_name = |c: &char| c.is_alphanumeric() || *c == '_';

    while let Some(ch) = chars.next() {
        let open = match ch {
            ':' => "{",
            '*' => "{*",
            _ => {
                result.push(ch);
                continue;
            }
        };

        result.push_str(open);
        while let Some(name_ch) = chars.next_if(is_name) {
            result.push(name_ch);
        }
        result.push('}');
    }

    result
}

impl RouteMatch {
    /// Target URL: backend base, then the original path and query unchanged
    pub fn build_backend_url(&self, original_path: &str, query: Option<&str>) -> String {
        match query {
            Some(query) if !query.is_empty() => {
                format!("{}{}?{}", self.route.backend, original_path, query)
            }
            _ => format!("{}{}", self.route.backend, original_path),
        }
    }
}
