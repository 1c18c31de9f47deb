//! Route lookup and reverse URLs.
//!
//! # Responsibilities
//! - Resolve the route list for the request host
//! - Return the first route whose pattern matches the full path
//! - Turn a route name and arguments back into a path
//!
//! # Design Decisions
//! - Immutable after registration (thread-safe without locks)
//! - Explicit `NoHost` so the dispatcher can redirect to the default host
//! - Reverse failures are configuration bugs and surface as errors

use std::sync::Arc;

use crate::handler::PathArgs;
use crate::routing::{HostTable, Route, RouteError};

/// Result of matching a request against the table.
#[derive(Debug)]
pub enum RouteMatch {
    /// A route matched; `args` are its captured groups in order.
    Found { route: Arc<Route>, args: PathArgs },
    /// The host resolved but no path pattern matched.
    NotFound,
    /// No host entry applies to the request.
    NoHost,
}

/// Two-level request router.
#[derive(Debug, Default)]
pub struct Router {
    table: HostTable,
}

impl Router {
    pub fn new(default_host: impl Into<String>) -> Self {
        Self {
            table: HostTable::new(default_host),
        }
    }

    /// Append routes for a host pattern.
    pub fn add_handlers(&mut self, host_pattern: &str, routes: Vec<Route>) -> Result<(), RouteError> {
        self.table.register(host_pattern, routes)
    }

    /// Find the route for a request.
    pub fn match_request(&self, host: &str, path: &str, behind_proxy: bool) -> RouteMatch {
        let routes = self.table.lookup(host, behind_proxy);
        if routes.is_empty() {
            return RouteMatch::NoHost;
        }

        routes
            .iter()
            .find_map(|route| {
                route.captures(path).map(|args| RouteMatch::Found {
                    route: Arc::clone(route),
                    args,
                })
            })
            .unwrap_or(RouteMatch::NotFound)
    }

    /// URL path for the route named `name`.
    pub fn reverse_url(&self, name: &str, args: &[&str]) -> Result<String, RouteError> {
        let route = self
            .table
            .named(name)
            .ok_or_else(|| RouteError::UnknownName(name.to_string()))?;
        route.reverse(args)
    }

    pub fn table(&self) -> &HostTable {
        &self.table
    }
}
