//! Host-level routing table.
//!
//! # Responsibilities
//! - Map host patterns to ordered route lists
//! - Keep a trailing catch-all entry last as hosts are added
//! - Index named routes for reverse lookup
//!
//! # Design Decisions
//! - Host patterns are anchored at the end only (`$`), so `example\.com$`
//!   also matches `www.example.com`
//! - Mutated only during registration; read-only while serving

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;

use crate::routing::{Route, RouteError};

/// Patterns that match every host.
const CATCH_ALL_PATTERNS: [&str; 2] = [".*$", "^.*$"];

/// Hosts of different shapes. A pattern matching all of them, such as
/// `(.*)$` or `.+$`, is treated as a catch-all as well.
const SAMPLE_HOSTS: [&str; 6] = [
    "localhost",
    "a",
    "example.com",
    "www.example.org:8080",
    "127.0.0.1",
    "[::1]:443",
];

/// A host pattern paired with its ordered routes.
#[derive(Debug)]
pub struct HostEntry {
    pattern: String,
    regex: Regex,
    routes: Vec<Arc<Route>>,
}

impl HostEntry {
    /// Compile a host entry. A trailing `$` is added when missing.
    pub fn new(pattern: &str, routes: Vec<Arc<Route>>) -> Result<Self, RouteError> {
        let pattern = if pattern.ends_with('$') {
            pattern.to_string()
        } else {
            format!("{pattern}$")
        };
        let regex = Regex::new(&pattern).map_err(|source| RouteError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        Ok(Self {
            pattern,
            regex,
            routes,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn matches(&self, host: &str) -> bool {
        self.regex.is_match(host)
    }

    /// True when the entry matches any host.
    pub fn is_catch_all(&self) -> bool {
        CATCH_ALL_PATTERNS.contains(&self.pattern.as_str())
            || SAMPLE_HOSTS.iter().all(|host| self.regex.is_match(host))
    }
}

/// Ordered host entries plus the named-route index.
#[derive(Debug, Default)]
pub struct HostTable {
    entries: Vec<HostEntry>,
    names: HashMap<String, Arc<Route>>,
    default_host: String,
}

impl HostTable {
    /// Create an empty table. `default_host` is used for the lookup fallback.
    pub fn new(default_host: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            names: HashMap::new(),
            default_host: default_host.into(),
        }
    }

    /// Register routes for a host pattern.
    ///
    /// Fails without modifying the table if any route name is already taken.
    pub fn register(&mut self, host_pattern: &str, routes: Vec<Route>) -> Result<(), RouteError> {
        let mut incoming = HashSet::new();
        for name in routes.iter().filter_map(Route::name) {
            if self.names.contains_key(name) || !incoming.insert(name) {
                tracing::error!(name = %name, "duplicate route name");
                return Err(RouteError::DuplicateName(name.to_string()));
            }
        }

        let routes: Vec<Arc<Route>> = routes.into_iter().map(Arc::new).collect();
        let entry = HostEntry::new(host_pattern, routes)?;
        for route in entry.routes() {
            if let Some(name) = route.name() {
                self.names.insert(name.to_string(), Arc::clone(route));
            }
        }

        tracing::debug!(
            host = %entry.pattern(),
            routes = entry.routes().len(),
            "host entry registered"
        );

        match self.entries.last() {
            Some(last) if last.is_catch_all() => {
                let at = self.entries.len() - 1;
                self.entries.insert(at, entry);
            }
            _ => self.entries.push(entry),
        }
        Ok(())
    }

    /// Routes for a request host.
    ///
    /// The port suffix is ignored. Every entry is tested and the last match
    /// wins. When nothing matches and the request did not come through a
    /// proxy, the scan is repeated for the default host. An empty slice means
    /// no host entry applies.
    pub fn lookup(&self, host: &str, behind_proxy: bool) -> &[Arc<Route>] {
        let host = host.split(':').next().unwrap_or_default();
        let routes = self.scan(host);
        if routes.is_empty() && !behind_proxy {
            return self.scan(&self.default_host);
        }
        routes
    }

    fn scan(&self, host: &str) -> &[Arc<Route>] {
        let mut matched: &[Arc<Route>] = &[];
        for entry in &self.entries {
            if entry.matches(host) {
                matched = entry.routes();
            }
        }
        matched
    }

    /// Route registered under `name`.
    pub fn named(&self, name: &str) -> Option<&Arc<Route>> {
        self.names.get(name)
    }

    pub fn entries(&self) -> &[HostEntry] {
        &self.entries
    }

    pub fn default_host(&self) -> &str {
        &self.default_host
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
