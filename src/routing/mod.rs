//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (at startup):
//!     pattern + handler type + params + name
//!     → route.rs (anchor, compile regex, derive reverse format)
//!     → host.rs (append to host entry, index by name)
//!
//! Incoming Request (host, path)
//!     → host.rs (pick the route list for the host)
//!     → router.rs (first route whose pattern matches the full path)
//!     → Return: Found { route, args } | NotFound | NoHost
//! ```
//!
//! # Design Decisions
//! - Routes are compiled at startup and never mutated afterwards
//! - Host lookup keeps the LAST matching entry (compatibility quirk)
//! - Path lookup keeps the FIRST matching route
//! - A trailing catch-all host entry stays last as new hosts are added

pub mod host;
pub mod route;
pub mod router;

use thiserror::Error;

pub use host::{HostEntry, HostTable};
pub use route::{add_route, HandlerFactory, ReverseFormat, Route};
pub use router::{RouteMatch, Router};

/// Errors raised while registering or reversing routes.
///
/// All of these indicate a misconfigured application rather than a bad
/// request.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The pattern is not a valid regular expression.
    #[error("invalid route pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Two routes were registered under the same name.
    #[error("multiple handlers named {0}")]
    DuplicateName(String),

    /// No route is registered under the requested name.
    #[error("{0} not found in named urls")]
    UnknownName(String),

    /// The pattern is too complex to be turned back into a URL.
    #[error("cannot reverse url regex {0}")]
    NotReversible(String),

    /// Reverse was called with the wrong number of arguments.
    #[error("required number of arguments not found: expected {expected}, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },
}
