//! lemon: a regex-routed HTTP handler framework.
//!
//! Requests are matched against host patterns, then against the ordered path
//! patterns registered for that host. The first matching route creates a
//! fresh handler that runs through a fixed lifecycle:
//!
//! ```text
//! clear → initialize → [xsrf check] → prepare → get/post/... → access log → finish
//! ```
//!
//! Errors and panics in any stage are turned into a response by a single
//! recovery step.

pub mod application;
pub mod config;
pub mod handler;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;
pub mod templates;

pub use application::Application;
pub use config::AppConfig;
pub use handler::{
    HandlerContext, HandlerResult, Halt, HttpError, Params, PathArgs, RequestHandler,
};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::{add_route, Route};
