//! Handler lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! RouteMatch::Found { route, args }
//!     → pipeline.rs (fresh handler from the route factory)
//!     → context.rs (bind request, response sink, app, route params)
//!     → hooks: initialize → [xsrf check] → prepare → verb method → finish
//!     → pipeline.rs (recovery, access log)
//!     → CompletedResponse
//! ```
//!
//! # Design Decisions
//! - One handler value per request, never reused
//! - Handlers implement [`RequestHandler`]; every hook has a default
//! - Verb methods default to 405 instead of being looked up by name
//! - Early exits are `Err(Halt)` values, not panics

pub mod context;
pub mod error;
pub mod pipeline;
pub mod redirect;
pub mod static_files;

use axum::http::Method;
use serde_json::Value;

pub use context::HandlerContext;
pub use error::{Halt, HandlerResult, HttpError};
pub use pipeline::{CompletedResponse, Dispatcher};
pub use redirect::RedirectHandler;
pub use static_files::StaticFileHandler;

use crate::security::xsrf;
use crate::templates::TemplateFunctions;

/// Per-route configuration handed to [`RequestHandler::initialize`].
pub type Params = serde_json::Map<String, Value>;

/// Positional arguments captured from the request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathArgs(Vec<String>);

impl PathArgs {
    pub fn new(args: Vec<String>) -> Self {
        Self(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    /// Bind exactly `N` arguments.
    ///
    /// The dispatcher has already checked the count against
    /// [`RequestHandler::path_args`]; this is the typed binding, and fails
    /// the same way (400) for a handler that declared no count.
    pub fn exactly<const N: usize>(&self) -> Result<[&str; N], Halt> {
        if self.0.len() != N {
            tracing::error!(expected = N, captured = self.0.len(), "path arguments do not match handler");
            return Err(HttpError::bad_request(format!(
                "handler expects {N} path arguments, route captured {}",
                self.0.len()
            ))
            .into());
        }
        Ok(std::array::from_fn(|i| self.0[i].as_str()))
    }
}

/// The capability set of a request handler.
///
/// Implementors override the verb methods they serve and any lifecycle hook
/// they need. State shared by all handlers (request, response, status,
/// cookies, XSRF token) lives in the [`HandlerContext`] passed to each call.
pub trait RequestHandler: Send + 'static {
    /// Handler-specific setup from the route's configuration.
    fn initialize(&mut self, _ctx: &mut HandlerContext, _params: &Params) -> HandlerResult {
        Ok(())
    }

    /// Customize the baseline response headers.
    fn set_default_headers(&mut self, _ctx: &mut HandlerContext) {}

    /// Verify the XSRF token of a state-mutating request.
    fn check_xsrf_cookie(&mut self, ctx: &mut HandlerContext) -> HandlerResult {
        xsrf::check_xsrf_cookie(ctx)
    }

    /// Common pre-processing before the verb method.
    fn prepare(&mut self, _ctx: &mut HandlerContext) -> HandlerResult {
        Ok(())
    }

    /// Number of path arguments the verb method for `method` takes.
    ///
    /// A request whose route captured a different number fails with 400
    /// before the verb method runs. The default is zero, so handlers on
    /// routes with capture groups declare their count. `None` accepts any
    /// count.
    fn path_args(&self, _method: &Method) -> Option<usize> {
        Some(0)
    }

    fn get(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        Err(method_not_allowed(ctx))
    }

    fn head(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        Err(method_not_allowed(ctx))
    }

    fn post(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        Err(method_not_allowed(ctx))
    }

    fn delete(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        Err(method_not_allowed(ctx))
    }

    fn patch(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        Err(method_not_allowed(ctx))
    }

    fn put(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        Err(method_not_allowed(ctx))
    }

    fn options(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        Err(method_not_allowed(ctx))
    }

    /// Post-processing after a successful verb method.
    fn finish(&mut self, _ctx: &mut HandlerContext) {}

    /// Values merged into every template context this handler renders.
    fn template_namespace(&mut self, ctx: &mut HandlerContext) -> Params {
        ctx.template_namespace()
    }

    /// Functions visible to the templates this handler renders.
    fn template_functions(&mut self, _ctx: &mut HandlerContext) -> TemplateFunctions {
        TemplateFunctions::new()
    }

    /// Render a template to bytes.
    ///
    /// Override together with the `custom_templates` setting to plug in a
    /// different engine.
    fn render_bytes(
        &mut self,
        ctx: &mut HandlerContext,
        template: &str,
        context: &Value,
    ) -> Result<Vec<u8>, Halt> {
        let namespace = self.template_namespace(ctx);
        let functions = self.template_functions(ctx);
        ctx.render_template(template, context, namespace, &functions)
    }

    /// Render a template and write it to the response.
    fn render(&mut self, ctx: &mut HandlerContext, template: &str, context: &Value) -> HandlerResult {
        let html = self.render_bytes(ctx, template, context)?;
        ctx.write(&html);
        Ok(())
    }
}

fn method_not_allowed(ctx: &mut HandlerContext) -> Halt {
    tracing::warn!(method = %ctx.request().method(), path = %ctx.request().path(), "no handler method for verb");
    ctx.raise_http_error(405, "method not allowed")
}

/// A handler with no verb methods; every request gets 405.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct EmptyHandler;

#[cfg(test)]
impl RequestHandler for EmptyHandler {}
