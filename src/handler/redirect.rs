//! Redirect every GET to a configured URL.
//!
//! Route params: `url` (default `/`) and `permanent` (301 when true,
//! otherwise 302).

use axum::http::Method;
use serde_json::Value;

use crate::handler::{HandlerContext, HandlerResult, Params, PathArgs, RequestHandler};

#[derive(Debug, Default)]
pub struct RedirectHandler {
    url: String,
    status: u16,
}

impl RequestHandler for RedirectHandler {
    fn initialize(&mut self, _ctx: &mut HandlerContext, params: &Params) -> HandlerResult {
        let permanent = params
            .get("permanent")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.status = if permanent { 301 } else { 302 };
        self.url = params
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();
        Ok(())
    }

    /// Captured arguments are ignored.
    fn path_args(&self, _method: &Method) -> Option<usize> {
        None
    }

    fn get(&mut self, ctx: &mut HandlerContext, _args: &PathArgs) -> HandlerResult {
        ctx.redirect(&self.url, self.status)
    }
}
