//! Request dispatch and the handler stage sequence.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → Router::match_request
//!         Found   → fresh handler → stages → recovery
//!         NoHost  → RedirectHandler (301 to the default host)
//!         NotFound → plain 404
//!     → access log (exactly once)
//!     → CompletedResponse
//! ```
//!
//! # Design Decisions
//! - Stages run synchronously inside one `catch_unwind`; the server calls
//!   `dispatch` from a blocking thread
//! - Recovery is the single place failures are turned into responses
//! - Panic backtraces are captured by a hook at the panic site, so debug
//!   pages show where the handler failed; only debug dispatches capture

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::application::Application;
use crate::handler::{
    Halt, HandlerContext, HandlerResult, HttpError, Params, PathArgs, RedirectHandler,
    RequestHandler,
};
use crate::http::request::RequestContext;
use crate::observability::logging;
use crate::routing::RouteMatch;

const SUPPORTED_METHODS: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::DELETE,
    Method::PATCH,
    Method::PUT,
    Method::OPTIONS,
];

/// Methods that never need an XSRF token.
const XSRF_EXEMPT_METHODS: [Method; 3] = [Method::GET, Method::HEAD, Method::OPTIONS];

thread_local! {
    static CAPTURE_BACKTRACE: Cell<bool> = const { Cell::new(false) };
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURE_BACKTRACE.with(Cell::get) {
                let backtrace = Backtrace::force_capture().to_string();
                PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            }
            previous(info);
        }));
    });
}

/// Arm backtrace capture for the current thread; the slot starts empty.
fn arm_backtrace_capture(enabled: bool) {
    CAPTURE_BACKTRACE.with(|flag| flag.set(enabled));
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take());
}

/// A fully buffered response.
#[derive(Debug)]
pub struct CompletedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for CompletedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

enum Failure {
    Halt(Halt),
    Panic(String),
}

/// Routes requests and runs handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    app: Arc<Application>,
}

impl Dispatcher {
    pub fn new(app: Arc<Application>) -> Self {
        install_panic_hook();
        Self { app }
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// Route one request and produce its response.
    pub fn dispatch(&self, request: RequestContext) -> CompletedResponse {
        let matched = self
            .app
            .router()
            .match_request(request.host(), request.path(), request.behind_proxy());

        match matched {
            RouteMatch::Found { route, args } => {
                tracing::debug!(pattern = %route.pattern(), args = args.len(), "route matched");
                self.execute(route.instantiate(), route.params().clone(), request, &args)
            }
            RouteMatch::NoHost => {
                let url = format!(
                    "{}://{}{}",
                    request.scheme(),
                    self.app.config().default_host,
                    request.request_uri()
                );
                tracing::debug!(host = %request.host(), location = %url, "no host entry, redirecting");
                let mut params = Params::new();
                params.insert("url".to_string(), json!(url));
                params.insert("permanent".to_string(), json!(true));
                self.execute(Box::<RedirectHandler>::default(), params, request, &PathArgs::default())
            }
            RouteMatch::NotFound => self.not_found(request),
        }
    }

    /// Run the stage sequence for an already chosen handler.
    pub fn execute(
        &self,
        mut handler: Box<dyn RequestHandler>,
        params: Params,
        request: RequestContext,
        args: &PathArgs,
    ) -> CompletedResponse {
        let config = self.app.config();
        let (debug, xsrf_enabled) = (config.debug, config.xsrf_cookies);

        let mut ctx = HandlerContext::new(request, Arc::clone(&self.app), params.clone());
        ctx.clear();

        arm_backtrace_capture(debug);
        let mut logged = false;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_stages(handler.as_mut(), &mut ctx, &params, args, xsrf_enabled, &mut logged)
        }));
        CAPTURE_BACKTRACE.with(|flag| flag.set(false));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(halt)) => recover(&mut ctx, Failure::Halt(halt), debug),
            Err(payload) => recover(&mut ctx, Failure::Panic(panic_message(payload.as_ref())), debug),
        }

        if !logged {
            ctx.request_mut().finish();
            log_access(&ctx);
        }

        let (status, headers, body) = ctx.into_parts();
        CompletedResponse {
            status,
            headers,
            body,
        }
    }

    /// Plain 404 for a path no route matches.
    pub fn not_found(&self, request: RequestContext) -> CompletedResponse {
        let mut ctx = HandlerContext::new(request, Arc::clone(&self.app), Params::new());
        ctx.clear();
        ctx.set_header("content-type", "text/plain; charset=utf-8");
        ctx.http_error(404, "404 page not found\n");
        ctx.request_mut().finish();
        log_access(&ctx);

        let (status, headers, body) = ctx.into_parts();
        CompletedResponse {
            status,
            headers,
            body,
        }
    }
}

fn run_stages(
    handler: &mut dyn RequestHandler,
    ctx: &mut HandlerContext,
    params: &Params,
    args: &PathArgs,
    xsrf_enabled: bool,
    logged: &mut bool,
) -> HandlerResult {
    handler.set_default_headers(ctx);
    handler.initialize(ctx, params)?;

    let method = ctx.request().method().clone();
    if !SUPPORTED_METHODS.contains(&method) {
        return Err(ctx.raise_http_error(405, "Method not allowed"));
    }
    if xsrf_enabled && !XSRF_EXEMPT_METHODS.contains(&method) {
        handler.check_xsrf_cookie(ctx)?;
    }

    handler.prepare(ctx)?;

    if let Some(expected) = handler.path_args(&method) {
        if expected != args.len() {
            tracing::error!(
                expected,
                captured = args.len(),
                path = %ctx.request().path(),
                "path arguments do not match handler"
            );
            return Err(HttpError::bad_request(format!(
                "handler takes {expected} path arguments, route captured {}",
                args.len()
            ))
            .into());
        }
    }

    match method {
        Method::GET => handler.get(ctx, args),
        Method::HEAD => handler.head(ctx, args),
        Method::POST => handler.post(ctx, args),
        Method::DELETE => handler.delete(ctx, args),
        Method::PATCH => handler.patch(ctx, args),
        Method::PUT => handler.put(ctx, args),
        _ => handler.options(ctx, args),
    }?;

    ctx.request_mut().finish();
    log_access(ctx);
    *logged = true;

    handler.finish(ctx);
    Ok(())
}

fn recover(ctx: &mut HandlerContext, failure: Failure, debug: bool) {
    if ctx.is_raised() {
        return;
    }

    let message = match failure {
        Failure::Halt(Halt::Written) => return,
        Failure::Halt(Halt::Error(err)) => {
            ctx.set_status(err.status.as_u16());
            err.message
        }
        Failure::Panic(message) => {
            if ctx.status().as_u16() < 400 {
                ctx.set_status(500);
            }
            message
        }
    };

    let status = ctx.status().as_u16();
    tracing::error!(
        status,
        method = %ctx.request().method(),
        path = %ctx.request().path(),
        error = %message,
        "request failed"
    );

    if debug {
        let backtrace = PANIC_BACKTRACE
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| Backtrace::force_capture().to_string());
        ctx.http_error(status, &debug_page(&message, &backtrace));
        return;
    }

    match status {
        500..=599 => ctx.http_error(status, "server error"),
        404 => ctx.http_error(404, "not found the page"),
        _ => {}
    }
}

fn log_access(ctx: &HandlerContext) {
    let request = ctx.request();
    logging::log_access(
        ctx.status().as_u16(),
        request.method(),
        request.request_uri(),
        request.request_time(),
    );
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn debug_page(message: &str, backtrace: &str) -> String {
    format!(
        "<html><title>Error</title><body>\
         <pre style=\"word-wrap: break-word; white-space: pre-wrap;\">{}\n\n{}</pre>\
         </body></html>",
        escape_html(message),
        escape_html(backtrace)
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
