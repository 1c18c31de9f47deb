//! Cross-site request forgery protection.
//!
//! # Responsibilities
//! - Generate per-client tokens kept in the signed `_xsrf` cookie
//! - Verify the token submitted with state-changing requests
//!
//! # Design Decisions
//! - Submitted token is read from the `_xsrf` argument, then the
//!   `X-Xsrftoken` header, then `X-Csrftoken`
//! - Failures raise 403 through the handler context so the response is
//!   written before the pipeline stops

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::handler::{HandlerContext, HandlerResult};

/// Cookie and form field holding the token.
pub const XSRF_COOKIE: &str = "_xsrf";

/// Lifetime of the token cookie when neither the handler nor the app sets one.
pub const DEFAULT_EXPIRES_SECS: u64 = 60;

const MISSING_MESSAGE: &str = "'_xsrf' argument missing from POST";
const MISMATCH_MESSAGE: &str = "XSRF cookie does not match POST argument";

/// A fresh token: 32 random bytes, URL-safe base64.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hidden form field carrying `token`.
pub fn form_html(token: &str) -> String {
    format!(r#"<input type="hidden" name="{XSRF_COOKIE}" value="{token}">"#)
}

/// Verify the submitted token against the cookie token.
pub fn check_xsrf_cookie(ctx: &mut HandlerContext) -> HandlerResult {
    let Some(submitted) = submitted_token(ctx) else {
        tracing::warn!(path = %ctx.request().path(), "xsrf token missing");
        return Err(ctx.raise_http_error(403, MISSING_MESSAGE));
    };

    if ctx.xsrf_token() != submitted {
        tracing::warn!(path = %ctx.request().path(), "xsrf token mismatch");
        return Err(ctx.raise_http_error(403, MISMATCH_MESSAGE));
    }
    Ok(())
}

fn submitted_token(ctx: &HandlerContext) -> Option<String> {
    let from_form = ctx.get_argument(XSRF_COOKIE, "");
    if !from_form.is_empty() {
        return Some(from_form);
    }
    ["x-xsrftoken", "x-csrftoken"]
        .into_iter()
        .map(|name| ctx.request().header(name))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
