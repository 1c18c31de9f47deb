//! Cookie parsing and `Set-Cookie` formatting.

use std::collections::HashMap;
use std::time::SystemTime;

use axum::http::{header, HeaderMap};

/// Attributes of an outgoing cookie. `path` defaults to `/`.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub domain: Option<String>,
    pub expires: Option<SystemTime>,
    pub max_age: Option<i64>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            domain: None,
            expires: None,
            max_age: None,
            path: "/".to_string(),
            secure: false,
            http_only: false,
        }
    }
}

impl CookieOptions {
    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }
}

/// Parse every `Cookie` header into a name/value map. First value wins.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim().trim_matches('"');
            cookies
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    cookies
}

/// Render a `Set-Cookie` header value.
pub fn format_set_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut cookie = format!("{}={}", sanitize_name(name), sanitize_value(value));
    if let Some(domain) = &options.domain {
        cookie.push_str(&format!("; Domain={}", sanitize_value(domain)));
    }
    if let Some(expires) = options.expires {
        cookie.push_str(&format!("; expires={}", httpdate::fmt_http_date(expires)));
    }
    if let Some(max_age) = options.max_age {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    cookie.push_str(&format!("; Path={}", sanitize_value(&options.path)));
    if options.secure {
        cookie.push_str("; Secure");
    }
    if options.http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie
}

fn sanitize_name(name: &str) -> String {
    name.replace(['\n', '\r'], "-")
}

fn sanitize_value(value: &str) -> String {
    value.replace(['\n', '\r', ';'], " ")
}
