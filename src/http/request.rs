//! Per-request context.
//!
//! # Responsibilities
//! - Parse query, urlencoded and multipart arguments
//! - Keep uploaded file metadata and contents
//! - Track request timing for the access log
//! - Derive scheme and client IP, honouring proxy headers when trusted
//!
//! # Design Decisions
//! - Built once per request, owned by the task that serves it
//! - Body is read fully (bounded by `max_memory`) before dispatch
//! - Form arguments contain body values followed by query values

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, request::Parts, HeaderMap, Method, Request, Uri, Version};

use crate::handler::HttpError;
use crate::http::cookies;

/// Argument name to its values, in arrival order.
pub type Arguments = HashMap<String, Vec<String>>;

/// A file uploaded in a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Transport facts the server knows about a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    pub remote_addr: Option<SocketAddr>,
    /// Trust `X-Forwarded-*`, `X-Scheme` and `X-Real-Ip`.
    pub xheaders: bool,
    /// The connection is TLS.
    pub tls: bool,
    /// Upper bound on the buffered body, in bytes.
    pub max_memory: usize,
}

/// Everything known about one inbound request.
#[derive(Debug)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    query_arguments: Arguments,
    form_arguments: Arguments,
    files: HashMap<String, Vec<UploadedFile>>,
    cookies: HashMap<String, String>,
    options: RequestOptions,
    start_time: Instant,
    finish_time: Option<Instant>,
}

impl RequestContext {
    /// Build a context from request parts and an already-read body.
    ///
    /// Urlencoded bodies are parsed into form arguments.
    pub fn from_parts(parts: Parts, body: Bytes, options: RequestOptions) -> Self {
        let mut ctx = Self::assemble(parts.method, parts.uri, parts.version, parts.headers, options);
        if ctx.content_type() == "application/x-www-form-urlencoded" {
            ctx.form_arguments = parse_urlencoded(&body);
        }
        ctx.body = body;
        ctx.merge_query_into_form();
        ctx
    }

    /// Read and parse an axum request.
    pub async fn from_request(request: Request<Body>, options: RequestOptions) -> Result<Self, HttpError> {
        let mut ctx = Self::assemble(
            request.method().clone(),
            request.uri().clone(),
            request.version(),
            request.headers().clone(),
            options,
        );

        if ctx.content_type() == "multipart/form-data" {
            let mut multipart = Multipart::from_request(request, &())
                .await
                .map_err(|e| HttpError::bad_request(e.body_text()))?;
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| HttpError::bad_request(e.body_text()))?
            {
                let name = field.name().unwrap_or_default().to_string();
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| HttpError::bad_request(e.body_text()))?;

                if file_name.is_some() {
                    ctx.files.entry(name.clone()).or_default().push(UploadedFile {
                        field: name,
                        file_name,
                        content_type,
                        data,
                    });
                } else {
                    let value = String::from_utf8_lossy(&data).into_owned();
                    ctx.form_arguments.entry(name).or_default().push(value);
                }
            }
        } else {
            let body = axum::body::to_bytes(request.into_body(), options.max_memory)
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, "error reading request body");
                    HttpError::new(413, "request body too large")
                })?;
            if ctx.content_type() == "application/x-www-form-urlencoded" {
                ctx.form_arguments = parse_urlencoded(&body);
            }
            ctx.body = body;
        }

        ctx.merge_query_into_form();
        Ok(ctx)
    }

    fn assemble(method: Method, uri: Uri, version: Version, headers: HeaderMap, options: RequestOptions) -> Self {
        let query_arguments = uri
            .query()
            .map(|q| parse_urlencoded(q.as_bytes()))
            .unwrap_or_default();
        let cookies = cookies::parse_cookies(&headers);
        Self {
            method,
            uri,
            version,
            headers,
            body: Bytes::new(),
            query_arguments,
            form_arguments: Arguments::new(),
            files: HashMap::new(),
            cookies,
            options,
            start_time: Instant::now(),
            finish_time: None,
        }
    }

    fn merge_query_into_form(&mut self) {
        for (key, values) in &self.query_arguments {
            self.form_arguments
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path and query as sent by the client.
    pub fn request_uri(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Protocol string, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_2 => "HTTP/2.0",
            Version::HTTP_3 => "HTTP/3.0",
            _ => "HTTP/1.1",
        }
    }

    /// True for HTTP/1.0 and older, where keep-alive must be echoed.
    pub fn is_legacy_protocol(&self) -> bool {
        self.version < Version::HTTP_11
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value, or `""` when missing or not valid text.
    pub fn header(&self, name: &str) -> &str {
        self.header_or(name, "")
    }

    pub fn header_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    }

    /// Host including any port.
    pub fn host(&self) -> &str {
        match self.headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
            Some(host) => host,
            None => self.uri.authority().map(|a| a.as_str()).unwrap_or_default(),
        }
    }

    pub fn scheme(&self) -> &str {
        let mut scheme = match self.uri.scheme_str() {
            Some(s) => s,
            None if self.options.tls => "https",
            None => "http",
        };
        if self.options.xheaders {
            let proto = self.header_or("x-forwarded-proto", scheme);
            let proto = self.header_or("x-scheme", proto);
            if proto == "http" || proto == "https" {
                scheme = proto;
            }
        }
        scheme
    }

    pub fn full_url(&self) -> String {
        format!("{}://{}{}", self.scheme(), self.host(), self.request_uri())
    }

    /// Effective client address.
    pub fn remote_ip(&self) -> String {
        let mut ip = self
            .options
            .remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        if self.options.xheaders {
            if let Some(first) = self.proxy().into_iter().next().filter(|s| !s.is_empty()) {
                ip = first.split(':').next().unwrap_or_default().to_string();
                ip = self.header_or("x-real-ip", &ip).to_string();
            }
        }
        ip
    }

    /// Addresses listed in `X-Forwarded-For`.
    pub fn proxy(&self) -> Vec<String> {
        let ips = self.header("x-forwarded-for");
        if ips.is_empty() {
            return Vec::new();
        }
        ips.split(',').map(|ip| ip.trim().to_string()).collect()
    }

    /// The request came through a proxy that set `X-Real-Ip`.
    pub fn behind_proxy(&self) -> bool {
        !self.header("x-real-ip").is_empty()
    }

    /// Media type without parameters; `text/html` when absent.
    pub fn content_type(&self) -> String {
        resolve_content_type(self.header("content-type"))
    }

    pub fn is_ajax(&self) -> bool {
        self.header("x-requested-with") == "XMLHttpRequest"
    }

    pub fn is_upload(&self) -> bool {
        self.content_type() == "multipart/form-data"
    }

    pub fn referer(&self) -> &str {
        self.header("referer")
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Body and query arguments.
    pub fn form_arguments(&self) -> &Arguments {
        &self.form_arguments
    }

    pub fn query_arguments(&self) -> &Arguments {
        &self.query_arguments
    }

    pub fn files(&self) -> &HashMap<String, Vec<UploadedFile>> {
        &self.files
    }

    /// Record the finish time.
    pub fn finish(&mut self) {
        self.finish_time = Some(Instant::now());
    }

    /// Time from arrival to `finish`, or to now if not finished.
    pub fn request_time(&self) -> Duration {
        self.finish_time
            .unwrap_or_else(Instant::now)
            .duration_since(self.start_time)
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }
}

/// Strip parameters from a `Content-Type` value.
pub fn resolve_content_type(value: &str) -> String {
    if value.is_empty() {
        return "text/html".to_string();
    }
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn parse_urlencoded(input: &[u8]) -> Arguments {
    let mut args = Arguments::new();
    for (key, value) in url::form_urlencoded::parse(input) {
        args.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(request: Request<&'static str>, options: RequestOptions) -> RequestContext {
        let (parts, body) = request.into_parts();
        RequestContext::from_parts(parts, Bytes::from_static(body.as_bytes()), options)
    }

    #[test]
    fn test_query_and_form_arguments() {
        let request = Request::builder()
            .method("POST")
            .uri("/submit?a=1&b=2")
            .header("content-type", "application/x-www-form-urlencoded; charset=UTF-8")
            .body("a=0&name=lemon+tree")
            .unwrap();
        let ctx = context(request, RequestOptions::default());

        assert_eq!(ctx.query_arguments()["a"], vec!["1"]);
        assert_eq!(ctx.form_arguments()["a"], vec!["0", "1"]);
        assert_eq!(ctx.form_arguments()["name"], vec!["lemon tree"]);
        assert_eq!(ctx.form_arguments()["b"], vec!["2"]);
    }

    #[test]
    fn test_non_form_body_is_not_parsed() {
        let request = Request::builder()
            .method("POST")
            .uri("/json")
            .header("content-type", "application/json")
            .body("a=1")
            .unwrap();
        let ctx = context(request, RequestOptions::default());
        assert!(ctx.form_arguments().is_empty());
        assert_eq!(ctx.body().as_ref(), b"a=1");
    }

    #[test]
    fn test_scheme_honours_proxy_headers_only_when_trusted() {
        let build = || {
            Request::builder()
                .uri("/")
                .header("x-forwarded-proto", "https")
                .body("")
                .unwrap()
        };
        let untrusted = context(build(), RequestOptions::default());
        assert_eq!(untrusted.scheme(), "http");

        let trusted = context(
            build(),
            RequestOptions {
                xheaders: true,
                ..Default::default()
            },
        );
        assert_eq!(trusted.scheme(), "https");
    }

    #[test]
    fn test_remote_ip() {
        let request = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body("")
            .unwrap();
        let options = RequestOptions {
            remote_addr: Some("192.168.1.5:5000".parse().unwrap()),
            xheaders: true,
            ..Default::default()
        };
        assert_eq!(context(request, options).remote_ip(), "10.0.0.1");

        let request = Request::builder().uri("/").body("").unwrap();
        let options = RequestOptions {
            remote_addr: Some("192.168.1.5:5000".parse().unwrap()),
            ..Default::default()
        };
        assert_eq!(context(request, options).remote_ip(), "192.168.1.5");
    }

    #[test]
    fn test_cookies_and_host() {
        let request = Request::builder()
            .uri("/path?x=1")
            .header("host", "example.com:8080")
            .header("cookie", "a=1; b=two")
            .body("")
            .unwrap();
        let ctx = context(request, RequestOptions::default());
        assert_eq!(ctx.cookie("b"), Some("two"));
        assert_eq!(ctx.host(), "example.com:8080");
        assert_eq!(ctx.request_uri(), "/path?x=1");
        assert_eq!(ctx.full_url(), "http://example.com:8080/path?x=1");
    }

    #[test]
    fn test_content_type_default() {
        assert_eq!(resolve_content_type(""), "text/html");
        assert_eq!(
            resolve_content_type("Multipart/Form-Data; boundary=xyz"),
            "multipart/form-data"
        );
    }

    #[test]
    fn test_request_time() {
        let mut ctx = context(Request::builder().uri("/").body("").unwrap(), RequestOptions::default());
        ctx.finish();
        let first = ctx.request_time();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ctx.request_time(), first);
    }
}
