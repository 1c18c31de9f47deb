//! Shared handler state.
//!
//! Every handler receives a [`HandlerContext`] in each lifecycle hook. It
//! owns the request, the response sink and the per-request bookkeeping
//! (status, XSRF token, raised-error flag), and exposes the helpers handlers
//! build responses with.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use serde_json::{json, Map, Value};

use crate::application::Application;
use crate::handler::{static_files, Halt, HandlerResult, HttpError, Params};
use crate::http::cookies::{self, CookieOptions};
use crate::http::request::{RequestContext, UploadedFile};
use crate::http::response::{Encoding, ResponseWriter};
use crate::security::{signing, xsrf};
use crate::templates::TemplateFunctions;

const APPLICATION_JSON: &str = "application/json";
const APPLICATION_XML: &str = "application/xml";
const TEXT_HTML: &str = "text/html";

/// Request, response and bookkeeping for one handler invocation.
#[derive(Debug)]
pub struct HandlerContext {
    request: RequestContext,
    response: ResponseWriter,
    app: Arc<Application>,
    params: Params,
    status: StatusCode,
    xsrf_token: Option<String>,
    /// XSRF cookie lifetime in seconds for this handler, overriding the
    /// application setting.
    pub xsrf_expires: Option<u64>,
    raised: bool,
}

impl HandlerContext {
    /// Bind a request to a fresh response sink.
    pub fn new(request: RequestContext, app: Arc<Application>, params: Params) -> Self {
        let encoding = if app.config().gzip {
            Encoding::negotiate(request.header("accept-encoding"))
        } else {
            None
        };
        Self {
            request,
            response: ResponseWriter::new(encoding),
            app,
            params,
            status: StatusCode::OK,
            xsrf_token: None,
            xsrf_expires: None,
            raised: false,
        }
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestContext {
        &mut self.request
    }

    pub fn response(&self) -> &ResponseWriter {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseWriter {
        &mut self.response
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// Route configuration this handler was registered with.
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the status used when headers are flushed. Invalid codes become 500.
    pub fn set_status(&mut self, status: u16) {
        self.status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    }

    /// An error response was already written by `raise_http_error`.
    pub fn is_raised(&self) -> bool {
        self.raised
    }

    /// Reset status and baseline headers.
    pub fn clear(&mut self) {
        let server = self.app.config().server_name.clone();
        self.response.set_header("server", &server);
        self.response.set_header("content-type", "text/html; charset=UTF-8");
        self.response
            .set_header("date", &httpdate::fmt_http_date(SystemTime::now()));
        if self.request.is_legacy_protocol()
            && self.request.header("connection").eq_ignore_ascii_case("keep-alive")
        {
            self.response.set_header("connection", "Keep-Alive");
        }
        self.status = StatusCode::OK;
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.response.set_header(name, value);
    }

    pub fn delete_header(&mut self, name: &str) {
        self.response.delete_header(name);
    }

    /// Request header value, or `""`.
    pub fn get_header(&self, name: &str) -> &str {
        self.request.header(name)
    }

    /// First value of a body or query argument.
    pub fn get_argument(&self, name: &str, default: &str) -> String {
        first_or(self.request.form_arguments().get(name), default)
    }

    pub fn get_arguments(&self, name: &str) -> Vec<String> {
        self.request.form_arguments().get(name).cloned().unwrap_or_default()
    }

    /// First value of a query-string argument.
    pub fn get_query_argument(&self, name: &str, default: &str) -> String {
        first_or(self.request.query_arguments().get(name), default)
    }

    pub fn get_query_arguments(&self, name: &str) -> Vec<String> {
        self.request.query_arguments().get(name).cloned().unwrap_or_default()
    }

    /// Uploaded files for a form field.
    pub fn files(&self, field: &str) -> &[UploadedFile] {
        self.request.files().get(field).map(Vec::as_slice).unwrap_or_default()
    }

    /// Flush the status line and headers. Later calls are ignored.
    pub fn write_header(&mut self, status: u16) {
        self.set_status(status);
        self.response.write_header(self.status);
    }

    /// Append to the response body, flushing headers first if needed.
    pub fn write(&mut self, data: &[u8]) {
        if !self.response.is_header_written() {
            self.response.write_header(self.status);
        }
        self.response.write(data);
    }

    pub fn write_str(&mut self, data: &str) {
        self.write(data.as_bytes());
    }

    /// Serialize `value` as the JSON response body.
    pub fn write_json(&mut self, value: &Value) -> HandlerResult {
        let body = serde_json::to_vec(value)
            .map_err(|e| HttpError::internal(format!("failed to encode JSON: {e}")))?;
        self.set_header("content-type", "application/json; charset=UTF-8");
        self.write(&body);
        Ok(())
    }

    /// Write `message` with `status` and continue.
    pub fn http_error(&mut self, status: u16, message: &str) {
        self.write_header(status);
        self.response.write(message.as_bytes());
    }

    /// Write an error response and stop the pipeline.
    ///
    /// The returned [`Halt::Written`] tells recovery to leave the response
    /// alone.
    pub fn raise_http_error(&mut self, status: u16, message: &str) -> Halt {
        self.http_error(status, message);
        self.raised = true;
        Halt::Written
    }

    /// Send a redirect. `status` must be in the 3xx range.
    pub fn redirect(&mut self, url: &str, status: u16) -> HandlerResult {
        if !(300..=399).contains(&status) {
            tracing::error!(status, "redirect status must be 3xx");
            return Err(HttpError::internal(format!("invalid redirect status {status}")).into());
        }
        self.set_header("location", url);
        self.write_header(status);
        Ok(())
    }

    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.request.cookie(name)
    }

    pub fn set_cookie(&mut self, name: &str, value: &str, options: CookieOptions) {
        let cookie = cookies::format_set_cookie(name, value, &options);
        self.response.add_header("set-cookie", &cookie);
    }

    /// Expire a cookie on the client.
    pub fn clear_cookie(&mut self, name: &str) {
        let past = SystemTime::now() - Duration::from_secs(365 * 24 * 60 * 60);
        self.set_cookie(name, "", CookieOptions::default().expires(past));
    }

    /// Expire every cookie the client sent.
    pub fn clear_all_cookies(&mut self) {
        let names: Vec<String> = self.request.cookies().keys().cloned().collect();
        for name in names {
            self.clear_cookie(&name);
        }
    }

    /// Verified value of a signed cookie.
    pub fn get_secure_cookie(&self, name: &str) -> Option<String> {
        let value = self.get_cookie(name)?;
        signing::verify(self.app.cookie_secret(), value)
    }

    pub fn set_secure_cookie(&mut self, name: &str, value: &str, options: CookieOptions) {
        let signed = signing::sign(self.app.cookie_secret(), value);
        self.set_cookie(name, &signed, options);
    }

    /// This client's XSRF token, issuing a cookie on first use.
    pub fn xsrf_token(&mut self) -> String {
        if let Some(token) = &self.xsrf_token {
            return token.clone();
        }

        let token = match self.get_secure_cookie(xsrf::XSRF_COOKIE) {
            Some(token) if !token.is_empty() => token,
            _ => {
                let token = xsrf::generate_token();
                let expires = SystemTime::now() + Duration::from_secs(self.xsrf_lifetime());
                self.set_secure_cookie(
                    xsrf::XSRF_COOKIE,
                    &token,
                    CookieOptions::default().expires(expires),
                );
                token
            }
        };
        self.xsrf_token = Some(token.clone());
        token
    }

    fn xsrf_lifetime(&self) -> u64 {
        match (self.xsrf_expires, self.app.config().xsrf_expires) {
            (Some(secs), _) if secs > 0 => secs,
            (_, secs) if secs > 0 => secs,
            _ => xsrf::DEFAULT_EXPIRES_SECS,
        }
    }

    /// Hidden `_xsrf` input for HTML forms.
    pub fn xsrf_form_html(&mut self) -> String {
        let token = self.xsrf_token();
        xsrf::form_html(&token)
    }

    /// Values every template sees: `xsrf_form_html` and `request`
    /// (method, path, uri, host, remote_ip).
    pub fn template_namespace(&mut self) -> Map<String, Value> {
        let mut namespace = Map::new();
        namespace.insert("xsrf_form_html".to_string(), Value::String(self.xsrf_form_html()));
        namespace.insert(
            "request".to_string(),
            json!({
                "method": self.request.method().as_str(),
                "path": self.request.path(),
                "uri": self.request.request_uri(),
                "host": self.request.host(),
                "remote_ip": self.request.remote_ip(),
            }),
        );
        namespace
    }

    /// Render a template with the default namespace and no extra functions.
    pub fn render_bytes(&mut self, template: &str, context: &Value) -> Result<Vec<u8>, Halt> {
        let namespace = self.template_namespace();
        self.render_template(template, context, namespace, &TemplateFunctions::new())
    }

    /// Render a template through the application's store.
    ///
    /// `namespace` entries are merged over an object `context`; any other
    /// context value is exposed as `data`.
    pub fn render_template(
        &mut self,
        template: &str,
        context: &Value,
        namespace: Map<String, Value>,
        functions: &TemplateFunctions,
    ) -> Result<Vec<u8>, Halt> {
        if self.app.config().custom_templates {
            self.status = StatusCode::INTERNAL_SERVER_ERROR;
            return Err(HttpError::internal(
                "custom_templates is enabled; the handler must override render_bytes",
            )
            .into());
        }
        let app = Arc::clone(&self.app);
        let Some(store) = app.templates() else {
            return Err(HttpError::internal("no template store configured").into());
        };

        let mut values = match context {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other.clone());
                map
            }
        };
        values.extend(namespace);

        store
            .render_with_functions(template, &Value::Object(values), functions)
            .map_err(|e| {
                tracing::error!(template, error = %e, "template render failed");
                self.set_status(e.status());
                Halt::Error(HttpError::new(e.status(), e.to_string()))
            })
    }

    /// Send a file from disk.
    ///
    /// Conditional and range requests are answered as for static routes;
    /// HEAD requests get headers only. A missing file is a raised 404.
    pub fn serve_file(&mut self, path: impl AsRef<Path>) -> HandlerResult {
        let include_body = self.request.method() != Method::HEAD;
        static_files::send_file(self, path.as_ref(), include_body)
    }

    /// URL path of a named route; a failure is a 500.
    pub fn reverse_url(&self, name: &str, args: &[&str]) -> Result<String, Halt> {
        self.app.reverse_url(name, args).map_err(|e| {
            tracing::error!(name, error = %e, "reverse url failed");
            Halt::Error(HttpError::internal(e.to_string()))
        })
    }

    /// Request media type without parameters.
    pub fn content_type(&self) -> String {
        self.request.content_type()
    }

    pub fn is_json(&self) -> bool {
        self.content_type() == APPLICATION_JSON
    }

    pub fn is_xml(&self) -> bool {
        self.content_type() == APPLICATION_XML
    }

    pub fn is_html(&self) -> bool {
        self.content_type() == TEXT_HTML
    }

    /// Flush anything pending and close the response.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        let mut response = self.response;
        if !response.is_header_written() {
            response.write_header(self.status);
        }
        response.finish()
    }
}

fn first_or(values: Option<&Vec<String>>, default: &str) -> String {
    values
        .and_then(|v| v.first())
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::http::request::RequestOptions;
    use axum::http::{header, Request};

    fn app(config: AppConfig) -> Arc<Application> {
        Arc::new(Application::new(Vec::new(), config).unwrap())
    }

    fn context_for(request: Request<&'static str>, app: Arc<Application>) -> HandlerContext {
        let (parts, body) = request.into_parts();
        let request =
            RequestContext::from_parts(parts, Bytes::from_static(body.as_bytes()), RequestOptions::default());
        HandlerContext::new(request, app, Params::new())
    }

    fn get(uri: &'static str) -> Request<&'static str> {
        Request::builder().uri(uri).body("").unwrap()
    }

    #[test]
    fn test_clear_sets_baseline_headers() {
        let mut config = AppConfig::default();
        config.server_name = "TestServer".into();
        let mut ctx = context_for(get("/"), app(config));
        ctx.set_status(404);
        ctx.clear();
        assert_eq!(ctx.status(), StatusCode::OK);

        let (_, headers, _) = ctx.into_parts();
        assert_eq!(headers[header::SERVER], "TestServer");
        assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=UTF-8");
        assert!(headers.contains_key(header::DATE));
    }

    #[test]
    fn test_keep_alive_echoed_for_http10() {
        let request = Request::builder()
            .uri("/")
            .version(axum::http::Version::HTTP_10)
            .header("connection", "keep-alive")
            .body("")
            .unwrap();
        let mut ctx = context_for(request, app(AppConfig::default()));
        ctx.clear();
        let (_, headers, _) = ctx.into_parts();
        assert_eq!(headers[header::CONNECTION], "Keep-Alive");
    }

    #[test]
    fn test_arguments() {
        let mut ctx = context_for(get("/?q=rust&q=go&n=1"), app(AppConfig::default()));
        assert_eq!(ctx.get_argument("q", ""), "rust");
        assert_eq!(ctx.get_arguments("q"), vec!["rust", "go"]);
        assert_eq!(ctx.get_query_argument("missing", "dflt"), "dflt");
        assert!(ctx.get_query_arguments("missing").is_empty());
        ctx.write_str("ok");
    }

    #[test]
    fn test_raise_http_error_writes_once() {
        let mut ctx = context_for(get("/"), app(AppConfig::default()));
        let halt = ctx.raise_http_error(403, "forbidden");
        assert!(matches!(halt, Halt::Written));
        assert!(ctx.is_raised());
        ctx.write_header(500);

        let (status, _, body) = ctx.into_parts();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.as_ref(), b"forbidden");
    }

    #[test]
    fn test_redirect_requires_3xx() {
        let mut ctx = context_for(get("/"), app(AppConfig::default()));
        assert!(ctx.redirect("/elsewhere", 200).is_err());
        ctx.redirect("/elsewhere", 302).unwrap();
        let (status, headers, _) = ctx.into_parts();
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(headers[header::LOCATION], "/elsewhere");
    }

    #[test]
    fn test_secure_cookie_round_trip() {
        let mut config = AppConfig::default();
        config.cookie_secret = "k".into();
        let app = app(config);

        let mut ctx = context_for(get("/"), Arc::clone(&app));
        ctx.set_secure_cookie("user", "alice", CookieOptions::default());
        let (_, headers, _) = ctx.into_parts();
        let set_cookie = headers[header::SET_COOKIE].to_str().unwrap();
        let value = set_cookie
            .split(';')
            .next()
            .unwrap()
            .trim_start_matches("user=")
            .to_string();

        let request = Request::builder()
            .uri("/")
            .header("cookie", format!("user={value}"))
            .body("")
            .unwrap();
        let ctx = context_for(request, app);
        assert_eq!(ctx.get_secure_cookie("user").as_deref(), Some("alice"));
    }

    #[test]
    fn test_xsrf_token_is_cached_and_sets_cookie() {
        let mut ctx = context_for(get("/"), app(AppConfig::default()));
        let first = ctx.xsrf_token();
        assert_eq!(ctx.xsrf_token(), first);
        assert!(ctx.xsrf_form_html().contains(&first));

        let (_, headers, _) = ctx.into_parts();
        let cookies: Vec<_> = headers.get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].to_str().unwrap().starts_with("_xsrf="));
    }

    #[test]
    fn test_clear_all_cookies() {
        let request = Request::builder()
            .uri("/")
            .header("cookie", "a=1; b=2")
            .body("")
            .unwrap();
        let mut ctx = context_for(request, app(AppConfig::default()));
        ctx.clear_all_cookies();
        let (_, headers, _) = ctx.into_parts();
        assert_eq!(headers.get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn test_content_type_helpers() {
        let request = Request::builder()
            .uri("/")
            .header("content-type", "application/json; charset=utf-8")
            .body("")
            .unwrap();
        let ctx = context_for(request, app(AppConfig::default()));
        assert!(ctx.is_json());
        assert!(!ctx.is_html());
    }

    #[test]
    fn test_render_with_custom_templates_is_server_error() {
        let mut config = AppConfig::default();
        config.custom_templates = true;
        let mut ctx = context_for(get("/"), app(config));
        match ctx.render_bytes("index.html", &Value::Null) {
            Err(Halt::Error(err)) => assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_template_namespace_has_request_and_xsrf() {
        let mut ctx = context_for(get("/docs?x=1"), app(AppConfig::default()));
        let namespace = ctx.template_namespace();
        assert_eq!(namespace["request"]["path"], "/docs");
        assert_eq!(namespace["request"]["uri"], "/docs?x=1");
        assert!(namespace["xsrf_form_html"]
            .as_str()
            .unwrap()
            .starts_with(r#"<input type="hidden" name="_xsrf""#));
    }

    #[test]
    fn test_serve_file_head_sends_headers_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.json");
        std::fs::write(&file, "{\"a\":1}").unwrap();

        let request = Request::builder().method("HEAD").uri("/").body("").unwrap();
        let mut ctx = context_for(request, app(AppConfig::default()));
        ctx.serve_file(&file).unwrap();

        let (status, headers, body) = ctx.into_parts();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::CONTENT_LENGTH], "7");
        assert!(body.is_empty());
    }

    #[test]
    fn test_serve_file_missing_is_raised_404() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context_for(get("/"), app(AppConfig::default()));
        let halt = ctx.serve_file(dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(halt, Halt::Written));
        assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
    }
}
