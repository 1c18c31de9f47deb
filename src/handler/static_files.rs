//! Static file serving.
//!
//! # Responsibilities
//! - Map the captured path onto the configured root without escaping it
//! - Answer conditional (`If-Modified-Since`) and single-range requests
//! - Set content type, `Last-Modified` and `Accept-Ranges`
//!
//! # Design Decisions
//! - Files are read whole; multi-range requests get the full body
//! - Range responses are never compressed
//! - A `v` query argument marks a versioned URL and enables long caching

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::Method;
use serde_json::Value;

use crate::handler::{
    Halt, HandlerContext, HandlerResult, HttpError, Params, PathArgs, RequestHandler,
};

/// Ten years, for versioned URLs.
const CACHE_MAX_AGE: u64 = 86400 * 365 * 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

#[derive(Debug, Default)]
pub struct StaticFileHandler {
    root: PathBuf,
}

impl StaticFileHandler {
    /// Root directory files are served from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut pb = self.root.clone();
        for comp in Path::new(url_path.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    fn serve(&mut self, ctx: &mut HandlerContext, args: &PathArgs, include_body: bool) -> HandlerResult {
        let [path] = args.exactly::<1>()?;
        let Some(file) = self.map_path(path) else {
            tracing::warn!(path, "rejected static path outside root");
            return Err(not_found(ctx));
        };
        send_file(ctx, &file, include_body)
    }
}

/// Answer with the contents of `file`: conditional and single-range
/// requests included, body omitted for HEAD.
pub(crate) fn send_file(ctx: &mut HandlerContext, file: &Path, include_body: bool) -> HandlerResult {
    let metadata = match fs::metadata(file) {
        Ok(m) if m.is_file() => m,
        _ => return Err(not_found(ctx)),
    };

    let modified = metadata.modified().ok();
    ctx.set_header("accept-ranges", "bytes");
    ctx.set_header("content-type", content_type(file));
    if let Some(modified) = modified {
        ctx.set_header("last-modified", &httpdate::fmt_http_date(modified));
    }
    if !ctx.get_argument("v", "").is_empty() {
        ctx.set_header("cache-control", &format!("public, max-age={CACHE_MAX_AGE}"));
        let expires = SystemTime::now() + Duration::from_secs(CACHE_MAX_AGE);
        ctx.set_header("expires", &httpdate::fmt_http_date(expires));
    }

    if let Some(modified) = modified {
        if not_modified_since(ctx.get_header("if-modified-since"), modified) {
            ctx.write_header(304);
            return Ok(());
        }
    }

    let data = fs::read(file).map_err(|e| read_error(file, e))?;
    let len = data.len() as u64;

    let (start, end) = match parse_range(ctx.get_header("range"), len) {
        ByteRange::Full => {
            if !include_body {
                ctx.response_mut().disable_compression();
                ctx.set_header("content-length", &len.to_string());
                return Ok(());
            }
            ctx.write(&data);
            return Ok(());
        }
        ByteRange::Unsatisfiable => {
            ctx.set_header("content-range", &format!("bytes */{len}"));
            return Err(ctx.raise_http_error(416, "requested range not satisfiable"));
        }
        ByteRange::Partial { start, end } => (start, end),
    };

    ctx.response_mut().disable_compression();
    ctx.set_header("content-range", &format!("bytes {start}-{end}/{len}"));
    ctx.set_header("content-length", &(end - start + 1).to_string());
    ctx.write_header(206);
    if include_body {
        ctx.write(&data[start as usize..=end as usize]);
    }
    Ok(())
}

impl RequestHandler for StaticFileHandler {
    fn path_args(&self, _method: &Method) -> Option<usize> {
        Some(1)
    }

    fn initialize(&mut self, _ctx: &mut HandlerContext, params: &Params) -> HandlerResult {
        let root = params
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| HttpError::internal("static file route has no 'path' parameter"))?;
        self.root = PathBuf::from(root);
        Ok(())
    }

    fn get(&mut self, ctx: &mut HandlerContext, args: &PathArgs) -> HandlerResult {
        self.serve(ctx, args, true)
    }

    fn head(&mut self, ctx: &mut HandlerContext, args: &PathArgs) -> HandlerResult {
        self.serve(ctx, args, false)
    }
}

fn not_found(ctx: &mut HandlerContext) -> Halt {
    ctx.set_header("content-type", "text/plain; charset=utf-8");
    ctx.raise_http_error(404, "404 page not found\n")
}

fn read_error(file: &Path, e: io::Error) -> Halt {
    tracing::error!(path = %file.display(), error = %e, "failed to read static file");
    match e.kind() {
        io::ErrorKind::NotFound => HttpError::not_found("file not found").into(),
        _ => HttpError::internal("failed to read file").into(),
    }
}

fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// True when the client copy (second resolution) is at least as new.
fn not_modified_since(header: &str, modified: SystemTime) -> bool {
    if header.is_empty() {
        return false;
    }
    let Ok(since) = httpdate::parse_http_date(header) else {
        return false;
    };
    let secs = |t: SystemTime| t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    secs(modified) <= secs(since)
}

/// Interpret a `Range` header against a body of `len` bytes.
fn parse_range(header: &str, len: u64) -> ByteRange {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || len == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: len.saturating_sub(suffix),
            end: len - 1,
        };
    }

    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Full;
    };
    if start >= len {
        return ByteRange::Unsatisfiable;
    }
    let end = if end.is_empty() {
        len - 1
    } else {
        match end.parse::<u64>() {
            Ok(end) => end.min(len - 1),
            Err(_) => return ByteRange::Full,
        }
    };
    if end < start {
        return ByteRange::Full;
    }
    ByteRange::Partial { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Application;
    use crate::config::AppConfig;
    use crate::handler::{CompletedResponse, Dispatcher};
    use crate::http::request::{RequestContext, RequestOptions};
    use axum::body::Bytes;
    use axum::http::{header, Request, StatusCode};
    use std::sync::Arc;

    fn fixture() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = dir.path().join("static");
        fs::create_dir(&static_dir).unwrap();
        fs::write(static_dir.join("hello.txt"), "Hello, static world!").unwrap();
        fs::write(dir.path().join("secret.txt"), "top secret").unwrap();

        let app = Application::with_work_dir(Vec::new(), AppConfig::default(), dir.path()).unwrap();
        (dir, Dispatcher::new(Arc::new(app)))
    }

    fn send(dispatcher: &Dispatcher, method: &str, uri: &str, headers: &[(&str, &str)]) -> CompletedResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        dispatcher.dispatch(RequestContext::from_parts(parts, Bytes::new(), RequestOptions::default()))
    }

    #[test]
    fn test_map_path_prevents_traversal() {
        let handler = StaticFileHandler {
            root: PathBuf::from("/srv/static"),
        };
        assert!(handler.map_path("../Cargo.toml").is_none());
        assert!(handler.map_path("css/../../etc/passwd").is_none());
        assert_eq!(
            handler.map_path("css/site.css"),
            Some(PathBuf::from("/srv/static/css/site.css"))
        );
    }

    #[test]
    fn test_serves_file_with_headers() {
        let (_dir, dispatcher) = fixture();
        let response = send(&dispatcher, "GET", "/static/hello.txt", &[]);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_ref(), b"Hello, static world!");
        assert_eq!(response.headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(response.headers[header::ACCEPT_RANGES], "bytes");
        assert!(response.headers.contains_key(header::LAST_MODIFIED));
        assert!(!response.headers.contains_key(header::CACHE_CONTROL));
    }

    #[test]
    fn test_traversal_is_404() {
        let (_dir, dispatcher) = fixture();
        let response = send(&dispatcher, "GET", "/static/../secret.txt", &[]);
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_missing_file_is_404() {
        let (_dir, dispatcher) = fixture();
        let response = send(&dispatcher, "GET", "/static/nope.txt", &[]);
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_if_modified_since_returns_304() {
        let (_dir, dispatcher) = fixture();
        let first = send(&dispatcher, "GET", "/static/hello.txt", &[]);
        let last_modified = first.headers[header::LAST_MODIFIED].to_str().unwrap().to_string();

        let response = send(
            &dispatcher,
            "GET",
            "/static/hello.txt",
            &[("if-modified-since", &last_modified)],
        );
        assert_eq!(response.status, StatusCode::NOT_MODIFIED);
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_range_returns_206() {
        let (_dir, dispatcher) = fixture();
        let response = send(&dispatcher, "GET", "/static/hello.txt", &[("range", "bytes=0-4")]);
        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.body.as_ref(), b"Hello");
        assert_eq!(response.headers[header::CONTENT_RANGE], "bytes 0-4/20");
    }

    #[test]
    fn test_unsatisfiable_range_returns_416() {
        let (_dir, dispatcher) = fixture();
        let response = send(&dispatcher, "GET", "/static/hello.txt", &[("range", "bytes=100-")]);
        assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers[header::CONTENT_RANGE], "bytes */20");
    }

    #[test]
    fn test_versioned_url_is_cached() {
        let (_dir, dispatcher) = fixture();
        let response = send(&dispatcher, "GET", "/static/hello.txt?v=3", &[]);
        assert_eq!(
            response.headers[header::CACHE_CONTROL],
            format!("public, max-age={CACHE_MAX_AGE}")
        );
    }

    #[test]
    fn test_head_has_no_body() {
        let (_dir, dispatcher) = fixture();
        let response = send(&dispatcher, "HEAD", "/static/hello.txt", &[]);
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
        assert_eq!(response.headers[header::CONTENT_LENGTH], "20");
    }

    #[test]
    fn test_post_is_405() {
        let (_dir, dispatcher) = fixture();
        let response = send(&dispatcher, "POST", "/static/hello.txt", &[]);
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("", 10), ByteRange::Full);
        assert_eq!(parse_range("bytes=2-5", 10), ByteRange::Partial { start: 2, end: 5 });
        assert_eq!(parse_range("bytes=7-", 10), ByteRange::Partial { start: 7, end: 9 });
        assert_eq!(parse_range("bytes=-3", 10), ByteRange::Partial { start: 7, end: 9 });
        assert_eq!(parse_range("bytes=2-50", 10), ByteRange::Partial { start: 2, end: 9 });
        assert_eq!(parse_range("bytes=10-", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-1,3-4", 10), ByteRange::Full);
        assert_eq!(parse_range("items=0-1", 10), ByteRange::Full);
    }

    #[test]
    fn test_content_type_table() {
        assert_eq!(content_type(Path::new("a.CSS")), "text/css; charset=utf-8");
        assert_eq!(content_type(Path::new("favicon.ico")), "image/x-icon");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }
}
