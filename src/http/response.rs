//! Buffered response sink.
//!
//! # Responsibilities
//! - Hold outgoing headers until the first flush
//! - Flush the status line at most once
//! - Compress the body with gzip or deflate when negotiated
//!
//! # Design Decisions
//! - The body encoder is chosen when headers are flushed, so handlers can
//!   still opt out (range responses) before writing
//! - Headers set after the flush are dropped with a warning
//! - `finish` always closes the encoder

use std::io::Write;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;

/// Body encodings the sink can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    /// First of `gzip`/`deflate` listed in an `Accept-Encoding` value.
    pub fn negotiate(accept_encoding: &str) -> Option<Self> {
        accept_encoding
            .split(',')
            .map(|token| token.split(';').next().unwrap_or_default().trim())
            .find_map(|token| match token {
                "gzip" => Some(Encoding::Gzip),
                "deflate" => Some(Encoding::Deflate),
                _ => None,
            })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }
}

enum BodyWriter {
    Plain(Vec<u8>),
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
}

impl BodyWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            BodyWriter::Plain(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            BodyWriter::Gzip(encoder) => encoder.write_all(data),
            BodyWriter::Deflate(encoder) => encoder.write_all(data),
        }
    }

    fn close(self) -> std::io::Result<Vec<u8>> {
        match self {
            BodyWriter::Plain(buf) => Ok(buf),
            BodyWriter::Gzip(encoder) => encoder.finish(),
            BodyWriter::Deflate(encoder) => encoder.finish(),
        }
    }
}

/// Outgoing response for one request.
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: BodyWriter,
    encoding: Option<Encoding>,
    header_written: bool,
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("encoding", &self.encoding)
            .field("header_written", &self.header_written)
            .finish()
    }
}

impl ResponseWriter {
    /// Create a sink. `encoding` is the negotiated compression, if any.
    pub fn new(encoding: Option<Encoding>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BodyWriter::Plain(Vec::new()),
            encoding,
            header_written: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_header_written(&self) -> bool {
        self.header_written
    }

    /// Replace a header. Ignored once headers are flushed.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = self.header_pair(name, value) {
            self.headers.insert(name, value);
        }
    }

    /// Add a header value, keeping existing ones.
    pub fn add_header(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = self.header_pair(name, value) {
            self.headers.append(name, value);
        }
    }

    pub fn delete_header(&mut self, name: &str) {
        if self.header_written {
            return;
        }
        self.headers.remove(name);
    }

    fn header_pair(&self, name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
        if self.header_written {
            tracing::warn!(header = %name, "header set after response headers were sent");
            return None;
        }
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => Some((name, value)),
            _ => {
                tracing::warn!(header = %name, "invalid header dropped");
                None
            }
        }
    }

    /// Skip compression for this response. Only effective before the flush.
    pub fn disable_compression(&mut self) {
        if !self.header_written {
            self.encoding = None;
        }
    }

    /// Flush the status and headers. Later calls are ignored.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.header_written {
            tracing::debug!(status = %status, "response headers already sent");
            return;
        }
        self.status = status;

        let compress = self.encoding.filter(|_| {
            status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED
        });
        if let Some(encoding) = compress {
            self.headers.insert(
                header::CONTENT_ENCODING,
                HeaderValue::from_static(encoding.as_str()),
            );
            self.headers.remove(header::CONTENT_LENGTH);
            self.headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
            self.body = match encoding {
                Encoding::Gzip => BodyWriter::Gzip(GzEncoder::new(Vec::new(), Compression::fast())),
                Encoding::Deflate => {
                    BodyWriter::Deflate(DeflateEncoder::new(Vec::new(), Compression::fast()))
                }
            };
        }
        self.header_written = true;
    }

    /// Append body bytes, flushing headers with the current status first.
    pub fn write(&mut self, data: &[u8]) {
        if !self.header_written {
            self.write_header(self.status);
        }
        if let Err(e) = self.body.write(data) {
            tracing::error!(error = %e, "failed to encode response body");
        }
    }

    /// Close the encoder and hand back the finished parts.
    pub fn finish(mut self) -> (StatusCode, HeaderMap, Bytes) {
        if !self.header_written {
            self.write_header(self.status);
        }
        let body = match self.body.close() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to close response encoder");
                Vec::new()
            }
        };
        (self.status, self.headers, Bytes::from(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_negotiate_takes_first_supported() {
        assert_eq!(Encoding::negotiate("br, deflate, gzip"), Some(Encoding::Deflate));
        assert_eq!(Encoding::negotiate("gzip;q=1.0"), Some(Encoding::Gzip));
        assert_eq!(Encoding::negotiate("br, identity"), None);
        assert_eq!(Encoding::negotiate(""), None);
    }

    #[test]
    fn test_plain_body() {
        let mut writer = ResponseWriter::new(None);
        writer.set_header("X-Test", "1");
        writer.write(b"hello ");
        writer.write(b"world");
        let (status, headers, body) = writer.finish();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-test"], "1");
        assert_eq!(body.as_ref(), b"hello world");
    }

    #[test]
    fn test_gzip_body_decodes() {
        let mut writer = ResponseWriter::new(Some(Encoding::Gzip));
        writer.write(b"compressed payload");
        let (_, headers, body) = writer.finish();
        assert_eq!(headers[header::CONTENT_ENCODING], "gzip");

        let mut decoded = String::new();
        GzDecoder::new(body.as_ref()).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "compressed payload");
    }

    #[test]
    fn test_no_compression_for_not_modified() {
        let mut writer = ResponseWriter::new(Some(Encoding::Gzip));
        writer.write_header(StatusCode::NOT_MODIFIED);
        let (status, headers, body) = writer.finish();
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert!(body.is_empty());
    }

    #[test]
    fn test_header_flushed_once() {
        let mut writer = ResponseWriter::new(None);
        writer.write_header(StatusCode::FORBIDDEN);
        writer.write_header(StatusCode::INTERNAL_SERVER_ERROR);
        writer.set_header("X-Late", "1");
        let (status, headers, _) = writer.finish();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(headers.get("x-late").is_none());
    }

    #[test]
    fn test_disable_compression_before_flush() {
        let mut writer = ResponseWriter::new(Some(Encoding::Deflate));
        writer.disable_compression();
        writer.write(b"raw");
        let (_, headers, body) = writer.finish();
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body.as_ref(), b"raw");
    }
}
