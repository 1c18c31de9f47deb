//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, fallback handler)
//!     → request.rs (arguments, files, cookies, scheme, client IP)
//!     → [dispatcher routes and runs the handler]
//!     → response.rs (buffered body, optional gzip/deflate)
//!     → Send to client
//! ```

pub mod cookies;
pub mod request;
pub mod response;
pub mod server;

pub use cookies::CookieOptions;
pub use request::{RequestContext, RequestOptions, UploadedFile};
pub use response::{Encoding, ResponseWriter};
pub use server::{HttpServer, ServerError};
