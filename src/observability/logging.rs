//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Emit the per-request access line
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the configured level
//! - Initialization is idempotent so tests can call it freely

use std::time::Duration;

use axum::http::Method;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lemon={default_level},tower_http={default_level}")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// One line per completed request.
pub fn log_access(status: u16, method: &Method, uri: &str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    if status >= 500 {
        tracing::error!(status, method = %method, path = %uri, elapsed_ms, "request completed");
    } else if status >= 400 {
        tracing::warn!(status, method = %method, path = %uri, elapsed_ms, "request completed");
    } else {
        tracing::info!(status, method = %method, path = %uri, elapsed_ms, "request completed");
    }
}
