//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, access log)
//!     → tower_http TraceLayer (per-request spans)
//!
//! Consumers:
//!     → stdout via tracing-subscriber fmt layer
//! ```
//!
//! # Design Decisions
//! - Structured fields, never preformatted messages
//! - Access log emitted by the dispatcher, once per request

pub mod logging;
