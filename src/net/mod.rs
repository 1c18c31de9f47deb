//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → plain: tokio TcpListener served by axum
//!     → TLS:   tls.rs (rustls config) served by axum-server
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - TLS is optional and enabled by configuring both cert and key
//! - Missing certificate files abort startup

pub mod tls;
