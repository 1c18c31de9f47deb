//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain in-flight requests → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Startup order lives in main: config, logging, application, listener
//! - One broadcast channel reaches every server task

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
