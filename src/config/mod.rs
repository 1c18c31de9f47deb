//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)              settings table (serde_json::Map)
//!     → loader.rs (parse)             → AppConfig::from_settings
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → owned by Application, shared via Arc while serving
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the application is built
//! - All fields have defaults to allow minimal configs
//! - Unknown keys are kept in `extra` instead of rejected
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{AppConfig, ListenerConfig};
pub use validation::{validate_config, ValidationError};
