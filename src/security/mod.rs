//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outgoing secure cookie:
//!     → signing.rs (base64 value, timestamp, HMAC-SHA1)
//!     → Set-Cookie
//!
//! State-changing request with xsrf_cookies enabled:
//!     → xsrf.rs (submitted token vs. `_xsrf` cookie token)
//!     → 403 on missing or mismatched token
//! ```
//!
//! # Design Decisions
//! - Fail closed: a cookie that does not verify reads as absent
//! - No trust in client input

pub mod signing;
pub mod xsrf;
