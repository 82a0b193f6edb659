//! Infrastructure: HTTP surface, Redis connections and runtime telemetry.

pub mod error;
pub mod http;
pub mod redact;
pub mod redis;
pub mod telemetry;
