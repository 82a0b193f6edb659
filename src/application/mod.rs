//! Application services: HTTP-facing errors and background jobs.

pub mod error;
pub mod jobs;
