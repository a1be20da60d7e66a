//! HTTP-facing middleware (`spec.md` §4.6).

pub mod http;

pub use http::{HttpMetricsLayer, HttpMetricsService};
