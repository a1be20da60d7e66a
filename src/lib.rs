#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths, unreachable_pub)]
#![warn(
    missing_docs,
    clippy::doc_link_with_quotes,
    clippy::doc_markdown,
    clippy::missing_errors_doc
)]

pub mod buildinfo;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod interceptor;
pub mod middleware;
pub mod names;
pub mod repository;
pub mod service;
pub mod sse;

pub use self::{
    buildinfo::BuildInfo,
    catalog::Catalog,
    config::{MonitoringConfig, StreamTuningConfig},
    dispatcher::{DispatcherHealth, DispatcherStore},
    errors::{CatalogError, ConfigError, MonitoringError, StreamError},
    interceptor::{FailureKind, WorkerInterceptor},
    middleware::HttpMetricsLayer,
    service::MonitoringService,
};
