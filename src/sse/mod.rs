//! Task-execution SSE streaming: configures, runs, and terminates a per-connection
//! Server-Sent Events stream.
//!
//! [`config::prepare`] resolves a request into a [`config::StreamConfig`];
//! [`engine::run`] turns that into the response stream actually served. [`close`]
//! holds the per-connection close-accounting guard both stages share.

pub mod close;
pub mod config;
pub mod engine;
pub mod envelope;

pub use close::{CloseReason, StreamCloseInfo};
pub use config::{prepare, StreamConfig, StreamMode, StreamRequest};
pub use engine::run;
