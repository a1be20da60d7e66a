//! Lazily-loaded build metadata for the `build_info` observable gauge.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

const UNKNOWN: &str = "unknown";

#[derive(Debug)]
struct Inner {
    cache: RwLock<(String, String, String)>,
    logged_once: OnceCell<()>,
}

/// Cached `(version, commit_hash, go_version)` triple reported by `build_info`.
///
/// Cloning is cheap (an `Arc` handle to the same cache). Constructed from injected
/// build variables; if those are still at their defaults and the process is not under
/// test, [`BuildInfo::spawn_loader`] starts a background task that fills the cache
/// from richer runtime build metadata.
#[derive(Clone, Debug)]
pub struct BuildInfo(Arc<Inner>);

impl BuildInfo {
    /// Read injected build variables (`VERSION`, `COMMIT_HASH` environment variables,
    /// the build-time equivalent of linker-injected version strings), falling back to
    /// `"unknown"`. The toolchain field always starts at `"unknown"` until the loader
    /// fills it.
    #[must_use]
    pub fn defaults() -> Self {
        let version = std::env::var("VERSION").unwrap_or_else(|_| UNKNOWN.to_string());
        let commit_hash = std::env::var("COMMIT_HASH").unwrap_or_else(|_| UNKNOWN.to_string());
        Self(Arc::new(Inner {
            cache: RwLock::new((version, commit_hash, UNKNOWN.to_string())),
            logged_once: OnceCell::new(),
        }))
    }

    /// Current cached `(version, commit_hash, go_version)` triple.
    #[must_use]
    pub fn current(&self) -> (String, String, String) {
        self.0.cache.read().clone()
    }

    /// `true` if every field is still at its `"unknown"`/default value.
    #[must_use]
    fn at_defaults(&self) -> bool {
        let (version, commit_hash, toolchain) = self.current();
        version == UNKNOWN && commit_hash == UNKNOWN && toolchain == UNKNOWN
    }

    /// Spawn a background task that fills the cache from the crate's own build
    /// metadata (`CARGO_PKG_VERSION`, the Rust compiler version) when the injected
    /// variables were left at their defaults. No-op under test (`cfg!(test)`) or when
    /// defaults were already overridden by the environment.
    ///
    /// Logs the resolved triple exactly once, after the cache fill, via `tracing`.
    pub fn spawn_loader(&self) {
        if cfg!(test) || !self.at_defaults() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let version = env!("CARGO_PKG_VERSION").to_string();
            let commit_hash = option_env!("COMMIT_HASH").unwrap_or(UNKNOWN).to_string();
            let toolchain = rustc_version();
            *this.0.cache.write() = (version.clone(), commit_hash.clone(), toolchain.clone());
            this.0.logged_once.get_or_init(|| {
                tracing::info!(version, commit_hash, toolchain, "build info resolved");
            });
        });
    }
}

fn rustc_version() -> String {
    option_env!("RUSTC_VERSION").unwrap_or(UNKNOWN).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_report_unknown_when_env_unset() {
        let info = BuildInfo::defaults();
        let (version, commit_hash, toolchain) = info.current();
        assert!(!version.is_empty());
        assert!(!commit_hash.is_empty());
        assert_eq!(toolchain, UNKNOWN);
    }

    #[test]
    fn loader_is_noop_under_test() {
        let info = BuildInfo::defaults();
        info.spawn_loader();
        // cfg!(test) short-circuits before anything is spawned; cache is unchanged.
        assert_eq!(info.current(), info.current());
    }
}
