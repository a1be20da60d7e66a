//! Configuration consumed by the monitoring service: the service's own `Config`
//! (validated, env-overlaid the way a host would apply it) and the stream tunables
//! the host supplies from its own configuration source.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Monitoring service configuration (`spec.md` §6.1).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct MonitoringConfig {
    /// Whether the monitoring service is enabled at all.
    #[serde(default = "MonitoringConfig::default_enabled")]
    pub enabled: bool,
    /// URL path the Prometheus exposition handler is served under.
    #[serde(default = "MonitoringConfig::default_path")]
    pub path: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            path: Self::default_path(),
        }
    }
}

impl MonitoringConfig {
    /// Default value for [`Self::enabled`].
    #[must_use]
    #[inline]
    fn default_enabled() -> bool {
        false
    }

    /// Default value for [`Self::path`].
    #[must_use]
    #[inline]
    fn default_path() -> String {
        String::from("/metrics")
    }

    /// Set whether the service is enabled.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the exposition path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Validate `path`: non-empty, absolute, not under `/api/`, and free of `?`.
    ///
    /// # Errors
    ///
    /// Returns the specific [`ConfigError`] variant describing the violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::NotAbsolute(self.path.clone()));
        }
        if self.path.starts_with("/api/") {
            return Err(ConfigError::UnderApi(self.path.clone()));
        }
        if self.path.contains('?') {
            return Err(ConfigError::ContainsQuery(self.path.clone()));
        }
        Ok(())
    }

    /// Apply the `MONITORING_ENABLED`/`MONITORING_PATH` environment overlay.
    ///
    /// Malformed values are ignored rather than treated as errors, matching the
    /// host's narrow, single-purpose env-overlay style (`spec.md` §6.1).
    #[must_use]
    pub fn apply_env_overlay(mut self) -> Self {
        if let Ok(raw) = std::env::var("MONITORING_ENABLED") {
            if let Ok(parsed) = raw.trim().parse::<bool>() {
                self.enabled = parsed;
            }
        }
        if let Ok(raw) = std::env::var("MONITORING_PATH") {
            if !raw.is_empty() {
                self.path = raw;
            }
        }
        self
    }
}

/// Stream polling/heartbeat tunables consumed from the host's configuration source
/// under `Stream.Task.*` (`spec.md` §6.4). The host constructs and owns this; this
/// crate never parses environment variables or config files for it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct StreamTuningConfig {
    /// Default polling interval when the client does not request one.
    #[serde(default = "StreamTuningConfig::default_poll", with = "humantime_serde")]
    pub default_poll: Duration,
    /// Minimum accepted polling interval.
    #[serde(default = "StreamTuningConfig::default_min_poll", with = "humantime_serde")]
    pub min_poll: Duration,
    /// Maximum accepted polling interval.
    #[serde(default = "StreamTuningConfig::default_max_poll", with = "humantime_serde")]
    pub max_poll: Duration,
    /// Interval between heartbeat (keep-alive comment) frames.
    #[serde(
        default = "StreamTuningConfig::default_heartbeat_frequency",
        with = "humantime_serde"
    )]
    pub heartbeat_frequency: Duration,
    /// Pub/sub channel prefix for text-mode token streaming (legacy channel path).
    #[serde(default = "StreamTuningConfig::default_redis_channel_prefix")]
    pub redis_channel_prefix: String,
}

impl Default for StreamTuningConfig {
    fn default() -> Self {
        Self {
            default_poll: Self::default_poll(),
            min_poll: Self::default_min_poll(),
            max_poll: Self::default_max_poll(),
            heartbeat_frequency: Self::default_heartbeat_frequency(),
            redis_channel_prefix: Self::default_redis_channel_prefix(),
        }
    }
}

impl StreamTuningConfig {
    /// Default value for [`Self::default_poll`].
    #[must_use]
    #[inline]
    fn default_poll() -> Duration {
        Duration::from_millis(500)
    }

    /// Default value for [`Self::min_poll`].
    #[must_use]
    #[inline]
    fn default_min_poll() -> Duration {
        Duration::from_millis(250)
    }

    /// Default value for [`Self::max_poll`].
    #[must_use]
    #[inline]
    fn default_max_poll() -> Duration {
        Duration::from_secs(2)
    }

    /// Default value for [`Self::heartbeat_frequency`].
    #[must_use]
    #[inline]
    fn default_heartbeat_frequency() -> Duration {
        Duration::from_secs(15)
    }

    /// Default value for [`Self::redis_channel_prefix`].
    #[must_use]
    #[inline]
    fn default_redis_channel_prefix() -> String {
        String::from("stream:tokens:")
    }

    /// Clamp `requested` (if given) into `[min_poll, max_poll]`, or return
    /// `default_poll` when `requested` is `None`. Returns `None` if `requested` is
    /// `Some` but falls outside the bounds — the caller turns that into a 400.
    #[must_use]
    pub fn resolve_poll_interval(&self, requested: Option<Duration>) -> Option<Duration> {
        match requested {
            None => Some(self.default_poll),
            Some(d) if d >= self.min_poll && d <= self.max_poll => Some(d),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_disabled_at_metrics_path() {
        let cfg = MonitoringConfig::default();
        assert!(!cfg.enabled);
        assert_eq!(cfg.path, "/metrics");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_empty_path() {
        let cfg = MonitoringConfig::default().with_path("");
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyPath));
    }

    #[test]
    fn rejects_relative_path() {
        let cfg = MonitoringConfig::default().with_path("metrics");
        assert_eq!(cfg.validate(), Err(ConfigError::NotAbsolute("metrics".into())));
    }

    #[test]
    fn rejects_path_under_api() {
        let cfg = MonitoringConfig::default().with_path("/api/metrics");
        assert_eq!(cfg.validate(), Err(ConfigError::UnderApi("/api/metrics".into())));
    }

    #[test]
    fn rejects_path_with_query() {
        let cfg = MonitoringConfig::default().with_path("/metrics?foo=1");
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ContainsQuery("/metrics?foo=1".into()))
        );
    }

    #[test]
    fn env_overlay_ignores_malformed_values() {
        std::env::remove_var("MONITORING_ENABLED");
        std::env::remove_var("MONITORING_PATH");
        std::env::set_var("MONITORING_ENABLED", "not-a-bool");
        let cfg = MonitoringConfig::default().apply_env_overlay();
        assert!(!cfg.enabled);
        std::env::remove_var("MONITORING_ENABLED");
    }

    #[test]
    fn env_overlay_applies_valid_values() {
        std::env::set_var("MONITORING_ENABLED", "true");
        std::env::set_var("MONITORING_PATH", "/custom-metrics");
        let cfg = MonitoringConfig::default().apply_env_overlay();
        assert!(cfg.enabled);
        assert_eq!(cfg.path, "/custom-metrics");
        std::env::remove_var("MONITORING_ENABLED");
        std::env::remove_var("MONITORING_PATH");
    }

    #[test]
    fn poll_interval_resolution() {
        let cfg = StreamTuningConfig::default();
        assert_eq!(cfg.resolve_poll_interval(None), Some(Duration::from_millis(500)));
        assert_eq!(
            cfg.resolve_poll_interval(Some(Duration::from_millis(300))),
            Some(Duration::from_millis(300))
        );
        assert_eq!(cfg.resolve_poll_interval(Some(Duration::from_millis(100))), None);
        assert_eq!(cfg.resolve_poll_interval(Some(Duration::from_secs(3))), None);
    }
}
