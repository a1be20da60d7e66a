//! Canonical, namespaced metric names.
//!
//! Every instrument built by [`crate::catalog`] gets its name from [`Name`]. The
//! scheme is `<prefix>_<subsystem>_<name>`, with the subsystem segment optional and
//! the whole function idempotent on already-prefixed input.

/// Fixed prefix every canonical metric name carries.
pub const PREFIX: &str = "workflow";

/// Produce the canonical metric name for a `subsystem`/`name` pair.
///
/// Leading/trailing whitespace and underscores are trimmed from both inputs before
/// joining. If `name` already starts with [`PREFIX`], it is returned unchanged (makes
/// the function idempotent: `name(s, name(s2, n)) == name(s2, n)` when `n` is already
/// canonical).
#[must_use]
pub fn name(subsystem: &str, name: &str) -> String {
    let name = name.trim();
    if name.starts_with(PREFIX) {
        return name.to_string();
    }

    let subsystem = trim_underscores(subsystem.trim());
    let name = trim_underscores(name);

    match (subsystem.is_empty(), name.is_empty()) {
        (true, true) => PREFIX.to_string(),
        (true, false) => format!("{PREFIX}_{name}"),
        (false, true) => format!("{PREFIX}_{subsystem}"),
        (false, false) => format!("{PREFIX}_{subsystem}_{name}"),
    }
}

fn trim_underscores(s: &str) -> &str {
    s.trim_matches('_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_subsystem_and_name() {
        assert_eq!(name("execution", "requests_total"), "workflow_execution_requests_total");
    }

    #[test]
    fn trims_whitespace_and_underscores() {
        assert_eq!(name(" _execution_ ", " _requests_total_ "), "workflow_execution_requests_total");
    }

    #[test]
    fn empty_subsystem_drops_segment() {
        assert_eq!(name("", "uptime_seconds"), "workflow_uptime_seconds");
    }

    #[test]
    fn empty_name_drops_segment() {
        assert_eq!(name("system", ""), "workflow_system");
    }

    #[test]
    fn both_empty_yields_prefix() {
        assert_eq!(name("", ""), "workflow");
    }

    #[test]
    fn already_prefixed_is_unchanged() {
        assert_eq!(name("whatever", "workflow_execution_requests_total"), "workflow_execution_requests_total");
    }

    #[test]
    fn idempotent() {
        let once = name("execution", "requests_total");
        let twice = name("anything", &once);
        assert_eq!(once, twice);
    }
}
