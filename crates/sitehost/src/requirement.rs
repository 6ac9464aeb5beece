//! Minimal version-range satisfaction check for `ModuleInfo.requires`. The
//! core only needs to decide "does this dependency's installed version
//! satisfy the requested range" — it does
//! not need a full semver implementation, since ranges are opaque strings
//! the operator writes and no arithmetic beyond comparison is specified.

/// Supports `"*"` (anything), an exact literal (`"2.1.0"`), and a `^`-prefixed
/// same-major-version range (`"^2.0.0"`). Anything else is treated as an
/// exact-match requirement.
#[must_use]
pub fn version_satisfies(version: &str, range: &str) -> bool {
    if range == "*" || range.is_empty() {
        return true;
    }
    if let Some(base) = range.strip_prefix('^') {
        return same_major(version, base);
    }
    version == range
}

fn major(v: &str) -> Option<&str> {
    v.split('.').next()
}

fn same_major(version: &str, base: &str) -> bool {
    match (major(version), major(base)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_always_satisfies() {
        assert!(version_satisfies("1.2.3", "*"));
    }

    #[test]
    fn exact_literal_requires_equality() {
        assert!(version_satisfies("2.1.0", "2.1.0"));
        assert!(!version_satisfies("2.1.1", "2.1.0"));
    }

    #[test]
    fn caret_range_accepts_same_major_only() {
        assert!(version_satisfies("2.5.0", "^2.0.0"));
        assert!(!version_satisfies("3.0.0", "^2.0.0"));
    }
}
