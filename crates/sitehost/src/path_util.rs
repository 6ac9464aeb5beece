//! Pure path normalization and ordering helpers.
//!
//! Everything here is side-effect free: no filesystem lookups, no `..`
//! resolution against a real tree. `normalize` treats `..` lexically and
//! drops any component that would rise above the root, matching the
//! behavior `SiteRegistry`/`Domain` rely on when joining mount paths.

use std::cmp::Ordering;

/// Collapse any mix of `/` and `\` into `sep`, resolve `.`/`..` lexically,
/// and strip a trailing separator (except when the whole path is the root).
///
/// A leading separator is preserved unless `trim_leading` is set.
#[must_use]
pub fn normalize(path: &str, trim_leading: bool, sep: char) -> String {
    let had_leading = path.starts_with('/') || path.starts_with('\\');

    let mut stack: Vec<&str> = Vec::new();
    for component in path.split(['/', '\\']).filter(|s| !s.is_empty()) {
        match component {
            "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    let lead = if had_leading && !trim_leading {
        sep.to_string()
    } else {
        String::new()
    };

    if stack.is_empty() {
        if lead.is_empty() {
            String::new()
        } else {
            lead
        }
    } else {
        format!("{lead}{}", stack.join(&sep.to_string()))
    }
}

/// Join path components with `/` and normalize the result.
#[must_use]
pub fn join(parts: &[&str]) -> String {
    normalize(&parts.join("/"), false, '/')
}

/// Depth of a normalized path: the number of non-empty segments.
#[must_use]
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Stable-sort `(urlPath, V)` pairs so deeper paths come first; ties are
/// broken by lexical order descending. This is the sole authority on
/// "longest-prefix match" ordering consumed by `Domain` and `Distributor`.
#[must_use]
pub fn sort_by_depth_desc<V>(mut entries: Vec<(String, V)>) -> Vec<(String, V)> {
    entries.sort_by(|(a, _), (b, _)| match depth(b).cmp(&depth(a)) {
        Ordering::Equal => b.cmp(a),
        other => other,
    });
    entries
}

/// True iff `prefix` is a segment-wise prefix of `path`: `/foo` matches
/// `/foo` and `/foo/x` but not `/foobar`.
#[must_use]
pub fn is_segment_prefix(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    if !path.starts_with(prefix) {
        return false;
    }
    match path.as_bytes().get(prefix.len()) {
        None => true,
        Some(b'/') => true,
        _ => false,
    }
}

/// Strip `prefix` from `path`, preserving the leading separator of the
/// residual. An empty residual becomes `"/"`.
#[must_use]
pub fn residual_after(prefix: &str, path: &str) -> String {
    if prefix == "/" {
        return if path.is_empty() {
            "/".to_owned()
        } else {
            path.to_owned()
        };
    }
    let rest = &path[prefix.len()..];
    if rest.is_empty() {
        "/".to_owned()
    } else {
        rest.to_owned()
    }
}
