//! `Domain` — one resolved FQDN: the depth-sorted mount list handed back by
//! `SiteRegistry::resolve_host`, plus `match_query`, the
//! longest-prefix lookup that turns a URL query into a `(identifier,
//! mount_path, residual_path)` triple for `Application` to construct (or
//! reuse) a `Distributor` from.

use crate::identifier::DistributorIdentifier;
use crate::path_util;

/// Result of a successful [`Domain::match_query`]: which mount matched, and
/// the part of the query left over for the distributor to route internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedMount {
    pub identifier: DistributorIdentifier,
    pub mount_path: String,
    pub residual_path: String,
}

/// One resolved FQDN: the matched domain key, the effective alias (if
/// resolution passed through one), and the mount list for that key,
/// already depth-sorted by `SiteRegistry::reload`.
pub struct Domain {
    pub matched_key: String,
    pub effective_alias: Option<String>,
    mounts: Vec<(String, DistributorIdentifier)>,
}

impl Domain {
    #[must_use]
    pub fn new(matched_key: String, effective_alias: Option<String>, mounts: Vec<(String, DistributorIdentifier)>) -> Self {
        Domain {
            matched_key,
            effective_alias,
            mounts,
        }
    }

    /// `matchQuery(urlQuery)`: the first mount (by
    /// registration depth, deepest first) whose `urlPath` is a segment-wise
    /// prefix of the normalized query wins. An empty query is treated as
    /// `"/"`. Returns `None` if no mount matches.
    #[must_use]
    pub fn match_query(&self, url_query: &str) -> Option<MatchedMount> {
        let normalized = if url_query.is_empty() {
            "/".to_owned()
        } else {
            path_util::normalize(url_query, false, '/')
        };
        let normalized = if normalized.is_empty() { "/".to_owned() } else { normalized };

        for (mount_path, identifier) in &self.mounts {
            if path_util::is_segment_prefix(mount_path, &normalized) {
                return Some(MatchedMount {
                    identifier: identifier.clone(),
                    mount_path: mount_path.clone(),
                    residual_path: path_util::residual_after(mount_path, &normalized),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(mounts: &[(&str, &str)]) -> Domain {
        let mounts = mounts
            .iter()
            .map(|(p, id)| ((*p).to_owned(), DistributorIdentifier::parse(id).unwrap()))
            .collect();
        Domain::new("example.com".to_owned(), None, mounts)
    }

    #[test]
    fn longest_mount_wins_over_shorter_overlapping_prefix() {
        let d = domain(&[("/api/v1", "v1"), ("/api", "api"), ("/", "root")]);
        let m = d.match_query("/api/v1/users").unwrap();
        assert_eq!(m.mount_path, "/api/v1");
        assert_eq!(m.identifier.code, "v1");
        assert_eq!(m.residual_path, "/users");
    }

    #[test]
    fn falls_back_to_shallower_mount_when_deeper_does_not_match() {
        let d = domain(&[("/api/v1", "v1"), ("/api", "api"), ("/", "root")]);
        let m = d.match_query("/api/v2/users").unwrap();
        assert_eq!(m.mount_path, "/api");
        assert_eq!(m.residual_path, "/v2/users");
    }

    #[test]
    fn empty_query_is_treated_as_root() {
        let d = domain(&[("/", "root")]);
        let m = d.match_query("").unwrap();
        assert_eq!(m.mount_path, "/");
        assert_eq!(m.residual_path, "/");
    }

    #[test]
    fn no_matching_mount_returns_none() {
        let d = domain(&[("/api", "api")]);
        assert!(d.match_query("/other").is_none());
    }

    #[test]
    fn exact_mount_path_match_yields_root_residual() {
        let d = domain(&[("/api", "api"), ("/", "root")]);
        let m = d.match_query("/api").unwrap();
        assert_eq!(m.mount_path, "/api");
        assert_eq!(m.residual_path, "/");
    }

    #[test]
    fn prefix_boundary_respects_segments_not_substrings() {
        let d = domain(&[("/api", "api"), ("/", "root")]);
        let m = d.match_query("/apistuff").unwrap();
        assert_eq!(m.mount_path, "/", "must not treat /api as a substring prefix of /apistuff");
    }
}
