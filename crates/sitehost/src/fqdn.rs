//! FQDN formatting, validation, and the fixed domain-resolution order: exact
//! match, exact-match-with-port-stripped, alias, alias-without-port,
//! wildcard, catch-all, miss.

use std::collections::HashMap;

/// Lowercase, trim surrounding whitespace, and drop a trailing dot.
#[must_use]
pub fn format(raw: &str) -> String {
    let trimmed = raw.trim().to_ascii_lowercase();
    trimmed.strip_suffix('.').map_or_else(|| trimmed.clone(), str::to_owned)
}

fn is_valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_alnum(bytes[0]) {
        return false;
    }
    if bytes.len() == 1 {
        return true;
    }
    if !is_alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes[1..bytes.len() - 1]
        .iter()
        .all(|&b| is_alnum(b) || b == b'-')
}

/// Strip a trailing `:PORT` suffix, returning `(host, port)` if one was
/// present and well-formed (1-65535).
fn split_port(input: &str) -> (&str, Option<u16>) {
    if let Some(idx) = input.rfind(':') {
        let (host, port_str) = (&input[..idx], &input[idx + 1..]);
        if let Ok(port) = port_str.parse::<u32>() {
            if port >= 1 && port <= u32::from(u16::MAX) {
                return (host, Some(port as u16));
            }
        }
    }
    (input, None)
}

/// `f` is a dot-separated sequence of labels, optionally with exactly one
/// wildcard label standing alone, optionally with a `:PORT` suffix when
/// `allow_port` is set.
#[must_use]
pub fn is_valid(f: &str, allow_port: bool) -> bool {
    let host = if allow_port {
        let (host, port) = split_port(f);
        if f.contains(':') && port.is_none() {
            return false;
        }
        host
    } else {
        if f.contains(':') {
            return false;
        }
        f
    };

    if host.is_empty() {
        return false;
    }
    let labels: Vec<&str> = host.split('.').collect();
    let wildcard_count = labels.iter().filter(|l| **l == "*").count();
    if wildcard_count > 1 {
        return false;
    }
    labels.iter().all(|l| *l == "*" || is_valid_label(l))
}

/// Outcome of `resolve`: the key that matched in `domains`, and the
/// effective alias (if resolution passed through an alias or wildcard hop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub matched_key: String,
    pub effective_alias: Option<String>,
}

fn labels_match_wildcard(pattern: &str, input: &str) -> bool {
    let pat_labels: Vec<&str> = pattern.split('.').collect();
    let in_labels: Vec<&str> = input.split('.').collect();
    if pat_labels.len() != in_labels.len() {
        return false;
    }
    pat_labels
        .iter()
        .zip(in_labels.iter())
        .all(|(p, i)| *p == "*" || p == i)
}

/// Resolve `input` against `domains` (the keys of the site config's domain
/// map) and `alias` (alias FQDN -> canonical FQDN), following the seven-step
/// resolution order. Returns `None` on no match (step 7).
#[must_use]
pub fn resolve(input: &str, domains: &HashMap<String, ()>, alias: &HashMap<String, String>) -> Option<Resolution> {
    resolve_keys(input, domains.keys().map(String::as_str), alias)
}

/// Same as [`resolve`] but takes the domain keys as a plain iterator, so
/// callers that don't want to build a throwaway `HashMap<String, ()>` (e.g.
/// `SiteRegistry`, whose values carry real mount data) can reuse it.
#[must_use]
pub fn resolve_keys<'a>(
    input: &str,
    domain_keys: impl Iterator<Item = &'a str> + Clone,
    alias: &HashMap<String, String>,
) -> Option<Resolution> {
    let (host_only, _) = split_port(input);

    // 1. exact match of input in domains
    if domain_keys.clone().any(|k| k == input) {
        return Some(Resolution {
            matched_key: input.to_owned(),
            effective_alias: None,
        });
    }

    // 2. exact match of input with port stripped
    if host_only != input && domain_keys.clone().any(|k| k == host_only) {
        return Some(Resolution {
            matched_key: host_only.to_owned(),
            effective_alias: None,
        });
    }

    // 3. input as alias (full FQDN) -> canonical
    if let Some(canonical) = alias.get(input) {
        return Some(Resolution {
            matched_key: canonical.clone(),
            effective_alias: Some(input.to_owned()),
        });
    }

    // 4. input-without-port as alias -> canonical
    if host_only != input {
        if let Some(canonical) = alias.get(host_only) {
            return Some(Resolution {
                matched_key: canonical.clone(),
                effective_alias: Some(host_only.to_owned()),
            });
        }
    }

    // 5. wildcard iteration: pattern becomes the key, input becomes the alias
    for key in domain_keys.clone() {
        if key.contains('*') && labels_match_wildcard(key, host_only) {
            return Some(Resolution {
                matched_key: key.to_owned(),
                effective_alias: Some(host_only.to_owned()),
            });
        }
    }

    // 6. bare "*" catch-all
    if domain_keys.clone().any(|k| k == "*") {
        return Some(Resolution {
            matched_key: "*".to_owned(),
            effective_alias: Some(host_only.to_owned()),
        });
    }

    // 7. no match
    None
}
