//! `DistributorIdentifier` — `code[@tag]` — and its `Tag` component.

use std::fmt;

use once_regex::regex;
use sitehost_errors::ConfigError;

mod once_regex {
    /// Compile a `regex::Regex` once per call site, without pulling in
    /// `once_cell`/`lazy_static` for a handful of tiny, cheap patterns.
    macro_rules! regex {
        ($re:expr) => {{
            regex::Regex::new($re).expect("static pattern is valid regex")
        }};
    }
    pub(crate) use regex;
}

/// The `@tag` suffix of a `DistributorIdentifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// `*`, the implicit default when no `@tag` is given.
    Default,
    /// A dotted version literal, e.g. `2.1.0`.
    Version(String),
    /// Any other label matching `[a-z0-9][\w\-]*`.
    Label(String),
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Default => write!(f, "*"),
            Tag::Version(v) => write!(f, "{v}"),
            Tag::Label(l) => write!(f, "{l}"),
        }
    }
}

impl Tag {
    fn parse(raw: &str) -> Option<Tag> {
        if raw == "*" {
            return Some(Tag::Default);
        }
        let version_re = regex!(r"^\d+(\.\d+)*$");
        if version_re.is_match(raw) {
            return Some(Tag::Version(raw.to_owned()));
        }
        let label_re = regex!(r"^[a-z0-9][\w\-]*$");
        if label_re.is_match(raw) {
            return Some(Tag::Label(raw.to_owned()));
        }
        None
    }
}

/// `code[@tag]`. Two mounts with the same identifier share one `Distributor`
/// entry, so this type is the key of the distributor cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DistributorIdentifier {
    pub code: String,
    pub tag: Tag,
}

impl fmt::Display for DistributorIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Tag::Default => write!(f, "{}", self.code),
            other => write!(f, "{}@{other}", self.code),
        }
    }
}

impl DistributorIdentifier {
    /// Parse `code[@tag]`, validating `code` against `[a-z0-9][\w\-]*` and
    /// `tag` against `*` | version literal | label.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let code_re = regex!(r"^[a-z0-9][\w\-]*$");
        let (code, tag_raw) = match raw.split_once('@') {
            Some((c, t)) => (c, t),
            None => (raw, "*"),
        };
        if !code_re.is_match(code) {
            return Err(ConfigError::InvalidIdentifier { raw: raw.to_owned() });
        }
        let tag = Tag::parse(tag_raw).ok_or_else(|| ConfigError::InvalidIdentifier { raw: raw.to_owned() })?;
        Ok(DistributorIdentifier {
            code: code.to_owned(),
            tag,
        })
    }
}
