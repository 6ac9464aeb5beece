//! The route pattern DSL and the `Route`/`RouteGroup` types built on top
//! of it.

use regex::Regex;

use crate::contracts::Method;

/// A middleware reference: a handler path invoked in onion order around the
/// matched handler. The core treats middleware as opaque
/// handler paths resolved the same way as the terminal handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddlewareRef(pub String);

/// One registered route: a compiled pattern, its handler, HTTP-method
/// filter, optional name, and middleware chain.
#[derive(Clone)]
pub struct Route {
    pub raw_pattern: String,
    pub compiled: Regex,
    pub closure_path: String,
    pub method: Method,
    pub name: Option<String>,
    pub middleware: Vec<MiddlewareRef>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("raw_pattern", &self.raw_pattern)
            .field("closure_path", &self.closure_path)
            .field("method", &self.method)
            .field("name", &self.name)
            .finish()
    }
}

/// A scoped builder: a path prefix and a shared middleware stack applied to
/// every route added through it: a scoped builder for `RouteGroup`.
#[derive(Debug, Default, Clone)]
pub struct RouteGroup {
    pub prefix: String,
    pub middleware: Vec<MiddlewareRef>,
}

impl RouteGroup {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        RouteGroup {
            prefix: prefix.into(),
            middleware: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_middleware(mut self, mw: impl Into<String>) -> Self {
        self.middleware.push(MiddlewareRef(mw.into()));
        self
    }

    #[must_use]
    pub fn scoped_pattern(&self, pattern: &str) -> String {
        crate::path_util::join(&[&self.prefix, pattern])
    }

    #[must_use]
    pub fn middleware_paths(&self) -> Vec<String> {
        self.middleware.iter().map(|m| m.0.clone()).collect()
    }
}

/// Translate the route DSL into an anchored regex.
///
/// - `:a`, `:d`, `:D`, `:w`, `:W` — any/digit/non-digit/alpha/non-alpha
///   character classes.
/// - `:[...]` — a raw bracket expression, copied through verbatim.
/// - every class is implicitly a capturing group; an explicit `{n}` /
///   `{n,}` / `{n,m}` repetition may follow it, defaulting to `+`.
/// - `(`/`)` are passed through for literal grouping; `\` escapes the next
///   character.
/// - anything else is matched literally (regex-escaped).
pub fn compile_pattern(pattern: &str) -> Result<Regex, String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0usize;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if i + 1 < chars.len() {
                    out.push_str(&regex::escape(&chars[i + 1].to_string()));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            ':' => {
                i += 1;
                let class_char = *chars.get(i).ok_or("trailing ':' with no class letter")?;
                let class_regex = if class_char == '[' {
                    let start = i;
                    let mut j = i + 1;
                    while j < chars.len() && chars[j] != ']' {
                        j += 1;
                    }
                    if j >= chars.len() {
                        return Err("unterminated ':[' bracket expression".to_owned());
                    }
                    let raw: String = chars[start..=j].iter().collect();
                    i = j + 1;
                    raw
                } else {
                    i += 1;
                    match class_char {
                        'a' => ".".to_owned(),
                        'd' => r"[0-9]".to_owned(),
                        'D' => r"[^0-9]".to_owned(),
                        'w' => r"[A-Za-z]".to_owned(),
                        'W' => r"[^A-Za-z]".to_owned(),
                        other => return Err(format!("unknown route DSL class ':{other}'")),
                    }
                };

                let repetition = if i < chars.len() && chars[i] == '{' {
                    let start = i;
                    let mut j = i + 1;
                    while j < chars.len() && chars[j] != '}' {
                        j += 1;
                    }
                    if j >= chars.len() {
                        return Err("unterminated '{' repetition".to_owned());
                    }
                    let raw: String = chars[start..=j].iter().collect();
                    i = j + 1;
                    raw
                } else {
                    "+".to_owned()
                };

                out.push('(');
                out.push_str(&class_regex);
                out.push_str(&repetition);
                out.push(')');
            }
            c @ ('(' | ')') => {
                out.push(c);
                i += 1;
            }
            other => {
                out.push_str(&regex::escape(&other.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_class_with_bounded_repetition_captures_and_rejects_out_of_range() {
        let re = compile_pattern("/user/:d{1,6}/profile").unwrap();
        let caps = re.captures("/user/42/profile").unwrap();
        assert_eq!(&caps[1], "42");
        assert!(!re.is_match("/user/1234567/profile"));
        assert!(!re.is_match("/user/abc/profile"));
    }

    #[test]
    fn default_repetition_is_one_or_more() {
        let re = compile_pattern("/tag/:w").unwrap();
        assert!(re.is_match("/tag/abc"));
        assert!(!re.is_match("/tag/"));
    }

    #[test]
    fn raw_bracket_expression_passes_through() {
        let re = compile_pattern("/code/:[A-F0-9]{4}").unwrap();
        assert!(re.is_match("/code/AB12"));
        assert!(!re.is_match("/code/zz99"));
    }

    #[test]
    fn literal_characters_are_escaped() {
        let re = compile_pattern("/a.b").unwrap();
        assert!(re.is_match("/a.b"));
        assert!(!re.is_match("/aXb"));
    }

    #[test]
    fn group_scoped_pattern_joins_prefix() {
        let group = RouteGroup::new("/api").with_middleware("auth");
        assert_eq!(group.scoped_pattern("/users"), "/api/users");
    }
}
