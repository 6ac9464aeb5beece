//! `ModuleInfo` — one module's parsed manifest.

use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;
use serde::Deserialize;
use sitehost_errors::ConfigError;

fn code_pattern() -> Regex {
    Regex::new(r"^[a-z][\w]*(\.[a-z][\w]*)*$").expect("static pattern is valid regex")
}

fn api_code_pattern() -> Regex {
    Regex::new(r"^[a-z][\w]*$").expect("static pattern is valid regex")
}

/// Raw shape of a module manifest file, before validation. Deserialized by
/// the host's config codec (opaque to this crate) and handed to
/// [`ModuleInfo::from_manifest`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleManifest {
    pub code: String,
    pub version: String,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub requires: BTreeMap<String, String>,
    #[serde(default)]
    pub api_code: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// One module's manifest, validated and normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub code: String,
    pub class_name: String,
    pub alias: String,
    pub version: String,
    pub requires: BTreeMap<String, String>,
    pub api_code: Option<String>,
    pub author: Option<String>,
    pub path: PathBuf,
    pub shared: bool,
}

impl ModuleInfo {
    /// `className` is the last dot-segment of `code` when not given
    /// explicitly; `alias` defaults to `className`.
    pub fn from_manifest(manifest: ModuleManifest, path: PathBuf, shared: bool) -> Result<Self, ConfigError> {
        if !code_pattern().is_match(&manifest.code) {
            return Err(ConfigError::InvalidModuleManifest {
                code: manifest.code.clone(),
                reason: "code must match [a-z][\\w]*(\\.[a-z][\\w]*)*".to_owned(),
            });
        }
        if let Some(api_code) = &manifest.api_code {
            if !api_code_pattern().is_match(api_code) {
                return Err(ConfigError::InvalidModuleManifest {
                    code: manifest.code.clone(),
                    reason: format!("apiCode '{api_code}' must match [a-z][\\w]*"),
                });
            }
        }

        let class_name = manifest
            .class_name
            .unwrap_or_else(|| last_dot_segment(&manifest.code).to_owned());
        let alias = manifest.alias.unwrap_or_else(|| class_name.clone());

        Ok(ModuleInfo {
            code: manifest.code,
            class_name,
            alias,
            version: manifest.version,
            requires: manifest.requires,
            api_code: manifest.api_code,
            author: manifest.author,
            path,
            shared,
        })
    }
}

fn last_dot_segment(code: &str) -> &str {
    code.rsplit('.').next().unwrap_or(code)
}
