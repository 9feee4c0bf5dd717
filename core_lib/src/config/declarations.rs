//! Check declarations read from the checks TOML file.
//!
//! ```toml
//! [checks.remotesettings.heartbeat]
//! description = "Remote Settings heartbeat"
//! module = "core.heartbeat"
//! ttl = 60
//! tags = ["ops"]
//! params.url = "https://${SERVER_HOST}/v1/__heartbeat__"
//! ```

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AppError, Result};

lazy_static! {
    static ref ENV_PLACEHOLDER: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckDeclaration {
    pub project: String,
    pub name: String,
    pub description: String,
    /// Identifier of the compiled contract implementing the check.
    pub module: String,
    pub ttl: Option<u64>,
    pub tags: Vec<String>,
    pub troubleshooting: Option<String>,
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawDeclaration {
    #[serde(default)]
    description: String,
    module: String,
    #[serde(default)]
    ttl: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    troubleshooting: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    checks: BTreeMap<String, BTreeMap<String, RawDeclaration>>,
}

pub fn load_declarations(path: &Path) -> Result<Vec<CheckDeclaration>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::Configuration(format!("cannot read checks file {}: {}", path.display(), e))
    })?;
    parse_declarations(&content)
}

pub fn parse_declarations(content: &str) -> Result<Vec<CheckDeclaration>> {
    let mut document: toml::Value = toml::from_str(content)
        .map_err(|e| AppError::Configuration(format!("invalid checks file: {}", e)))?;
    interpolate_env(&mut document);

    let raw: RawFile = document
        .try_into()
        .map_err(|e: toml::de::Error| AppError::Configuration(format!("invalid checks file: {}", e)))?;

    let mut declarations = Vec::new();
    for (project, checks) in raw.checks {
        for (name, check) in checks {
            declarations.push(CheckDeclaration {
                project: project.clone(),
                name,
                description: check.description,
                module: check.module,
                ttl: check.ttl,
                tags: check.tags,
                troubleshooting: check.troubleshooting,
                params: check.params,
            });
        }
    }

    Ok(declarations)
}

/// Replaces `${VAR}` in every string value with the variable's value, or with
/// nothing when it is unset.
fn interpolate_env(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if ENV_PLACEHOLDER.is_match(s) {
                *s = ENV_PLACEHOLDER
                    .replace_all(s, |caps: &Captures| std::env::var(&caps[1]).unwrap_or_default())
                    .into_owned();
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(interpolate_env),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| interpolate_env(v)),
        _ => {}
    }
}
