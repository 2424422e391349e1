// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration Loader
//!
//! Builds the container configuration from three layers, later layers
//! winning:
//!
//! 1. defaults (the embedded `fsgate-default.yaml` for the binary)
//! 2. `<config-dir>/<name>-site.yaml`, or a preset configuration
//! 3. process environment: the dotted key itself
//!    (`fsgate.gateway.storage.allowlist`) or its upper-snake form
//!    (`FSGATE_GATEWAY_STORAGE_ALLOWLIST`)
//!
//! YAML documents are flat maps. Scalars are stringified, sequences are
//! joined with commas.

use crate::domain::config::Configuration;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Built-in defaults shipped with the gateway.
pub const DEFAULTS_YAML: &str = include_str!("../../resources/fsgate-default.yaml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file [{0}] is not a file")]
    NotAFile(PathBuf),

    #[error("could not read configuration file [{path}]: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse configuration [{origin}]: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration [{origin}] must be a flat map of scalars and lists, offending key [{key}]")]
    NotFlat { origin: String, key: String },
}

/// Parse [`DEFAULTS_YAML`].
pub fn embedded_defaults() -> Result<Configuration, ConfigError> {
    parse_yaml(DEFAULTS_YAML, "embedded defaults")
}

/// `<config_dir>/<name>-site.yaml`
pub fn site_file(name: &str, config_dir: &Path) -> PathBuf {
    config_dir.join(format!("{name}-site.yaml"))
}

pub fn load(
    name: &str,
    config_dir: &Path,
    defaults: &Configuration,
    preset: Option<&Configuration>,
    environment: &[(String, String)],
) -> Result<Configuration, ConfigError> {
    let mut config = defaults.clone();

    match preset {
        Some(preset) => {
            debug!(entries = preset.len(), "Using preset configuration instead of site file");
            config.merge_from(preset);
        }
        None => {
            let path = site_file(name, config_dir);
            if let Some(site) = read_site(&path)? {
                info!(path = %path.display(), entries = site.len(), "Loaded site configuration");
                config.merge_from(&site);
            }
        }
    }

    let overrides = env_overrides(name, environment);
    for key in overrides.keys() {
        info!(key, "Configuration overridden from environment");
    }
    config.merge_from(&overrides);
    Ok(config)
}

fn read_site(path: &Path) -> Result<Option<Configuration>, ConfigError> {
    if !path.exists() {
        warn!(path = %path.display(), "Site configuration not found, using defaults");
        return Ok(None);
    }
    if !path.is_file() {
        return Err(ConfigError::NotAFile(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_yaml(&text, &path.display().to_string()).map(Some)
}

/// Entries of `environment` addressing keys of container `name`. The dotted
/// spelling wins over the upper-snake one.
pub fn env_overrides(name: &str, environment: &[(String, String)]) -> Configuration {
    let dotted_prefix = format!("{name}.");
    let snake_prefix = format!("{}_", name.to_ascii_uppercase().replace(['.', '-'], "_"));

    let mut overrides = Configuration::new();
    for (key, value) in environment {
        if key.starts_with(&snake_prefix) && key.len() > snake_prefix.len() {
            let dotted = format!("{dotted_prefix}{}", key[snake_prefix.len()..].to_ascii_lowercase().replace('_', "."));
            overrides.set(dotted, value.as_str());
        }
    }
    for (key, value) in environment {
        if key.starts_with(&dotted_prefix) {
            overrides.set(key.as_str(), value.as_str());
        }
    }
    overrides
}

pub fn parse_yaml(text: &str, origin: &str) -> Result<Configuration, ConfigError> {
    let document: Value = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })?;
    let not_flat = |key: String| ConfigError::NotFlat {
        origin: origin.to_string(),
        key,
    };

    let mapping = match document {
        Value::Null => return Ok(Configuration::new()),
        Value::Mapping(mapping) => mapping,
        _ => return Err(not_flat("<document>".to_string())),
    };

    let mut config = Configuration::new();
    for (key, value) in mapping {
        let key = scalar(&key).ok_or_else(|| not_flat(format!("{key:?}")))?;
        let value = match &value {
            Value::Sequence(items) => items
                .iter()
                .map(|item| scalar(item).ok_or_else(|| not_flat(key.clone())))
                .collect::<Result<Vec<_>, _>>()?
                .join(","),
            other => scalar(other).ok_or_else(|| not_flat(key.clone()))?,
        };
        config.set(key, value);
    }
    Ok(config)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
