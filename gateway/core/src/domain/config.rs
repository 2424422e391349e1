// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration
//!
//! Ordered string key/value map shared by the container and its services.
//! Keys are scoped by component prefix (`<container>.<service>.<key>`);
//! values may reference other keys as `${key}`, resolved against the same
//! configuration first and the process environment second.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Key/value contract consumed by every service

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of substitution passes applied to a single value.
pub const MAX_SUBSTITUTION_DEPTH: usize = 20;

/// Placeholder printed instead of sensitive values.
pub const MASKED_VALUE: &str = "*MASKED*";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    entries: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Raw entries, without substitution.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Value as stored, without substitution.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Value with `${...}` references resolved.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|value| self.substitute(value))
    }

    /// Resolved value with surrounding whitespace removed; blank values
    /// count as absent.
    pub fn get_trimmed(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get_trimmed(key).unwrap_or_else(|| default.to_string())
    }

    /// Comma separated list; items are trimmed and empty items dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Copy every entry of `other` into this configuration, overwriting.
    pub fn merge_from(&mut self, other: &Configuration) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Copy entries of `other` whose keys are not present yet.
    pub fn inject_defaults(&mut self, other: &Configuration) {
        for (key, value) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Entries starting with `prefix`, with the prefix stripped and values
    /// resolved against this (full) configuration.
    pub fn scoped(&self, prefix: &str) -> Configuration {
        let entries = self
            .entries
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_string(), self.substitute(value)))
            })
            .collect();
        Configuration { entries }
    }

    /// Copy with every value resolved.
    pub fn resolved(&self) -> Configuration {
        let entries = self
            .entries
            .iter()
            .map(|(key, value)| (key.clone(), self.substitute(value)))
            .collect();
        Configuration { entries }
    }

    /// Raw entries with sensitive values replaced, for logging and display.
    pub fn masked(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(key, value)| {
                let shown = if is_sensitive(key) {
                    MASKED_VALUE.to_string()
                } else {
                    value.clone()
                };
                (key.clone(), shown)
            })
            .collect()
    }

    fn substitute(&self, value: &str) -> String {
        let mut current = value.to_string();
        for _ in 0..MAX_SUBSTITUTION_DEPTH {
            if !current.contains("${") {
                break;
            }
            let next = self.expand_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn expand_once(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.lookup(name) {
                        Some(replacement) => out.push_str(&replacement),
                        None => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.entries
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }
}

impl FromIterator<(String, String)> for Configuration {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Keys whose values never appear in logs or dumps.
pub fn is_sensitive(key: &str) -> bool {
    key.ends_with(".password") || key.ends_with(".secret")
}
