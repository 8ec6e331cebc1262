//! Configuration management for parx.
//!
//! This module defines the structure of the `parx.yml` configuration file
//! and turns it into the process specs handed to the supervisor. YAML is the
//! default format; `.json` and `.toml` files are parsed by extension.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::process::{auto_name, ProcessSpec};

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Processes to run in parallel.
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}

/// Configuration for a single process.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Display name; generated from the position when empty.
    #[serde(default)]
    pub name: String,
    /// Shell running the command; the run's default shell when empty.
    #[serde(default)]
    pub shell: String,
    /// Command line passed to the shell.
    pub command: String,
    /// Environment variables set for this process only.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
    Toml,
}

impl Format {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
            _ => Format::Yaml,
        }
    }
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read config file {}", path.display()))?;
    parse_config(&raw, Format::from_path(path))
        .with_context(|| format!("could not parse config file {}", path.display()))
}

fn parse_config(raw: &str, format: Format) -> Result<Config> {
    let config: Config = match format {
        Format::Yaml => serde_yaml::from_str(raw)?,
        Format::Json => serde_json::from_str(raw)?,
        Format::Toml => toml::from_str(raw)?,
    };
    Ok(config)
}

impl Config {
    /// Converts the document into process specs, filling in defaults.
    pub fn into_specs(self, default_shell: &str) -> Result<Vec<ProcessSpec>> {
        let specs: Vec<ProcessSpec> = self
            .processes
            .into_iter()
            .enumerate()
            .map(|(idx, process)| {
                let name = if process.name.is_empty() {
                    auto_name(idx)
                } else {
                    process.name
                };
                let shell = if process.shell.is_empty() {
                    default_shell.to_string()
                } else {
                    process.shell
                };
                ProcessSpec::new(name, shell, process.command, process.env)
            })
            .collect();
        ensure_unique_names(&specs)?;
        Ok(specs)
    }
}

pub fn ensure_unique_names(specs: &[ProcessSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            bail!("duplicate process name: {}", spec.name);
        }
    }
    Ok(())
}
