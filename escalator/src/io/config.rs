//! Engine configuration stored as TOML.
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! tool_use_threshold = 2
//! human_review_threshold = 4
//!
//! [[validators]]
//! name = "required_fields"
//! params = { fields = ["answer"] }
//!
//! [[tools]]
//! name = "web_search"
//! invocation = { command = ["search-cli"] }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::retry_config::RetryConfig;
use crate::core::types::ToolDescriptor;
use crate::validators::Validator;
use crate::validators::registry::ValidatorRegistry;

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans. Missing sections default to
/// the stock retry policy with no validators and no tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    /// Validators in the order they run.
    pub validators: Vec<ValidatorSpec>,
    /// Tools attached from the tool-assisted stage on.
    pub tools: Vec<ToolDescriptor>,
}

/// A registered validator name plus its construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        for (idx, spec) in self.validators.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(anyhow!("validators[{idx}].name must be non-empty"));
            }
        }
        let mut seen = BTreeSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(anyhow!("tool names must be non-empty"));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(anyhow!("duplicate tool name {:?}", tool.name));
            }
        }
        Ok(())
    }

    /// Instantiate the configured validators, in order.
    pub fn build_validators(&self, registry: &ValidatorRegistry) -> Result<Vec<Validator>> {
        self.validators
            .iter()
            .enumerate()
            .map(|(idx, spec)| {
                registry
                    .create(&spec.name, &spec.params)
                    .with_context(|| format!("validators[{idx}]"))
            })
            .collect()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
