use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::Field;
use crate::policy::{FieldUsage, FieldUsages, UsageMode};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub thumbnails: ThumbnailsConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldPolicyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThumbnailsConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LookupConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            fixture_path: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FieldPolicyConfig {
    pub mode: UsageMode,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl Config {
    /// The requested field policies, with names resolved.
    pub fn field_usages(&self) -> Result<FieldUsages> {
        let mut usages = FieldUsages::new();
        for (name, policy) in &self.fields {
            let field: Field = name
                .parse()
                .with_context(|| format!("Invalid [fields.{}] entry", name))?;
            usages.put(FieldUsage::new(field, policy.mode, policy.selected));
        }
        Ok(usages)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate field policies
    let usages = config.field_usages()?;
    for usage in usages.values() {
        if let (Field::Scalar(_), UsageMode::AddExtra) = (usage.field, usage.mode) {
            tracing::warn!(
                "fields.{}: add_extra only applies to authors and series; the field will not be merged",
                usage.field
            );
        }
    }

    match config.lookup.provider.as_str() {
        "disabled" => {}
        "fixture" => {
            if config.lookup.fixture_path.is_none() {
                anyhow::bail!("lookup.fixture_path must be specified when provider is 'fixture'");
            }
        }
        other => anyhow::bail!(
            "Unknown lookup provider: '{}'. Must be disabled or fixture.",
            other
        ),
    }

    Ok(config)
}
