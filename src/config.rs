use std::collections::HashMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};

use crate::capacity::CapacityRule;
use crate::projection::Crs;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub opportunity: OpportunityColumns,
    /// Per-city cleaning rules; replaces the built-in rules for that city.
    #[serde(default)]
    pub capacity_rules: HashMap<String, Vec<CapacityRule>>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub sites: GeometrySource,
    pub pollution: GeometrySource,
    pub boundaries: GeometrySource,
    pub schools: GeometrySource,
    pub parks: GeometrySource,
    pub opportunity: GeometrySource,
    pub walk_scores: PathBuf,
    pub matches: PathBuf,
}

/// A `.shp` or `.geojson` file and the CRS it is stored in.
#[derive(Debug, Deserialize, Clone)]
pub struct GeometrySource {
    pub path: PathBuf,
    #[serde(default)]
    pub crs: Crs,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpportunityColumns {
    pub id: String,
    pub category: Option<String>,
    pub score: Option<String>,
}

impl Default for OpportunityColumns {
    fn default() -> Self {
        Self {
            id: "fips".to_string(),
            category: Some("oppcat".to_string()),
            score: Some("oppscore".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("output") }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}
