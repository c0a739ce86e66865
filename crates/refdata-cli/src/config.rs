use anyhow::Result;
use clap::ValueEnum;
use refdata_cache::{FreshnessConfig, DEFAULT_VERSION_FIELD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Used in messages and as the default CSV file stem
    pub dataset_name: String,
    /// File holding the primary data query
    pub data_query: PathBuf,
    /// File holding the version probe query
    pub probe_query: PathBuf,
    pub version_field: String,
    /// JSON result-set document served as the warehouse
    pub source: PathBuf,
    pub probe_ttl_secs: Option<u64>,
    pub query_timeout_secs: u64,
    pub max_entries: usize,
    pub show_timing: bool,
    /// Rows shown in table output before truncating
    pub max_rows: usize,
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset_name: "bnf_code_to_dmd_map".to_string(),
            data_query: PathBuf::from("sql/ome.sql"),
            probe_query: PathBuf::from("sql/max_month.sql"),
            version_field: DEFAULT_VERSION_FIELD.to_string(),
            source: PathBuf::from("warehouse.json"),
            probe_ttl_secs: None,
            query_timeout_secs: 30,
            max_entries: 1000,
            show_timing: true,
            max_rows: 1000,
            output_format: OutputFormat::Table,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Cache settings for the given probe query text
    pub fn freshness_config(&self, probe_query: impl Into<String>) -> FreshnessConfig {
        let config = FreshnessConfig::new(probe_query)
            .with_version_field(self.version_field.clone())
            .with_max_entries(self.max_entries);
        match self.probe_ttl_secs {
            Some(secs) => config.with_probe_ttl(Duration::from_secs(secs)),
            None => config,
        }
    }
}
