use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::traits::MetadataFormatKind;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per listing request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            ledger_path: default_ledger_path(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("./data/harvest-ledger.json")
}
fn default_user_agent() -> String {
    concat!("metadata-harvester/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    crate::query::engine::DEFAULT_PAGE_SIZE
}

/// One harvested endpoint.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SiteConfig {
    pub title: String,
    pub url: String,
    pub metadata_format: MetadataFormatKind,
    #[serde(default)]
    pub set: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;

    if config.harvest.concurrency == 0 {
        return Err(ConfigError::Invalid(
            "harvest.concurrency must be >= 1".to_string(),
        ));
    }
    if config.harvest.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "harvest.timeout_secs must be >= 1".to_string(),
        ));
    }
    if config.search.page_size == 0 {
        return Err(ConfigError::Invalid(
            "search.page_size must be >= 1".to_string(),
        ));
    }

    for (i, site) in config.sites.iter().enumerate() {
        if site.title.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("sites[{i}].title is empty")));
        }
        match url::Url::parse(&site.url) {
            Ok(url) if url.host_str().is_some() => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "sites[{i}].url '{}' is not an absolute URL with a host",
                    site.url
                )))
            }
        }
        if config.sites[..i].iter().any(|other| other.title == site.title) {
            return Err(ConfigError::Invalid(format!(
                "Duplicate site title '{}'",
                site.title
            )));
        }
    }

    Ok(config)
}
