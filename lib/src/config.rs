//! Runtime configuration.

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use url::Url;

use crate::device::Credential;

fn default_batch_size() -> usize {
    10
}

/// Runtime parameters, merged from the configuration file and
/// command-line overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Concurrent workers in the dispatch pool.
    pub workers: usize,
    /// Locations this process manages. Empty manages everything.
    pub locations: Vec<String>,
    /// Act on assets regardless of their location.
    pub ignore_location: bool,
    /// Log what would happen without touching any device.
    pub dry_run: bool,
    /// Resource names to apply instead of each device's full set.
    pub resources: Vec<String>,
    /// Credentials tried in order when logging in.
    pub credentials: Vec<Credential>,
    /// Resolve `vault:` placeholders in credentials at startup.
    pub secrets_from_vault: bool,
    pub vault: Option<VaultConfig>,
    /// Certificate signer API key, or a `vault:` placeholder for it.
    pub signer_key: Option<String>,
    pub inventory: InventoryConfig,
    pub metrics: Option<MetricsConfig>,
    /// Templated configuration document. Defaults to
    /// `configuration.yml` next to the configuration file.
    pub configuration_file: Option<Utf8PathBuf>,
    /// Templated one-time setup document. Defaults to `setup.yml`
    /// next to the configuration file.
    pub setup_file: Option<Utf8PathBuf>,
    /// Asset filters, set from command-line flags only.
    #[serde(skip)]
    pub filter: FilterParams,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            workers: 10,
            locations: Vec::new(),
            ignore_location: false,
            dry_run: false,
            resources: Vec::new(),
            credentials: Vec::new(),
            secrets_from_vault: false,
            vault: None,
            signer_key: None,
            inventory: InventoryConfig::default(),
            metrics: None,
            configuration_file: None,
            setup_file: None,
            filter: FilterParams::default(),
        }
    }
}

impl Params {
    /// Loads parameters from a YAML file. Template documents default
    /// to siblings of that file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or decoded.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
        let mut params: Self =
            serde_yaml::from_str(&raw).with_context(|| format!("failed to decode {path}"))?;

        let dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
        if params.configuration_file.is_none() {
            params.configuration_file = Some(dir.join("configuration.yml"));
        }
        if params.setup_file.is_none() {
            params.setup_file = Some(dir.join("setup.yml"));
        }
        Ok(params)
    }
}

/// Where assets come from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// One of `catalog`, `csv`, `enc` or `ip_list`.
    pub source: String,
    pub catalog: Option<CatalogConfig>,
    pub csv: Option<CsvConfig>,
    pub enc: Option<EncConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the asset catalog service.
    pub url: Url,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvConfig {
    pub file: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncConfig {
    /// External node classifier executable.
    pub bin: Utf8PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub host: String,
    pub port: u16,
    /// Prepended to every metric path.
    pub prefix: String,
    pub flush_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2003,
            prefix: "steward".to_string(),
            flush_interval_secs: 15,
        }
    }
}

/// Secret store settings for credential placeholders.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    pub address: Url,
    /// File holding the access token. Falls back to the VAULT_TOKEN
    /// environment variable.
    #[serde(default)]
    pub token_file: Option<Utf8PathBuf>,
}

/// Asset filters applied at the inventory source.
#[derive(Debug, Clone, Default)]
pub struct FilterParams {
    pub all: bool,
    pub chassis: bool,
    pub servers: bool,
    /// Comma-separated serials to act on.
    pub serials: Option<String>,
    /// Comma-separated addresses to act on.
    pub ips: Option<String>,
}

impl FilterParams {
    #[must_use]
    pub fn serial_list(&self) -> Vec<String> {
        split_csv(self.serials.as_deref())
    }

    #[must_use]
    pub fn ip_list(&self) -> Vec<String> {
        split_csv(self.ips.as_deref())
    }
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect()
}
