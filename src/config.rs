use crate::application::ParameterStore;
use crate::gtag::{DEFAULT_MODULE_ID, MEASUREMENT_ID_PARAMETER};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading host config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing host config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Runtime configuration for the page server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub page_root: PathBuf,
    pub host_config: Option<PathBuf>,
    pub enable_cors: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("failed to parse BIND_ADDR")?;

        let page_root =
            PathBuf::from(std::env::var("PAGE_ROOT").unwrap_or_else(|_| "pages".to_string()));

        let host_config = std::env::var("GTAG_CONFIG").ok().map(PathBuf::from);

        let enable_cors = std::env::var("ENABLE_CORS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            bind_addr,
            page_root,
            host_config,
            enable_cors,
        })
    }
}

/// Application parameters and module declarations, usually read from TOML:
///
/// ```toml
/// [parameters]
/// GoogleAnalyticsMeasurementId = "G-XXXXXXXX"
///
/// [[modules]]
/// id = "GAnalyticsModule"
/// class = "GAnalyticsModule"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub parameters: ParameterStore,
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// One analytics module, with the measurement id parameter seeded from
    /// `GA_MEASUREMENT_ID` when that variable is set.
    pub fn from_env() -> Self {
        let mut parameters = ParameterStore::new();
        if let Ok(id) = std::env::var("GA_MEASUREMENT_ID") {
            parameters.insert(MEASUREMENT_ID_PARAMETER, id);
        }
        Self {
            parameters,
            modules: vec![ModuleConfig::new(DEFAULT_MODULE_ID, DEFAULT_MODULE_ID)],
        }
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::from_env()),
        }
    }
}

/// A `[[modules]]` entry. Every key other than `id` and `class` is a module
/// property, applied by name during module init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: String,
    #[serde(default = "default_module_class")]
    pub class: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, String>,
}

impl ModuleConfig {
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

fn default_module_class() -> String {
    DEFAULT_MODULE_ID.to_string()
}
