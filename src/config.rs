use std::collections::HashMap;
use std::fs;

use serde::Deserialize;

/// One entry of the `models:` map in `config.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub path: String,
    pub handler: String,
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub models: HashMap<String, ModelSpec>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("model {name:?} has workers = 0, must be >= 1")]
    ZeroWorkers { name: String },
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;

        for model in cfg.models.values() {
            if model.workers == 0 {
                return Err(ConfigError::ZeroWorkers {
                    name: model.name.clone(),
                });
            }
        }

        Ok(cfg)
    }
}

/// Loading strategy for `WorkerManager::initialize`; see spec §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStrategy {
    Parallel,
    Sequential,
}

impl LoadingStrategy {
    pub fn from_env() -> Self {
        match get_env("WORKERS_LOADING_STRATEGY", "parallel").as_str() {
            "sequential" => LoadingStrategy::Sequential,
            _ => LoadingStrategy::Parallel,
        }
    }
}

pub fn get_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn server_port() -> String {
    get_env("SERVER_PORT", "7766")
}

pub fn api_key() -> String {
    get_env("API_KEY", "")
}

pub fn config_path() -> String {
    get_env("CONFIG_PATH", "config.yaml")
}

pub fn worker_runtime() -> String {
    get_env("WORKER_RUNTIME", "python3")
}

pub fn metrics_display_frequency() -> Result<u64, std::num::ParseIntError> {
    get_env("METRICS_DISPLAY_FREQUENCY", "30").parse()
}
