//! Configuration management for the caries scoring service

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Where the served classifier comes from
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// Resolve `name@alias` from the filesystem registry
    #[default]
    Registry,
    /// Constant-probability classifier, no registry access
    Stub,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Served model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Registered model name
    pub name: String,
    /// Version alias ("champion", "challenger") or a version number
    pub alias: String,
    #[serde(default)]
    pub backend: ModelBackend,
    /// Root directory of the filesystem registry
    #[serde(default = "default_registry_dir")]
    pub registry_dir: String,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Probability returned by the stub backend
    #[serde(default = "default_stub_probability")]
    pub stub_probability: f64,
}

fn default_registry_dir() -> String {
    "registry".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

fn default_stub_probability() -> f64 {
    0.3
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

/// Periodic metrics summary configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between summaries; 0 disables the reporter
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file plus `CARIES__*` overrides
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path plus `CARIES__*` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_env(path, env_overrides())
    }

    fn load_with_env<P: AsRef<Path>>(path: P, env: Environment) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(env)
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// `host:port` the server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// `CARIES__SECTION__KEY` environment variables
fn env_overrides() -> Environment {
    Environment::with_prefix("CARIES").separator("__")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9696,
            },
            model: ModelConfig {
                name: "mlops_project".to_string(),
                alias: "champion".to_string(),
                backend: ModelBackend::Registry,
                registry_dir: default_registry_dir(),
                onnx_threads: default_onnx_threads(),
                stub_probability: default_stub_probability(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            metrics: MetricsConfig::default(),
        }
    }
}
