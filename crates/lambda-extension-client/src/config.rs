//! Configuration loading and endpoint derivation.
//!
//! Configuration is layered with figment and loaded from (in order of priority):
//! 1. Default values (compiled in)
//! 2. Config file: `/var/task/lambda-extension.toml` (optional)
//! 3. `AWS_LAMBDA_RUNTIME_API`, the host address set by Lambda
//! 4. Extension-specific environment variables (`LAMBDA_EXTENSION_*`,
//!    nested keys separated by `__`)
//!
//! | Variable | Config Path |
//! |----------|-------------|
//! | `AWS_LAMBDA_RUNTIME_API` | `runtime_api` |
//! | `LAMBDA_EXTENSION_EXTENSION_NAME` | `extension_name` |
//! | `LAMBDA_EXTENSION_TELEMETRY__ENABLED` | `telemetry.enabled` |
//! | `LAMBDA_EXTENSION_TELEMETRY__LISTENER_PORT` | `telemetry.listener_port` |

use crate::telemetry::{Buffering, DEFAULT_LISTENER_PORT, TelemetrySubscription, TelemetryType};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "/var/task/lambda-extension.toml";
const ENV_PREFIX: &str = "LAMBDA_EXTENSION_";
const DEFAULT_EXTENSION_NAME: &str = "lambda-extension-client";

/// Environment variable holding the host address (`host:port`).
pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

const EXTENSION_API_PATH: &str = "/2020-01-01/extension";
const TELEMETRY_API_PATH: &str = "/2022-07-01/telemetry";

/// Errors raised while loading configuration.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration source could not be parsed.
    #[error("failed to load configuration")]
    Load(#[source] Box<figment::Error>),

    /// The host address is not configured.
    #[error("AWS_LAMBDA_RUNTIME_API is not set")]
    MissingRuntimeApi,
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Main configuration struct for the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host address of the Extensions and Telemetry APIs.
    pub runtime_api: Option<String>,
    /// Name announced on registration. Lambda requires it to match the
    /// executable's file name.
    pub extension_name: String,
    /// Telemetry API subscription settings.
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_api: None,
            extension_name: default_extension_name(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration using a custom config file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if config_path.as_ref().exists() {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(host_env());
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Ok(figment.extract()?)
    }

    /// Derives the API endpoints from the host address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRuntimeApi`] when no host address is set.
    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        self.runtime_api
            .as_deref()
            .filter(|addr| !addr.is_empty())
            .map(Endpoints::from_runtime_api)
            .ok_or(ConfigError::MissingRuntimeApi)
    }

    /// Creates a new config builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Telemetry API subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Whether to subscribe to the Telemetry API.
    pub enabled: bool,
    /// Port of the local telemetry listener.
    pub listener_port: u16,
    /// Telemetry streams to subscribe to.
    pub types: Vec<TelemetryType>,
    /// Maximum records per batch.
    pub max_items: u32,
    /// Maximum batch size in bytes.
    pub max_bytes: u32,
    /// Maximum buffering time in milliseconds.
    pub timeout_ms: u32,
    /// Capacity of the channel between the listener and its consumer.
    pub buffer_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let buffering = Buffering::default();
        Self {
            enabled: true,
            listener_port: DEFAULT_LISTENER_PORT,
            types: vec![TelemetryType::Function, TelemetryType::Platform],
            max_items: buffering.max_items,
            max_bytes: buffering.max_bytes,
            timeout_ms: buffering.timeout_ms,
            buffer_size: 64,
        }
    }
}

impl TelemetryConfig {
    /// Builds the subscription document for a listener at `destination_uri`.
    pub fn subscription(&self, destination_uri: impl Into<String>) -> TelemetrySubscription {
        TelemetrySubscription::new(destination_uri)
            .with_types(self.types.clone())
            .with_buffering(Buffering {
                max_items: self.max_items,
                max_bytes: self.max_bytes,
                timeout_ms: self.timeout_ms,
            })
    }
}

/// Addresses of the host APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Extensions API base, e.g. `http://127.0.0.1:9001/2020-01-01/extension`.
    pub extension: String,
    /// Telemetry API endpoint, e.g. `http://127.0.0.1:9001/2022-07-01/telemetry`.
    pub telemetry: String,
}

impl Endpoints {
    /// Derives both endpoints from a host address.
    ///
    /// Accepts the bare `host:port` form Lambda sets as well as a full
    /// `http://` URL.
    pub fn from_runtime_api(runtime_api: &str) -> Self {
        let host = runtime_api.trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };

        Self {
            extension: format!("{base}{EXTENSION_API_PATH}"),
            telemetry: format!("{base}{TELEMETRY_API_PATH}"),
        }
    }

    /// URL of the registration endpoint.
    pub fn register_url(&self) -> String {
        format!("{}/register", self.extension)
    }

    /// URL of the next-event endpoint.
    pub fn next_event_url(&self) -> String {
        format!("{}/event/next", self.extension)
    }
}

/// Builder for constructing configuration programmatically.
#[must_use = "builders do nothing unless .build() is called"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a new config builder with default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Sets the host address.
    pub fn runtime_api(mut self, runtime_api: impl Into<String>) -> Self {
        self.config.runtime_api = Some(runtime_api.into());
        self
    }

    /// Sets the extension name.
    pub fn extension_name(mut self, name: impl Into<String>) -> Self {
        self.config.extension_name = name.into();
        self
    }

    /// Enables or disables the Telemetry API subscription.
    pub fn telemetry(mut self, enabled: bool) -> Self {
        self.config.telemetry.enabled = enabled;
        self
    }

    /// Sets the telemetry listener port.
    pub fn listener_port(mut self, port: u16) -> Self {
        self.config.telemetry.listener_port = port;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial config carrying the host address set by Lambda.
#[derive(Debug, Default, Serialize)]
struct HostEnv {
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime_api: Option<String>,
}

fn host_env() -> Serialized<HostEnv> {
    Serialized::defaults(HostEnv {
        runtime_api: std::env::var(RUNTIME_API_ENV)
            .ok()
            .filter(|addr| !addr.is_empty()),
    })
}

fn default_extension_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION_NAME.to_string())
}
