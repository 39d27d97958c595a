//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/parcelforge/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use parcelforge_plugins::{BootstrapOptions, LoaderOptions, ServiceOptions};
use parcelforge_runtime::DispatchOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub host: HostConfig,
    pub discovery: DiscoveryConfig,
    pub requests: RequestConfig,
    pub bootstrap: BootstrapConfig,
    /// Options passed through to providers, by name
    pub options: BTreeMap<String, Vec<String>>,
}

/// Host behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// Whether the host may prompt on stdin
    /// Default: true
    pub interactive: bool,
}

/// Where providers are looked for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Extra locations, scanned before the default ones
    pub locations: Vec<PathBuf>,
    /// Also scan the user and system provider directories
    /// Default: true
    pub include_default_locations: bool,
    /// Initialize providers when registered instead of on first use
    /// Default: false
    pub eager_initialize: bool,
}

/// Request execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequestConfig {
    /// Seconds before a running request is cancelled
    /// Default: 3600
    pub timeout_secs: u64,
}

/// Installing missing providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Default: true
    pub enabled: bool,
    /// Package provider that installs other providers
    /// Default: "Bootstrap"
    pub provider_name: String,
    /// Install directory; the user providers directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            interactive: true,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            locations: Vec::new(),
            include_default_locations: true,
            eager_initialize: false,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: parcelforge_runtime::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let defaults = BootstrapOptions::default();
        Self {
            enabled: defaults.enabled,
            provider_name: defaults.provider_name,
            destination: None,
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Returns `$XDG_CONFIG_HOME/parcelforge/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "raibid-labs", "parcelforge")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    fn default_config_content() -> &'static str {
        r#"# Parcelforge Host Configuration

[host]
# Log level: trace, debug, info, warn, error
# RUST_LOG overrides this when set.
log_level = "info"

# Whether the host may ask questions on stdin. A non-interactive host
# never installs missing providers.
interactive = true

[discovery]
# Extra locations to scan for provider modules, before the defaults.
# Each location is a directory of modules or a single module directory
# containing a manifest.toml.
locations = []

# Also scan $XDG_DATA_HOME/parcelforge/providers and the system
# provider directories.
include_default_locations = true

# Initialize providers as soon as they are registered.
eager_initialize = false

[requests]
# Running requests are cancelled after this many seconds.
timeout_secs = 3600

[bootstrap]
# Offer to install providers that are requested but not registered.
enabled = true

# The package provider used to find and install other providers.
provider_name = "Bootstrap"

# Install directory for bootstrapped providers.
# destination = "/path/to/providers"

# Options passed through to every provider call.
[options]
# Scope = ["CurrentUser"]
"#
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.host.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.host.log_level,
                valid_log_levels.join(", ")
            );
        }

        if self.requests.timeout_secs == 0 {
            anyhow::bail!("requests.timeout_secs must be greater than 0");
        }

        if self.bootstrap.provider_name.trim().is_empty() {
            anyhow::bail!("bootstrap.provider_name must not be empty");
        }

        Ok(())
    }

    /// Settings for the provider service.
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            locations: self
                .discovery
                .locations
                .iter()
                .map(|path| path.display().to_string())
                .collect(),
            include_default_locations: self.discovery.include_default_locations,
            loader: LoaderOptions {
                eager_initialize: self.discovery.eager_initialize,
            },
            dispatch: DispatchOptions {
                timeout: Some(Duration::from_secs(self.requests.timeout_secs)),
            },
            bootstrap: BootstrapOptions {
                enabled: self.bootstrap.enabled,
                provider_name: self.bootstrap.provider_name.clone(),
                destination: self.bootstrap.destination.clone(),
            },
        }
    }
}
