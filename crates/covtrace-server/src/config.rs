//! Settings file
//!
//! Command-line flags cover the process; the optional TOML file covers the
//! collaborators with structured configuration (resolver providers and the
//! directory publisher). Everything is read once at startup.

use covtrace_resolver::{providers::HttpResolver, ProviderConfig, ResolveError, ResolverRegistry};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::worker::{
    DirectoryPublisher, DisabledPublisher, PowDirectoryPublisher, PublishError, DEFAULT_DIFFICULTY,
    DEFAULT_DIRECTORY_ENDPOINT, MAX_DIFFICULTY,
};

/// Resolution endpoint of the default `bryk` provider
pub const DEFAULT_BRYK_ENDPOINT: &str = "https://did.bryk.io/v1/retrieve?subject={did}";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid resolver configuration: {0}")]
    Resolver(#[from] ResolveError),

    #[error("Invalid directory configuration: {0}")]
    Directory(#[from] PublishError),

    #[error("Directory difficulty {0} exceeds the 256-bit digest")]
    Difficulty(u32),
}

/// Contents of the settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub resolver: ResolverSettings,
    pub directory: DirectorySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub providers: Vec<ProviderConfig>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            providers: vec![ProviderConfig::new("bryk", DEFAULT_BRYK_ENDPOINT)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    pub enabled: bool,
    pub endpoint: String,
    pub difficulty: u32,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_DIRECTORY_ENDPOINT.to_string(),
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path` if given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Registry with an HTTP provider per configured method
    pub fn build_resolver(&self) -> Result<ResolverRegistry, ConfigError> {
        let mut registry = ResolverRegistry::new();
        for provider in &self.resolver.providers {
            registry.register(HttpResolver::new(provider.clone())?);
        }
        Ok(registry)
    }

    /// The configured directory publisher
    pub fn build_directory(&self) -> Result<Arc<dyn DirectoryPublisher>, ConfigError> {
        if !self.directory.enabled {
            return Ok(Arc::new(DisabledPublisher));
        }
        if self.directory.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Difficulty(self.directory.difficulty));
        }
        let publisher = PowDirectoryPublisher::new(self.directory.endpoint.clone())?
            .with_difficulty(self.directory.difficulty);
        Ok(Arc::new(publisher))
    }
}
