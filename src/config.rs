use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Environment variable {0} must be set")]
    MissingEnv(&'static str),
}

/// External CLIs the tool drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Cf,
    Bosh,
    Om,
    Pivnet,
    Replicator,
    Curl,
}

impl Tool {
    pub fn default_program(self) -> &'static str {
        match self {
            Tool::Cf => "cf",
            Tool::Bosh => "bosh",
            Tool::Om => "om",
            Tool::Pivnet => "pivnet",
            Tool::Replicator => "replicator",
            Tool::Curl => "curl",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Binaries {
    pub cf: Option<String>,
    pub bosh: Option<String>,
    pub om: Option<String>,
    pub pivnet: Option<String>,
    pub replicator: Option<String>,
    pub curl: Option<String>,
}

impl Binaries {
    pub fn program(&self, tool: Tool) -> &str {
        let configured = match tool {
            Tool::Cf => &self.cf,
            Tool::Bosh => &self.bosh,
            Tool::Om => &self.om,
            Tool::Pivnet => &self.pivnet,
            Tool::Replicator => &self.replicator,
            Tool::Curl => &self.curl,
        };
        configured.as_deref().unwrap_or(tool.default_program())
    }
}

/// Fallback values for flags that were given neither on the command line
/// nor through the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    pub batch_size: Option<usize>,
    pub delay: Option<u64>,
    pub deployment: Option<String>,
    pub network: Option<String>,
    #[serde(default)]
    pub azs: Vec<String>,
    pub vm_type: Option<String>,
    pub cell_instance_group: Option<String>,
    pub stemcell_os: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub binaries: Binaries,
    #[serde(default)]
    pub defaults: Defaults,
}

impl Settings {
    pub const DEFAULT_BATCH_SIZE: usize = 5;
    pub const DEFAULT_DELAY_SECS: u64 = 30;
    pub const DEFAULT_NETWORK: &'static str = "default";
    pub const DEFAULT_CELL_GROUP: &'static str = "isolated_diego_cell";
    pub const DEFAULT_STEMCELL_OS: &'static str = "ubuntu-jammy";

    /// Load settings from a TOML file, or built-in defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Settings::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn program(&self, tool: Tool) -> &str {
        self.binaries.program(tool)
    }

    pub fn batch_size(&self, flag: Option<usize>) -> usize {
        flag.or(self.defaults.batch_size)
            .unwrap_or(Self::DEFAULT_BATCH_SIZE)
            .max(1)
    }

    pub fn delay(&self, flag: Option<u64>) -> u64 {
        flag.or(self.defaults.delay)
            .unwrap_or(Self::DEFAULT_DELAY_SECS)
    }

    pub fn network(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.defaults.network.clone())
            .unwrap_or_else(|| Self::DEFAULT_NETWORK.to_string())
    }

    pub fn azs(&self, flag: Vec<String>) -> Vec<String> {
        if flag.is_empty() {
            self.defaults.azs.clone()
        } else {
            flag
        }
    }

    pub fn vm_type(&self, flag: Option<String>) -> Option<String> {
        flag.or_else(|| self.defaults.vm_type.clone())
    }

    /// The deployment name, falling back to the config file and then to
    /// `fallback` (derived from the segment name by the caller).
    pub fn deployment(&self, flag: Option<String>, fallback: impl FnOnce() -> String) -> String {
        flag.or_else(|| self.defaults.deployment.clone())
            .unwrap_or_else(fallback)
    }

    pub fn cell_instance_group(&self) -> &str {
        self.defaults
            .cell_instance_group
            .as_deref()
            .unwrap_or(Self::DEFAULT_CELL_GROUP)
    }

    pub fn stemcell_os(&self) -> &str {
        self.defaults
            .stemcell_os
            .as_deref()
            .unwrap_or(Self::DEFAULT_STEMCELL_OS)
    }
}

/// Read a credential from the environment, treating an empty value as unset.
pub fn env_var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub fn require_env(name: &'static str) -> Result<String, ConfigError> {
    env_var(name).ok_or(ConfigError::MissingEnv(name))
}

/// Fail unless every named variable is set.
pub fn require_all(names: &[&'static str]) -> Result<(), ConfigError> {
    for name in names {
        require_env(name)?;
    }
    Ok(())
}

pub const OM_ENV: &[&str] = &["OM_TARGET", "OM_USERNAME", "OM_PASSWORD"];
pub const BOSH_ENV: &[&str] = &["BOSH_ENVIRONMENT", "BOSH_CLIENT", "BOSH_CLIENT_SECRET"];
