//! Settings loaded from a TOML file

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mail::{RelayDomains, SaverConfig};

pub const DEFAULT_PORT: &str = "25";
pub const DEFAULT_HOSTNAME: &str = "fakesmtp.local";
pub const DEFAULT_OUTPUT_DIR: &str = "received-emails";
pub const DEFAULT_EMAIL_SUFFIX: &str = "eml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot write settings file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Every key is optional in the file; missing keys keep their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kept as typed by the user, validated when the server starts
    pub port: String,
    pub bind_address: Option<String>,
    pub hostname: String,
    pub output_dir: PathBuf,
    pub email_suffix: String,
    pub memory_mode: bool,
    pub relay_domains: Option<Vec<String>>,
    pub start_server: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_owned(),
            bind_address: None,
            hostname: DEFAULT_HOSTNAME.to_owned(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            email_suffix: DEFAULT_EMAIL_SUFFIX.to_owned(),
            memory_mode: false,
            relay_domains: None,
            start_server: false,
        }
    }
}

/// Keys written back by [`Config::save`]
#[derive(Serialize)]
struct UserSettings<'a> {
    port: &'a str,
    output_dir: &'a Path,
}

impl Config {
    /// Read `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults.");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source,
                });
            }
        };

        Ok(toml::from_str(&content)?)
    }

    /// Write the last user settings (port and output directory) to `path`
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string(&UserSettings {
            port: &self.port,
            output_dir: &self.output_dir,
        })?;

        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_owned(),
            source,
        })
    }

    pub fn relay_domains(&self) -> RelayDomains {
        RelayDomains::from_option(self.relay_domains.clone())
    }

    pub fn saver_config(&self) -> SaverConfig {
        SaverConfig {
            save_dir: self.output_dir.clone(),
            suffix: self.email_suffix.clone(),
            memory_mode: self.memory_mode,
            relay_domains: self.relay_domains(),
            ..SaverConfig::default()
        }
    }
}
